use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading the node's TLS material.
#[derive(Debug, Error)]
pub enum Error {
    /// A material file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// File that failed.
        path: PathBuf,

        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The certificate file held no certificates.
    #[error("no certificate found in {0}")]
    NoCertificate(PathBuf),

    /// The certificate carries no DNS subject alternative name.
    #[error("certificate has no DNS subject alternative name")]
    NoDnsName,

    /// The key file held no private key.
    #[error("no private key found in {0}")]
    NoPrivateKey(PathBuf),

    /// Rustls rejected the material.
    #[error(transparent)]
    Rustls(#[from] rustls::Error),

    /// The DNS name in the certificate is not a valid server name.
    #[error("invalid server name: {0}")]
    ServerName(#[from] rustls_pki_types::InvalidDnsNameError),

    /// A certificate verifier could not be built.
    #[error(transparent)]
    Verifier(#[from] rustls::server::VerifierBuilderError),

    /// The certificate could not be parsed.
    #[error("failed to parse certificate: {0}")]
    X509(String),
}
