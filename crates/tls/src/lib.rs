//! Loads the cluster's shared TLS identity and builds the mutually
//! authenticated client and server configurations used between members.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod verifier;

pub use error::Error;

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::client::WebPkiServerVerifier;
use rustls::crypto::CryptoProvider;
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use tracing::{debug, info};
use verifier::PinnedNameVerifier;
use x509_parser::extensions::GeneralName;

/// File name of the PEM certificate inside the material directory.
pub const CERT_FILE: &str = "tls.crt";

/// File name of the PEM private key inside the material directory.
pub const KEY_FILE: &str = "tls.key";

/// Certificate and key shared by every member of the cluster. The certificate
/// doubles as the sole trust root, and its first DNS name is what every peer
/// is verified against.
#[derive(Debug)]
pub struct TlsIdentity {
    cert_chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    server_name: ServerName<'static>,
    provider: Arc<CryptoProvider>,
}

impl TlsIdentity {
    /// Loads `tls.crt` and `tls.key` from `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if either file is missing or unparseable, or if the
    /// certificate has no DNS subject alternative name.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self, Error> {
        let dir = dir.as_ref();
        let cert_path = dir.join(CERT_FILE);
        let key_path = dir.join(KEY_FILE);

        let cert_chain = read_certs(&cert_path)?;
        let key = read_key(&key_path)?;

        let identity = Self::from_parts(cert_chain, key)?;

        info!(
            cert = %cert_path.display(),
            server_name = ?identity.server_name,
            "loaded tls identity"
        );

        Ok(identity)
    }

    /// Builds an identity from already decoded material.
    ///
    /// # Errors
    ///
    /// Returns an error if the chain is empty or the leaf has no DNS name.
    pub fn from_parts(
        cert_chain: Vec<CertificateDer<'static>>,
        key: PrivateKeyDer<'static>,
    ) -> Result<Self, Error> {
        let leaf = cert_chain
            .first()
            .ok_or_else(|| Error::NoCertificate(PathBuf::from(CERT_FILE)))?;

        let dns_name = first_dns_name(leaf)?;
        let server_name = ServerName::try_from(dns_name)?;

        Ok(Self {
            cert_chain,
            key,
            server_name,
            provider: Arc::new(rustls::crypto::aws_lc_rs::default_provider()),
        })
    }

    /// The name every peer certificate is verified against.
    #[must_use]
    pub const fn server_name(&self) -> &ServerName<'static> {
        &self.server_name
    }

    fn roots(&self) -> Result<Arc<RootCertStore>, Error> {
        let mut roots = RootCertStore::empty();

        for cert in &self.cert_chain {
            roots.add(cert.clone())?;
        }

        Ok(Arc::new(roots))
    }

    /// Server side configuration: presents the identity and requires clients
    /// to present a certificate chaining to the same root.
    ///
    /// # Errors
    ///
    /// Returns an error if rustls rejects the material.
    pub fn server_config(&self) -> Result<ServerConfig, Error> {
        let client_verifier =
            WebPkiClientVerifier::builder_with_provider(self.roots()?, self.provider.clone())
                .build()?;

        let mut config = ServerConfig::builder_with_provider(self.provider.clone())
            .with_safe_default_protocol_versions()?
            .with_client_cert_verifier(client_verifier)
            .with_single_cert(self.cert_chain.clone(), self.key.clone_key())?;
        config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

        debug!("built mutual tls server config");

        Ok(config)
    }

    /// Client side configuration: presents the identity and verifies servers
    /// against the shared root under the certificate's own DNS name.
    ///
    /// # Errors
    ///
    /// Returns an error if rustls rejects the material.
    pub fn client_config(&self) -> Result<ClientConfig, Error> {
        let server_verifier =
            WebPkiServerVerifier::builder_with_provider(self.roots()?, self.provider.clone())
                .build()?;

        let verifier = PinnedNameVerifier::new(server_verifier, self.server_name.clone());

        let mut config = ClientConfig::builder_with_provider(self.provider.clone())
            .with_safe_default_protocol_versions()?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(verifier))
            .with_client_auth_cert(self.cert_chain.clone(), self.key.clone_key())?;
        config.alpn_protocols = vec![b"http/1.1".to_vec()];

        debug!("built mutual tls client config");

        Ok(config)
    }
}

fn read_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, Error> {
    let file = File::open(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;

    if certs.is_empty() {
        return Err(Error::NoCertificate(path.to_path_buf()));
    }

    Ok(certs)
}

fn read_key(path: &Path) -> Result<PrivateKeyDer<'static>, Error> {
    let file = File::open(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;

    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| Error::NoPrivateKey(path.to_path_buf()))
}

fn first_dns_name(cert: &CertificateDer<'_>) -> Result<String, Error> {
    let (_, parsed) = x509_parser::parse_x509_certificate(cert.as_ref())
        .map_err(|e| Error::X509(e.to_string()))?;

    let san = parsed
        .subject_alternative_name()
        .map_err(|e| Error::X509(e.to_string()))?
        .ok_or(Error::NoDnsName)?;

    san.value
        .general_names
        .iter()
        .find_map(|name| match name {
            GeneralName::DNSName(dns) => Some((*dns).to_string()),
            _ => None,
        })
        .ok_or(Error::NoDnsName)
}
