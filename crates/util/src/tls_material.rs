use std::io;
use std::path::Path;

/// Writes a self-signed `tls.crt`/`tls.key` pair for `names` into `dir`.
///
/// # Errors
///
/// Returns an error if generation fails or the files cannot be written.
pub fn write_self_signed(dir: impl AsRef<Path>, names: &[&str]) -> io::Result<()> {
    let names = names.iter().map(ToString::to_string).collect::<Vec<_>>();

    let certified = rcgen::generate_simple_self_signed(names).map_err(io::Error::other)?;

    std::fs::write(dir.as_ref().join("tls.crt"), certified.cert.pem())?;
    std::fs::write(
        dir.as_ref().join("tls.key"),
        certified.key_pair.serialize_pem(),
    )?;

    Ok(())
}
