use std::{path::Path, sync::Arc};

use {tokio_tungstenite::Connector, tracing::debug};

use crate::Error;

/// Build a TLS connector trusting the system roots plus an optional extra CA
/// bundle (for self-signed dashboard servers).
pub fn build_tls_connector(ca_cert: Option<&Path>) -> Result<Connector, Error> {
    // Already installed on reconnects.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let mut root_store = rustls::RootCertStore::empty();

    let native = rustls_native_certs::load_native_certs();
    for err in &native.errors {
        debug!(error = %err, "skipping unreadable system certificate");
    }
    for cert in native.certs {
        let _ = root_store.add(cert);
    }

    if let Some(path) = ca_cert {
        let added = add_pem_certs(&mut root_store, path)?;
        debug!(path = %path.display(), added, "loaded extra CA bundle");
    }

    let config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    Ok(Connector::Rustls(Arc::new(config)))
}

fn add_pem_certs(root_store: &mut rustls::RootCertStore, path: &Path) -> Result<usize, Error> {
    let pem_data = std::fs::read(path)?;
    let mut reader = std::io::BufReader::new(pem_data.as_slice());
    let mut added = 0;
    for cert in rustls_pemfile::certs(&mut reader) {
        root_store
            .add(cert?)
            .map_err(|e| Error::Tls(format!("{}: {e}", path.display())))?;
        added += 1;
    }
    if added == 0 {
        return Err(Error::Tls(format!(
            "{}: no certificates found",
            path.display()
        )));
    }
    Ok(added)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, std::io::Write};

    #[test]
    fn missing_ca_file_is_an_error() {
        let err = build_tls_connector(Some(Path::new("/nonexistent/ca.pem"))).err();
        assert!(matches!(err, Some(Error::Io(_))));
    }

    #[test]
    fn ca_file_without_certificates_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not a certificate").unwrap();
        let err = build_tls_connector(Some(file.path())).err();
        assert!(matches!(err, Some(Error::Tls(msg)) if msg.contains("no certificates")));
    }
}
