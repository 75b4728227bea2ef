//! TLS setup for the default transport.
//!
//! Native roots are read from the OS store at most once per process; the
//! lookup is slow on some platforms and every client would otherwise repeat it.

use crate::config::TlsRootConfig;
use crate::error::HttpError;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use rustls_pki_types::CertificateDer;
use std::sync::{Arc, OnceLock};

static NATIVE_ROOTS: OnceLock<Vec<CertificateDer<'static>>> = OnceLock::new();

#[cfg(test)]
static NATIVE_LOADS: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);

fn load_native_roots() -> Vec<CertificateDer<'static>> {
    #[cfg(test)]
    NATIVE_LOADS.fetch_add(1, std::sync::atomic::Ordering::SeqCst);

    let loaded = rustls_native_certs::load_native_certs();
    for err in &loaded.errors {
        tracing::warn!(error = %err, "failed to read a native root certificate");
    }

    if loaded.certs.is_empty() {
        tracing::warn!("OS certificate store returned no root certificates");
    } else {
        tracing::debug!(count = loaded.certs.len(), "native root certificates loaded");
    }
    loaded.certs
}

/// Native root certificates, loaded lazily and cached for the process lifetime.
pub(crate) fn native_root_certs() -> &'static [CertificateDer<'static>] {
    NATIVE_ROOTS.get_or_init(load_native_roots)
}

/// Process-wide default crypto provider if one was installed, aws-lc-rs otherwise.
///
/// Never installs a global default itself.
pub(crate) fn crypto_provider() -> Arc<rustls::crypto::CryptoProvider> {
    rustls::crypto::CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}

fn native_roots_client_config() -> Result<rustls::ClientConfig, HttpError> {
    let certs = native_root_certs();
    if certs.is_empty() {
        return Err(HttpError::Tls(
            "no native root CA certificates found in OS certificate store".into(),
        ));
    }

    let mut roots = rustls::RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(certs.iter().cloned());
    if ignored > 0 {
        tracing::warn!(added, ignored, "some native root certificates were rejected");
    }
    if added == 0 {
        return Err(HttpError::Tls(
            format!("none of the {} native root certificates could be parsed", certs.len()).into(),
        ));
    }

    let config = rustls::ClientConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| HttpError::Tls(Box::new(e)))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(config)
}

/// HTTPS connector that also accepts plain `http://` targets.
///
/// ALPN advertises h2 and http/1.1; the protocol is picked during the handshake.
///
/// # Errors
/// Returns `HttpError::Tls` when the requested root store cannot be built.
pub(crate) fn build_https_connector(
    tls_roots: TlsRootConfig,
) -> Result<HttpsConnector<HttpConnector>, HttpError> {
    let builder = match tls_roots {
        TlsRootConfig::WebPki => hyper_rustls::HttpsConnectorBuilder::new()
            .with_provider_and_webpki_roots(crypto_provider())
            .map_err(|e| HttpError::Tls(Box::new(e)))?,
        TlsRootConfig::Native => {
            hyper_rustls::HttpsConnectorBuilder::new().with_tls_config(native_roots_client_config()?)
        }
    };

    Ok(builder.https_or_http().enable_all_versions().build())
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn test_native_roots_loaded_at_most_once() {
        let before = NATIVE_LOADS.load(Ordering::SeqCst);

        let first = native_root_certs();
        let second = native_root_certs();

        assert!(NATIVE_LOADS.load(Ordering::SeqCst) <= before + 1);
        assert!(std::ptr::eq(first, second));
    }

    #[test]
    fn test_webpki_connector_builds() {
        assert!(build_https_connector(TlsRootConfig::WebPki).is_ok());
    }

    #[test]
    fn test_native_connector_fails_only_with_tls_error() {
        // Minimal containers may ship without an OS trust store
        match build_https_connector(TlsRootConfig::Native) {
            Ok(_) | Err(HttpError::Tls(_)) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
}
