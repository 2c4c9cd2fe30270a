//! TLS upgrade for `https:` fetches.

use std::io::Read;
use std::io::Write;
use std::net::TcpStream;
use vf_core::VirtError;
use vf_core::VirtResult;

#[cfg(feature = "tls-rustls")]
use rustls::ClientConfig;
#[cfg(feature = "tls-rustls")]
use rustls::RootCertStore;
#[cfg(feature = "tls-rustls")]
use std::sync::Arc;

pub(crate) trait IoStream: Read + Write {}
impl<T> IoStream for T where T: Read + Write {}

pub(crate) type BoxedIoStream = Box<dyn IoStream>;

/// Which trust anchors verify server certificates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TrustStoreMode {
    /// Only the embedded WebPKI roots.
    #[default]
    WebPkiOnly,
    /// WebPKI roots merged with the operating-system store.
    WebPkiAndOs,
}

#[cfg(feature = "tls-rustls")]
#[derive(Debug, Clone)]
pub(crate) struct TlsConnector {
    config: Arc<ClientConfig>,
}

#[cfg(feature = "tls-rustls")]
impl TlsConnector {
    pub(crate) fn new(mode: TrustStoreMode) -> VirtResult<Self> {
        let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
        let config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|error| {
                VirtError::new(
                    "net.tls.config_versions_invalid",
                    format!("failed to configure TLS protocol versions: {error}"),
                )
            })?
            .with_root_certificates(root_store(mode)?)
            .with_no_client_auth();

        Ok(Self {
            config: Arc::new(config),
        })
    }

    pub(crate) fn connect(&self, host: &str, mut stream: TcpStream) -> VirtResult<BoxedIoStream> {
        use rustls::ClientConnection;
        use rustls::StreamOwned;
        use rustls::pki_types::ServerName;

        let server_name = ServerName::try_from(host.to_owned()).map_err(|error| {
            VirtError::new(
                "net.tls.server_name_invalid",
                format!("invalid TLS server name `{host}`: {error}"),
            )
        })?;
        let mut connection =
            ClientConnection::new(Arc::clone(&self.config), server_name).map_err(|error| {
                VirtError::new(
                    "net.tls.connection_init_failed",
                    format!("failed to initialize TLS connection for `{host}`: {error}"),
                )
            })?;
        connection.complete_io(&mut stream).map_err(|error| {
            VirtError::new(
                "net.tls.handshake_failed",
                format!("TLS handshake failed for `{host}`: {error}"),
            )
        })?;

        Ok(Box::new(StreamOwned::new(connection, stream)))
    }
}

#[cfg(feature = "tls-rustls")]
fn root_store(mode: TrustStoreMode) -> VirtResult<RootCertStore> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    if mode == TrustStoreMode::WebPkiAndOs {
        let native = rustls_native_certs::load_native_certs();
        for error in &native.errors {
            tracing::warn!(%error, "skipping unreadable operating-system root");
        }
        for cert in native.certs {
            if let Err(error) = roots.add(cert) {
                tracing::warn!(%error, "rejected operating-system root");
            }
        }
    }

    if roots.is_empty() {
        return Err(VirtError::new(
            "net.tls.root_store_empty",
            "no trust anchors available for TLS verification",
        ));
    }
    Ok(roots)
}

#[cfg(not(feature = "tls-rustls"))]
#[derive(Debug, Clone)]
pub(crate) struct TlsConnector;

#[cfg(not(feature = "tls-rustls"))]
impl TlsConnector {
    pub(crate) fn new(_mode: TrustStoreMode) -> VirtResult<Self> {
        Ok(Self)
    }

    pub(crate) fn connect(&self, host: &str, _stream: TcpStream) -> VirtResult<BoxedIoStream> {
        Err(VirtError::new(
            "net.tls.unavailable",
            format!("built without TLS support; cannot reach `{host}`"),
        ))
    }
}
