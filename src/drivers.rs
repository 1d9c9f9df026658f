use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::error::ConnectorError;

/// The server-side proxy always terminates TLS on this fixed port, regardless
/// of which port the managed database engine itself listens on.
pub const SERVER_PROXY_PORT: u16 = 3307;

/// Arguments handed to a driver adapter once the connector has resolved an
/// address and finished assembling the TLS client configuration for this
/// instance.
pub struct DialOutcome {
    pub ip_address: String,
    pub tls_config: Arc<rustls::ClientConfig>,
}

/// Implemented by each supported database driver's adapter. The adapter owns
/// dialing the TCP socket, completing the TLS handshake with the supplied
/// config, and handing the resulting stream to the underlying driver library
/// in whatever shape that library expects.
///
/// Building and maintaining adapters for individual driver crates
/// (`tokio-postgres`, `mysql_async`, `tiberius`, ...) is out of scope; this
/// trait is the seam such adapters plug into, and [`RawTlsAdapter`] below is
/// the minimal adapter that satisfies it without depending on any of them.
#[async_trait]
pub trait DriverAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    async fn connect(&self, outcome: DialOutcome) -> Result<Box<dyn Any + Send>, ConnectorError>;
}

/// Dials the instance and completes the TLS handshake, returning the raw
/// encrypted stream with no driver-specific wrapping. Useful directly for
/// protocols that accept an arbitrary `AsyncRead + AsyncWrite`, and as the
/// building block real driver adapters wrap.
pub struct RawTlsAdapter;

#[async_trait]
impl DriverAdapter for RawTlsAdapter {
    fn name(&self) -> &'static str {
        "raw"
    }

    async fn connect(&self, outcome: DialOutcome) -> Result<Box<dyn Any + Send>, ConnectorError> {
        let stream = dial_tls(outcome).await?;
        Ok(Box::new(stream))
    }
}

/// Dials `outcome.ip_address` on the fixed proxy port and performs the TLS
/// handshake, for adapters that need the typed stream rather than a boxed
/// `Any`.
pub async fn dial_tls(outcome: DialOutcome) -> Result<TlsStream<TcpStream>, ConnectorError> {
    let tcp = TcpStream::connect((outcome.ip_address.as_str(), SERVER_PROXY_PORT)).await?;
    tcp.set_nodelay(true)?;
    let connector = TlsConnector::from(outcome.tls_config);
    // Hostname verification is intentionally not performed (see
    // `connection_info::SingleCaVerifier`); this name only needs to be
    // syntactically valid, since it is never checked against the cert.
    let server_name = ServerName::try_from("sql-instance.invalid")
        .map_err(|e| ConnectorError::CertParse(e.to_string()))?
        .to_owned();
    let stream = connector.connect(server_name, tcp).await?;
    Ok(stream)
}
