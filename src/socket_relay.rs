use std::path::Path;
use std::sync::Arc;

use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, warn};

use crate::connection_info::IpKind;
use crate::connector::Connector;
use crate::drivers::dial_tls;
use crate::drivers::DialOutcome;
use crate::error::ConnectorError;

/// Listens on a local Unix domain socket and relays each accepted connection
/// to the instance over TLS. For drivers that can only be configured with a
/// host/port or socket path (rather than accepting an already-open stream
/// directly), pointing them at `socket_path` gets them a working connection
/// without the driver needing any Cloud-SQL-specific code at all.
///
/// Runs until the listener is dropped or an unrecoverable accept error
/// occurs; each accepted connection is handled on its own task so one slow
/// client cannot stall the others.
pub async fn serve_unix_socket(
    connector: Arc<Connector>,
    instance_connection_name: String,
    ip_type: IpKind,
    socket_path: impl AsRef<Path>,
) -> Result<(), ConnectorError> {
    let path = socket_path.as_ref();
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    let listener = UnixListener::bind(path)?;
    debug!(path = %path.display(), instance = %instance_connection_name, "listening for local relay connections");

    loop {
        let (client, _addr) = listener.accept().await?;
        let connector = connector.clone();
        let instance = instance_connection_name.clone();
        tokio::spawn(async move {
            if let Err(e) = relay_one(connector, &instance, ip_type, client).await {
                warn!(instance = %instance, error = %e, "relayed connection ended with an error");
            }
        });
    }
}

async fn relay_one(
    connector: Arc<Connector>,
    instance_connection_name: &str,
    ip_type: IpKind,
    mut client: UnixStream,
) -> Result<(), ConnectorError> {
    let (ip_address, tls_config) = connector
        .dial_parameters(instance_connection_name, ip_type, None)
        .await?;
    let mut upstream = dial_tls(DialOutcome {
        ip_address,
        tls_config,
    })
    .await?;
    tokio::io::copy_bidirectional(&mut client, &mut upstream).await?;
    Ok(())
}
