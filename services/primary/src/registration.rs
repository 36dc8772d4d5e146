//! Registers this process as the primary with the router.

use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tsn_protocol::router::REGISTER_MSG;

/// Connect to the router's backend socket and announce ourselves as primary.
/// The router identifies us by the connecting peer's IP, so no payload
/// beyond the `MASTER` tag is needed. The connection is then held open for
/// the life of the process: the router treats this connection closing as a
/// removal from the hierarchy, so registering is connect-and-hold, not
/// connect-send-close. A respawned router starts with an empty hierarchy and
/// is not re-registered against proactively -- that only happens organically
/// on the next primary failover, per the spec's router-death-tolerance note.
pub async fn register_with_router(router_backend_addr: SocketAddr) -> std::io::Result<JoinHandle<()>> {
    let mut stream = TcpStream::connect(router_backend_addr).await?;
    stream.write_all(REGISTER_MSG).await?;
    tracing::info!(%router_backend_addr, "registered with router as primary");
    Ok(tokio::spawn(async move {
        let mut buf = [0u8; 1];
        let _ = stream.read(&mut buf).await;
        tracing::warn!("router registration connection closed");
    }))
}
