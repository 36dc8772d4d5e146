//! Accepts client connections and spawns one handler task per connection.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tsn_core::Registry;

pub async fn serve(listen_addr: SocketAddr, registry: Arc<Registry>) -> std::io::Result<()> {
    let listener = TcpListener::bind(listen_addr).await?;
    tracing::info!(%listen_addr, "primary accepting client connections");
    loop {
        let (stream, peer) = listener.accept().await?;
        let registry = registry.clone();
        tokio::spawn(async move {
            if let Err(e) = crate::connection::handle(stream, registry).await {
                tracing::info!(%peer, error = %e, "client connection ended");
            }
        });
    }
}
