//! Router: the single fixed address every client and every primary/standby
//! knows ahead of time. Backends register themselves or report a dead peer
//! on one port; clients ask "who is the primary" on another and get back
//! either the primary's IP, or a single `'0'` byte if there isn't one yet.
//!
//! A registered primary is also removed from the hierarchy if its
//! registration connection simply closes, not only on an explicit dead
//! report -- a crashed primary rarely gets the chance to report itself dead.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tsn_protocol::router::{self, BackendMessage};

/// Shared knowledge of which host is currently primary. `None` means no
/// primary has registered yet (or the last one reported dead).
#[derive(Debug, Default)]
struct State {
    primary: RwLock<Option<IpAddr>>,
}

#[derive(Debug, Clone)]
pub struct Router {
    state: Arc<State>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        Router {
            state: Arc::new(State::default()),
        }
    }

    /// Currently known primary address, if any.
    pub async fn current_primary(&self) -> Option<IpAddr> {
        *self.state.primary.read().await
    }

    /// Run both accept loops until one of them fails. Intended to be spawned
    /// as the process's entire job.
    pub async fn serve(self, backend_addr: SocketAddr, client_addr: SocketAddr) -> std::io::Result<()> {
        let backend_listener = TcpListener::bind(backend_addr).await?;
        let client_listener = TcpListener::bind(client_addr).await?;
        tracing::info!(%backend_addr, %client_addr, "router listening");

        let backend_router = self.clone();
        let backend_task = tokio::spawn(async move {
            loop {
                match backend_listener.accept().await {
                    Ok((stream, peer)) => {
                        let router = backend_router.clone();
                        tokio::spawn(async move {
                            if let Err(e) = router.handle_backend(stream, peer).await {
                                tracing::warn!(%peer, error = %e, "backend connection error");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "backend accept failed");
                        break;
                    }
                }
            }
        });

        let client_router = self.clone();
        let client_task = tokio::spawn(async move {
            loop {
                match client_listener.accept().await {
                    Ok((stream, peer)) => {
                        let router = client_router.clone();
                        tokio::spawn(async move {
                            if let Err(e) = router.handle_client(stream).await {
                                tracing::warn!(%peer, error = %e, "client connection error");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "client accept failed");
                        break;
                    }
                }
            }
        });

        tokio::select! {
            r = backend_task => { r.ok(); }
            r = client_task => { r.ok(); }
        }
        Ok(())
    }

    /// Backend connections are long-lived: a registering primary holds its
    /// connection open for as long as it's part of the hierarchy, so an
    /// unexpected close (crash, network drop) is itself a removal signal,
    /// distinct from an explicit `DEAD` report from the standby.
    async fn handle_backend(&self, mut stream: TcpStream, peer: SocketAddr) -> std::io::Result<()> {
        let mut registered_as_primary = false;
        loop {
            let mut buf = [0u8; router::BACKEND_READ_CHUNK];
            let n = stream.read(&mut buf).await?;
            if n == 0 {
                if registered_as_primary {
                    let mut primary = self.state.primary.write().await;
                    if *primary == Some(peer.ip()) {
                        *primary = None;
                        tracing::info!(primary = %peer.ip(), "backend connection closed, removed from hierarchy");
                    }
                }
                return Ok(());
            }
            match router::classify(&buf[..n]) {
                Some(BackendMessage::RegisterPrimary) => {
                    *self.state.primary.write().await = Some(peer.ip());
                    registered_as_primary = true;
                    tracing::info!(primary = %peer.ip(), "primary registered");
                }
                Some(BackendMessage::ReportDead) => {
                    *self.state.primary.write().await = None;
                    tracing::info!(reporter = %peer.ip(), "primary reported dead");
                }
                None => {
                    tracing::warn!(%peer, "unrecognized backend message");
                }
            }
        }
    }

    async fn handle_client(&self, mut stream: TcpStream) -> std::io::Result<()> {
        let reply = match self.current_primary().await {
            Some(ip) => ip.to_string(),
            None => (router::NO_PRIMARY_BYTE as char).to_string(),
        };
        stream.write_all(reply.as_bytes()).await?;
        stream.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn client_gets_no_primary_byte_before_any_registration() {
        let router = Router::new();
        let backend_addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let client_addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let backend_listener = TcpListener::bind(backend_addr).await.unwrap();
        let client_listener = TcpListener::bind(client_addr).await.unwrap();
        let backend_bound = backend_listener.local_addr().unwrap();
        let client_bound = client_listener.local_addr().unwrap();
        drop(backend_listener);
        drop(client_listener);

        let router_clone = router.clone();
        let handle = tokio::spawn(async move { router_clone.serve(backend_bound, client_bound).await });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let mut client = TcpStream::connect(client_bound).await.unwrap();
        let mut buf = [0u8; 16];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"0");
        handle.abort();
    }

    #[tokio::test]
    async fn registering_backend_updates_primary_for_next_client() {
        let router = Router::new();
        let backend_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let backend_bound = backend_listener.local_addr().unwrap();
        let client_bound = client_listener.local_addr().unwrap();
        drop(backend_listener);
        drop(client_listener);

        let router_clone = router.clone();
        let handle = tokio::spawn(async move { router_clone.serve(backend_bound, client_bound).await });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let mut backend = TcpStream::connect(backend_bound).await.unwrap();
        backend.write_all(tsn_protocol::router::REGISTER_MSG).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let mut client = TcpStream::connect(client_bound).await.unwrap();
        let mut buf = [0u8; 16];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"127.0.0.1");
        handle.abort();
    }

    #[tokio::test]
    async fn dead_report_clears_primary() {
        let router = Router::new();
        let backend_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let backend_bound = backend_listener.local_addr().unwrap();
        let client_bound = client_listener.local_addr().unwrap();
        drop(backend_listener);
        drop(client_listener);

        let router_clone = router.clone();
        let handle = tokio::spawn(async move { router_clone.serve(backend_bound, client_bound).await });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let mut backend = TcpStream::connect(backend_bound).await.unwrap();
        backend.write_all(tsn_protocol::router::REGISTER_MSG).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(router.current_primary().await.is_some());

        let mut backend2 = TcpStream::connect(backend_bound).await.unwrap();
        backend2.write_all(tsn_protocol::router::DEAD_MSG).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(router.current_primary().await.is_none());

        handle.abort();
    }

    #[tokio::test]
    async fn backend_connection_close_clears_primary() {
        let router = Router::new();
        let backend_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let backend_bound = backend_listener.local_addr().unwrap();
        let client_bound = client_listener.local_addr().unwrap();
        drop(backend_listener);
        drop(client_listener);

        let router_clone = router.clone();
        let handle = tokio::spawn(async move { router_clone.serve(backend_bound, client_bound).await });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let mut backend = TcpStream::connect(backend_bound).await.unwrap();
        backend.write_all(tsn_protocol::router::REGISTER_MSG).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(router.current_primary().await.is_some());

        drop(backend);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(router.current_primary().await.is_none());

        handle.abort();
    }
}
