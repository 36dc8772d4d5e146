//! Discovery: ask the router who the current primary is, retrying with a
//! fixed backoff while it reports `'0'` (no primary yet / mid-failover).

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tsn_protocol::router::NO_PRIMARY_BYTE;

#[derive(Debug)]
pub enum DiscoveryError {
    Io(std::io::Error),
    MalformedReply(String),
}

impl std::fmt::Display for DiscoveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiscoveryError::Io(e) => write!(f, "router connection failed: {e}"),
            DiscoveryError::MalformedReply(s) => write!(f, "router sent an unparseable reply: {s:?}"),
        }
    }
}

impl std::error::Error for DiscoveryError {}

impl From<std::io::Error> for DiscoveryError {
    fn from(e: std::io::Error) -> Self {
        DiscoveryError::Io(e)
    }
}

/// One discovery attempt: connect to the router, read its one reply, and
/// interpret it as either an IP address or "no primary yet".
async fn ask_once(router_client_addr: SocketAddr) -> Result<Option<IpAddr>, DiscoveryError> {
    let mut stream = TcpStream::connect(router_client_addr).await?;
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    if buf == [NO_PRIMARY_BYTE] {
        return Ok(None);
    }
    let text = String::from_utf8_lossy(&buf);
    text.parse::<IpAddr>()
        .map(Some)
        .map_err(|_| DiscoveryError::MalformedReply(text.into_owned()))
}

/// Poll the router until it reports a primary, retrying every `retry_delay`.
pub async fn discover(router_client_addr: SocketAddr, retry_delay: Duration) -> Result<IpAddr, DiscoveryError> {
    loop {
        match ask_once(router_client_addr).await? {
            Some(ip) => return Ok(ip),
            None => {
                tracing::debug!("router reports no primary yet, retrying");
                tokio::time::sleep(retry_delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn discover_returns_ip_on_first_success() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _peer) = listener.accept().await.unwrap();
            stream.write_all(b"127.0.0.1").await.unwrap();
            stream.shutdown().await.unwrap();
        });

        let ip = discover(addr, Duration::from_millis(10)).await.unwrap();
        assert_eq!(ip, "127.0.0.1".parse::<IpAddr>().unwrap());
    }

    #[tokio::test]
    async fn discover_retries_past_no_primary_byte() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut first, _peer) = listener.accept().await.unwrap();
            first.write_all(&[NO_PRIMARY_BYTE]).await.unwrap();
            first.shutdown().await.unwrap();
            let (mut second, _peer) = listener.accept().await.unwrap();
            second.write_all(b"10.0.0.5").await.unwrap();
            second.shutdown().await.unwrap();
        });

        let ip = discover(addr, Duration::from_millis(10)).await.unwrap();
        assert_eq!(ip, "10.0.0.5".parse::<IpAddr>().unwrap());
    }
}
