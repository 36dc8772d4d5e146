//! Per-client connection handler: unary RPCs followed, optionally, by a
//! switch into bidirectional timeline streaming on the same socket.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tsn_core::Registry;
use tsn_protocol::{encode_line, ClientFrame, ServerFrame};

#[derive(Debug)]
pub enum ConnectionError {
    Io(std::io::Error),
    Json(serde_json::Error),
    ConnectionClosed,
    ProtocolViolation(&'static str),
}

impl std::fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionError::Io(e) => write!(f, "i/o error: {e}"),
            ConnectionError::Json(e) => write!(f, "malformed frame: {e}"),
            ConnectionError::ConnectionClosed => write!(f, "connection closed"),
            ConnectionError::ProtocolViolation(msg) => write!(f, "protocol violation: {msg}"),
        }
    }
}

impl std::error::Error for ConnectionError {}

impl From<std::io::Error> for ConnectionError {
    fn from(e: std::io::Error) -> Self {
        ConnectionError::Io(e)
    }
}

impl From<serde_json::Error> for ConnectionError {
    fn from(e: serde_json::Error) -> Self {
        ConnectionError::Json(e)
    }
}

/// Drive one client connection end to end: command mode until `EnterTimeline`,
/// then streaming mode until the socket closes. Whatever user logged in on
/// this connection is marked disconnected when it ends, win or lose, so a
/// later `Login` for them doesn't get rejected as still-connected.
pub async fn handle(stream: TcpStream, registry: Arc<Registry>) -> Result<(), ConnectionError> {
    let (read_half, write_half) = stream.into_split();
    let reader = BufReader::new(read_half);

    let (result, logged_in_as) = run_session(reader, write_half, registry.clone()).await;
    if let Some(username) = logged_in_as {
        registry.disconnect(&username).await;
    }
    result
}

async fn run_session(
    mut reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    mut writer: tokio::net::tcp::OwnedWriteHalf,
    registry: Arc<Registry>,
) -> (Result<(), ConnectionError>, Option<String>) {
    let mut logged_in_as: Option<String> = None;

    loop {
        let mut line = String::new();
        let n = match reader.read_line(&mut line).await {
            Ok(n) => n,
            Err(e) => return (Err(e.into()), logged_in_as),
        };
        if n == 0 {
            return (Ok(()), logged_in_as);
        }
        let frame: ClientFrame = match serde_json::from_str(line.trim_end()) {
            Ok(f) => f,
            Err(e) => return (Err(e.into()), logged_in_as),
        };
        match frame {
            ClientFrame::Call(request) => {
                if let tsn_protocol::RpcRequest::Login { username } = &request {
                    logged_in_as = Some(username.clone());
                }
                let reply = tsn_core::rpc::handle(&registry, request).await;
                let out = match encode_line(&ServerFrame::Reply(reply)) {
                    Ok(out) => out,
                    Err(e) => return (Err(e.into()), logged_in_as),
                };
                if let Err(e) = writer.write_all(out.as_bytes()).await {
                    return (Err(e.into()), logged_in_as);
                }
            }
            ClientFrame::EnterTimeline => {
                let Some(username) = logged_in_as.clone() else {
                    return (Err(ConnectionError::ProtocolViolation("EnterTimeline before Login")), logged_in_as);
                };
                // Consume the client's mandatory sentinel frame.
                let mut sentinel_line = String::new();
                let n = match reader.read_line(&mut sentinel_line).await {
                    Ok(n) => n,
                    Err(e) => return (Err(e.into()), logged_in_as),
                };
                if n == 0 {
                    return (Err(ConnectionError::ConnectionClosed), logged_in_as);
                }
                match serde_json::from_str::<ClientFrame>(sentinel_line.trim_end()) {
                    Ok(ClientFrame::Post(post)) if post.is_sentinel() => {}
                    Ok(_) => {
                        return (
                            Err(ConnectionError::ProtocolViolation("expected sentinel Post after EnterTimeline")),
                            logged_in_as,
                        )
                    }
                    Err(e) => return (Err(e.into()), logged_in_as),
                }
                let result = run_timeline(reader, writer, registry, username).await;
                return (result, logged_in_as);
            }
            ClientFrame::Post(_) => {
                return (Err(ConnectionError::ProtocolViolation("Post before EnterTimeline")), logged_in_as);
            }
        }
    }
}

async fn run_timeline(
    mut reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    mut writer: tokio::net::tcp::OwnedWriteHalf,
    registry: Arc<Registry>,
    username: String,
) -> Result<(), ConnectionError> {
    let (replay, notify) = registry
        .attach_timeline(&username)
        .await
        .map_err(|_| ConnectionError::ProtocolViolation("unknown user entering timeline"))?;
    for post in replay {
        let out = encode_line(&ServerFrame::Post(post))?;
        writer.write_all(out.as_bytes()).await?;
    }

    let writer_task = {
        let registry = registry.clone();
        let username = username.clone();
        tokio::spawn(async move {
            loop {
                notify.notified().await;
                let posts = registry.drain_new_posts(&username).await;
                for post in posts {
                    let Ok(out) = encode_line(&ServerFrame::Post(post)) else { continue };
                    if writer.write_all(out.as_bytes()).await.is_err() {
                        return;
                    }
                }
            }
        })
    };

    let reader_result = async {
        loop {
            let mut line = String::new();
            let n = reader.read_line(&mut line).await?;
            if n == 0 {
                return Ok::<(), ConnectionError>(());
            }
            let frame: ClientFrame = serde_json::from_str(line.trim_end())?;
            if let ClientFrame::Post(post) = frame {
                if !post.is_sentinel() {
                    let _ = registry.publish(&username, post).await;
                }
            }
        }
    }
    .await;

    writer_task.abort();
    reader_result
}
