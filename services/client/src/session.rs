//! Logged-in session against the primary: the unary command loop, and the
//! timeline streaming mode it can switch into.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tsn_protocol::{encode_line, ClientFrame, Post, RpcReply, RpcRequest, ServerFrame};

use crate::retry::RetrySlot;

#[derive(Debug)]
pub enum SessionError {
    Io(std::io::Error),
    Json(serde_json::Error),
    ConnectionClosed,
    ProtocolViolation(&'static str),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::Io(e) => write!(f, "i/o error: {e}"),
            SessionError::Json(e) => write!(f, "malformed frame: {e}"),
            SessionError::ConnectionClosed => write!(f, "primary closed the connection"),
            SessionError::ProtocolViolation(msg) => write!(f, "protocol violation: {msg}"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<std::io::Error> for SessionError {
    fn from(e: std::io::Error) -> Self {
        SessionError::Io(e)
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(e: serde_json::Error) -> Self {
        SessionError::Json(e)
    }
}

/// A single command issued by the user in command mode.
#[derive(Debug, Clone)]
pub enum Command {
    List,
    Follow(String),
    Unfollow(String),
    EnterTimeline,
    Quit,
}

pub fn parse_command(line: &str) -> Option<Command> {
    let mut parts = line.trim().splitn(2, ' ');
    match parts.next()? {
        "list" => Some(Command::List),
        "follow" => Some(Command::Follow(parts.next()?.to_owned())),
        "unfollow" => Some(Command::Unfollow(parts.next()?.to_owned())),
        "timeline" => Some(Command::EnterTimeline),
        "quit" => Some(Command::Quit),
        _ => None,
    }
}

async fn send_call(writer: &mut (impl AsyncWriteExt + Unpin), request: RpcRequest) -> Result<(), SessionError> {
    let out = encode_line(&ClientFrame::Call(request))?;
    writer.write_all(out.as_bytes()).await?;
    Ok(())
}

async fn read_reply(reader: &mut (impl AsyncBufReadExt + Unpin)) -> Result<RpcReply, SessionError> {
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Err(SessionError::ConnectionClosed);
    }
    match serde_json::from_str::<ServerFrame>(line.trim_end())? {
        ServerFrame::Reply(reply) => Ok(reply),
        ServerFrame::Post(_) => Err(SessionError::ProtocolViolation("unexpected Post frame in command mode")),
    }
}

/// Log in, then drive the command loop until the user asks to enter timeline
/// mode, disconnects, or quits. Returns `Ok(Some(()))`-shaped via the
/// `entered_timeline` flag on success.
pub async fn run(
    stream: TcpStream,
    username: &str,
    retry_slot: Arc<RetrySlot>,
    mut commands: impl tokio_stream_lines::LineSource,
) -> Result<(), SessionError> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    send_call(&mut write_half, RpcRequest::Login { username: username.to_owned() }).await?;
    match read_reply(&mut reader).await? {
        RpcReply::Reply { msg, .. } => println!("{msg}"),
        RpcReply::ListReply { .. } => {}
    }

    loop {
        let Some(line) = commands.next_line().await? else {
            return Ok(());
        };
        let Some(command) = parse_command(&line) else {
            println!("unrecognized command");
            continue;
        };
        match command {
            Command::Quit => return Ok(()),
            Command::List => {
                send_call(&mut write_half, RpcRequest::List { username: username.to_owned() }).await?;
                match read_reply(&mut reader).await? {
                    RpcReply::ListReply { mut all_users, mut followers } => {
                        all_users.sort();
                        followers.sort();
                        println!("all users: {}", all_users.join(", "));
                        println!("following: {}", followers.join(", "));
                    }
                    RpcReply::Reply { msg, .. } => println!("{msg}"),
                }
            }
            Command::Follow(target) => {
                send_call(
                    &mut write_half,
                    RpcRequest::Follow { username: username.to_owned(), target },
                )
                .await?;
                if let RpcReply::Reply { msg, .. } = read_reply(&mut reader).await? {
                    println!("{msg}");
                }
            }
            Command::Unfollow(target) => {
                send_call(
                    &mut write_half,
                    RpcRequest::Unfollow { username: username.to_owned(), target },
                )
                .await?;
                if let RpcReply::Reply { msg, .. } = read_reply(&mut reader).await? {
                    println!("{msg}");
                }
            }
            Command::EnterTimeline => {
                let out = encode_line(&ClientFrame::EnterTimeline)?;
                write_half.write_all(out.as_bytes()).await?;
                let sentinel = encode_line(&ClientFrame::Post(Post::sentinel(username, 0)))?;
                write_half.write_all(sentinel.as_bytes()).await?;
                return run_timeline(reader, write_half, username, retry_slot, commands).await;
            }
        }
    }
}

async fn run_timeline(
    mut reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    mut writer: tokio::net::tcp::OwnedWriteHalf,
    username: &str,
    retry_slot: Arc<RetrySlot>,
    mut commands: impl tokio_stream_lines::LineSource,
) -> Result<(), SessionError> {
    if let Some(pending) = retry_slot.take_for_retry().await {
        retry_slot.mark_attempted(pending.clone()).await;
        let out = encode_line(&ClientFrame::Post(pending))?;
        if writer.write_all(out.as_bytes()).await.is_ok() {
            retry_slot.mark_sent().await;
        }
    }

    let printer = tokio::spawn(async move {
        loop {
            let mut line = String::new();
            match reader.read_line(&mut line).await {
                Ok(0) | Err(_) => return,
                Ok(_) => match serde_json::from_str::<ServerFrame>(line.trim_end()) {
                    Ok(ServerFrame::Post(post)) => println!("{}: {}", post.poster, post.text),
                    _ => {}
                },
            }
        }
    });

    let result = async {
        loop {
            let Some(line) = commands.next_line().await? else {
                return Ok(());
            };
            if line.trim().is_empty() {
                continue;
            }
            let now = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs() as i64;
            let post = match Post::new(username, line.trim(), now) {
                Ok(p) => p,
                Err(e) => {
                    println!("{e}");
                    continue;
                }
            };
            retry_slot.mark_attempted(post.clone()).await;
            let out = encode_line(&ClientFrame::Post(post))?;
            writer.write_all(out.as_bytes()).await?;
            retry_slot.mark_sent().await;
        }
    }
    .await;

    printer.abort();
    result
}

/// Tiny seam so tests can feed canned command lines instead of real stdin.
pub mod tokio_stream_lines {
    use super::SessionError;

    #[allow(async_fn_in_trait)]
    pub trait LineSource {
        async fn next_line(&mut self) -> Result<Option<String>, SessionError>;
    }

    impl LineSource for tokio::io::Lines<tokio::io::BufReader<tokio::io::Stdin>> {
        async fn next_line(&mut self) -> Result<Option<String>, SessionError> {
            use tokio::io::AsyncBufReadExt;
            Ok(self.next_line().await?)
        }
    }

    /// In-memory line source for tests.
    pub struct VecLines {
        pub lines: std::vec::IntoIter<String>,
    }

    impl VecLines {
        pub fn new(lines: Vec<&str>) -> Self {
            VecLines {
                lines: lines.into_iter().map(str::to_owned).collect::<Vec<_>>().into_iter(),
            }
        }
    }

    impl LineSource for VecLines {
        async fn next_line(&mut self) -> Result<Option<String>, SessionError> {
            Ok(self.lines.next())
        }
    }
}
