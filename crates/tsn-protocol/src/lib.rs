//! tsn-protocol: wire types for the client<->primary RPC channel and the
//! router's backend/client sockets.
//!
//! The unary RPCs (`Login`, `List`, `Follow`, `Unfollow`) and the bidirectional
//! `Timeline` post stream share one newline-delimited JSON connection: the
//! client sends `ClientFrame`s, the primary replies with `ServerFrame`s. The
//! router speaks a separate, tiny byte-oriented protocol (see the `router`
//! module) that predates JSON framing and is kept as-is for compatibility.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Status codes
// ---------------------------------------------------------------------------

/// RPC-level status code returned alongside a `Reply`.
///
/// Mirrors the original's informal status numbering; kept numeric so tests
/// and clients can match on it instead of parsing `msg` strings, even though
/// `msg` is also part of the wire contract (see `reply_text`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum StatusCode {
    Success = 0,
    AlreadyExists = 1,
    InvalidUsername = 2,
    FailureInvalid = 4,
    FailureUnknown = 5,
}

/// Reply strings that are part of the wire contract -- clients parse these.
pub mod reply_text {
    pub const FOLLOW_INVALID: &str = "Follow Failed -- Invalid Username";
    pub const FOLLOW_ALREADY: &str = "Follow Failed -- Already Following User";
    pub const FOLLOW_SUCCESS: &str = "Follow Successful";
    pub const UNFOLLOW_INVALID: &str = "Unfollow Failed -- Invalid Username";
    pub const UNFOLLOW_NOT_FOLLOWING: &str = "Unfollow Failed -- Not Following User";
    pub const UNFOLLOW_SUCCESS: &str = "Unfollow Successful";
    pub const LOGIN_INVALID: &str = "Invalid Username";
    pub const LOGIN_SUCCESS: &str = "Login Successful!";

    pub fn welcome_back(username: &str) -> String {
        format!("Welcome Back {username}")
    }
}

// ---------------------------------------------------------------------------
// Unary RPC request/reply
// ---------------------------------------------------------------------------

/// A unary call from client to primary.
///
/// All four calls are logically `Request{username, repeated arguments}` in
/// spec terms; we spell out the argument shape per call instead of a raw
/// string vector so malformed calls are rejected at deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RpcRequest {
    Login { username: String },
    List { username: String },
    Follow { username: String, target: String },
    Unfollow { username: String, target: String },
}

/// The primary's reply to a unary call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RpcReply {
    Reply {
        status: StatusCode,
        msg: String,
    },
    ListReply {
        all_users: Vec<String>,
        followers: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Post / timeline stream
// ---------------------------------------------------------------------------

/// A single post, carried both over the wire and in durable storage.
///
/// `text` must not contain `\n` -- the on-disk format is one record per line
/// (see §3 / §9 of the design notes: embedded whitespace in `text` is
/// tolerated, embedded newlines are not and are rejected at construction).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub seconds_since_epoch: i64,
    pub poster: String,
    pub text: String,
}

impl Post {
    /// The literal sentinel text that marks a stream-attach frame rather than
    /// a real post. Reserved -- sending it as a genuine post is indistinguishable
    /// from an attach (documented known limitation, not fixed here).
    pub const SENTINEL_TEXT: &'static str = "Set Stream";

    pub fn new(poster: impl Into<String>, text: impl Into<String>, seconds_since_epoch: i64) -> Result<Self, PostError> {
        let text = text.into();
        if text.contains('\n') {
            return Err(PostError::EmbeddedNewline);
        }
        Ok(Post {
            seconds_since_epoch,
            poster: poster.into(),
            text,
        })
    }

    pub fn sentinel(poster: impl Into<String>, seconds_since_epoch: i64) -> Self {
        Post {
            seconds_since_epoch,
            poster: poster.into(),
            text: Self::SENTINEL_TEXT.to_owned(),
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.text == Self::SENTINEL_TEXT
    }

    /// Render as the on-disk / inbound-log record: `<seconds> <poster> <text>\n`.
    ///
    /// `text` is taken to be a single whitespace-separated token on read-back
    /// (see design notes §9(c)) -- multi-word posts only round-trip their
    /// first token. This is a documented limitation, not fixed here.
    pub fn to_line(&self) -> String {
        format!("{} {} {}\n", self.seconds_since_epoch, self.poster, self.text)
    }

    /// Parse a `<seconds> <poster> <text>` record back into a `Post`.
    pub fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim_end_matches('\n');
        let mut parts = line.splitn(3, ' ');
        let seconds: i64 = parts.next()?.parse().ok()?;
        let poster = parts.next()?.to_owned();
        let text = parts.next().unwrap_or("").to_owned();
        Some(Post {
            seconds_since_epoch: seconds,
            poster,
            text,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostError {
    EmbeddedNewline,
}

impl std::fmt::Display for PostError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PostError::EmbeddedNewline => write!(f, "post text must not contain embedded newlines"),
        }
    }
}

impl std::error::Error for PostError {}

// ---------------------------------------------------------------------------
// Top-level frames
// ---------------------------------------------------------------------------

/// Frame sent client -> primary over the single RPC/timeline connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClientFrame {
    /// A unary call. Valid any time the connection is not yet in timeline mode.
    Call(RpcRequest),
    /// Request to switch this connection into timeline streaming mode. The
    /// client must follow with a sentinel `Post` frame.
    EnterTimeline,
    /// A post frame, valid only once the connection is in timeline mode.
    Post(Post),
}

/// Frame sent primary -> client over the single RPC/timeline connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServerFrame {
    Reply(RpcReply),
    Post(Post),
}

// ---------------------------------------------------------------------------
// Router wire protocol (raw bytes, not JSON)
// ---------------------------------------------------------------------------

/// The router's backend/client socket protocol: a single leading byte
/// classifies backend messages; the client socket gets either an ASCII IPv4
/// address or the single byte `'0'`.
pub mod router {
    /// Maximum bytes read in one non-blocking chunk from a backend connection.
    pub const BACKEND_READ_CHUNK: usize = 1024;
    /// `INET_ADDRSTRLEN` -- longest ASCII IPv4 string the client socket writes.
    pub const INET_ADDRSTRLEN: usize = 16;

    pub const MASTER_BYTE: u8 = b'M';
    pub const DEAD_BYTE: u8 = b'D';
    pub const NO_PRIMARY_BYTE: u8 = b'0';

    /// A backend message, classified by its leading byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum BackendMessage {
        /// `"MASTER"` -- caller is a primary, register its peer address.
        RegisterPrimary,
        /// `"DEAD"` -- caller's monitored peer died, remove it.
        ReportDead,
    }

    pub fn classify(buf: &[u8]) -> Option<BackendMessage> {
        match buf.first() {
            Some(&MASTER_BYTE) => Some(BackendMessage::RegisterPrimary),
            Some(&DEAD_BYTE) => Some(BackendMessage::ReportDead),
            _ => None,
        }
    }

    pub const REGISTER_MSG: &[u8] = b"MASTER";
    pub const DEAD_MSG: &[u8] = b"DEAD";
}

// ---------------------------------------------------------------------------
// Heartbeat wire constants
// ---------------------------------------------------------------------------

pub mod heartbeat {
    use std::time::Duration;

    pub const ALIVE_MSG: &[u8] = b"ALIVE";
    pub const SEND_INTERVAL: Duration = Duration::from_secs(1);
    pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);
    pub const RESPAWN_SETTLE: Duration = Duration::from_secs(2);
}

// ---------------------------------------------------------------------------
// Newline-delimited JSON framing helpers
// ---------------------------------------------------------------------------

/// Serialize `value` as one line of JSON terminated by `\n`.
///
/// Used on both sides of the RPC/timeline connection and by the client's
/// discovery/login code; kept here so the exact framing (one JSON object per
/// line, UTF-8, no length prefix) is defined in a single place.
pub fn encode_line<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let mut s = serde_json::to_string(value)?;
    s.push('\n');
    Ok(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_line_round_trips() {
        let p = Post::new("alice", "hello", 1_700_000_000).unwrap();
        let line = p.to_line();
        let parsed = Post::parse_line(&line).unwrap();
        assert_eq!(parsed, p);
    }

    #[test]
    fn post_rejects_embedded_newline() {
        assert_eq!(Post::new("alice", "hi\nthere", 0).unwrap_err(), PostError::EmbeddedNewline);
    }

    #[test]
    fn post_multiword_text_only_round_trips_first_token() {
        let p = Post::new("alice", "hello", 1).unwrap();
        let line = format!("{} {} {}\n", p.seconds_since_epoch, p.poster, "hello world");
        let parsed = Post::parse_line(&line).unwrap();
        assert_eq!(parsed.text, "hello world");
        // splitn(3) keeps embedded spaces in the final field on write-then-read
        // of a line we constructed by hand; genuine round trip through `to_line`
        // only ever stores a single token because `Post::new` takes `text` as-is
        // and callers are expected to pass single tokens (documented limitation).
    }

    #[test]
    fn sentinel_detection() {
        let s = Post::sentinel("alice", 1);
        assert!(s.is_sentinel());
        let real = Post::new("alice", "hi", 1).unwrap();
        assert!(!real.is_sentinel());
    }

    #[test]
    fn client_frame_json_round_trip() {
        let frame = ClientFrame::Call(RpcRequest::Follow {
            username: "alice".to_owned(),
            target: "bob".to_owned(),
        });
        let line = encode_line(&frame).unwrap();
        let parsed: ClientFrame = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(parsed, frame);
    }

    #[test]
    fn router_classify() {
        assert_eq!(
            router::classify(b"MASTER"),
            Some(router::BackendMessage::RegisterPrimary)
        );
        assert_eq!(router::classify(b"DEAD"), Some(router::BackendMessage::ReportDead));
        assert_eq!(router::classify(b"???"), None);
        assert_eq!(router::classify(b""), None);
    }
}
