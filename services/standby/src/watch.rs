//! Connects to the primary's heartbeat port and watches for silence.
//!
//! The primary is watching us back over the same connection: `monitor`
//! implements both halves (send our own `ALIVE`s, watch for the primary's),
//! so from the primary's point of view this process looks exactly like the
//! standby half of a symmetric pair.

use std::net::SocketAddr;

use tokio::net::TcpStream;
use tsn_core::heartbeat::{self, PeerOutcome};

/// How the watch loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    /// No heartbeat for `RECV_TIMEOUT` -- the primary is presumed dead.
    TimedOut,
    /// The TCP connection itself dropped (primary process exited cleanly,
    /// or a transient network error) without ever going quiet for
    /// `RECV_TIMEOUT`. Caller should just reconnect.
    ConnectionLost,
}

impl From<PeerOutcome> for WatchOutcome {
    fn from(outcome: PeerOutcome) -> Self {
        match outcome {
            PeerOutcome::TimedOut => WatchOutcome::TimedOut,
            PeerOutcome::ConnectionLost => WatchOutcome::ConnectionLost,
        }
    }
}

/// Connect to the primary's heartbeat listener and watch it until either the
/// connection drops or it goes quiet for `RECV_TIMEOUT`, sending our own
/// `ALIVE`s the whole time so the primary can watch us back.
pub async fn watch_once(primary_heartbeat_addr: SocketAddr) -> std::io::Result<WatchOutcome> {
    let stream = TcpStream::connect(primary_heartbeat_addr).await?;
    Ok(heartbeat::monitor(stream).await?.into())
}
