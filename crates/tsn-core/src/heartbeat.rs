//! Shared heartbeat state machine used by both the primary and the standby
//! over their dedicated TCP connection.
//!
//! The primary and standby run the *same* state machine with symmetric
//! roles: each side sends `ALIVE\n` once a second and watches for the
//! other's `ALIVE\n`, presuming the peer dead after five seconds of silence
//! on its side of the connection.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tsn_protocol::heartbeat::{ALIVE_MSG, RECV_TIMEOUT, SEND_INTERVAL};

/// Sends `ALIVE\n` on `writer` once per `SEND_INTERVAL`, forever, until the
/// write fails (peer gone). Intended to run as its own task.
pub async fn send_loop<W: AsyncWrite + Unpin>(mut writer: W) -> std::io::Result<()> {
    let mut line = Vec::with_capacity(ALIVE_MSG.len() + 1);
    line.extend_from_slice(ALIVE_MSG);
    line.push(b'\n');
    let mut ticker = tokio::time::interval(SEND_INTERVAL);
    loop {
        ticker.tick().await;
        writer.write_all(&line).await?;
        writer.flush().await?;
    }
}

/// Tracks the last time a heartbeat was observed and answers whether the
/// peer should now be considered dead.
pub struct Watchdog {
    last_seen: Mutex<Instant>,
}

impl Watchdog {
    pub fn new() -> Self {
        Watchdog {
            last_seen: Mutex::new(Instant::now()),
        }
    }

    pub async fn record_alive(&self) {
        *self.last_seen.lock().await = Instant::now();
    }

    pub async fn expired(&self) -> bool {
        self.last_seen.lock().await.elapsed() > RECV_TIMEOUT
    }
}

impl Default for Watchdog {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads one line from `reader` and returns whether it was a heartbeat.
/// Used by the receiving side's read loop; any non-heartbeat line on this
/// connection is ignored rather than tearing down the watch, since the only
/// thing that matters to the watchdog is whether `ALIVE` keeps arriving.
///
/// Line-buffered rather than a fixed-size `read()` so two heartbeats that
/// arrive coalesced in one TCP segment (or one split across two reads) are
/// still parsed as two separate `ALIVE` lines instead of corrupting the
/// framing.
pub async fn read_one_heartbeat<R: tokio::io::AsyncBufRead + Unpin>(reader: &mut R) -> std::io::Result<bool> {
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Ok(false);
    }
    Ok(line.trim_end() == std::str::from_utf8(ALIVE_MSG).unwrap_or_default())
}

/// How a `monitor` session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerOutcome {
    /// No heartbeat for `RECV_TIMEOUT` -- the peer is presumed dead.
    TimedOut,
    /// The connection itself dropped before ever going quiet for
    /// `RECV_TIMEOUT`.
    ConnectionLost,
}

/// Run the symmetric per-second send / 5-second-timeout watch protocol over
/// `stream` until the peer is presumed dead or the connection drops. Used
/// identically by both sides of the primary/standby heartbeat connection --
/// each accepts or dials the same socket and calls this once.
pub async fn monitor<S>(stream: S) -> std::io::Result<PeerOutcome>
where
    S: AsyncRead + AsyncWrite,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let mut reader = tokio::io::BufReader::new(read_half);
    let watchdog = Arc::new(Watchdog::new());

    let sender = send_loop(write_half);

    let reader_watchdog = watchdog.clone();
    let reader_task = async {
        loop {
            match read_one_heartbeat(&mut reader).await {
                Ok(true) => reader_watchdog.record_alive().await,
                Ok(false) | Err(_) => return,
            }
        }
    };

    let check_interval = Duration::from_millis(200);
    let timeout_checker = async {
        loop {
            tokio::time::sleep(check_interval).await;
            if watchdog.expired().await {
                return;
            }
        }
    };

    // A write failure on the sender side (peer gone, socket reset) is just
    // as much a "connection lost" signal as a zero-byte read on the reader
    // side, so both collapse to the same outcome rather than making
    // `monitor` itself fallible on ordinary peer death.
    Ok(tokio::select! {
        _ = reader_task => PeerOutcome::ConnectionLost,
        _ = timeout_checker => PeerOutcome::TimedOut,
        _ = sender => PeerOutcome::ConnectionLost,
    })
}
