//! Accepts the standby's heartbeat connection and watches it, symmetrically
//! to how the standby watches us: both sides send `ALIVE\n` and both sides
//! presume the other dead after `RECV_TIMEOUT` of silence.
//!
//! One connection at a time: if the standby disconnects (restarted,
//! crashed, network blip) we simply go back to accepting, so a fresh standby
//! always finds us ready. A standby that goes quiet for `RECV_TIMEOUT`
//! instead of just dropping the connection is presumed dead outright and
//! respawned, mirroring the standby's own promotion of a silent primary.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use tokio::net::TcpListener;
use tsn_core::heartbeat::{self, PeerOutcome};

/// How to bring up a fresh standby if the current one stops answering
/// heartbeats. Mirrors the standby's own `primary_exe`/`primary_process_name`
/// respawn args, just aimed the other direction.
#[derive(Debug, Clone)]
pub struct StandbyRespawn {
    pub exe: PathBuf,
    pub process_name: String,
    pub args: Vec<String>,
    pub settle: Duration,
}

pub async fn serve(listen_addr: SocketAddr, respawn: Option<StandbyRespawn>) -> std::io::Result<()> {
    let listener = TcpListener::bind(listen_addr).await?;
    tracing::info!(%listen_addr, "heartbeat server listening for standby");
    loop {
        let (stream, peer) = listener.accept().await?;
        tracing::info!(%peer, "standby connected for heartbeat");
        match heartbeat::monitor(stream).await {
            Ok(PeerOutcome::ConnectionLost) => {
                tracing::info!(%peer, "standby heartbeat connection closed, awaiting reconnect");
            }
            Ok(PeerOutcome::TimedOut) => {
                tracing::warn!(%peer, "standby heartbeat timed out, presuming it dead");
                if let Some(respawn) = &respawn {
                    if let Err(e) =
                        tsn_core::supervisor::promote(&respawn.process_name, &respawn.exe, &respawn.args, respawn.settle)
                            .await
                    {
                        tracing::error!(error = %e, "failed to spawn replacement standby");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(%peer, error = %e, "heartbeat connection to standby lost");
            }
        }
    }
}
