use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tsn_protocol::router::DEAD_MSG;
use standby::watch::{watch_once, WatchOutcome};

/// Standby node: watches the primary's heartbeat and promotes itself when it
/// goes silent.
#[derive(Parser, Debug)]
#[command(name = "standby", about = "tiny-social-network standby node")]
struct Args {
    /// The primary's heartbeat listener, to watch.
    #[arg(long, default_value = "127.0.0.1:9200")]
    primary_heartbeat_addr: SocketAddr,

    /// The router's backend socket, to report the primary dead to and to
    /// re-register against once we've become primary.
    #[arg(long, default_value = "127.0.0.1:9000")]
    router_backend_addr: SocketAddr,

    /// Path to the `primary` binary to spawn on promotion.
    #[arg(long)]
    primary_exe: PathBuf,

    /// Process name pattern passed to `pkill` before respawning.
    #[arg(long, default_value = "primary")]
    primary_process_name: String,

    /// Extra args forwarded to the spawned primary (router/client/standby
    /// addrs, data dir).
    #[arg(long)]
    primary_args: Vec<String>,

    /// How long to wait between killing a stale primary and spawning a
    /// fresh one, in seconds.
    #[arg(long, default_value_t = 2)]
    respawn_settle_secs: u64,

    /// Delay before retrying a dropped (but not timed-out) connection to the
    /// primary, in milliseconds.
    #[arg(long, default_value_t = 500)]
    reconnect_delay_ms: u64,
}

async fn report_dead(router_backend_addr: SocketAddr) -> std::io::Result<()> {
    let mut stream = TcpStream::connect(router_backend_addr).await?;
    stream.write_all(DEAD_MSG).await?;
    stream.shutdown().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    loop {
        match watch_once(args.primary_heartbeat_addr).await {
            Ok(WatchOutcome::ConnectionLost) => {
                tracing::info!("lost connection to primary heartbeat, retrying");
                tokio::time::sleep(Duration::from_millis(args.reconnect_delay_ms)).await;
            }
            Ok(WatchOutcome::TimedOut) => {
                tracing::warn!("primary heartbeat timed out, promoting self");
                if let Err(e) = report_dead(args.router_backend_addr).await {
                    tracing::warn!(error = %e, "could not notify router of dead primary");
                }
                let settle = Duration::from_secs(args.respawn_settle_secs);
                match tsn_core::supervisor::promote(
                    &args.primary_process_name,
                    &args.primary_exe,
                    &args.primary_args,
                    settle,
                )
                .await
                {
                    Ok(_child) => {
                        tracing::info!("spawned replacement primary, exiting standby role");
                        return Ok(());
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "failed to spawn replacement primary");
                        return Err(Box::new(e));
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "could not connect to primary heartbeat, retrying");
                tokio::time::sleep(Duration::from_millis(args.reconnect_delay_ms)).await;
            }
        }
    }
}
