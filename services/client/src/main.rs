use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use client::discovery::discover;
use client::retry::RetrySlot;
use client::session;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;

/// Client: discovers the primary through the router, logs in, and streams a
/// timeline. Reconnects from scratch (re-discovers) on any connection loss.
#[derive(Parser, Debug)]
#[command(name = "client", about = "tiny-social-network client")]
struct Args {
    #[arg(long, default_value = "127.0.0.1:9001")]
    router_client_addr: SocketAddr,

    /// Port the primary listens on for client RPC connections. The router
    /// only tells us the primary's IP; the port is fixed deployment config.
    #[arg(long, default_value_t = 9100)]
    primary_client_port: u16,

    #[arg(long)]
    username: String,

    #[arg(long, default_value_t = 500)]
    discovery_retry_delay_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let retry_delay = Duration::from_millis(args.discovery_retry_delay_ms);
    let retry_slot = Arc::new(RetrySlot::new());
    let mut last_primary: Option<IpAddr> = None;

    loop {
        let ip: IpAddr = match discover(args.router_client_addr, retry_delay).await {
            Ok(ip) => ip,
            Err(e) => {
                tracing::warn!(error = %e, "discovery failed, retrying");
                tokio::time::sleep(retry_delay).await;
                continue;
            }
        };
        if let Some(previous) = last_primary {
            if previous != ip {
                println!("reconnected: primary moved from {previous} to {ip}");
            }
        }
        last_primary = Some(ip);
        let primary_addr = SocketAddr::new(ip, args.primary_client_port);
        tracing::info!(%primary_addr, "connecting to primary");

        let stream = match TcpStream::connect(primary_addr).await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "could not connect to primary, re-discovering");
                continue;
            }
        };

        let stdin_lines = BufReader::new(tokio::io::stdin()).lines();
        match session::run(stream, &args.username, retry_slot.clone(), stdin_lines).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                tracing::warn!(error = %e, "session ended, re-discovering primary");
            }
        }
    }
}
