use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use primary::config::RawConfig;
use primary::heartbeat_server::StandbyRespawn;
use tsn_core::{Registry, Store};

/// Primary node: serves client RPCs and fans posts out to followers.
#[derive(Parser, Debug)]
#[command(name = "primary", about = "tiny-social-network primary node")]
struct Args {
    #[arg(long, default_value = "127.0.0.1:9000")]
    router_backend_addr: String,

    #[arg(long, default_value = "0.0.0.0:9100")]
    client_listen_addr: String,

    #[arg(long, default_value = "0.0.0.0:9200")]
    standby_listen_addr: String,

    #[arg(long, default_value = "data")]
    data_dir: String,

    /// Path to the `standby` binary to spawn if the current standby's
    /// heartbeat goes silent. Omit to disable standby respawn (the primary
    /// still detects the timeout, it just won't replace it).
    #[arg(long)]
    standby_exe: Option<PathBuf>,

    /// Process name pattern passed to `pkill` before respawning the standby.
    #[arg(long, default_value = "standby")]
    standby_process_name: String,

    /// Extra args forwarded to the spawned standby (primary/router addrs).
    #[arg(long)]
    standby_args: Vec<String>,

    /// How long to wait between killing a stale standby and spawning a
    /// fresh one, in seconds.
    #[arg(long, default_value_t = 2)]
    respawn_settle_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = RawConfig {
        router_backend_addr: args.router_backend_addr,
        client_listen_addr: args.client_listen_addr,
        standby_listen_addr: args.standby_listen_addr,
        data_dir: args.data_dir,
    }
    .validate()?;

    let store = Store::open(&config.data_dir)?;
    let registry = Arc::new(Registry::load(store)?);

    let registration = primary::registration::register_with_router(config.router_backend_addr).await?;

    let respawn = args.standby_exe.map(|exe| StandbyRespawn {
        exe,
        process_name: args.standby_process_name,
        args: args.standby_args,
        settle: Duration::from_secs(args.respawn_settle_secs),
    });

    let rpc = tokio::spawn(primary::rpc_server::serve(config.client_listen_addr, registry.clone()));
    let heartbeat = tokio::spawn(primary::heartbeat_server::serve(config.standby_listen_addr, respawn));

    tokio::select! {
        r = rpc => { r??; }
        r = heartbeat => { r??; }
        _ = registration => {
            tracing::warn!("lost registration connection to router");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down on ctrl-c");
        }
    }
    Ok(())
}
