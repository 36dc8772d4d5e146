use std::net::SocketAddr;

use clap::Parser;
use router::Router;

/// Discovery front door: tells clients which host is currently primary.
#[derive(Parser, Debug)]
#[command(name = "router", about = "tiny-social-network discovery router")]
struct Args {
    /// Address primaries/standbys register against.
    #[arg(long, default_value = "0.0.0.0:9000")]
    backend_addr: SocketAddr,

    /// Address clients connect to for discovery.
    #[arg(long, default_value = "0.0.0.0:9001")]
    client_addr: SocketAddr,
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let router = Router::new();
    router.serve(args.backend_addr, args.client_addr).await
}
