use std::{net::SocketAddr, path::PathBuf};

use add_two_ints::{SERVER_NODE_ID, SERVICE_NAME};
use clap::Parser;
use srv_node::{shutdown_signal, tcp, Context, NodeConfig};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Offers the add_two_ints service until interrupted.
#[derive(Debug, Parser)]
#[command(name = "add_two_ints_server")]
struct Args {
    /// JSON config file.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Address to listen on, overrides the config file.
    #[arg(long)]
    address: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
    let args = Args::parse();

    let mut config = NodeConfig::load(args.config.as_deref())?;
    if let Some(address) = args.address {
        config.address = address;
    }
    config.validate()?;

    let context = Context::new();
    let responder = add_two_ints::responder(&context, config.queue_depth)?;

    let listener = TcpListener::bind(config.address).await?;
    info!(
        node = SERVER_NODE_ID,
        "Service '{}' listening on {}.",
        SERVICE_NAME,
        listener.local_addr()?
    );
    let serving = tokio::spawn(tcp::serve(
        listener,
        responder.endpoint(),
        std::future::pending(),
    ));

    responder.run(shutdown_signal()).await;
    serving.abort();

    info!(node = SERVER_NODE_ID, "Node stopped.");
    Ok(())
}
