use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use add_two_ints::{srv::AddTwoInts, CLIENT_NODE_ID, SERVICE_NAME};
use clap::Parser;
use srv_node::{shutdown_signal, tcp::TcpLink, Error, NodeConfig, Requester};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Sends one add_two_ints request and prints the sum.
#[derive(Debug, Parser)]
#[command(name = "add_two_ints_client")]
struct Args {
    #[arg(allow_negative_numbers = true)]
    a: i64,
    #[arg(allow_negative_numbers = true)]
    b: i64,
    /// JSON config file.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Server address, overrides the config file.
    #[arg(long)]
    address: Option<SocketAddr>,
    /// Give up waiting for the service after this many milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,
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
    if let Some(timeout_ms) = args.timeout_ms {
        config.availability_timeout_ms = Some(timeout_ms);
    }
    config.validate()?;

    let link = Arc::new(TcpLink::connect(config.address, config.reconnect_interval()));
    let client = Requester::<AddTwoInts::Service>::with_transport(link, SERVICE_NAME);

    warn!(node = CLIENT_NODE_ID, "Waiting for service...");
    tokio::select! {
        available = client.await_availability(config.poll_interval(), config.availability_timeout()) => available?,
        () = shutdown_signal() => {
            info!(node = CLIENT_NODE_ID, "Interrupted while waiting for service.");
            return Ok(());
        }
    }
    info!(node = CLIENT_NODE_ID, "Service available.");

    let request = AddTwoInts::Request {
        a: args.a,
        b: args.b,
    };
    match client
        .send_request(&request)?
        .cancel_on(shutdown_signal())
        .await
    {
        Ok(response) => info!(
            node = CLIENT_NODE_ID,
            "Result of add_two_ints: for {} + {} = {}", request.a, request.b, response.sum
        ),
        Err(Error::Cancelled { .. }) => {
            info!(node = CLIENT_NODE_ID, "Request cancelled, shutting down.")
        }
        Err(e) => return Err(e.into()),
    }

    Ok(())
}
