//! Echo peer for exercising a chat node without radio hardware.
//!
//! Either accepts one connection or connects to a listening node, then
//! writes every chunk it reads straight back.

use anyhow::Result;
use btchat_shared::defaults;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "echo-peer", about = "Echo peer for the TCP simulation", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Accept one node and echo its data
    Listen {
        #[arg(default_value = defaults::TCP_SIMULATION_ADDRESS)]
        address: String,
    },
    /// Connect to a listening node and echo its data
    Connect {
        #[arg(default_value = defaults::TCP_SIMULATION_ADDRESS)]
        address: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let stream = match Cli::parse().command {
        Commands::Listen { address } => {
            let listener = TcpListener::bind(&address).await?;
            info!("Echo peer listening on {}", address);
            let (stream, addr) = listener.accept().await?;
            info!("Connection from {}", addr);
            stream
        }
        Commands::Connect { address } => {
            let stream = TcpStream::connect(&address).await?;
            info!("Connected to {}", address);
            stream
        }
    };

    echo(stream).await
}

async fn echo(mut stream: TcpStream) -> Result<()> {
    let mut buf = vec![0u8; defaults::READ_BUFFER_SIZE];

    loop {
        match stream.read(&mut buf).await {
            Ok(0) => {
                info!("Peer disconnected");
                return Ok(());
            }
            Ok(n) => {
                info!("Echoing {} bytes: {}", n, String::from_utf8_lossy(&buf[..n]));
                stream.write_all(&buf[..n]).await?;
            }
            Err(e) => {
                warn!("Read error: {}", e);
                return Err(e.into());
            }
        }
    }
}
