mod connection;
mod transport;

use anyhow::{bail, Result};
use btchat_shared::{defaults, ConnectionEvent, DiscoveredPeer, PeerAddress, Role};
use clap::{Parser, Subcommand, ValueEnum};
use connection::{BluetoothConfig, BluetoothMode, ConnectionConfig, ConnectionManager, RoleHandle};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use transport::{
    BluerRadio, BtDiscovery, BtDiscoveryConfig, RfcommTransport, SimulatedRadio, TcpTransport,
    Transport,
};

use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "bt-chat")]
#[command(about = "Point-to-point chat over a Bluetooth RFCOMM session", long_about = None)]
#[command(version)]
struct Cli {
    /// Socket backend
    #[arg(long, value_enum, default_value_t = Mode::Tcp)]
    transport: Mode,
    /// Address the TCP simulation listens on
    #[arg(long, default_value = defaults::TCP_SIMULATION_ADDRESS)]
    tcp_address: String,
    /// RFCOMM channel advertised when listening
    #[arg(long, default_value_t = defaults::RFCOMM_CHANNEL)]
    channel: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Wait for one peer to connect
    Listen,
    /// Connect to a peer address
    Connect { address: String },
    /// Scan for devices and connect to the first match
    Scan {
        /// Only connect to devices whose name contains this
        #[arg(short, long)]
        name: Option<String>,
        /// Scan duration in seconds
        #[arg(long, default_value_t = 12)]
        seconds: u64,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    Rfcomm,
    Tcp,
}

impl From<Mode> for BluetoothMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Rfcomm => BluetoothMode::Rfcomm,
            Mode::Tcp => BluetoothMode::TcpSimulation,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();
    let name_filter = match &cli.command {
        Commands::Scan { name, .. } => name.clone(),
        _ => None,
    };
    let config = ConnectionConfig {
        bluetooth: BluetoothConfig {
            mode: cli.transport.into(),
            channel: cli.channel,
            tcp_address: cli.tcp_address.clone(),
            name_filter,
        },
        ..Default::default()
    };

    info!("bt-chat starting: {}", config.service);

    match config.bluetooth.mode {
        BluetoothMode::Rfcomm => {
            let transport = RfcommTransport::new(config.bluetooth.channel).await?;
            let radio = Arc::new(BluerRadio::new(transport.adapter()));

            let discovery = match &cli.command {
                Commands::Scan { seconds, .. } => {
                    let scanner = BtDiscovery::new(BtDiscoveryConfig {
                        scan_duration: Duration::from_secs(*seconds),
                    });
                    let (candidates, scan) = scanner.start(transport.adapter());
                    radio.set_scan(scan);
                    Some(candidates)
                }
                _ => None,
            };

            let manager = ConnectionManager::new(config, transport, radio);
            run(manager, cli.command, discovery).await
        }
        BluetoothMode::TcpSimulation => {
            if matches!(cli.command, Commands::Scan { .. }) {
                bail!("Device discovery requires --transport rfcomm");
            }
            info!("  TCP simulation: {}", config.bluetooth.tcp_address);

            let transport = TcpTransport::new(config.bluetooth.tcp_address.clone());
            let manager = ConnectionManager::new(config, transport, Arc::new(SimulatedRadio::new()));
            run(manager, cli.command, None).await
        }
    }
}

/// Start the requested role and consume events until shutdown
async fn run<T: Transport>(
    mut manager: ConnectionManager<T>,
    command: Commands,
    mut discovery: Option<mpsc::Receiver<DiscoveredPeer>>,
) -> Result<()> {
    info!("Service: {}", manager.service());
    let mut role = match command {
        Commands::Listen => Some(manager.start_server()),
        Commands::Connect { address } => Some(manager.start_client(PeerAddress::from(address))),
        Commands::Scan { .. } => None,
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            event = manager.recv() => match event {
                Some(event) => handle_event(&event),
                None => {
                    error!("Connection manager closed");
                    break;
                }
            },
            candidate = next_candidate(&mut discovery) => match candidate {
                Some(peer) => {
                    if let Some(started) = manager.on_candidate(&peer) {
                        info!("Found {} ({:?}), connecting", peer.address, peer.name);
                        role = Some(started);
                    }
                }
                None => {
                    info!("Discovery finished");
                    manager.discovery_finished();
                    discovery = None;
                }
            },
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    if !handle_line(&manager, role.as_ref(), line.trim()).await {
                        break;
                    }
                }
                Ok(None) => stdin_open = false,
                Err(e) => {
                    warn!("stdin closed: {}", e);
                    stdin_open = false;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    if let Some(role) = role {
        role.cancel();
    }
    if let Some(session) = manager.current_session() {
        session.cancel();
        if tokio::time::timeout(Duration::from_secs(1), session.closed())
            .await
            .is_err()
        {
            warn!("Session {} did not close in time", session.id());
        }
    }
    Ok(())
}

async fn next_candidate(
    discovery: &mut Option<mpsc::Receiver<DiscoveredPeer>>,
) -> Option<DiscoveredPeer> {
    match discovery {
        Some(candidates) => candidates.recv().await,
        None => std::future::pending().await,
    }
}

/// Handle one line typed by the user; returns false to quit
async fn handle_line<T: Transport>(
    manager: &ConnectionManager<T>,
    role: Option<&RoleHandle>,
    line: &str,
) -> bool {
    match line {
        "" => {}
        "/quit" => return false,
        "/status" => {
            match manager.current_session() {
                Some(session) => info!(
                    "Session {} ({}) with {}",
                    session.id(),
                    session.role(),
                    session.peer()
                ),
                None => info!("No active session"),
            }
            if let Some(role) = role {
                let state = if role.is_finished() { "finished" } else { "running" };
                info!("{} role {}", role.role(), state);
            }
        }
        "/close" => match manager.current_session() {
            Some(session) => session.cancel(),
            None => warn!("No active session"),
        },
        text => {
            if let Err(e) = manager.send_on_current(text.as_bytes()).await {
                warn!("Not sent: {}", e);
            }
        }
    }
    true
}

fn handle_event(event: &ConnectionEvent) {
    match event {
        ConnectionEvent::Connecting { role } => {
            info!("[{}] Waiting for a peer on the chat service", role);
        }
        ConnectionEvent::Connected { role, peer } => match role {
            Role::Initiator => info!("Connected as client to {}", peer),
            Role::Listener => info!("Connected as server to {}", peer),
        },
        ConnectionEvent::ConnectionFailed { role, cause } if cause.ends_session() => {
            warn!("[{}] Session ended: {}", role, cause);
        }
        ConnectionEvent::ConnectionFailed { role, cause } => {
            error!("[{}] {}", role, cause);
        }
        ConnectionEvent::DataReceived { bytes, length } => {
            info!("<< {} ({} bytes)", String::from_utf8_lossy(bytes), length);
        }
        ConnectionEvent::DataSent { length } => {
            debug!(">> {} bytes sent", length);
        }
    }
}
