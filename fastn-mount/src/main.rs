//! fastn-mount: tunnel daemon and client
//!
//! `fastn-mount daemon` runs the forwarding engine on an iroh endpoint; every
//! other command talks to the running daemon over its Unix domain socket.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "fastn-mount")]
#[command(about = "Forward TCP services over peer-to-peer protocol streams")]
struct Cli {
    /// Custom home directory (defaults to FASTN_MOUNT_HOME env var or ~/.fastn-mount)
    #[arg(long, global = true, env = "FASTN_MOUNT_HOME")]
    home: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon in the foreground
    Daemon,
    /// Forward connections to a local address to a protocol on a remote peer
    Forward {
        /// Protocol name, e.g. /x/ssh
        protocol: String,
        /// Local address to listen on, e.g. /ip4/127.0.0.1/tcp/2222
        listen_address: String,
        /// Remote peer, e.g. /p2p/<peer-id>
        target_address: String,
        /// Don't require the /x/ prefix on the protocol name
        #[arg(long)]
        allow_custom_protocol: bool,
    },
    /// Forward streams for a protocol on this peer to a local address
    Listen {
        /// Protocol name, e.g. /x/ssh
        protocol: String,
        /// Local address to dial, e.g. /ip4/127.0.0.1/tcp/22
        target_address: String,
        /// Don't require the /x/ prefix on the protocol name
        #[arg(long)]
        allow_custom_protocol: bool,
    },
    /// Stop listeners
    Close {
        /// Close all listeners
        #[arg(short, long)]
        all: bool,
        /// Match listeners for this protocol
        #[arg(short, long)]
        protocol: Option<String>,
        /// Match listeners on this listen address
        #[arg(short, long)]
        listen_address: Option<String>,
        /// Match listeners with this target address
        #[arg(short, long)]
        target_address: Option<String>,
    },
    /// List active listeners
    Ls {
        /// Print table headers
        #[arg(short = 'v', long)]
        headers: bool,
    },
    /// Manage forwarded streams
    Stream {
        #[command(subcommand)]
        command: StreamCommands,
    },
    /// Print this peer's id
    Id,
}

#[derive(Subcommand)]
enum StreamCommands {
    /// List active streams
    Ls {
        /// Print table headers
        #[arg(short = 'v', long)]
        headers: bool,
    },
    /// Reset streams
    Close {
        /// Stream id
        id: Option<u64>,
        /// Reset all streams
        #[arg(short, long)]
        all: bool,
    },
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let home = cli::get_home(cli.home)?;

    use fastn_mount::control::ControlRequest;
    match cli.command {
        Commands::Daemon => cli::daemon::run(home).await,
        Commands::Forward {
            protocol,
            listen_address,
            target_address,
            allow_custom_protocol,
        } => {
            let request = ControlRequest::Forward {
                protocol,
                listen_address,
                target_address,
                allow_custom_protocol,
            };
            cli::client::opened(&home, request).await
        }
        Commands::Listen {
            protocol,
            target_address,
            allow_custom_protocol,
        } => {
            let request = ControlRequest::Listen {
                protocol,
                target_address,
                allow_custom_protocol,
            };
            cli::client::opened(&home, request).await
        }
        Commands::Close {
            all,
            protocol,
            listen_address,
            target_address,
        } => {
            let request = ControlRequest::Close {
                all,
                protocol,
                listen_address,
                target_address,
            };
            cli::client::closed(&home, request).await
        }
        Commands::Ls { headers } => cli::client::list_listeners(&home, headers).await,
        Commands::Stream { command } => match command {
            StreamCommands::Ls { headers } => cli::client::list_streams(&home, headers).await,
            StreamCommands::Close { id, all } => {
                cli::client::closed(&home, ControlRequest::StreamClose { handle: id, all }).await
            }
        },
        Commands::Id => cli::client::peer_id(&home).await,
    }
}
