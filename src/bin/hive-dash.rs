//! Hive dashboard CLI - drive the bridge from a terminal
//!
//! Page writes are printed instead of rendered, which makes the CLI useful
//! for checking a node without the desktop dashboard.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use hive_bridge::bridge::stream::{LineFramer, MemoryFeed};
use hive_bridge::bridge::view::{FileFlagStore, MemoryFlagStore, MemoryPage};
use hive_bridge::bridge::{Action, FlagStore, Page};
use hive_bridge::{Bridge, BridgeConfig};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "hive-dash")]
#[command(about = "Local agent bridge for the hive node dashboard", long_about = None)]
struct Cli {
    /// Bridge configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the gateway endpoint
    #[arg(long)]
    gateway: Option<String>,

    /// Override the event stream endpoint
    #[arg(long)]
    events: Option<String>,

    /// Persist dashboard flags in this file instead of memory
    #[arg(long)]
    flags: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a configuration file with default values
    Init {
        /// Destination path
        path: PathBuf,
    },

    /// Follow the event stream and print page writes
    Watch,

    /// Feed a captured event stream through the projections
    Replay {
        /// File holding newline-delimited events
        file: PathBuf,

        /// Chunk size used to feed the file
        #[arg(long, default_value = "4096")]
        chunk_size: usize,
    },

    /// Show login state and record the daemon session
    Status,

    /// Show storage settings
    Settings,

    /// Show listener ports
    Config,

    /// Show peer id and listen addresses
    Id,

    /// List connected peers
    Peers,

    /// List devices registered for earnings
    Devices,

    /// Show account email and role
    Profile,

    /// Show the node version
    Version,

    /// Show lifetime bandwidth
    Bandwidth,

    /// Show the storage directory
    StorageLocation,

    /// Run every read-only query concurrently
    Overview,

    /// Print the raw net earnings result
    Earnings,

    /// Change a listener port
    SetPort {
        /// Which listener
        #[arg(value_enum)]
        kind: PortArg,

        /// New port number
        port: String,
    },

    /// Check whether the swarm port is forwarded
    VerifyPort,

    /// Change the storage quota (GB)
    Storage {
        /// New quota
        gigabytes: String,
    },
}

impl Commands {
    /// Read-only queries, run by `overview`.
    const QUERIES: [Action; 10] = [
        Action::PeerIdentity,
        Action::RefreshPeers,
        Action::EarningDevices,
        Action::StorageLocation,
        Action::Profile,
        Action::Bandwidth,
        Action::Version,
        Action::Settings,
        Action::Status,
        Action::Config,
    ];

    fn query(&self) -> Option<Action> {
        let action = match self {
            Commands::Status => Action::Status,
            Commands::Settings => Action::Settings,
            Commands::Config => Action::Config,
            Commands::Id => Action::PeerIdentity,
            Commands::Peers => Action::RefreshPeers,
            Commands::Devices => Action::EarningDevices,
            Commands::Profile => Action::Profile,
            Commands::Version => Action::Version,
            Commands::Bandwidth => Action::Bandwidth,
            Commands::StorageLocation => Action::StorageLocation,
            _ => return None,
        };
        Some(action)
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum PortArg {
    Swarm,
    Websocket,
}

/// Page that prints every write and remembers values for read-back.
struct TerminalPage {
    inner: MemoryPage,
}

impl Page for TerminalPage {
    fn has_target(&self, target: &str) -> bool {
        self.inner.has_target(target)
    }

    fn set_attribute(&self, target: &str, attribute: &str, value: &str) {
        println!("{target}.{attribute} = {value}");
        self.inner.set_attribute(target, attribute, value);
    }

    fn append_child(&self, parent: &str, tag: &str, attributes: &[(String, String)]) {
        let rendered: Vec<String> = attributes
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        println!("{parent} += <{tag}> {}", rendered.join(" "));
        self.inner.append_child(parent, tag, attributes);
    }

    fn attribute(&self, target: &str, attribute: &str) -> Option<String> {
        self.inner.attribute(target, attribute)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => BridgeConfig::load(path)?,
        None => BridgeConfig::default(),
    };
    if let Some(url) = cli.gateway {
        config.gateway_url = url;
    }
    if let Some(url) = cli.events {
        config.events_url = url;
    }

    if let Commands::Init { path } = &cli.command {
        config.save(path)?;
        println!("Wrote default configuration to {}", path.display());
        return Ok(());
    }

    let flags: Arc<dyn FlagStore> = match &cli.flags {
        Some(path) => Arc::new(
            FileFlagStore::open(path)
                .with_context(|| format!("opening flag store {}", path.display()))?,
        ),
        None => Arc::new(MemoryFlagStore::new()),
    };
    let page = Arc::new(TerminalPage {
        inner: MemoryPage::auto_mounted(),
    });
    let bridge = Bridge::new(config, page.clone(), flags)?;

    if let Some(action) = cli.command.query() {
        let show_uptime = action == Action::Status;
        bridge.run(action).await?;
        if show_uptime {
            bridge.run(Action::Uptime).await?;
        }
        return Ok(());
    }

    match cli.command {
        Commands::Init { .. }
        | Commands::Status
        | Commands::Settings
        | Commands::Config
        | Commands::Id
        | Commands::Peers
        | Commands::Devices
        | Commands::Profile
        | Commands::Version
        | Commands::Bandwidth
        | Commands::StorageLocation => {}

        Commands::Watch => {
            let (mut states, handle) = bridge.start_events()?;
            tokio::spawn(async move {
                while states.changed().await.is_ok() {
                    tracing::info!(state = ?*states.borrow(), "event stream state");
                }
            });
            let report = handle.await?;
            println!(
                "Stream ended after {} connection(s): {} events applied, {} ignored ({:?})",
                report.connections, report.records, report.ignored, report.termination
            );
        }

        Commands::Replay { file, chunk_size } => {
            let data = std::fs::read(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let feed = MemoryFeed::from_bytes(&data, chunk_size);
            let consumer = bridge.events()?;
            let framer = LineFramer::new(feed, bridge.config().frame_capacity);
            let outcome = consumer.consume(framer).await;
            println!(
                "Replayed {} events, {} ignored ({:?})",
                outcome.records, outcome.ignored, outcome.termination
            );
        }

        Commands::Overview => {
            let dashboard = bridge.dashboard();
            let queries = Commands::QUERIES;
            let runs = queries.iter().map(|action| dashboard.run(action));
            let results = futures::future::join_all(runs).await;
            for (action, result) in queries.iter().zip(results) {
                if let Err(err) = result {
                    eprintln!("{}: {err}", action.name());
                }
            }
        }

        Commands::Earnings => {
            let earnings = bridge.dashboard().earnings().await?;
            println!("{earnings}");
        }

        Commands::SetPort { kind, port } => {
            let (input, action) = match kind {
                PortArg::Swarm => ("SwrmPortNumber", Action::SetSwarmPort),
                PortArg::Websocket => ("WebSocketPortNumber", Action::SetWebsocketPort),
            };
            page.inner.set_attribute(input, "value", &port);
            bridge.run(action).await?;
        }

        Commands::VerifyPort => {
            bridge.run(Action::VerifyPortForward).await?;
        }

        Commands::Storage { gigabytes } => {
            page.inner.set_attribute("rangeSlider", "value", &gigabytes);
            bridge.run(Action::ModifyStorage).await?;
        }
    }

    Ok(())
}
