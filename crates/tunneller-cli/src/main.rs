//! Tunneller - expose local services through a reverse-tunnel relay

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tunneller_admin::AppState;
use tunneller_agent::{ConfigManager, ConfigStore, OperationalMode, TunnelClient};

/// Reverse-tunnel agent: registers with a relay and forwards incoming
/// requests to local backends by path
#[derive(Parser, Debug)]
#[command(name = "tunneller")]
#[command(about = "Expose local servers through a reverse-tunnel relay", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Agent domain (overrides the configured one)
    #[arg(short, long)]
    domain: Option<String>,

    /// Signal server host (overrides the configured one)
    #[arg(long)]
    signal_host: Option<String>,

    /// Signal server port
    #[arg(long)]
    signal_port: Option<u16>,

    /// Data channel port
    #[arg(long)]
    data_port: Option<u16>,

    /// Forwarding mode: raw or routing
    #[arg(long)]
    mode: Option<String>,

    /// Admin API port (overrides the configured one)
    #[arg(long)]
    admin_port: Option<u16>,

    /// Disable the admin API
    #[arg(long)]
    no_admin: bool,

    /// Do not connect at startup; wait for POST /client/start
    #[arg(long)]
    standby: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "TUNNELLER_LOG")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the configured routing rules and exit
    Routes,
    /// Print the resolved configuration as JSON and exit
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .context("invalid log level")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = ConfigManager::load()?;

    if let Some(domain) = cli.domain {
        config.domain = domain;
    }
    if let Some(host) = cli.signal_host {
        config.signal_host = host;
    }
    if let Some(port) = cli.signal_port {
        config.signal_port = port;
    }
    if let Some(port) = cli.data_port {
        config.data_port = port;
    }
    if let Some(port) = cli.admin_port {
        config.admin_port = port;
    }
    if let Some(mode) = cli.mode.as_deref() {
        config.mode = match mode.to_ascii_lowercase().as_str() {
            "raw" => OperationalMode::RawMode,
            "routing" => OperationalMode::RoutingMode,
            other => anyhow::bail!("unknown mode {other:?}, expected raw or routing"),
        };
    }

    match cli.command {
        Some(Commands::Routes) => {
            for (index, rule) in config.routes.iter().enumerate() {
                println!("{index}: {rule}");
            }
            return Ok(());
        }
        Some(Commands::Config) => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            return Ok(());
        }
        None => {}
    }

    let admin_port = config.admin_port;
    let store = Arc::new(ConfigStore::new(config));
    let client = TunnelClient::new(store.clone());

    if cli.no_admin {
        info!("Admin API disabled");
    } else {
        let state = Arc::new(AppState {
            client: client.clone(),
        });
        let addr: SocketAddr = ([127, 0, 0, 1], admin_port).into();
        tokio::spawn(async move {
            if let Err(e) = tunneller_admin::serve(state, addr).await {
                error!("Admin API failed: {e:#}");
            }
        });
    }

    if cli.standby {
        info!("Standby: waiting for start via the admin API");
    } else {
        client.connect().context("failed to start client")?;
    }

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!("Interrupt received, shutting down");

    if client.is_running() {
        if let Err(e) = client.disconnect() {
            warn!("Shutdown error: {e}");
        }
    }
    if store.auto_save() {
        if let Err(e) = ConfigManager::save(&store.snapshot()) {
            warn!("Failed to save configuration: {e:#}");
        }
    }

    Ok(())
}
