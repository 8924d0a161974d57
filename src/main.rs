// Proxylist Relay - Main Entry Point
//
// Runs the relay, which manages:
// - CLI interface
// - Whitelist state file
// - Relay HTTP endpoint
// - Operator admin console on stdin

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use proxylist_relay::admin::AdminConsole;
use proxylist_relay::config::Config;
use proxylist_relay::relay::RelayHandler;
use proxylist_relay::relay_server;
use proxylist_relay::upstream::HttpFetcher;
use proxylist_relay::whitelist::{QuotaGate, WhitelistStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

/// Proxylist Relay: whitelisted, quota-gated upstream relay
#[derive(Parser, Debug)]
#[command(name = "proxylist-relay")]
#[command(author = "Proxylist Relay Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Whitelisted, quota-gated relay for an upstream proxy list", long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Command to run (default: serve)
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the relay endpoint and the admin console
    Serve {
        /// Port to listen on
        #[arg(long)]
        port: Option<u16>,

        /// Address to bind
        #[arg(long)]
        bind: Option<String>,

        /// Whitelist state file
        #[arg(long)]
        store: Option<PathBuf>,

        /// Do not read admin commands from stdin
        #[arg(long)]
        no_admin: bool,
    },
    /// Create the whitelist state file if it does not exist
    Init {
        /// Whitelist state file
        #[arg(long)]
        store: Option<PathBuf>,
    },
    /// Print the whitelist entries
    List {
        /// Whitelist state file
        #[arg(long)]
        store: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };

    let command = args.command.unwrap_or(Commands::Serve {
        port: None,
        bind: None,
        store: None,
        no_admin: false,
    });
    apply_cli_overrides(&mut config, &command);
    config.validate()?;

    init_tracing(&config, args.verbose)?;

    let runtime = tokio::runtime::Runtime::new().context("Failed to start tokio runtime")?;
    let result = runtime.block_on(run(config, command));

    // A pending stdin read holds a blocking thread; don't wait on it
    runtime.shutdown_timeout(Duration::from_millis(200));
    result
}

fn apply_cli_overrides(config: &mut Config, command: &Commands) {
    match command {
        Commands::Serve {
            port,
            bind,
            store,
            no_admin,
        } => {
            if let Some(port) = port {
                config.server.port = *port;
            }
            if let Some(bind) = bind {
                config.server.bind_address = bind.clone();
            }
            if let Some(store) = store {
                config.store.path = store.clone();
            }
            if *no_admin {
                config.admin.enabled = false;
            }
        }
        Commands::Init { store } | Commands::List { store } => {
            if let Some(store) = store {
                config.store.path = store.clone();
            }
        }
    }
}

fn init_tracing(config: &Config, verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { config.log_level()? };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match config.logging.format.to_lowercase().as_str() {
        "json" => builder.json().init(),
        "pretty" => builder.pretty().init(),
        _ => builder.compact().init(),
    }
    Ok(())
}

async fn run(config: Config, command: Commands) -> Result<()> {
    match command {
        Commands::Serve { .. } => serve(config).await,
        Commands::Init { .. } => {
            let store = open_store(&config).await?;
            println!("Whitelist store ready at {}", store.path().display());
            Ok(())
        }
        Commands::List { .. } => list(&config).await,
    }
}

/// Open the store, creating it if missing, and make sure it is readable
async fn open_store(config: &Config) -> Result<WhitelistStore> {
    let store = WhitelistStore::initialize(&config.store.path)
        .await
        .with_context(|| format!("Failed to initialize whitelist store at {:?}", config.store.path))?;

    store
        .load()
        .await
        .context("Whitelist store is unreadable; fix or remove the file and restart")?;

    Ok(store)
}

async fn serve(config: Config) -> Result<()> {
    info!("Proxylist relay v{} starting...", env!("CARGO_PKG_VERSION"));

    let store = Arc::new(open_store(&config).await?);
    let fetcher = HttpFetcher::new(config.upstream.url.clone(), config.upstream_timeout())
        .context("Failed to create upstream client")?;
    let handler = Arc::new(RelayHandler::new(
        QuotaGate::new(Arc::clone(&store)),
        Arc::new(fetcher),
    ));

    if config.admin.enabled {
        let console = AdminConsole::new(Arc::clone(&store))
            .with_startup_delay(Duration::from_millis(config.admin.startup_delay_ms))
            .with_command_pause(Duration::from_millis(config.admin.command_pause_ms));
        tokio::spawn(async move {
            if let Err(e) = console.run_stdio().await {
                error!("Admin console stopped: {}", e);
            }
        });
    } else {
        info!("Admin console disabled");
    }

    relay_server::start_relay_server(config.bind_addr()?, handler).await
}

async fn list(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    let whitelist = store.load().await?;

    if whitelist.is_empty() {
        println!("Whitelist is empty");
        return Ok(());
    }

    println!("{:<40} {:>10} {:>10} {:>10}", "IP", "USED", "MAX", "REMAINING");
    for entry in &whitelist.entries {
        println!(
            "{:<40} {:>10} {:>10} {:>10}",
            entry.client_id,
            entry.used_requests,
            entry.max_requests,
            entry.remaining()
        );
    }
    Ok(())
}
