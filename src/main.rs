//! kvass - Personal Key-Value Store
//!
//! Command line front end: local reads and writes that sync with one
//! peer, plus the replication server.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kvass::api::HttpServer;
use kvass::config::KvassConfig;
use kvass::error::Result;
use kvass::node::Node;
use kvass::store::{NodeState, SyncKey};

/// kvass - Personal Key-Value Store with Two-Peer Sync
#[derive(Parser)]
#[command(name = "kvass")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database file; overrides node.db_path from the config file
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the value of a key
    Get {
        key: String,
    },

    /// Set a key; the value is read from stdin when omitted
    Set {
        key: String,
        value: Option<String>,
    },

    /// Delete a key
    Rm {
        key: String,
    },

    /// List all keys
    Ls,

    /// Print the public URL of a key
    Url {
        key: String,
    },

    /// Sync with the remote peer
    Sync {
        /// Resend everything instead of only what changed
        #[arg(long)]
        full: bool,
    },

    /// Run the replication server
    Serve {
        /// Address to listen on (defaults to the configured bind address)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Show or change the replication settings of this node
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the current settings
    Show,

    /// Set the shared encryption key (64 hex characters)
    Key { hex: String },

    /// Set the tie-break pid; lower wins
    Pid { pid: String },

    /// Set the remote peer (host:port); empty disables sync
    Remote { host: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(KvassConfig::default_path);
    let config = load_config(&cli, &config_path)?;

    // Initialize logging
    let level = cli.log_level.as_deref().unwrap_or(&config.logging.level);
    init_logging(level);

    match cli.command {
        Commands::Get { key } => run_get(&config, &key).await,
        Commands::Set { key, value } => run_set(&config, &key, value).await,
        Commands::Rm { key } => run_rm(&config, &key).await,
        Commands::Ls => run_ls(&config).await,
        Commands::Url { key } => run_url(&config, &key).await,
        Commands::Sync { full } => run_sync(&config, full).await,
        Commands::Serve { bind } => run_serve(&config, bind).await,
        Commands::Config { action } => run_config(&config, &config_path, action).await,
    }
}

/// Load the config file and apply command line overrides
fn load_config(cli: &Cli, config_path: &Path) -> Result<KvassConfig> {
    let mut config = KvassConfig::load_or_default(config_path)?;
    if let Some(db) = &cli.db {
        config.node.db_path = db.clone();
    }
    config.validate()?;
    Ok(config)
}

fn init_logging(level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Print the value of a key
async fn run_get(config: &KvassConfig, key: &str) -> Result<()> {
    let node = Node::open(config)?;
    let result = node.get(key).await?;

    match result.value {
        Some(value) => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&value)?;
            stdout.flush()?;
            Ok(())
        }
        None => missing_key(key),
    }
}

/// Set a key and push it
async fn run_set(config: &KvassConfig, key: &str, value: Option<String>) -> Result<()> {
    let value = match value {
        Some(v) => format!("{}\n", v).into_bytes(),
        None => {
            let mut buf = Vec::new();
            std::io::stdin().read_to_end(&mut buf)?;
            buf
        }
    };

    let node = Node::open(config)?;
    let result = node.set(key, value).await?;
    tracing::debug!("Wrote {}", result.value);
    Ok(())
}

/// Delete a key and push the tombstone
async fn run_rm(config: &KvassConfig, key: &str) -> Result<()> {
    let node = Node::open(config)?;
    let result = node.delete(key).await?;
    match result.value {
        Some(tombstone) => {
            tracing::debug!("Wrote {}", tombstone);
            Ok(())
        }
        None => missing_key(key),
    }
}

/// List live keys
async fn run_ls(config: &KvassConfig) -> Result<()> {
    let node = Node::open(config)?;
    for key in node.keys().await? {
        println!("{}", key);
    }
    Ok(())
}

/// Print the public URL of a key
async fn run_url(config: &KvassConfig, key: &str) -> Result<()> {
    let node = Node::open(config)?;
    let entry = match node.store().get(key).await? {
        Some(entry) if !entry.deleted => entry,
        _ => return missing_key(key),
    };

    let state = node.store().node_state().await;
    let host = if state.has_remote() {
        state.remote_hostname
    } else {
        config.server.bind_address.clone()
    };
    let base = if host.starts_with("http://") || host.starts_with("https://") {
        host.trim_end_matches('/').to_string()
    } else {
        format!("http://{}", host)
    };

    println!("{}/fetch?token={}", base, entry.url_token);
    Ok(())
}

/// Run an explicit sync round
async fn run_sync(config: &KvassConfig, full: bool) -> Result<()> {
    let node = Node::open(config)?;
    let report = node.sync(full).await?;

    println!("{}", report);
    if !report.is_clean() {
        std::process::exit(2);
    }
    Ok(())
}

/// Run the replication server until interrupted
async fn run_serve(config: &KvassConfig, bind: Option<String>) -> Result<()> {
    let node = Node::open(config)?;
    let state = node.store().node_state().await;
    let bind = bind.unwrap_or_else(|| config.server.bind_address.clone());

    tracing::info!("Starting kvass server for pid {}", state.pid);
    let server = HttpServer::new(bind, Arc::clone(node.store()), &state);

    tokio::select! {
        result = server.start() => {
            if let Err(e) = result {
                tracing::error!("Server error: {}", e);
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal");
        }
    }

    Ok(())
}

/// Show or change the node state
async fn run_config(config: &KvassConfig, config_path: &Path, action: ConfigAction) -> Result<()> {
    let node = Node::open(config)?;
    let store = node.store();

    match action {
        ConfigAction::Show => {
            let state = store.node_state().await;
            println!("kvass Node Configuration");
            println!("========================");
            println!();
            println!("Config File:      {}", config_path.display());
            println!("Database:         {}", config.node.db_path.display());
            println!("Bind Address:     {}", config.server.bind_address);
            println!();
            println!("Encryption Key:   {}", state.encryption_key.to_hex());
            println!("Pid:              {}", state.pid);
            println!(
                "Remote:           {}",
                if state.has_remote() {
                    state.remote_hostname.as_str()
                } else {
                    "(none)"
                }
            );
            println!("Version Clock:    {}", store.clock().await);
        }
        ConfigAction::Key { hex } => {
            let key = SyncKey::from_hex(&hex)?;
            store.set_encryption_key(key).await?;
            tracing::info!("Encryption key updated");
        }
        ConfigAction::Pid { pid } => {
            let pid = NodeState::parse_pid(&pid)?;
            store.set_pid(pid).await?;
            tracing::info!("Pid set to {}", pid);
        }
        ConfigAction::Remote { host } => {
            store.set_remote_hostname(&host).await?;
            tracing::info!("Remote set to {:?}", host.trim());
        }
    }

    Ok(())
}

fn missing_key(key: &str) -> Result<()> {
    eprintln!("key {:?} not found", key);
    std::process::exit(1);
}
