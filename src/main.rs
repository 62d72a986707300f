use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};

use sessionkit_core::config::provider::{ConfigProvider, EnvConfigProvider, FileConfigProvider};
use sessionkit_core::config::{self, Config, Repository};
use sessionkit_core::session::manager::BUILTIN_STORAGES;
use sessionkit_core::session::{MemoryCookieJar, SessionManager, SessionStore};

#[derive(Parser)]
#[command(
    name = "sessionkit",
    about = "Inspect and maintain session storage",
    version = sessionkit_core::VERSION,
    long_version = sessionkit_core::LONG_VERSION,
)]
struct Cli {
    /// Config file (defaults to SESSIONKIT_CONFIG / SESSION_* / ~/.sessionkit/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Storage to operate on instead of the configured one
    #[arg(short, long, global = true)]
    storage: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config and prepare the file storage directory
    Init,
    /// Create the relational session table
    CreateTable,
    /// Sweep expired sessions now
    Gc,
    /// Print a stored session as JSON
    Show {
        /// Session id
        id: String,
    },
    /// Delete a stored session
    Forget {
        /// Session id
        id: String,
    },
    /// Print the effective configuration, or a single dotted key
    Config {
        /// Key such as `session.lifetime`
        key: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sessionkit=info".parse()?)
                .add_directive("sessionkit_core=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let provider: Box<dyn ConfigProvider> = match &cli.config {
        Some(path) => Box::new(FileConfigProvider::new(Some(path.as_path()))),
        None => Box::new(EnvConfigProvider),
    };
    let mut cfg = provider.load_config();
    if let Some(storage) = cli.storage {
        cfg.session.storage = storage;
    }
    tracing::debug!("Using session storage {}", cfg.session.storage);

    match cli.command {
        Commands::Init => cmd_init(&cfg, cli.config.as_deref())?,
        Commands::CreateTable => cmd_create_table(&cfg).await?,
        Commands::Gc => cmd_gc(cfg).await?,
        Commands::Show { id } => cmd_show(cfg, &id).await?,
        Commands::Forget { id } => cmd_forget(cfg, &id).await?,
        Commands::Config { key } => cmd_config(&cfg, key.as_deref())?,
    }

    Ok(())
}

// ====== Commands ======

/// Manager bound to the configured storage, outside of any request.
async fn started_manager(cfg: Config) -> Result<SessionManager> {
    let storage = cfg.session.storage.clone();
    let mut manager = SessionManager::new(cfg.session, Arc::new(MemoryCookieJar::new()));
    manager.start(&storage).await?;
    Ok(manager)
}

fn cmd_init(cfg: &Config, config_path: Option<&std::path::Path>) -> Result<()> {
    let path = config_path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(config::get_config_path);

    if path.exists() {
        println!("Config already exists at {}", path.display());
    } else {
        config::save_config(cfg, Some(path.as_path()))?;
        println!("Created config at {}", path.display());
    }

    let dir = cfg.session.storage_dir();
    std::fs::create_dir_all(&dir)?;
    println!("File storage directory: {}", dir.display());
    Ok(())
}

#[cfg(feature = "database-backend")]
async fn cmd_create_table(cfg: &Config) -> Result<()> {
    let url = cfg.session.database_url();
    let store = sessionkit_core::session::DatabaseSessionStore::connect(&url).await?;
    store.create_table().await?;
    println!("Session table ready at {}", url);
    Ok(())
}

#[cfg(not(feature = "database-backend"))]
async fn cmd_create_table(_cfg: &Config) -> Result<()> {
    bail!("sessionkit was built without the database-backend feature")
}

async fn cmd_gc(cfg: Config) -> Result<()> {
    let manager = started_manager(cfg).await?;
    match manager.clean().await? {
        Some(removed) => println!("Removed {} expired sessions", removed),
        None => println!(
            "Storage '{}' keeps no sweepable index; nothing to do",
            manager.config().storage
        ),
    }
    Ok(())
}

async fn cmd_show(cfg: Config, id: &str) -> Result<()> {
    let manager = started_manager(cfg).await?;
    match manager.store()?.load(id).await? {
        Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
        None => bail!("No session stored under {}", id),
    }
    Ok(())
}

async fn cmd_forget(cfg: Config, id: &str) -> Result<()> {
    let manager = started_manager(cfg).await?;
    manager.store()?.delete(id).await?;
    println!("Forgot session {}", id);
    Ok(())
}

fn cmd_config(cfg: &Config, key: Option<&str>) -> Result<()> {
    let repo = Repository::from_config(cfg)?;
    match key {
        Some(key) => match repo.get(key) {
            Some(value) => println!("{}", serde_json::to_string_pretty(value)?),
            None => bail!("No config value at {}", key),
        },
        None => {
            println!("{}", serde_json::to_string_pretty(repo.all())?);
            println!("\nBuilt-in storages: {}", BUILTIN_STORAGES.join(", "));
        }
    }
    Ok(())
}
