use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod authoring;
mod config;
mod error;
mod linkset;
mod merge;
mod metrics;
mod middleware;
mod migrate_v2;
mod model;
mod negotiation;
mod path_codec;
mod resolver;
mod server;
mod store;
mod toolkit;

use config::Config;
use merge::upsert_entries;
use migrate_v2::{migrate_document, V2Document};
use model::Entry;
use store::{DocumentStore, MemoryStore, SqliteStore};

#[derive(Parser)]
#[command(name = "resolver", version)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter JSON config.
    Init,
    /// Bind the Resolver and Data-Entry HTTP surfaces and block.
    Serve,
    /// Run the V2->V3 importer offline against a file of v2 documents.
    MigrateV2 {
        #[arg(long)]
        input: PathBuf,
    },
    /// Print store reachability and a document-count summary.
    Status,
}

fn resolve_config_path(path: Option<String>) -> PathBuf {
    if let Some(path) = path {
        return PathBuf::from(path);
    }
    let mut home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.push(".resolver");
    home.push("config.json");
    home
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "resolver=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> anyhow::Result<()> {
    let path = resolve_config_path(cli.config.clone());
    match &cli.command {
        Commands::Init => init_config(&path)?,
        Commands::Serve => {
            server::run_server(path).await?;
        }
        Commands::MigrateV2 { input } => migrate_v2_command(&path, input).await?,
        Commands::Status => status_command(&path).await?,
    }
    Ok(())
}

fn init_config(path: &PathBuf) -> anyhow::Result<()> {
    if path.exists() {
        anyhow::bail!("config already exists: {}", path.display());
    }
    let config = Config::default();
    config::save_config(path, &config)
        .with_context(|| format!("failed to write config: {}", path.display()))?;
    println!("wrote {}", path.display());
    Ok(())
}

fn build_store(config: &Config) -> anyhow::Result<Arc<dyn DocumentStore>> {
    let store: Arc<dyn DocumentStore> = match config.store.backend {
        config::StoreBackend::Memory => Arc::new(MemoryStore::new()),
        config::StoreBackend::Sqlite => {
            let path = config
                .store
                .path
                .clone()
                .unwrap_or_else(|| "resolver.sqlite3".to_string());
            Arc::new(SqliteStore::open(&path)?)
        }
    };
    Ok(store)
}

/// Offline counterpart to `POST /api/migrate-v2` (SPEC_FULL §A, §J): unlike
/// the HTTP endpoint, this subcommand persists the converted entries.
async fn migrate_v2_command(config_path: &PathBuf, input: &PathBuf) -> anyhow::Result<()> {
    let config = config::load_config(config_path)
        .with_context(|| format!("failed to load config: {}", config_path.display()))?;
    let store = build_store(&config)?;

    let raw = std::fs::read_to_string(input)
        .with_context(|| format!("failed to read {}", input.display()))?;
    let docs: Vec<V2Document> =
        serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", input.display()))?;

    let entries: Vec<Entry> = docs.iter().map(migrate_document).collect();
    let (authored, errors) = authoring::author_batch(&entries);

    println!("{:<40} {:<6} MESSAGE", "ID", "STATUS");
    for (anchor, err) in &errors {
        println!("{anchor:<40} {:<6} {err}", "400");
    }
    for doc in authored {
        match upsert_entries(&store, doc).await {
            Ok((stored, status)) => println!("{:<40} {:<6} ok", stored.id, status),
            Err(e) => println!("{:<40} {:<6} {e}", "unknown", "ERR"),
        }
    }

    if !errors.is_empty() {
        anyhow::bail!("{} of {} entries failed authoring", errors.len(), entries.len());
    }
    Ok(())
}

async fn status_command(config_path: &PathBuf) -> anyhow::Result<()> {
    if !config_path.exists() {
        println!("config not found at {}", config_path.display());
        return Ok(());
    }
    let config = config::load_config(config_path)
        .with_context(|| format!("failed to load config: {}", config_path.display()))?;
    println!("config: {}", config_path.display());
    println!("resolver listen: {}", config.global.listen);
    println!("data-entry listen: {}", config.global.data_entry_listen);

    match build_store(&config) {
        Ok(store) => match store.list_ids().await {
            Ok(ids) => println!("store: reachable ({} documents)", ids.len()),
            Err(e) => println!("store: unreachable ({e})"),
        },
        Err(e) => println!("store: failed to open ({e})"),
    }
    Ok(())
}
