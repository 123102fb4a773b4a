//! Contents index service entry point.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use debfind::{
    builder::IndexBuilder,
    config::Config,
    error::{IndexError, IndexResult},
    fetch::FeedFetcher,
    refresh::{PeriodicRefresh, Refresher},
    search::SearchEngine,
    store::Store,
    web::{self, AppState},
};

#[derive(Parser)]
#[command(version, about = "Find which Debian packages ship a file")]
struct Args {
    #[clap(long, default_value = "debfind.json")]
    /// Path to configuration.
    config: PathBuf,

    #[clap(long)]
    /// Address to listen on, overriding the configuration.
    listen_address: Option<String>,

    #[clap(long, env = "PORT")]
    /// Port to listen on, overriding the configuration.
    port: Option<u16>,

    #[clap(flatten)]
    logging: debfind::logging::LoggingArgs,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Refresh all archives, then serve queries while refreshing periodically.
    Serve,
    /// Run a single refresh and exit.
    Refresh {
        #[clap(long)]
        /// Only refresh this archive.
        archive: Option<String>,
    },
    /// Query the local index and print the result as JSON.
    Find {
        /// Archive or archive group to search.
        archive: String,
        /// Glob pattern matched against whole paths.
        pattern: String,
    },
}

#[tokio::main]
async fn main() -> IndexResult<()> {
    let args = Args::parse();

    args.logging.init();

    let mut config = if args.config.exists() {
        info!("Loading configuration from: {:?}", args.config);
        Config::from_file(&args.config)?
    } else {
        warn!("Configuration file not found, using defaults");
        create_default_config(&args.config)?
    };

    if let Some(address) = args.listen_address {
        config.server.bind_address = address;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    config.validate()?;

    let store = Arc::new(Store::open(&config.database_path)?);

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, store).await,
        Command::Refresh { archive } => refresh(config, store, archive.as_deref()).await,
        Command::Find { archive, pattern } => {
            let engine = SearchEngine::new(store, config.groups, config.search);
            let result = engine.find(&archive, &pattern).await;
            let output = serde_json::to_string_pretty(&result)
                .map_err(|e| IndexError::Configuration(e.to_string()))?;
            println!("{}", output);
            Ok(())
        }
    }
}

fn refresher(config: &Config, store: Arc<Store>) -> IndexResult<Refresher> {
    let fetcher = FeedFetcher::new(&config.ingest)?;
    let builder = Arc::new(IndexBuilder::new(store, config.ingest.batch_size));
    Ok(Refresher::new(config.archives.clone(), fetcher, builder))
}

/// Run a single refresh cycle, or refresh a single archive.
async fn refresh(config: Config, store: Arc<Store>, archive: Option<&str>) -> IndexResult<()> {
    let removed = store.remove_orphans()?;
    if !removed.is_empty() {
        info!("Removed {} orphaned namespaces", removed.len());
    }

    let refresher = refresher(&config, store)?;
    match archive {
        Some(archive) => {
            refresher.refresh_archive(archive).await?;
        }
        None => {
            let report = refresher.refresh_all().await?;
            if let Some((archive, Err(e))) = report.iter().find(|(_, r)| r.is_err()) {
                error!("Refresh of {} failed: {}", archive, e);
                return Err(IndexError::Fetch(format!(
                    "{} of {} archives failed to refresh",
                    report.values().filter(|r| r.is_err()).count(),
                    report.len()
                )));
            }
        }
    }
    Ok(())
}

/// Refresh once, then serve the HTTP API until interrupted.
async fn serve(config: Config, store: Arc<Store>) -> IndexResult<()> {
    let removed = store.remove_orphans()?;
    if !removed.is_empty() {
        info!("Removed {} orphaned namespaces", removed.len());
    }

    let refresher = Arc::new(refresher(&config, Arc::clone(&store))?);
    if let Err(e) = refresher.refresh_all().await {
        error!("Initial refresh failed: {}", e);
        return Err(e);
    }

    let periodic = PeriodicRefresh::start(Arc::clone(&refresher), config.refresh.interval());

    let engine = SearchEngine::new(store, config.groups.clone(), config.search.clone());
    let state = AppState {
        engine: Arc::new(engine),
        search_timeout: config.search.timeout(),
    };
    let bind_address = format!("{}:{}", config.server.bind_address, config.server.port);

    let result = web::serve(state, &bind_address, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutting down");
    })
    .await;

    periodic.stop().await;
    result
}

/// Create a default configuration file.
fn create_default_config(config_path: &Path) -> IndexResult<Config> {
    info!("Creating default configuration at: {:?}", config_path);

    let config = Config::default();
    config.to_file(config_path)?;

    info!(
        "Default configuration created. Please edit {:?} to customize settings.",
        config_path
    );

    Ok(config)
}
