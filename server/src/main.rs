mod api;
mod error;
mod state;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use driftwatch::broadcast::EventRecorder;
use driftwatch::config::load_config;
use driftwatch::controller::{Controller, Reconciler};
use driftwatch::plans::FsPlanStore;
use driftwatch::store::{InMemoryStore, ManifestLoader, ResourceStore};
use driftwatch::telemetry::{init_logging, LogFormat};
use driftwatch::watch::WatchManager;
use log::info;

use error::ServerError;
use state::AppState;

/// driftwatch - GitOps continuous delivery for infrastructure layers
#[derive(Parser, Debug)]
#[command(name = "driftwatch-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "DRIFTWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Directory of Layer, Repository and Run manifests to load at startup
    #[arg(short, long)]
    manifests: Option<PathBuf>,

    /// Listen address, overrides `server.addr`
    #[arg(long)]
    addr: Option<String>,

    /// Log output format (text or json)
    #[arg(long, default_value = "text")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if let Err(e) = init_logging(args.log_format) {
        eprintln!("{}", e);
        std::process::exit(1);
    }
    if let Err(e) = run(args).await {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), ServerError> {
    info!("Starting driftwatch v{}", env!("CARGO_PKG_VERSION"));

    let mut config = load_config(args.config.as_ref())?;
    if let Some(addr) = args.addr {
        config.server.addr = addr;
    }

    let store: Arc<dyn ResourceStore> = Arc::new(InMemoryStore::new());

    let manifests_dir = args
        .manifests
        .or_else(|| config.manifests_dir.as_ref().map(PathBuf::from));
    if let Some(dir) = manifests_dir {
        let applied = ManifestLoader::new(&dir).apply_to(store.as_ref()).await?;
        info!("Loaded {} resources from {:?}", applied, dir);
    }

    let recorder = EventRecorder::default();
    let reconciler = Arc::new(Reconciler::new(
        Arc::clone(&store),
        config.controller.clone(),
        recorder,
    ));
    let controller = Controller::new(reconciler);
    let controller_task = controller.start().await?;

    let watch = WatchManager::start(Arc::clone(&store), &config.server).await?;
    let plans = Arc::new(FsPlanStore::new(&config.datastore.plans_dir));
    let app = api::router(AppState::new(store, Arc::new(watch), plans));

    let listener = tokio::net::TcpListener::bind(&config.server.addr)
        .await
        .map_err(|e| ServerError::Bind {
            addr: config.server.addr.clone(),
            source: e,
        })?;
    info!("HTTP API listening on {}", config.server.addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(ServerError::Serve)?;

    info!("Shutting down controller");
    controller.stop();
    if let Err(e) = controller_task.await {
        log::warn!("Controller task ended abnormally: {}", e);
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
