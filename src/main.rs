//! ttsync - Timetable cache refresh daemon.
//!
//! Main entry point: configuration, logging, store selection, and the
//! dispatch loop lifecycle.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use ttsync_dispatch::{DispatchConfig, Dispatcher, ShutdownSignal};
use ttsync_store::{FileKvStore, KvStore, MemoryKvStore, Scheduler};
use ttsync_upstream::IntranetClient;

/// ttsync CLI.
#[derive(Parser)]
#[command(name = "ttsync")]
#[command(about = "Timetable cache refresh daemon")]
#[command(version)]
struct Cli {
    /// Directory holding the store snapshot
    #[arg(long, env = "TTSYNC_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Use an in-memory store (state is lost on exit)
    #[arg(long)]
    memory_store: bool,

    /// School identifier on the timetable site
    #[arg(long, env = "TTSYNC_SCHOOL")]
    school: String,

    /// Login user for the timetable site
    #[arg(long, env = "TTSYNC_USER")]
    user: String,

    /// Login password for the timetable site
    #[arg(long, env = "TTSYNC_PASSWORD", hide_env_values = true)]
    password: String,

    /// Base URL of the timetable site
    #[arg(long, env = "TTSYNC_BASE_URL", default_value = ttsync_upstream::client::DEFAULT_BASE_URL)]
    base_url: String,

    /// Seconds between dispatch ticks
    #[arg(long, default_value_t = 30)]
    tick_interval_secs: u64,
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let cli = Cli::parse();

    info!("Starting ttsync v{}", env!("CARGO_PKG_VERSION"));

    // Opening the store is the one failure that terminates startup.
    let store: Arc<dyn KvStore> = if cli.memory_store {
        info!("using in-memory store");
        Arc::new(MemoryKvStore::new())
    } else {
        info!("using file store at {}", cli.data_dir.display());
        Arc::new(FileKvStore::open(&cli.data_dir).await?)
    };

    let scheduler = Arc::new(Scheduler::new(store));
    let upstream = Arc::new(IntranetClient::with_base_url(
        &cli.base_url,
        &cli.school,
        &cli.user,
        &cli.password,
    )?);

    let config = DispatchConfig {
        tick_interval_secs: cli.tick_interval_secs,
        ..DispatchConfig::default()
    };

    let shutdown = ShutdownSignal::new();
    shutdown.install_os_handlers()?;

    let mut dispatcher = Dispatcher::new(scheduler.clone(), upstream, config, shutdown);
    dispatcher.init().await?;

    info!(
        tracked = scheduler.tracked_count().await?,
        "initialization complete"
    );

    if let Err(e) = dispatcher.run().await {
        error!("dispatch loop failed: {}", e);
        return Err(e.into());
    }

    info!("ttsync stopped");
    Ok(())
}
