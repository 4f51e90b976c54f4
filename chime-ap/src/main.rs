//! chime-ap - Main entry point
//!
//! `serve` runs the daemon: admission pipeline, playback worker and HTTP
//! API. `send` and `status` talk to a running daemon; `check-config`
//! validates the configuration and exits.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chime_ap::api::{self, AppContext};
use chime_ap::client::ChimeClient;
use chime_ap::db::{self, quota_store};
use chime_ap::playback::{CommandPlayer, Dispatcher, FileResolver};
use chime_ap::{worker, Pipeline};
use chime_common::config::ChimeConfig;
use chime_common::time::{Clock, SystemClock};
use chime_common::{NotificationEvent, Priority};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for chime-ap
#[derive(Parser, Debug)]
#[command(name = "chime-ap")]
#[command(about = "Notification sound admission and playback daemon")]
#[command(version)]
struct Args {
    /// Configuration file (overrides CHIME_CONFIG and the default locations)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the daemon (default)
    Serve {
        /// Port to listen on
        #[arg(short, long, env = "CHIME_PORT")]
        port: Option<u16>,

        /// Address to bind
        #[arg(long)]
        bind: Option<String>,

        /// SQLite file for quota persistence
        #[arg(long)]
        database: Option<PathBuf>,

        /// Keep quota counters in memory only
        #[arg(long)]
        no_persist: bool,
    },

    /// Submit one event to a running daemon
    Send {
        /// Event type, e.g. "stop"
        #[arg(short = 't', long = "type")]
        event_type: String,

        /// Sound reference: bundled:<name>, file:<path> or a path
        #[arg(short, long)]
        sound: String,

        #[arg(short, long, default_value = "normal")]
        priority: Priority,

        /// 0.0 - 1.0
        #[arg(short, long)]
        volume: Option<f32>,

        /// Free-form origin tag recorded in the audit log
        #[arg(long)]
        source: Option<String>,

        /// Daemon URL; defaults to the configured server address
        #[arg(long)]
        url: Option<String>,
    },

    /// Print the status snapshot of a running daemon
    Status {
        #[arg(long)]
        url: Option<String>,
    },

    /// Validate the configuration and exit
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (config, config_path) =
        ChimeConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    init_tracing(&config.logging.level);
    match &config_path {
        Some(path) => info!("Configuration loaded from {}", path.display()),
        None => info!("Using built-in default configuration"),
    }

    match args.command.unwrap_or(Command::Serve {
        port: None,
        bind: None,
        database: None,
        no_persist: false,
    }) {
        Command::Serve {
            port,
            bind,
            database,
            no_persist,
        } => {
            let mut config = config;
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            if let Some(database) = database {
                config.database.path = Some(database);
            }
            serve(config, !no_persist).await
        }
        Command::Send {
            event_type,
            sound,
            priority,
            volume,
            source,
            url,
        } => {
            let mut event = NotificationEvent::new(event_type, sound).with_priority(priority);
            if let Some(volume) = volume {
                event = event.with_volume(volume);
            }
            if let Some(source) = source {
                event = event.with_source(source);
            }
            let client = ChimeClient::new(url.unwrap_or_else(|| default_url(&config)))?;
            let outcome = client
                .submit(&event)
                .await
                .with_context(|| format!("Failed to reach daemon at {}", client.base_url()))?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(())
        }
        Command::Status { url } => {
            let client = ChimeClient::new(url.unwrap_or_else(|| default_url(&config)))?;
            let status = client
                .status()
                .await
                .with_context(|| format!("Failed to reach daemon at {}", client.base_url()))?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
        Command::CheckConfig => {
            println!(
                "Configuration OK ({}): {} event type policies, queue capacity {}, drop policy {}",
                config_path
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "built-in defaults".to_string()),
                config.events.len(),
                config.queue.capacity,
                config.queue.drop_policy
            );
            Ok(())
        }
    }
}

fn init_tracing(level: &str) {
    let default_filter = format!("chime_ap={level},chime_common={level},tower_http=info");
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn default_url(config: &ChimeConfig) -> String {
    let host = match config.server.bind.as_str() {
        "0.0.0.0" | "::" => "127.0.0.1",
        other => other,
    };
    format!("http://{}:{}", host, config.server.port)
}

async fn serve(config: ChimeConfig, persist: bool) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .context("Invalid server bind address")?;

    let config = Arc::new(config);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let pipeline = Arc::new(
        Pipeline::new(Arc::clone(&config), clock).context("Failed to build pipeline")?,
    );

    let db_pool = if persist {
        let path = config.database.resolved_path();
        match db::open(&path).await {
            Ok(pool) => {
                let records = quota_store::load_quota_usage(&pool)
                    .await
                    .context("Failed to load quota usage")?;
                pipeline.restore_quota_usage(&records);
                Some(pool)
            }
            Err(e) => {
                warn!("Quota persistence disabled, cannot open {}: {}", path.display(), e);
                None
            }
        }
    } else {
        None
    };

    let dispatcher = Dispatcher::new(
        Arc::new(FileResolver::from_config(&config.player)),
        Arc::new(CommandPlayer::from_config(&config.player)),
        &config.queue,
    );
    let handle = worker::spawn(Arc::clone(&pipeline), dispatcher);
    info!(
        "chime-ap {} ready, player '{}'",
        env!("CARGO_PKG_VERSION"),
        config.player.command
    );

    let served = api::run(
        AppContext {
            pipeline: Arc::clone(&pipeline),
        },
        addr,
        shutdown_signal(),
    )
    .await;

    let discarded = handle.shutdown().await;
    info!("Pipeline stopped ({} pending events discarded)", discarded);

    if let Some(pool) = db_pool {
        if let Err(e) = quota_store::save_quota_usage(&pool, &pipeline.quota_usage()).await {
            error!("Failed to save quota usage: {}", e);
        }
        pool.close().await;
    }

    served.context("HTTP server failed")?;
    info!("Shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
