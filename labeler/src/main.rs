//! labeler - image annotation session service
//!
//! Serves the annotator UI endpoints, keeps the annotation session, and
//! streams labeled batches to an external training service.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use labeler::coordinator::{SessionCoordinator, SessionSettings};
use labeler::dispatch::{Dispatcher, HttpTrainerClient, RetryPolicy};
use labeler::store::{SessionStore, SourceOptions};
use labeler::AppState;
use labeler_common::config::{resolve_config_path, TomlConfig};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "labeler")]
#[command(about = "Image annotation session service feeding an active-learning trainer")]
#[command(version)]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long, env = "LABELER_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding the images to annotate
    #[arg(long, env = "LABELER_IMAGE_DIRECTORY")]
    image_directory: Option<PathBuf>,

    /// Directory for the session snapshot
    #[arg(long, env = "LABELER_ANNOTATIONS_DIR")]
    annotations_dir: Option<PathBuf>,

    /// Base URL of the training service
    #[arg(long, env = "LABELER_TRAINER_URL")]
    trainer_url: Option<String>,

    /// Address to listen on
    #[arg(short, long, env = "LABELER_BIND")]
    bind: Option<String>,

    /// Training annotations buffered before each delivery
    #[arg(long, env = "LABELER_BUFFER_SIZE")]
    buffer_size: Option<usize>,

    /// Fraction of images held out for evaluation
    #[arg(long, env = "LABELER_TEST_SET_FRACTION")]
    test_set_fraction: Option<f64>,

    /// Seed for the image shuffle
    #[arg(long, env = "LABELER_SEED")]
    seed: Option<u64>,

    /// Log level when RUST_LOG is not set
    #[arg(long, env = "LABELER_LOG_LEVEL")]
    log_level: Option<String>,
}

impl Args {
    /// Command-line and environment values win over the file
    fn apply(&self, config: &mut TomlConfig) {
        if let Some(dir) = &self.image_directory {
            config.image_directory = dir.clone();
        }
        if let Some(dir) = &self.annotations_dir {
            config.annotations_dir = dir.clone();
        }
        if let Some(url) = &self.trainer_url {
            config.trainer_url = url.clone();
        }
        if let Some(bind) = &self.bind {
            config.bind_address = bind.clone();
        }
        if let Some(size) = self.buffer_size {
            config.buffer_size = size;
        }
        if let Some(fraction) = self.test_set_fraction {
            config.test_set_fraction = fraction;
        }
        if let Some(seed) = self.seed {
            config.shuffle_seed = Some(seed);
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = resolve_config_path(args.config.as_deref());
    let mut config = TomlConfig::load_or_default(config_path.as_deref())
        .context("Failed to load configuration")?;
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("labeler={0},labeler_common={0},tower_http=info", config.logging.level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting labeler v{} [{}] ({})",
        env!("CARGO_PKG_VERSION"),
        env!("LABELER_GIT_HASH"),
        env!("LABELER_BUILD_PROFILE")
    );
    match &config_path {
        Some(path) if path.exists() => info!("Config file: {}", path.display()),
        Some(path) => warn!("Config file {} not found, using defaults", path.display()),
        None => info!("No config file, using defaults"),
    }
    info!("Image directory: {}", config.image_directory.display());

    // Outbound queues and their workers
    let trainer = HttpTrainerClient::new(
        &config.trainer_url,
        Duration::from_secs(config.request_timeout_secs),
    )
    .context("Failed to build training service client")?;
    info!("Training service: {}", trainer.base_url());
    let policy = RetryPolicy {
        interval: Duration::from_millis(config.init_retry_interval_ms),
        max_wait: config.init_max_wait_secs.map(Duration::from_secs),
    };
    let (dispatcher, workers) = Dispatcher::spawn(Arc::new(trainer), policy);

    // Resume or start the session; a bad image directory is fatal
    let store = SessionStore::new(config.snapshot_path());
    info!("Session snapshot: {}", store.path().display());
    let restored = store
        .open_session(&SourceOptions {
            image_directory: config.image_directory.clone(),
            eval_fraction: config.test_set_fraction,
            seed: config.shuffle_seed,
        })
        .context("Failed to open annotation session")?;
    if restored.resumed {
        info!(
            labels = restored.catalog.labels().len(),
            evaluation_done = restored.evaluation_batch.is_some(),
            "Resumed previous session"
        );
    } else {
        info!("Started a new session");
    }

    let coordinator = SessionCoordinator::new(
        restored,
        dispatcher,
        SessionSettings {
            buffer_size: config.buffer_size,
        },
        Some(store),
    );
    let state = AppState::new(coordinator);
    let app = labeler::build_router(state.clone());

    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_address))?;
    info!("Listening on http://{}", config.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    state.session.lock().await.shutdown();
    if workers
        .drain(Duration::from_secs(config.shutdown_drain_secs))
        .await
    {
        info!("Queued deliveries flushed");
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
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
                warn!("Failed to install SIGTERM handler: {}", e);
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
