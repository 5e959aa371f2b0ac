//! Guide Dispatch Daemon
//!
//! Runs the expiry sweep on a timer and serves the trigger surface over HTTP.
//!
//! ## Usage
//!
//! ```bash
//! # Start with defaults (sweep loop + HTTP server)
//! guide-dispatch
//!
//! # Start with custom config
//! guide-dispatch --config /path/to/config.toml
//!
//! # HTTP only, no timer
//! guide-dispatch --no-sweep
//!
//! # Cron style: run once, print the report as JSON, exit
//! guide-dispatch --oneshot sweep
//! guide-dispatch --oneshot audit --branch jkt
//! ```

use clap::{Parser, ValueEnum};
use chrono::Utc;
use guide_dispatch::services::notifications::{spawn_dispatcher, LogNotifier, NotificationOutbox};
use guide_dispatch::services::events::spawn_logging_listener;
use guide_dispatch::{Config, HttpServer, LedgerDb, PartitionScope, Services, TokenRegistry};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Oneshot {
    Sweep,
    Audit,
}

#[derive(Parser, Debug)]
#[command(name = "guide-dispatch")]
#[command(about = "Trip guide assignment scheduler and ledger auditor")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "GUIDE_DISPATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Storage directory
    #[arg(long, env = "GUIDE_DISPATCH_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    /// HTTP API port
    #[arg(long, env = "GUIDE_DISPATCH_HTTP_PORT")]
    http_port: Option<u16>,

    /// Disable the periodic expiry sweep
    #[arg(long)]
    no_sweep: bool,

    /// Run one job, print its report and exit
    #[arg(long, value_enum)]
    oneshot: Option<Oneshot>,

    /// Branch to audit (with `--oneshot audit`)
    #[arg(long)]
    branch: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("guide_dispatch=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    // Load config
    let mut config = if let Some(config_path) = &args.config {
        Config::load(config_path)?
    } else {
        Config::default()
    };

    // Apply CLI overrides
    if let Some(dir) = args.storage_dir {
        config.storage_dir = dir;
    }
    if let Some(port) = args.http_port {
        config.http_port = port;
    }
    if args.no_sweep {
        config.sweep_enabled = false;
    }

    info!(
        storage_dir = %config.storage_dir.display(),
        http_port = config.http_port,
        sweep_enabled = config.sweep_enabled,
        "Starting guide-dispatch"
    );

    // Ensure storage directory exists
    tokio::fs::create_dir_all(&config.storage_dir).await?;

    // Save default config if it doesn't exist
    let config_path = config.config_path();
    if !config_path.exists() {
        config.save(&config_path)?;
        info!(path = %config_path.display(), "Created default config");
    }

    let db = Arc::new(LedgerDb::open(&config.storage_dir)?);

    let (outbox, notifications) = NotificationOutbox::channel();
    let dispatcher = spawn_dispatcher(notifications, Arc::new(LogNotifier));
    let services = Arc::new(Services::new(db.clone(), &config, outbox)?);

    if let Some(job) = args.oneshot {
        let report = {
            let services = services.clone();
            let branch = args.branch.clone();
            tokio::task::spawn_blocking(move || -> Result<String, guide_dispatch::DispatchError> {
                let now = Utc::now();
                match job {
                    Oneshot::Sweep => Ok(serde_json::to_string_pretty(&services.sweep.run(now)?)?),
                    Oneshot::Audit => {
                        let scope = branch.map(PartitionScope::branch).unwrap_or_else(PartitionScope::all);
                        Ok(serde_json::to_string_pretty(&services.auditor.run(&scope, now)?)?)
                    }
                }
            })
            .await??
        };
        println!("{}", report);

        // Let queued notifications drain before exiting
        drop(services);
        if tokio::time::timeout(Duration::from_secs(5), dispatcher).await.is_err() {
            warn!("Notification dispatcher did not drain in time");
        }
        return Ok(());
    }

    let _event_logger = spawn_logging_listener(services.events.clone());

    if config.sweep_enabled {
        services
            .sweep
            .clone()
            .start(Duration::from_secs(config.sweep_interval_secs.max(1)))
            .await;
    } else {
        info!("Expiry sweep loop disabled");
    }

    let tokens = TokenRegistry::new(&config.api_tokens);
    if tokens.is_empty() {
        warn!("No api_tokens configured; guarded HTTP routes will answer 403");
    }

    let bind_addr: SocketAddr = ([0, 0, 0, 0], config.http_port).into();
    let http_server = Arc::new(HttpServer::new(services.clone(), db.clone(), tokens, bind_addr));

    info!("Press Ctrl+C to stop.");

    // Handle shutdown signal
    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutting down...");
    };

    tokio::select! {
        result = http_server.run() => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server error");
            }
        }
        _ = shutdown => {}
    }

    services.sweep.stop().await;

    if let Ok(stats) = db.stats() {
        info!(
            assignments = stats.assignment_count,
            pending = stats.pending_count,
            transactions = stats.transaction_count,
            "Final ledger stats"
        );
    }

    Ok(())
}
