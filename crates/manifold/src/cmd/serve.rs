//! Serve command - run the relay daemon
//!
//! Wires the cache, dispatcher, upstream client, cursor task, and the
//! two listeners together, then supervises them until a shutdown signal.
//!
//! Shutdown order follows the data flow in reverse: stop accepting and
//! flush subscribers, stop the upstream client, stop eviction and the
//! metrics listener, close the cache, and finally force the last cursor
//! write.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use manifold_cache::{CacheConfig, SequenceCache};
use manifold_config::Config;
use manifold_relay::{
    Dispatcher, DispatcherConfig, FrontendState, RelayMetrics, SubscriberContext,
    SubscriberLimits, UpstreamClient, UpstreamOptions, load_cursor, run_cursor_task,
    serve_frontend,
};

use crate::metrics_http;

/// Manifold - fan-out relay for an append-only event firehose
#[derive(Parser, Debug)]
#[command(name = "manifold")]
#[command(version, about, long_about = None)]
pub struct ServeArgs {
    /// Path to a TOML configuration file
    #[arg(short, long, env = "MANIFOLD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Hostname of the firehose producer
    #[arg(long, env = "MANIFOLD_UPSTREAM_HOST")]
    pub upstream_host: Option<String>,

    /// Connect to the upstream with ws:// instead of wss://
    #[arg(long, env = "MANIFOLD_INSECURE_UPSTREAM")]
    pub insecure_upstream: bool,

    /// Path to the frame store; omit for in-memory-only buffering
    #[arg(long, env = "MANIFOLD_DB_PATH")]
    pub persist_db: Option<PathBuf>,

    /// Path of the persisted upstream cursor
    #[arg(long, env = "MANIFOLD_CURSOR_PATH")]
    pub cursor_file: Option<PathBuf>,

    /// Listen address for downstream subscribers
    #[arg(long, env = "MANIFOLD_API_LISTEN")]
    pub api_listen: Option<String>,

    /// Listen address for /healthz and /metrics
    #[arg(long, env = "MANIFOLD_METRICS_LISTEN")]
    pub metrics_listen: Option<String>,

    /// Hours of frames to retain (may be fractional)
    #[arg(long, env = "MANIFOLD_PERSIST_HOURS")]
    pub persist_hours: Option<f64>,

    /// Byte budget for retained frames; 0 disables size eviction
    #[arg(long, env = "MANIFOLD_PERSIST_BYTES")]
    pub persist_bytes: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "MANIFOLD_LOG")]
    pub log_level: Option<String>,
}

/// Run the daemon
pub async fn run(args: ServeArgs) -> Result<()> {
    let mut config = load_config(&args)?;
    apply_overrides(&mut config, &args);
    config.validate().context("invalid configuration")?;

    let level = args.log_level.as_deref().unwrap_or(&config.log.level);
    crate::init_logging(level)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        upstream = %config.upstream.host,
        api = %config.api.listen,
        "manifold starting"
    );

    run_server(config).await
}

fn load_config(args: &ServeArgs) -> Result<Config> {
    if let Some(path) = &args.config {
        if !path.exists() {
            anyhow::bail!("config file not found: {}", path.display());
        }
        return Config::from_file(path).context("failed to load configuration");
    }

    for path in ["manifold.toml", "configs/manifold.toml"] {
        let path = PathBuf::from(path);
        if path.exists() {
            return Config::from_file(&path).context("failed to load configuration");
        }
    }

    Ok(Config::default())
}

/// Fold CLI / environment flags over the file configuration
fn apply_overrides(config: &mut Config, args: &ServeArgs) {
    if let Some(host) = &args.upstream_host {
        config.upstream.host = host.clone();
    }
    if args.insecure_upstream {
        config.upstream.insecure = true;
    }
    if let Some(path) = &args.persist_db {
        config.persist.db_path = Some(path.clone());
    }
    if let Some(path) = &args.cursor_file {
        config.persist.cursor_file = path.clone();
    }
    if let Some(listen) = &args.api_listen {
        config.api.listen = listen.clone();
    }
    if let Some(listen) = &args.metrics_listen {
        config.metrics.listen = listen.clone();
    }
    if let Some(hours) = args.persist_hours {
        config.persist.hours = hours;
    }
    if let Some(bytes) = args.persist_bytes {
        config.persist.max_bytes = bytes;
    }
}

async fn run_server(config: Config) -> Result<()> {
    // Cache: durable when a path is configured, in-memory otherwise.
    let cache_config = CacheConfig {
        persist_duration: config.persist.retention(),
        max_bytes: config.persist.max_bytes,
        gc_period: config.persist.gc_period(),
        map_size: config.persist.map_size(),
    };
    let cache = match &config.persist.db_path {
        Some(path) => {
            info!(path = %path.display(), "opening frame store");
            Arc::new(
                SequenceCache::durable(path, cache_config)
                    .with_context(|| format!("failed to open frame store at {}", path.display()))?,
            )
        }
        None => {
            info!("building in-memory cache");
            Arc::new(SequenceCache::memory(cache_config))
        }
    };

    // Resume point: the cursor file, or whatever the cache still holds.
    let stored_cursor = load_cursor(&config.persist.cursor_file).with_context(|| {
        format!(
            "failed to read cursor file {}",
            config.persist.cursor_file.display()
        )
    })?;
    let cache_tail = cache.bounds().map(|(_, hi)| hi).unwrap_or(0);
    let latest = stored_cursor.unwrap_or(0).max(cache_tail);
    info!(cursor = ?stored_cursor, cache_tail, resume = latest, "resume point resolved");

    let metrics = Arc::new(RelayMetrics::new());
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&cache),
        DispatcherConfig {
            queue_frames: config.subscriber.queue_frames,
            queue_bytes: config.subscriber.queue_bytes,
        },
        Arc::clone(&metrics),
    ));
    let latest_seq = Arc::new(AtomicU64::new(latest));

    // One token per shutdown stage, cancelled in order.
    let frontend_cancel = CancellationToken::new();
    let upstream_cancel = CancellationToken::new();
    let gc_cancel = CancellationToken::new();
    let metrics_cancel = CancellationToken::new();
    let cursor_cancel = CancellationToken::new();

    let (cursor_tx, cursor_rx) = watch::channel(latest);
    let cursor_task = tokio::spawn(run_cursor_task(
        config.persist.cursor_file.clone(),
        cursor_rx,
        cursor_cancel.clone(),
    ));

    let gc_task = tokio::spawn(Arc::clone(&cache).run_gc(gc_cancel.clone()));

    let upstream = UpstreamClient::new(
        UpstreamOptions {
            host: config.upstream.host.clone(),
            insecure: config.upstream.insecure,
            idle_timeout: config.upstream.idle_timeout(),
            grace: config.upstream.grace(),
            ..Default::default()
        },
        Arc::clone(&dispatcher),
        Arc::clone(&latest_seq),
        cursor_tx,
        Arc::clone(&metrics),
    );
    let upstream_task = tokio::spawn(upstream.run(upstream_cancel.clone()));

    // Bind failures are initialization failures: fail the process.
    let api_listener = TcpListener::bind(&config.api.listen)
        .await
        .with_context(|| format!("failed to bind subscriber listener on {}", config.api.listen))?;
    let context = Arc::new(SubscriberContext {
        dispatcher: Arc::clone(&dispatcher),
        latest_seq: Arc::clone(&latest_seq),
        limits: SubscriberLimits {
            write_deadline: config.subscriber.write_deadline(),
        },
        metrics: Arc::clone(&metrics),
    });
    let mut frontend_task = tokio::spawn(serve_frontend(
        api_listener,
        FrontendState {
            context,
            shutdown: frontend_cancel.clone(),
        },
    ));

    let metrics_task = if config.metrics.enabled {
        let listener = TcpListener::bind(&config.metrics.listen)
            .await
            .with_context(|| {
                format!("failed to bind metrics listener on {}", config.metrics.listen)
            })?;
        Some(tokio::spawn(metrics_http::serve(
            listener,
            Arc::clone(&metrics),
            Arc::clone(&cache),
            Arc::clone(&dispatcher),
            metrics_cancel.clone(),
        )))
    } else {
        None
    };

    info!("startup complete");

    let mut frontend_done = false;
    tokio::select! {
        _ = wait_for_shutdown() => info!("received shutdown signal"),
        res = &mut frontend_task => {
            frontend_done = true;
            match res {
                Ok(Ok(())) => warn!("subscriber listener exited"),
                Ok(Err(e)) => error!(error = %e, "subscriber listener failed"),
                Err(e) => error!(error = %e, "subscriber listener panicked"),
            }
        }
    }

    // Stage 1: stop accepting; give subscribers their flush grace.
    frontend_cancel.cancel();
    if !frontend_done {
        let flush = config.subscriber.shutdown_flush();
        if timeout(flush, &mut frontend_task).await.is_err() {
            warn!(grace_secs = flush.as_secs(), "subscribers did not flush in time, dropping");
            frontend_task.abort();
        }
    }

    // Stage 2: the upstream client.
    upstream_cancel.cancel();
    if timeout(Duration::from_secs(5), upstream_task).await.is_err() {
        warn!("upstream client slow to stop");
    }

    // Stage 3: eviction and the metrics listener.
    gc_cancel.cancel();
    let _ = gc_task.await;
    metrics_cancel.cancel();
    if let Some(task) = metrics_task {
        let _ = timeout(Duration::from_secs(1), task).await;
    }

    // Stage 4: the cache. A close failure is a runtime failure, not an
    // exit-code failure.
    if let Err(e) = cache.close() {
        error!(error = %e, "cache close failed");
    }

    // Stage 5: the final cursor write.
    cursor_cancel.cancel();
    let _ = cursor_task.await;

    info!("shutdown complete");
    Ok(())
}

/// Wait for SIGINT or SIGTERM
async fn wait_for_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
