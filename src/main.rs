//! Catalog sentiment pipeline binary.
//! Boots the fetcher, the processing loop and the read-only HTTP API over one
//! shared store, and shuts them down together on Ctrl-C or SIGTERM.

use anyhow::Context;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use catalog_sentiment_pipeline::{
    api::{self, AppState},
    fetch::{spawn_fetch_loop, HttpListingSource, ListingSource},
    metrics::Metrics,
    pipeline::scheduler::{spawn_processing_loop, spawn_retention_task},
    store, PipelineConfig, ProcessedStore, Processor, RawStore, SentimentAnalyzer,
    SentimentScorer,
};

/// Compact logs by default, JSON lines when LOG_FORMAT=json. RUST_LOG filters.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .ok()
        .is_some_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("ctrl-c handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                tracing::warn!("SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown requested");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when the file is absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = match PipelineConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!("invalid configuration: {e}");
            return Err(e).context("refusing to start");
        }
    };
    tracing::info!(
        store = ?cfg.store,
        batch_limit = cfg.batch_limit(),
        workers = cfg.workers,
        process_interval_secs = cfg.process_interval.as_secs(),
        scrape_interval_secs = cfg.fetch.interval.as_secs(),
        "configuration loaded"
    );

    let store = store::open(&cfg.store, &cfg.collections).context("opening store")?;
    let raw: Arc<dyn RawStore> = store.clone();
    let processed: Arc<dyn ProcessedStore> = store;
    let scorer: Arc<dyn SentimentScorer> = Arc::new(SentimentAnalyzer::new());

    let processor = Arc::new(
        Processor::new(raw.clone(), processed.clone(), scorer)
            .with_batch_limit(cfg.batch_size, cfg.batch_cap)
            .with_workers(cfg.workers),
    );

    let (stop_tx, stop_rx) = watch::channel(false);

    let source: Arc<dyn ListingSource> = Arc::new(
        HttpListingSource::new(cfg.fetch.source_api.clone()).with_timeout(cfg.fetch.timeout),
    );
    let mut tasks = vec![
        spawn_fetch_loop(
            source,
            raw.clone(),
            cfg.fetch.strategy,
            cfg.fetch.interval,
            stop_rx.clone(),
        ),
        spawn_processing_loop(processor, cfg.process_interval, stop_rx.clone()),
    ];
    if let Some(retention) = cfg.raw_retention {
        tasks.push(spawn_retention_task(
            raw.clone(),
            retention,
            cfg.process_interval,
            stop_rx.clone(),
        ));
    }

    let metrics = match Metrics::init(cfg.batch_limit()) {
        Ok(m) => Some(m),
        Err(e) => {
            tracing::warn!("metrics disabled: {e:#}");
            None
        }
    };
    let app = api::router(AppState { raw, processed }, metrics.as_ref());

    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr)
        .await
        .with_context(|| format!("binding {}", cfg.bind_addr))?;
    tracing::info!(addr = %cfg.bind_addr, "api listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("api server")?;

    // Let background loops finish their current record and exit.
    let _ = stop_tx.send(true);
    for t in tasks {
        if let Err(e) = t.await {
            tracing::warn!("background task ended abnormally: {e}");
        }
    }
    tracing::info!("bye");
    Ok(())
}
