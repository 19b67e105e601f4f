//! Feed ingestion binary entrypoint.
//! Loads config, builds one orchestrator per selected source around a shared
//! request scheduler, runs the fleet once and prints the report as JSON.
//!
//! Usage: `feed-ingest [SOURCE_NAME ...]` (no names = all enabled sources).

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use feed_ingest::api::{self, AppState};
use feed_ingest::config::PipelineConfig;
use feed_ingest::enrich::{build_enricher, CharRatioEstimator, CostEstimator};
use feed_ingest::source::rss::RssSource;
use feed_ingest::source::DynSource;
use feed_ingest::store::{DynPersistence, MemoryStore};
use feed_ingest::{telemetry, FleetRunner, RequestScheduler, SourceOrchestrator};

/// `LOG_FORMAT=json` switches to one JSON object per line.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("feed_ingest=info,warn"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional (local runs only).
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = PipelineConfig::load_default().context("loading pipeline config")?;
    let only: Vec<String> = std::env::args().skip(1).collect();
    let selected = cfg.selected_sources(&only)?;
    if selected.is_empty() {
        warn!("no enabled sources selected; nothing to do");
        return Ok(());
    }

    let prometheus = match std::env::var("METRICS_ENABLED").as_deref() {
        Ok("1") | Ok("true") => Some(telemetry::install_prometheus()?),
        _ => None,
    };

    let shutdown = CancellationToken::new();
    let scheduler = RequestScheduler::spawn_with_shutdown(cfg.scheduler_config(), shutdown.clone())?;
    let enricher = build_enricher(&cfg.enricher)?;
    let estimator: Arc<dyn CostEstimator> = Arc::new(CharRatioEstimator {
        chars_per_token: cfg.enricher.chars_per_token,
        completion_allowance: cfg.enricher.completion_allowance,
    });
    let store: DynPersistence = Arc::new(MemoryStore::new());
    let settings = cfg.pipeline_settings();

    let orchestrators = selected
        .iter()
        .map(|s| {
            let source: DynSource = Arc::new(RssSource::from_url(&s.name, s.kind, &s.url));
            Arc::new(
                SourceOrchestrator::new(
                    source,
                    scheduler.clone(),
                    Arc::clone(&enricher),
                    Arc::clone(&store),
                    settings.clone(),
                )
                .with_estimator(Arc::clone(&estimator)),
            )
        })
        .collect();
    let fleet = FleetRunner::new(orchestrators);

    let state = AppState::new(scheduler.clone(), prometheus);
    if let Ok(addr) = std::env::var("STATUS_ADDR") {
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("binding status server on {addr}"))?;
        info!(%addr, "status server listening");
        let app = api::router(state.clone());
        let stop = shutdown.clone();
        tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move { stop.cancelled().await })
                .await;
            if let Err(e) = served {
                warn!(error = %e, "status server stopped");
            }
        });
    }

    let cancel = shutdown.child_token();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received; cancelling fleet run");
            on_signal.cancel();
        }
    });

    info!(sources = fleet.len(), provider = %enricher.name(), "starting fleet run");
    let report = fleet.run(&cancel).await;
    state.set_report(report.clone()).await;

    println!("{}", serde_json::to_string_pretty(&report)?);
    shutdown.cancel();
    Ok(())
}
