//! Runs every registered source concurrently against one shared scheduler.
//!
//! Each orchestrator gets its own task; a failing or panicking source only
//! affects its own entry in the report.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::counter;
use serde::Serialize;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::pipeline::{SourceOrchestrator, SourceRunResult};

#[derive(Debug, Clone, Serialize)]
pub struct FleetReport {
    pub completed: bool,
    /// In registration order.
    pub sources: Vec<SourceRunResult>,
    pub items_ingested: usize,
    /// Every source error, prefixed with the source name.
    pub errors: Vec<String>,
    /// Share of sources that ingested at least one item.
    pub success_rate: f64,
    pub duration_ms: u64,
}

impl FleetReport {
    fn from_results(sources: Vec<SourceRunResult>, started: Instant) -> Self {
        let items_ingested = sources.iter().map(|r| r.items_ingested).sum();
        let errors = sources
            .iter()
            .flat_map(|r| r.errors.iter().map(move |e| format!("{}: {e}", r.source_name)))
            .collect();
        let success_rate = if sources.is_empty() {
            0.0
        } else {
            sources.iter().filter(|r| r.success).count() as f64 / sources.len() as f64
        };
        Self {
            completed: true,
            items_ingested,
            errors,
            success_rate,
            duration_ms: started.elapsed().as_millis() as u64,
            sources,
        }
    }
}

pub struct FleetRunner {
    orchestrators: Vec<Arc<SourceOrchestrator>>,
}

impl FleetRunner {
    pub fn new(orchestrators: Vec<Arc<SourceOrchestrator>>) -> Self {
        Self { orchestrators }
    }

    pub fn len(&self) -> usize {
        self.orchestrators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orchestrators.is_empty()
    }

    /// Start all sources at once and wait for every one of them.
    pub async fn run(&self, cancel: &CancellationToken) -> FleetReport {
        let started = Instant::now();
        info!(target: "fleet", sources = self.orchestrators.len(), "fleet run starting");

        let mut set = JoinSet::new();
        let mut slot_of = HashMap::with_capacity(self.orchestrators.len());
        for (slot, orch) in self.orchestrators.iter().enumerate() {
            let orch = Arc::clone(orch);
            let cancel = cancel.clone();
            let handle = set.spawn(async move { orch.run(&cancel).await });
            slot_of.insert(handle.id(), slot);
        }

        let mut results: Vec<Option<SourceRunResult>> = vec![None; self.orchestrators.len()];
        while let Some(joined) = set.join_next_with_id().await {
            match joined {
                Ok((id, result)) => {
                    if let Some(&slot) = slot_of.get(&id) {
                        results[slot] = Some(result);
                    }
                }
                Err(e) => {
                    let Some(&slot) = slot_of.get(&e.id()) else {
                        continue;
                    };
                    let name = self.orchestrators[slot].name().to_string();
                    error!(target: "fleet", source = %name, error = %e, "source task failed");
                    results[slot] = Some(SourceRunResult::failed(name, format!("task failed: {e}")));
                }
            }
        }

        let sources = results
            .into_iter()
            .zip(&self.orchestrators)
            .map(|(r, o)| {
                r.unwrap_or_else(|| SourceRunResult::failed(o.name(), "task produced no result"))
            })
            .collect();
        let report = FleetReport::from_results(sources, started);

        counter!("fleet_runs_total").increment(1);
        info!(
            target: "fleet",
            items = report.items_ingested,
            errors = report.errors.len(),
            success_rate = report.success_rate,
            duration_ms = report.duration_ms,
            "fleet run finished"
        );
        report
    }
}
