//! # Source orchestration
//! Turns one source's candidate list into enriched, persisted records.
//!
//! Stages: `Listing → Filtering → (Fetching → Enriching → Decomposing →
//! Persisting)* → Done | Aborted`. Items run one after another with a
//! randomized courtesy pause in between. Only a listing failure (or
//! cancellation) aborts a run; every item-level failure is recorded and the
//! loop moves on.

pub mod decompose;

use std::future::Future;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::{counter, histogram};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::content::{Category, EnrichedItem, RawItem, SummaryPoint};
use crate::dedup::{DuplicateFilter, FailPolicy};
use crate::enrich::{prompts, CharRatioEstimator, Completion, CostEstimator, DynEnricher, Prompt};
use crate::scheduler::{RequestScheduler, SchedulerError};
use crate::source::DynSource;
use crate::store::DynPersistence;

pub use decompose::DETAIL_GENERATION_FAILED;

/// Scheduler priority per enrichment task (lower runs first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskPriorities {
    pub summarize: i32,
    pub categorize: i32,
    pub elaborate: i32,
    pub translate: i32,
}

impl Default for TaskPriorities {
    fn default() -> Self {
        Self {
            summarize: 1,
            categorize: 2,
            elaborate: 3,
            translate: 4,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub list_timeout: Duration,
    pub fetch_timeout: Duration,
    pub store_timeout: Duration,
    pub courtesy_delay: RangeInclusive<Duration>,
    pub duplicate_policy: FailPolicy,
    pub target_language: Option<String>,
    pub priorities: TaskPriorities,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            list_timeout: Duration::from_secs(30),
            fetch_timeout: Duration::from_secs(30),
            store_timeout: Duration::from_secs(15),
            courtesy_delay: Duration::from_secs(2)..=Duration::from_secs(5),
            duplicate_policy: FailPolicy::FailOpen,
            target_language: None,
            priorities: TaskPriorities::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Listing,
    Filtering,
    Fetching,
    Enriching,
    Decomposing,
    Persisting,
    Done,
    Aborted,
}

/// Outcome of one source run. Built once at the end of the run.
#[derive(Debug, Clone, Serialize)]
pub struct SourceRunResult {
    pub source_name: String,
    pub success: bool,
    pub items_ingested: usize,
    pub errors: Vec<String>,
    pub duration_ms: u64,
    pub candidates: usize,
    pub duplicates: usize,
    pub skipped: usize,
    pub final_stage: Stage,
}

impl SourceRunResult {
    /// Result for a source whose task never produced one (e.g. it panicked).
    pub fn failed(source_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            success: false,
            items_ingested: 0,
            errors: vec![error.into()],
            duration_ms: 0,
            candidates: 0,
            duplicates: 0,
            skipped: 0,
            final_stage: Stage::Aborted,
        }
    }
}

/// Short log-safe fingerprint of an identifier.
pub(crate) fn fingerprint(key: &str) -> String {
    use sha2::{Digest, Sha256};
    Sha256::digest(key.as_bytes())
        .iter()
        .take(6)
        .map(|b| format!("{b:02x}"))
        .collect()
}

struct Cancelled;

async fn until_cancelled<F: Future>(
    cancel: &CancellationToken,
    fut: F,
) -> Result<F::Output, Cancelled> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Cancelled),
        out = fut => Ok(out),
    }
}

/// Mutable bookkeeping for a single run; never shared.
struct Run {
    source: String,
    stage: Stage,
    started: Instant,
    candidates: usize,
    duplicates: usize,
    persisted: usize,
    skipped: usize,
    errors: Vec<String>,
}

impl Run {
    fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
            stage: Stage::Listing,
            started: Instant::now(),
            candidates: 0,
            duplicates: 0,
            persisted: 0,
            skipped: 0,
            errors: Vec::new(),
        }
    }

    fn enter(&mut self, stage: Stage) {
        debug!(target: "pipeline", source = %self.source, from = ?self.stage, to = ?stage, "stage");
        self.stage = stage;
    }

    fn skip(&mut self, key: &str, reason: String) {
        warn!(target: "pipeline", source = %self.source, key = %fingerprint(key), %reason, "item skipped");
        counter!("pipeline_items_skipped_total", "source" => self.source.clone()).increment(1);
        self.skipped += 1;
        self.errors.push(format!("{key}: {reason}"));
    }

    fn enrich_failed(&mut self, key: &str, task: &str, reason: String) {
        warn!(target: "pipeline", source = %self.source, key = %fingerprint(key), task, %reason, "enrichment degraded");
        counter!("pipeline_enrich_failures_total", "task" => task.to_string()).increment(1);
        self.errors.push(format!("{key}: {task} failed: {reason}"));
    }

    fn finish(mut self, stage: Stage) -> SourceRunResult {
        self.enter(stage);
        let duration_ms = self.started.elapsed().as_millis() as u64;
        histogram!("source_run_ms", "source" => self.source.clone()).record(duration_ms as f64);
        info!(
            target: "pipeline",
            source = %self.source,
            stage = ?stage,
            candidates = self.candidates,
            duplicates = self.duplicates,
            ingested = self.persisted,
            skipped = self.skipped,
            errors = self.errors.len(),
            duration_ms,
            "source run finished"
        );
        SourceRunResult {
            source_name: self.source,
            success: self.persisted > 0,
            items_ingested: self.persisted,
            errors: self.errors,
            duration_ms,
            candidates: self.candidates,
            duplicates: self.duplicates,
            skipped: self.skipped,
            final_stage: stage,
        }
    }

    fn abort(mut self, reason: String) -> SourceRunResult {
        warn!(target: "pipeline", source = %self.source, stage = ?self.stage, %reason, "source run aborted");
        self.errors.push(reason);
        self.finish(Stage::Aborted)
    }
}

/// Per-source pipeline. All collaborators are shared handles, so one
/// orchestrator can be moved into its own task.
pub struct SourceOrchestrator {
    source: DynSource,
    scheduler: RequestScheduler,
    enricher: DynEnricher,
    store: DynPersistence,
    filter: DuplicateFilter,
    estimator: Arc<dyn CostEstimator>,
    settings: PipelineSettings,
}

impl SourceOrchestrator {
    pub fn new(
        source: DynSource,
        scheduler: RequestScheduler,
        enricher: DynEnricher,
        store: DynPersistence,
        settings: PipelineSettings,
    ) -> Self {
        let filter = DuplicateFilter::new(
            Arc::clone(&store),
            source.kind().table(),
            settings.duplicate_policy,
        );
        Self {
            source,
            scheduler,
            enricher,
            store,
            filter,
            estimator: Arc::new(CharRatioEstimator::default()),
            settings,
        }
    }

    pub fn with_estimator(mut self, estimator: Arc<dyn CostEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn name(&self) -> &str {
        self.source.name()
    }

    pub async fn run(&self, cancel: &CancellationToken) -> SourceRunResult {
        let mut run = Run::new(self.source.name());

        let listed = until_cancelled(
            cancel,
            timeout(self.settings.list_timeout, self.source.list_candidates()),
        )
        .await;
        let candidates = match listed {
            Err(Cancelled) => return run.abort("cancelled during listing".into()),
            Ok(Err(_)) => {
                return run.abort(format!(
                    "listing timed out after {:?}",
                    self.settings.list_timeout
                ))
            }
            Ok(Ok(Err(e))) => return run.abort(format!("listing failed: {e:#}")),
            Ok(Ok(Ok(v))) => v,
        };
        run.candidates = candidates.len();

        run.enter(Stage::Filtering);
        let filtered = self.filter.filter_new(&candidates).await;
        run.duplicates = filtered.report.duplicate_count;
        if let Some(msg) = filtered.degraded {
            run.errors.push(msg);
        }

        let total = filtered.ids.len();
        for (i, key) in filtered.ids.iter().enumerate() {
            if cancel.is_cancelled() || self.process_item(key, &mut run, cancel).await.is_err() {
                return run.abort(format!("cancelled after {i} of {total} items"));
            }
            if i + 1 < total && self.courtesy_pause(cancel).await.is_err() {
                return run.abort(format!("cancelled after {} of {total} items", i + 1));
            }
        }

        run.finish(Stage::Done)
    }

    async fn process_item(
        &self,
        key: &str,
        run: &mut Run,
        cancel: &CancellationToken,
    ) -> Result<(), Cancelled> {
        run.enter(Stage::Fetching);
        let fetched = until_cancelled(
            cancel,
            timeout(self.settings.fetch_timeout, self.source.fetch_detail(key)),
        )
        .await?;
        let raw = match fetched {
            Ok(Ok(Some(raw))) => raw,
            Ok(Ok(None)) => {
                run.skip(key, "missing required fields".into());
                return Ok(());
            }
            Ok(Err(e)) => {
                run.skip(key, format!("fetch failed: {e:#}"));
                return Ok(());
            }
            Err(_) => {
                run.skip(key, format!("fetch timed out after {:?}", self.settings.fetch_timeout));
                return Ok(());
            }
        };

        let item = self.enrich(key, raw, run, cancel).await?;

        run.enter(Stage::Persisting);
        let table = self.source.kind().table();
        let written = timeout(
            self.settings.store_timeout,
            self.store
                .upsert(table, vec![item.to_row()], table.key_column()),
        )
        .await;
        match written {
            Ok(Ok(_)) => {
                run.persisted += 1;
                counter!("pipeline_items_persisted_total", "source" => run.source.clone())
                    .increment(1);
                debug!(target: "pipeline", source = %run.source, key = %fingerprint(key), "item persisted");
            }
            Ok(Err(e)) => run.skip(key, format!("persist failed: {e:#}")),
            Err(_) => run.skip(
                key,
                format!("persist timed out after {:?}", self.settings.store_timeout),
            ),
        }
        Ok(())
    }

    /// Enrichment never drops fetched content: each failed call degrades to a
    /// fallback and is recorded on the run.
    async fn enrich(
        &self,
        key: &str,
        raw: RawItem,
        run: &mut Run,
        cancel: &CancellationToken,
    ) -> Result<EnrichedItem, Cancelled> {
        let pri = self.settings.priorities;

        run.enter(Stage::Enriching);
        let summary_text = match self
            .ask(prompts::summarize(&raw.title, &raw.body), pri.summarize, cancel)
            .await?
        {
            Ok(c) => Some(c.text),
            Err(e) => {
                run.enrich_failed(key, "summarize", e.to_string());
                None
            }
        };

        let category = match self
            .ask(prompts::categorize(&raw.title, &raw.body), pri.categorize, cancel)
            .await?
        {
            Ok(c) => decompose::parse_category(&c.text).unwrap_or_else(|| {
                run.enrich_failed(key, "categorize", format!("unparsable answer {:?}", c.text));
                Category::default()
            }),
            Err(e) => {
                run.enrich_failed(key, "categorize", e.to_string());
                Category::default()
            }
        };

        let title = match &self.settings.target_language {
            Some(lang) => {
                match self
                    .ask(prompts::translate(&raw.title, lang), pri.translate, cancel)
                    .await?
                {
                    Ok(c) if !c.text.trim().is_empty() => c.text.trim().to_string(),
                    Ok(_) => raw.title.clone(),
                    Err(e) => {
                        run.enrich_failed(key, "translate", e.to_string());
                        raw.title.clone()
                    }
                }
            }
            None => raw.title.clone(),
        };

        run.enter(Stage::Decomposing);
        let lines = summary_text
            .as_deref()
            .map(decompose::summary_lines)
            .unwrap_or_default();
        let mut summary = Vec::with_capacity(lines.len());
        for line in lines {
            let detail = match self
                .ask(prompts::elaborate(&raw.body, &line), pri.elaborate, cancel)
                .await?
            {
                Ok(c) if !c.text.trim().is_empty() => c.text.trim().to_string(),
                Ok(_) => {
                    run.enrich_failed(key, "elaborate", "empty completion".into());
                    DETAIL_GENERATION_FAILED.to_string()
                }
                Err(e) => {
                    run.enrich_failed(key, "elaborate", e.to_string());
                    DETAIL_GENERATION_FAILED.to_string()
                }
            };
            summary.push(SummaryPoint { line, detail });
        }

        Ok(EnrichedItem {
            kind: self.source.kind(),
            source_key: raw.source_key,
            title,
            body: raw.body,
            media: raw.media,
            summary,
            category,
            published_at: raw.published_at,
            created_at: Utc::now(),
        })
    }

    async fn ask(
        &self,
        prompt: Prompt,
        priority: i32,
        cancel: &CancellationToken,
    ) -> Result<Result<Completion, SchedulerError>, Cancelled> {
        let cost = self.estimator.estimate(&prompt);
        until_cancelled(
            cancel,
            self.scheduler
                .complete(&self.enricher, prompt, cost, priority),
        )
        .await
    }

    async fn courtesy_pause(&self, cancel: &CancellationToken) -> Result<(), Cancelled> {
        let (lo, hi) = (
            *self.settings.courtesy_delay.start(),
            *self.settings.courtesy_delay.end(),
        );
        if hi.is_zero() {
            return Ok(());
        }
        let lo = lo.min(hi);
        let ms = rand::rng().random_range(lo.as_millis() as u64..=hi.as_millis() as u64);
        until_cancelled(cancel, tokio::time::sleep(Duration::from_millis(ms))).await
    }
}
