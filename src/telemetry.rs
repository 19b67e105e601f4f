// src/telemetry.rs
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "scheduler_calls_total",
            "Provider calls finished by the scheduler, by outcome."
        );
        describe_counter!(
            "scheduler_quota_retries_total",
            "Calls requeued after a provider quota rejection."
        );
        describe_gauge!("scheduler_queue_depth", "Calls waiting for admission.");
        describe_gauge!(
            "scheduler_window_tokens",
            "Quota units consumed in the trailing window."
        );
        describe_histogram!(
            "scheduler_wait_ms",
            "Time from submission to admission in milliseconds."
        );
        describe_counter!("dedup_checked_total", "Identifiers checked for duplicates.");
        describe_counter!(
            "dedup_duplicates_total",
            "Identifiers already present in storage."
        );
        describe_counter!(
            "dedup_degraded_total",
            "Duplicate checks that fell back to the failure policy."
        );
        describe_counter!(
            "pipeline_items_persisted_total",
            "Enriched items written to storage."
        );
        describe_counter!(
            "pipeline_items_skipped_total",
            "Items skipped because fetch or persistence failed."
        );
        describe_counter!(
            "pipeline_enrich_failures_total",
            "Enrichment calls that ended in a placeholder or fallback."
        );
        describe_counter!("fleet_runs_total", "Completed fleet runs.");
        describe_histogram!("source_run_ms", "Per-source run time in milliseconds.");
        describe_histogram!("rss_parse_ms", "RSS feed parse time in milliseconds.");
    });
}

/// Install the Prometheus recorder for this process. Call once, from the
/// binary; tests work against the no-op recorder.
pub fn install_prometheus() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("prometheus: install recorder: {e}"))?;
    ensure_metrics_described();
    Ok(handle)
}
