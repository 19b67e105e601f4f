//! Duplicate gate in front of the expensive per-item work.
//!
//! One `select_existing` round trip per batch. When the store cannot answer,
//! the configured [`FailPolicy`] decides: `Open` passes the whole batch on
//! (the unique-key upsert still prevents duplicate rows, at the price of
//! re-enriching known items), `Closed` passes nothing and the batch is
//! retried on the next run. Either way the outcome is flagged `degraded`.

use std::collections::HashSet;

use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::content::Table;
use crate::store::DynPersistence;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailPolicy {
    #[default]
    FailOpen,
    FailClosed,
}

/// Efficiency telemetry for one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub struct FilterReport {
    pub total_checked: usize,
    pub new_count: usize,
    pub duplicate_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterOutcome {
    pub ids: Vec<String>,
    pub report: FilterReport,
    /// Store error text when the policy had to be applied.
    pub degraded: Option<String>,
}

pub struct DuplicateFilter {
    store: DynPersistence,
    table: Table,
    policy: FailPolicy,
}

impl DuplicateFilter {
    pub fn new(store: DynPersistence, table: Table, policy: FailPolicy) -> Self {
        Self {
            store,
            table,
            policy,
        }
    }

    pub fn policy(&self) -> FailPolicy {
        self.policy
    }

    /// Reduce `ids` to those not yet stored, in input order.
    ///
    /// An identifier repeated within the batch is kept once.
    pub async fn filter_new(&self, ids: &[String]) -> FilterOutcome {
        if ids.is_empty() {
            return FilterOutcome {
                ids: Vec::new(),
                report: FilterReport::default(),
                degraded: None,
            };
        }

        let column = self.table.key_column();
        counter!("dedup_checked_total", "table" => self.table.name()).increment(ids.len() as u64);

        match self.store.select_existing(self.table, column, ids).await {
            Ok(existing) => {
                let mut seen: HashSet<&str> = existing.iter().map(String::as_str).collect();
                let fresh: Vec<String> = ids
                    .iter()
                    .filter(|id| seen.insert(id.as_str()))
                    .cloned()
                    .collect();
                let report = FilterReport {
                    total_checked: ids.len(),
                    new_count: fresh.len(),
                    duplicate_count: ids.len() - fresh.len(),
                };
                counter!("dedup_duplicates_total", "table" => self.table.name())
                    .increment(report.duplicate_count as u64);
                debug!(
                    target: "dedup",
                    table = self.table.name(),
                    checked = report.total_checked,
                    new = report.new_count,
                    duplicates = report.duplicate_count,
                    "duplicate check"
                );
                FilterOutcome {
                    ids: fresh,
                    report,
                    degraded: None,
                }
            }
            Err(e) => {
                counter!("dedup_degraded_total", "table" => self.table.name()).increment(1);
                warn!(
                    target: "dedup",
                    table = self.table.name(),
                    policy = ?self.policy,
                    error = ?e,
                    "duplicate check failed; applying policy"
                );
                let passed = match self.policy {
                    FailPolicy::FailOpen => ids.to_vec(),
                    FailPolicy::FailClosed => Vec::new(),
                };
                FilterOutcome {
                    report: FilterReport {
                        total_checked: ids.len(),
                        new_count: passed.len(),
                        duplicate_count: 0,
                    },
                    ids: passed,
                    degraded: Some(format!("duplicate check failed: {e:#}")),
                }
            }
        }
    }
}
