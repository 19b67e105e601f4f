// src/store/mod.rs
//! Persistence collaborator. Both operations are batch-oriented so callers
//! never pay one round trip per row.

pub mod memory;

use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;

use crate::content::Table;

pub use memory::MemoryStore;

#[async_trait::async_trait]
pub trait Persistence: Send + Sync {
    /// Insert rows, replacing any existing row with the same `conflict_key`
    /// value. Returns the number of rows written.
    async fn upsert(&self, table: Table, rows: Vec<Value>, conflict_key: &str) -> Result<usize>;

    /// Return the subset of `values` already present in `column`.
    async fn select_existing(
        &self,
        table: Table,
        column: &str,
        values: &[String],
    ) -> Result<Vec<String>>;
}

pub type DynPersistence = Arc<dyn Persistence>;
