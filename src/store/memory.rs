// src/store/memory.rs
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use serde_json::Value;

use super::Persistence;
use crate::content::Table;

/// In-process store with unique-key upsert semantics. Rows live for the
/// lifetime of the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<Table, BTreeMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row_count(&self, table: Table) -> usize {
        let g = self.tables.lock().expect("store mutex poisoned");
        g.get(&table).map(|t| t.len()).unwrap_or(0)
    }

    pub fn get(&self, table: Table, key: &str) -> Option<Value> {
        let g = self.tables.lock().expect("store mutex poisoned");
        g.get(&table).and_then(|t| t.get(key)).cloned()
    }

    pub fn rows(&self, table: Table) -> Vec<Value> {
        let g = self.tables.lock().expect("store mutex poisoned");
        g.get(&table)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }
}

fn key_of(row: &Value, column: &str) -> Result<String> {
    match row.get(column) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(anyhow!("row is missing conflict key `{column}`")),
    }
}

#[async_trait::async_trait]
impl Persistence for MemoryStore {
    async fn upsert(&self, table: Table, rows: Vec<Value>, conflict_key: &str) -> Result<usize> {
        // Validate the whole batch before touching state.
        let keyed = rows
            .into_iter()
            .map(|r| key_of(&r, conflict_key).map(|k| (k, r)))
            .collect::<Result<Vec<_>>>()?;

        let mut g = self.tables.lock().expect("store mutex poisoned");
        let t = g.entry(table).or_default();
        let n = keyed.len();
        for (k, r) in keyed {
            t.insert(k, r);
        }
        Ok(n)
    }

    async fn select_existing(
        &self,
        table: Table,
        column: &str,
        values: &[String],
    ) -> Result<Vec<String>> {
        let g = self.tables.lock().expect("store mutex poisoned");
        let Some(t) = g.get(&table) else {
            return Ok(Vec::new());
        };
        if column == table.key_column() {
            return Ok(values
                .iter()
                .filter(|v| t.contains_key(v.as_str()))
                .cloned()
                .collect());
        }
        Ok(values
            .iter()
            .filter(|v| {
                t.values()
                    .any(|row| row.get(column).and_then(Value::as_str) == Some(v.as_str()))
            })
            .cloned()
            .collect())
    }
}
