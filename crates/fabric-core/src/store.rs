//! Namespaced key/value persistence (component C).
//!
//! Tables are logical namespaces (`cron_jobs`, `cron_runs`,
//! `heartbeat_config`, `heartbeat_last`, `session_tokens`, …). Each table is
//! backed by one pretty-printed JSON file under the store directory —
//! the same "write the whole file back on every mutation" idiom this
//! workspace's `CronService`/`Config` have always used, just generalized
//! to an arbitrary number of tables instead of one hardcoded file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::{FabricError, Result};

type Table = HashMap<String, Value>;

/// A durable, namespaced KV store. Cheap to clone (wraps an `Arc`).
#[derive(Clone)]
pub struct Store {
    dir: PathBuf,
    tables: Arc<RwLock<HashMap<String, Table>>>,
}

impl Store {
    /// Open (or create) a store rooted at `dir`. Tables are lazily loaded
    /// from `{dir}/{table}.json` the first time they're touched.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            tables: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn table_path(&self, table: &str) -> PathBuf {
        self.dir.join(format!("{table}.json"))
    }

    async fn ensure_loaded(&self, table: &str) {
        {
            let tables = self.tables.read().await;
            if tables.contains_key(table) {
                return;
            }
        }
        let loaded = Self::load_table(&self.table_path(table));
        let mut tables = self.tables.write().await;
        tables.entry(table.to_string()).or_insert(loaded);
    }

    fn load_table(path: &Path) -> Table {
        match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_default(),
            Err(_) => Table::new(),
        }
    }

    fn save_table(&self, table: &str, data: &Table) -> Result<()> {
        if let Err(e) = std::fs::create_dir_all(&self.dir) {
            return Err(FabricError::InternalError(format!(
                "store: failed to create dir {}: {e}",
                self.dir.display()
            )));
        }
        let json = serde_json::to_string_pretty(data)
            .map_err(|e| FabricError::InternalError(format!("store: serialize failed: {e}")))?;
        std::fs::write(self.table_path(table), json)
            .map_err(|e| FabricError::InternalError(format!("store: write failed: {e}")))
    }

    pub async fn get(&self, table: &str, key: &str) -> Option<Value> {
        self.ensure_loaded(table).await;
        let tables = self.tables.read().await;
        tables.get(table).and_then(|t| t.get(key)).cloned()
    }

    pub async fn put(&self, table: &str, key: &str, value: Value) -> Result<()> {
        self.ensure_loaded(table).await;
        let mut tables = self.tables.write().await;
        let entry = tables.entry(table.to_string()).or_default();
        entry.insert(key.to_string(), value);
        self.save_table(table, entry)
    }

    pub async fn delete(&self, table: &str, key: &str) -> Result<()> {
        self.ensure_loaded(table).await;
        let mut tables = self.tables.write().await;
        let entry = tables.entry(table.to_string()).or_default();
        entry.remove(key);
        self.save_table(table, entry)
    }

    /// Snapshot of every `(key, value)` currently in `table`. Concurrent
    /// mutation during iteration elsewhere is allowed; this just clones
    /// whatever was in memory when called, per §4.3.
    pub async fn list(&self, table: &str) -> Vec<(String, Value)> {
        self.ensure_loaded(table).await;
        let tables = self.tables.read().await;
        tables
            .get(table)
            .map(|t| t.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    /// Convenience write used by the Cron Manager / Run Waiter to stash a
    /// truncated run summary independent of the `cron_runs` record itself.
    pub async fn finalize_run(&self, run_id: &str, summary: Value) -> Result<()> {
        self.put("run_summaries", run_id, summary).await
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").field("dir", &self.dir).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        store.put("cron_jobs", "j1", json!({"name": "x"})).await.unwrap();
        let v = store.get("cron_jobs", "j1").await.unwrap();
        assert_eq!(v["name"], "x");
    }

    #[tokio::test]
    async fn delete_removes_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        store.put("t", "k", json!(1)).await.unwrap();
        store.delete("t", "k").await.unwrap();
        assert!(store.get("t", "k").await.is_none());
    }

    #[tokio::test]
    async fn list_returns_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        store.put("t", "a", json!(1)).await.unwrap();
        store.put("t", "b", json!(2)).await.unwrap();
        let mut items = store.list("t").await;
        items.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].0, "a");
    }

    #[tokio::test]
    async fn survives_reopen_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = Store::new(dir.path());
            store.put("t", "k", json!("persisted")).await.unwrap();
        }
        let store2 = Store::new(dir.path());
        assert_eq!(store2.get("t", "k").await.unwrap(), json!("persisted"));
    }
}
