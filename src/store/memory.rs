// src/store/memory.rs
use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use super::{Collection, Filter, Row, TableStore};
use crate::error::StoreError;

/// In-process `TableStore`. Used by tests and by local runs without a database.
///
/// `fail_writes` makes every write to a collection return
/// `StoreError::Unavailable`, which lets tests exercise the best-effort paths.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<Collection, Vec<Row>>>,
    failing: Mutex<HashSet<Collection>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, collection: Collection, rows: impl IntoIterator<Item = Row>) {
        self.tables
            .write()
            .entry(collection)
            .or_default()
            .extend(rows);
    }

    pub fn rows(&self, collection: Collection) -> Vec<Row> {
        self.tables
            .read()
            .get(&collection)
            .cloned()
            .unwrap_or_default()
    }

    pub fn len(&self, collection: Collection) -> usize {
        self.tables.read().get(&collection).map_or(0, Vec::len)
    }

    pub fn is_empty(&self, collection: Collection) -> bool {
        self.len(collection) == 0
    }

    pub fn fail_writes(&self, collection: Collection, fail: bool) {
        let mut failing = self.failing.lock();
        if fail {
            failing.insert(collection);
        } else {
            failing.remove(&collection);
        }
    }

    fn check_writable(&self, collection: Collection) -> Result<(), StoreError> {
        if self.failing.lock().contains(&collection) {
            return Err(StoreError::Unavailable(format!(
                "writes to {collection} are disabled"
            )));
        }
        Ok(())
    }
}

fn same_key(a: &Row, b: &Row, key: &[&str]) -> bool {
    !key.is_empty() && key.iter().all(|k| a.get(*k) == b.get(*k))
}

#[async_trait]
impl TableStore for MemoryStore {
    async fn select(
        &self,
        collection: Collection,
        filter: &Filter,
        limit: Option<usize>,
    ) -> Result<Vec<Row>, StoreError> {
        let tables = self.tables.read();
        let rows = tables.get(&collection).map(Vec::as_slice).unwrap_or(&[]);
        Ok(rows
            .iter()
            .filter(|r| filter.matches(r))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn upsert(
        &self,
        collection: Collection,
        rows: Vec<Row>,
        conflict_key: &[&str],
    ) -> Result<usize, StoreError> {
        self.check_writable(collection)?;
        let written = rows.len();
        let mut tables = self.tables.write();
        let table = tables.entry(collection).or_default();
        for row in rows {
            match table.iter_mut().find(|r| same_key(r, &row, conflict_key)) {
                Some(existing) => existing.extend(row),
                None => table.push(row),
            }
        }
        Ok(written)
    }

    async fn update(
        &self,
        collection: Collection,
        filter: &Filter,
        patch: Row,
    ) -> Result<u64, StoreError> {
        self.check_writable(collection)?;
        let mut tables = self.tables.write();
        let mut touched = 0;
        if let Some(table) = tables.get_mut(&collection) {
            for row in table.iter_mut().filter(|r| filter.matches(r)) {
                row.extend(patch.clone());
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn delete(&self, collection: Collection, filter: &Filter) -> Result<u64, StoreError> {
        self.check_writable(collection)?;
        let mut tables = self.tables.write();
        let Some(table) = tables.get_mut(&collection) else {
            return Ok(0);
        };
        let before = table.len();
        table.retain(|r| !filter.matches(r));
        Ok((before - table.len()) as u64)
    }

    async fn insert(&self, collection: Collection, row: Row) -> Result<(), StoreError> {
        self.check_writable(collection)?;
        self.tables.write().entry(collection).or_default().push(row);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn row(v: Value) -> Row {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn upsert_replaces_on_conflict_key() {
        let store = MemoryStore::new();
        let key = &["feed_id", "link"];
        store
            .upsert(
                Collection::FeedItems,
                vec![row(json!({"feed_id": "f", "link": "a", "title": "old"}))],
                key,
            )
            .await
            .unwrap();
        store
            .upsert(
                Collection::FeedItems,
                vec![
                    row(json!({"feed_id": "f", "link": "a", "title": "new"})),
                    row(json!({"feed_id": "g", "link": "a", "title": "other feed"})),
                ],
                key,
            )
            .await
            .unwrap();

        let rows = store.rows(Collection::FeedItems);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["title"], json!("new"));
    }

    #[tokio::test]
    async fn delete_reports_count_and_keeps_rest() {
        let store = MemoryStore::new();
        store.seed(
            Collection::ProcessingLogs,
            [
                row(json!({"created_at": "2025-01-01T00:00:00Z"})),
                row(json!({"created_at": "2025-03-01T00:00:00Z"})),
            ],
        );
        let n = store
            .delete(
                Collection::ProcessingLogs,
                &Filter::lt("created_at", "2025-02-01T00:00:00+00:00"),
            )
            .await
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(store.len(Collection::ProcessingLogs), 1);
    }

    #[tokio::test]
    async fn failing_collection_rejects_writes_but_allows_reads() {
        let store = MemoryStore::new();
        store.fail_writes(Collection::ProcessingLogs, true);
        let err = store
            .insert(Collection::ProcessingLogs, Row::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert!(store
            .select(Collection::ProcessingLogs, &Filter::All, None)
            .await
            .unwrap()
            .is_empty());
    }
}
