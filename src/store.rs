use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::ResolverError;
use crate::model::{DocumentId, ResolverDocument};

/// A stored document alongside its optimistic-concurrency version token.
#[derive(Debug, Clone)]
pub struct Versioned<T> {
    pub value: T,
    pub version: i64,
}

/// Key/value contract over `DocumentId -> ResolverDocument`. `upsert` takes
/// an optional expected version; when `Some` and the store's current
/// version disagrees, the write is rejected with `Conflict` so callers can
/// retry (see `merge::upsert_entries`).
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, id: &DocumentId) -> Result<Option<Versioned<ResolverDocument>>, ResolverError>;
    async fn upsert(
        &self,
        doc: &ResolverDocument,
        expected_version: Option<i64>,
    ) -> Result<i64, ResolverError>;
    async fn delete(&self, id: &DocumentId) -> Result<bool, ResolverError>;
    async fn list_ids(&self) -> Result<Vec<DocumentId>, ResolverError>;
}

/// In-process store used by tests and `store.backend = memory`.
#[derive(Default)]
pub struct MemoryStore {
    docs: RwLock<HashMap<DocumentId, Versioned<ResolverDocument>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, id: &DocumentId) -> Result<Option<Versioned<ResolverDocument>>, ResolverError> {
        let docs = self.docs.read().map_err(|_| ResolverError::Internal(anyhow::anyhow!("poisoned lock")))?;
        Ok(docs.get(id).cloned())
    }

    async fn upsert(
        &self,
        doc: &ResolverDocument,
        expected_version: Option<i64>,
    ) -> Result<i64, ResolverError> {
        let mut docs = self.docs.write().map_err(|_| ResolverError::Internal(anyhow::anyhow!("poisoned lock")))?;
        let current = docs.get(&doc.id).map(|v| v.version);
        if let Some(expected) = expected_version {
            if current != Some(expected) {
                return Err(ResolverError::Conflict(format!(
                    "version mismatch for {}: expected {expected}, found {current:?}",
                    doc.id
                )));
            }
        }
        let next_version = current.unwrap_or(0) + 1;
        docs.insert(
            doc.id.clone(),
            Versioned {
                value: doc.clone(),
                version: next_version,
            },
        );
        Ok(next_version)
    }

    async fn delete(&self, id: &DocumentId) -> Result<bool, ResolverError> {
        let mut docs = self.docs.write().map_err(|_| ResolverError::Internal(anyhow::anyhow!("poisoned lock")))?;
        Ok(docs.remove(id).is_some())
    }

    async fn list_ids(&self) -> Result<Vec<DocumentId>, ResolverError> {
        let docs = self.docs.read().map_err(|_| ResolverError::Internal(anyhow::anyhow!("poisoned lock")))?;
        Ok(docs.keys().cloned().collect())
    }
}

impl Clone for Versioned<ResolverDocument> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            version: self.version,
        }
    }
}

/// Sqlite-backed store. All connection use is blocking, so every operation
/// is dispatched through `spawn_blocking`, matching how the gateway keeps
/// genuinely blocking work off the async executor.
pub struct SqliteStore {
    conn: Arc<std::sync::Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &str) -> Result<Self, ResolverError> {
        let conn = Connection::open(path)
            .map_err(|e| ResolverError::StoreUnavailable(format!("opening sqlite store: {e}")))?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                body TEXT NOT NULL,
                version INTEGER NOT NULL
            )",
            [],
        )
        .map_err(|e| ResolverError::StoreUnavailable(format!("initializing schema: {e}")))?;
        Ok(Self {
            conn: Arc::new(std::sync::Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn get(&self, id: &DocumentId) -> Result<Option<Versioned<ResolverDocument>>, ResolverError> {
        let conn = self.conn.clone();
        let id = id.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|_| ResolverError::Internal(anyhow::anyhow!("poisoned lock")))?;
            let row: Option<(String, i64)> = conn
                .query_row(
                    "SELECT body, version FROM documents WHERE id = ?1",
                    params![id],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
                .optional()
                .map_err(|e| ResolverError::StoreUnavailable(e.to_string()))?;
            match row {
                None => Ok(None),
                Some((body, version)) => {
                    let value: ResolverDocument = serde_json::from_str(&body)
                        .map_err(|e| ResolverError::Internal(anyhow::anyhow!("corrupt document {id}: {e}")))?;
                    Ok(Some(Versioned { value, version }))
                }
            }
        })
        .await
        .map_err(|e| ResolverError::Internal(anyhow::anyhow!(e)))?
    }

    async fn upsert(
        &self,
        doc: &ResolverDocument,
        expected_version: Option<i64>,
    ) -> Result<i64, ResolverError> {
        let conn = self.conn.clone();
        let doc = doc.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|_| ResolverError::Internal(anyhow::anyhow!("poisoned lock")))?;
            let current: Option<i64> = conn
                .query_row(
                    "SELECT version FROM documents WHERE id = ?1",
                    params![doc.id],
                    |r| r.get(0),
                )
                .optional()
                .map_err(|e| ResolverError::StoreUnavailable(e.to_string()))?;

            if let Some(expected) = expected_version {
                if current != Some(expected) {
                    return Err(ResolverError::Conflict(format!(
                        "version mismatch for {}: expected {expected}, found {current:?}",
                        doc.id
                    )));
                }
            }

            let next_version = current.unwrap_or(0) + 1;
            let body = serde_json::to_string(&doc)
                .map_err(|e| ResolverError::Internal(anyhow::anyhow!(e)))?;
            conn.execute(
                "INSERT INTO documents (id, body, version) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET body = excluded.body, version = excluded.version",
                params![doc.id, body, next_version],
            )
            .map_err(|e| ResolverError::StoreUnavailable(e.to_string()))?;
            Ok(next_version)
        })
        .await
        .map_err(|e| ResolverError::Internal(anyhow::anyhow!(e)))?
    }

    async fn delete(&self, id: &DocumentId) -> Result<bool, ResolverError> {
        let conn = self.conn.clone();
        let id = id.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|_| ResolverError::Internal(anyhow::anyhow!("poisoned lock")))?;
            let affected = conn
                .execute("DELETE FROM documents WHERE id = ?1", params![id])
                .map_err(|e| ResolverError::StoreUnavailable(e.to_string()))?;
            Ok(affected > 0)
        })
        .await
        .map_err(|e| ResolverError::Internal(anyhow::anyhow!(e)))?
    }

    async fn list_ids(&self) -> Result<Vec<DocumentId>, ResolverError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|_| ResolverError::Internal(anyhow::anyhow!("poisoned lock")))?;
            let mut stmt = conn
                .prepare("SELECT id FROM documents")
                .map_err(|e| ResolverError::StoreUnavailable(e.to_string()))?;
            let ids = stmt
                .query_map([], |r| r.get(0))
                .map_err(|e| ResolverError::StoreUnavailable(e.to_string()))?
                .collect::<Result<Vec<String>, _>>()
                .map_err(|e| ResolverError::StoreUnavailable(e.to_string()))?;
            Ok(ids)
        })
        .await
        .map_err(|e| ResolverError::Internal(anyhow::anyhow!(e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DataItem, Linkset};

    fn sample_doc(id: &str) -> ResolverDocument {
        ResolverDocument {
            id: id.to_string(),
            default_linktype: None,
            data: vec![DataItem {
                qualifiers: vec![],
                linkset: Linkset {
                    item_description: None,
                    link_types: vec![],
                },
            }],
        }
    }

    #[tokio::test]
    async fn memory_store_first_upsert_has_no_expected_version() {
        let store = MemoryStore::new();
        let doc = sample_doc("01_123");
        let version = store.upsert(&doc, None).await.unwrap();
        assert_eq!(version, 1);
        assert!(store.get(&"01_123".to_string()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn memory_store_rejects_stale_expected_version() {
        let store = MemoryStore::new();
        let doc = sample_doc("01_123");
        store.upsert(&doc, None).await.unwrap();
        let result = store.upsert(&doc, Some(99)).await;
        assert!(matches!(result, Err(ResolverError::Conflict(_))));
    }

    #[tokio::test]
    async fn memory_store_delete_and_list() {
        let store = MemoryStore::new();
        store.upsert(&sample_doc("01_123"), None).await.unwrap();
        store.upsert(&sample_doc("01_456"), None).await.unwrap();
        assert_eq!(store.list_ids().await.unwrap().len(), 2);
        assert!(store.delete(&"01_123".to_string()).await.unwrap());
        assert_eq!(store.list_ids().await.unwrap().len(), 1);
    }
}
