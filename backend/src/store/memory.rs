//! In-process document store

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ChangeSet, Collection, DocumentStore, Query, QueryResult, ReadGuard, StoredDocument, WriteOp};
use crate::error::{AppError, AppResult};

#[derive(Debug, Default)]
struct CollectionState {
    version: u64,
    documents: BTreeMap<Uuid, StoredDocument>,
}

#[derive(Debug, Default)]
struct MemoryState {
    /// Monotonic commit counter; every version handed out comes from here
    sequence: u64,
    collections: HashMap<Collection, CollectionState>,
}

impl MemoryState {
    fn collection_version(&self, collection: Collection) -> u64 {
        self.collections.get(&collection).map_or(0, |c| c.version)
    }

    fn document_version(&self, collection: Collection, id: Uuid) -> Option<u64> {
        self.collections
            .get(&collection)
            .and_then(|c| c.documents.get(&id))
            .map(|d| d.version)
    }

    fn check(&self, guard: &ReadGuard) -> AppResult<()> {
        match guard {
            ReadGuard::Document {
                collection,
                id,
                version,
            } => {
                if self.document_version(*collection, *id) != *version {
                    return Err(AppError::TransactionConflict(format!(
                        "{} {} was modified concurrently",
                        collection, id
                    )));
                }
            }
            ReadGuard::Collection { collection, version } => {
                if self.collection_version(*collection) != *version {
                    return Err(AppError::TransactionConflict(format!(
                        "{} was modified concurrently",
                        collection
                    )));
                }
            }
        }
        Ok(())
    }

    fn apply(&mut self, writes: Vec<WriteOp>) {
        self.sequence += 1;
        let version = self.sequence;

        for write in writes {
            let state = self.collections.entry(write.collection()).or_default();
            state.version = version;
            match write {
                WriteOp::Put { id, body, .. } => {
                    state.documents.insert(id, StoredDocument { id, version, body });
                }
                WriteOp::Delete { id, .. } => {
                    state.documents.remove(&id);
                }
            }
        }
    }
}

/// Document store held in memory behind a single lock. Commits are
/// serialised by the write lock, which makes each one atomic.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents currently held in a collection
    pub async fn count(&self, collection: Collection) -> usize {
        self.state
            .read()
            .await
            .collections
            .get(&collection)
            .map_or(0, |c| c.documents.len())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get_by_id(&self, collection: Collection, id: Uuid) -> AppResult<Option<StoredDocument>> {
        let state = self.state.read().await;
        Ok(state
            .collections
            .get(&collection)
            .and_then(|c| c.documents.get(&id))
            .cloned())
    }

    async fn query(&self, collection: Collection, query: &Query) -> AppResult<QueryResult> {
        let state = self.state.read().await;
        let Some(collection_state) = state.collections.get(&collection) else {
            return Ok(QueryResult::default());
        };

        Ok(QueryResult {
            documents: query.apply(collection_state.documents.values().cloned()),
            collection_version: collection_state.version,
        })
    }

    async fn put(&self, collection: Collection, id: Uuid, body: Value) -> AppResult<()> {
        let mut state = self.state.write().await;
        state.apply(vec![WriteOp::Put { collection, id, body }]);
        Ok(())
    }

    async fn update_fields(
        &self,
        collection: Collection,
        id: Uuid,
        fields: Map<String, Value>,
    ) -> AppResult<()> {
        let mut state = self.state.write().await;
        let mut body = state
            .collections
            .get(&collection)
            .and_then(|c| c.documents.get(&id))
            .map(|d| d.body.clone())
            .ok_or_else(|| AppError::NotFound(format!("{} {}", collection, id)))?;

        let Value::Object(object) = &mut body else {
            return Err(AppError::Persistence(format!(
                "{} {} is not an object document",
                collection, id
            )));
        };
        object.extend(fields);

        state.apply(vec![WriteOp::Put { collection, id, body }]);
        Ok(())
    }

    async fn delete(&self, collection: Collection, id: Uuid) -> AppResult<bool> {
        let mut state = self.state.write().await;
        if state.document_version(collection, id).is_none() {
            return Ok(false);
        }
        state.apply(vec![WriteOp::Delete { collection, id }]);
        Ok(true)
    }

    async fn commit(&self, changes: ChangeSet) -> AppResult<()> {
        let mut state = self.state.write().await;
        for guard in &changes.reads {
            state.check(guard)?;
        }
        if !changes.writes.is_empty() {
            state.apply(changes.writes);
        }
        Ok(())
    }
}
