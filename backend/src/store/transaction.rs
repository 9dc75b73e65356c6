//! Optimistic read-modify-write unit over a [`DocumentStore`]

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;
use uuid::Uuid;

use super::{ChangeSet, Collection, Document, DocumentStore, Query, ReadGuard, StoredDocument, WriteOp};
use crate::error::{AppError, AppResult};

/// Records the version of everything it reads and buffers everything it
/// writes. Nothing reaches the store until [`StoreTransaction::commit`], and
/// the commit fails if anything read has changed in the meantime.
pub struct StoreTransaction<'s> {
    store: &'s dyn DocumentStore,
    document_reads: HashMap<(Collection, Uuid), Option<u64>>,
    collection_reads: HashMap<Collection, u64>,
    staged: BTreeMap<(Collection, Uuid), Option<Value>>,
}

impl<'s> StoreTransaction<'s> {
    pub fn begin(store: &'s dyn DocumentStore) -> Self {
        Self {
            store,
            document_reads: HashMap::new(),
            collection_reads: HashMap::new(),
            staged: BTreeMap::new(),
        }
    }

    pub async fn get<T: Document>(&mut self, id: Uuid) -> AppResult<Option<T>> {
        let key = (T::COLLECTION, id);
        if let Some(staged) = self.staged.get(&key) {
            return staged
                .as_ref()
                .map(|body| serde_json::from_value(body.clone()).map_err(AppError::from))
                .transpose();
        }

        let stored = self.store.get_by_id(T::COLLECTION, id).await?;
        self.observe_document(key, stored.as_ref().map(|d| d.version))?;
        stored.map(|doc| doc.decode::<T>()).transpose()
    }

    pub async fn require<T: Document>(&mut self, id: Uuid, resource: &str) -> AppResult<T> {
        self.get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(resource.to_string()))
    }

    /// Query a collection, seeing this transaction's own staged writes
    pub async fn query<T: Document>(&mut self, query: &Query) -> AppResult<Vec<T>> {
        let collection = T::COLLECTION;
        let unbounded = Query {
            limit: None,
            ..query.clone()
        };
        let result = self.store.query(collection, &unbounded).await?;
        self.observe_collection(collection, result.collection_version)?;

        let mut documents: BTreeMap<Uuid, StoredDocument> = result
            .documents
            .into_iter()
            .map(|doc| (doc.id, doc))
            .collect();

        for ((staged_collection, id), body) in &self.staged {
            if *staged_collection != collection {
                continue;
            }
            match body {
                Some(body) => {
                    documents.insert(
                        *id,
                        StoredDocument {
                            id: *id,
                            version: 0,
                            body: body.clone(),
                        },
                    );
                }
                None => {
                    documents.remove(id);
                }
            }
        }

        query
            .apply(documents.into_values())
            .iter()
            .map(StoredDocument::decode::<T>)
            .collect()
    }

    pub fn put<T: Document>(&mut self, doc: &T) -> AppResult<()> {
        self.staged
            .insert((T::COLLECTION, doc.id()), Some(serde_json::to_value(doc)?));
        Ok(())
    }

    pub fn delete<T: Document>(&mut self, id: Uuid) {
        self.staged.insert((T::COLLECTION, id), None);
    }

    pub fn pending_writes(&self) -> usize {
        self.staged.len()
    }

    /// Hand the read set and buffered writes to the store as one unit
    pub async fn commit(self) -> AppResult<()> {
        if self.staged.is_empty() {
            return Ok(());
        }

        let mut reads: Vec<ReadGuard> = self
            .document_reads
            .into_iter()
            .map(|((collection, id), version)| ReadGuard::Document {
                collection,
                id,
                version,
            })
            .collect();
        reads.extend(
            self.collection_reads
                .into_iter()
                .map(|(collection, version)| ReadGuard::Collection { collection, version }),
        );

        let writes = self
            .staged
            .into_iter()
            .map(|((collection, id), body)| match body {
                Some(body) => WriteOp::Put { collection, id, body },
                None => WriteOp::Delete { collection, id },
            })
            .collect();

        self.store.commit(ChangeSet { reads, writes }).await
    }

    fn observe_document(&mut self, key: (Collection, Uuid), version: Option<u64>) -> AppResult<()> {
        match self.document_reads.get(&key) {
            Some(seen) if *seen != version => Err(AppError::TransactionConflict(format!(
                "{} {} changed during the transaction",
                key.0, key.1
            ))),
            Some(_) => Ok(()),
            None => {
                self.document_reads.insert(key, version);
                Ok(())
            }
        }
    }

    fn observe_collection(&mut self, collection: Collection, version: u64) -> AppResult<()> {
        match self.collection_reads.get(&collection) {
            Some(seen) if *seen != version => Err(AppError::TransactionConflict(format!(
                "{} changed during the transaction",
                collection
            ))),
            Some(_) => Ok(()),
            None => {
                self.collection_reads.insert(collection, version);
                Ok(())
            }
        }
    }
}
