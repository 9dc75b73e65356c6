//! Document store abstraction
//!
//! The engine persists every entity as a JSON document in a named
//! collection. Stores use optimistic concurrency: each document carries a
//! version and each collection a version bumped on every committed write. A
//! [`StoreTransaction`] records what it read, buffers what it writes, and
//! commits everything as one [`ChangeSet`] that the store either applies in
//! full or rejects with `TransactionConflict`.

mod memory;
mod postgres;
mod query;
mod retry;
mod transaction;

use std::fmt;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

pub use memory::MemoryStore;
pub use postgres::PgDocumentStore;
pub use query::{Filter, FilterOp, OrderBy, Query};
pub use retry::RetryConfig;
pub use transaction::StoreTransaction;

/// Logical collections used by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Orders,
    SizeStocks,
    VarietyStocks,
    StockHistory,
    ReservedStock,
    Sizes,
    SalesSummary,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Orders => "orders",
            Collection::SizeStocks => "size_stocks",
            Collection::VarietyStocks => "variety_stocks",
            Collection::StockHistory => "stock_history",
            Collection::ReservedStock => "reserved_stock",
            Collection::Sizes => "sizes",
            Collection::SalesSummary => "sales_summary",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed entity stored in a collection
pub trait Document: Serialize + DeserializeOwned + Send + Sync {
    const COLLECTION: Collection;

    fn id(&self) -> Uuid;
}

/// A raw document as held by a store
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: Uuid,
    pub version: u64,
    pub body: Value,
}

impl StoredDocument {
    pub fn decode<T: Document>(&self) -> AppResult<T> {
        Ok(serde_json::from_value(self.body.clone())?)
    }
}

/// Documents matching a query, with the collection version they were read at
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub documents: Vec<StoredDocument>,
    pub collection_version: u64,
}

/// Something a transaction observed and needs unchanged at commit
#[derive(Debug, Clone, PartialEq)]
pub enum ReadGuard {
    /// `None` means the document was absent
    Document {
        collection: Collection,
        id: Uuid,
        version: Option<u64>,
    },
    /// A query over the collection; any committed write invalidates it
    Collection { collection: Collection, version: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Put {
        collection: Collection,
        id: Uuid,
        body: Value,
    },
    Delete { collection: Collection, id: Uuid },
}

impl WriteOp {
    pub fn collection(&self) -> Collection {
        match self {
            WriteOp::Put { collection, .. } | WriteOp::Delete { collection, .. } => *collection,
        }
    }
}

/// The unit a store commits atomically
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub reads: Vec<ReadGuard>,
    pub writes: Vec<WriteOp>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

/// Persistent document store
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get_by_id(&self, collection: Collection, id: Uuid) -> AppResult<Option<StoredDocument>>;

    async fn query(&self, collection: Collection, query: &Query) -> AppResult<QueryResult>;

    /// Insert or replace a document outside any transaction
    async fn put(&self, collection: Collection, id: Uuid, body: Value) -> AppResult<()>;

    /// Shallow-merge top-level fields into an existing document
    async fn update_fields(
        &self,
        collection: Collection,
        id: Uuid,
        fields: Map<String, Value>,
    ) -> AppResult<()>;

    /// Returns whether a document was removed
    async fn delete(&self, collection: Collection, id: Uuid) -> AppResult<bool>;

    /// Validate every read guard and apply every write, or apply nothing
    async fn commit(&self, changes: ChangeSet) -> AppResult<()>;
}

/// Typed convenience wrappers over a store
pub async fn fetch<T: Document>(store: &dyn DocumentStore, id: Uuid) -> AppResult<Option<T>> {
    store
        .get_by_id(T::COLLECTION, id)
        .await?
        .map(|doc| doc.decode::<T>())
        .transpose()
}

pub async fn fetch_required<T: Document>(
    store: &dyn DocumentStore,
    id: Uuid,
    resource: &str,
) -> AppResult<T> {
    fetch(store, id)
        .await?
        .ok_or_else(|| AppError::NotFound(resource.to_string()))
}

pub async fn fetch_all<T: Document>(store: &dyn DocumentStore, query: &Query) -> AppResult<Vec<T>> {
    store
        .query(T::COLLECTION, query)
        .await?
        .documents
        .iter()
        .map(StoredDocument::decode::<T>)
        .collect()
}

pub async fn save<T: Document>(store: &dyn DocumentStore, doc: &T) -> AppResult<()> {
    store
        .put(T::COLLECTION, doc.id(), serde_json::to_value(doc)?)
        .await
}

// ============================================================================
// Document bindings for the domain models
// ============================================================================

mod bindings {
    use shared::{Order, ReservedStock, SalesSummary, SizeConfig, SizeStock, StockHistory, VarietyStock};
    use uuid::Uuid;

    use super::{Collection, Document};

    macro_rules! document {
        ($ty:ty, $collection:expr) => {
            impl Document for $ty {
                const COLLECTION: Collection = $collection;

                fn id(&self) -> Uuid {
                    self.id
                }
            }
        };
    }

    document!(Order, Collection::Orders);
    document!(SizeStock, Collection::SizeStocks);
    document!(VarietyStock, Collection::VarietyStocks);
    document!(StockHistory, Collection::StockHistory);
    document!(ReservedStock, Collection::ReservedStock);
    document!(SizeConfig, Collection::Sizes);
    document!(SalesSummary, Collection::SalesSummary);
}
