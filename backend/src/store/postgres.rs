//! PostgreSQL document store
//!
//! Documents live in one JSONB table keyed by `(collection, id)`. Each
//! collection has a row in `collection_versions` that every committing
//! transaction locks, so commits touching the same collection serialise on
//! that row while commits on disjoint collections run in parallel.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{PgConnection, Postgres, Transaction};
use uuid::Uuid;

use super::{ChangeSet, Collection, DocumentStore, Query, QueryResult, ReadGuard, StoredDocument, WriteOp};
use crate::config::DatabaseConfig;
use crate::error::{AppError, AppResult};

/// SQLSTATE codes PostgreSQL raises when a transaction loses a race
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";

#[derive(Debug, Clone)]
pub struct PgDocumentStore {
    db: PgPool,
}

impl PgDocumentStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Open a pool using the database section of the configuration
    pub async fn connect(config: &DatabaseConfig) -> AppResult<Self> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| AppError::Configuration("database.url is required for the postgres store".into()))?;

        let db = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect(url)
            .await?;

        Ok(Self::new(db))
    }

    pub async fn migrate(&self) -> AppResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.db)
            .await
            .map_err(|e| AppError::Persistence(format!("Migration failed: {}", e)))
    }

    /// Lock the version rows of every collection in a stable order
    async fn lock_collections(
        conn: &mut PgConnection,
        collections: &BTreeSet<Collection>,
    ) -> AppResult<BTreeMap<Collection, u64>> {
        let mut versions = BTreeMap::new();
        for collection in collections {
            let version = sqlx::query_scalar::<_, i64>(
                "SELECT version FROM collection_versions WHERE collection = $1 FOR UPDATE",
            )
            .bind(collection.as_str())
            .fetch_optional(&mut *conn)
            .await
            .map_err(classify)?
            .unwrap_or(0);
            versions.insert(*collection, version as u64);
        }
        Ok(versions)
    }

    async fn next_version(conn: &mut PgConnection) -> AppResult<i64> {
        sqlx::query_scalar::<_, i64>("SELECT nextval('document_version_seq')")
            .fetch_one(&mut *conn)
            .await
            .map_err(classify)
    }

    async fn bump_collections(
        conn: &mut PgConnection,
        collections: impl IntoIterator<Item = Collection>,
        version: i64,
    ) -> AppResult<()> {
        for collection in collections {
            sqlx::query(
                r#"
                INSERT INTO collection_versions (collection, version)
                VALUES ($1, $2)
                ON CONFLICT (collection) DO UPDATE SET version = EXCLUDED.version
                "#,
            )
            .bind(collection.as_str())
            .bind(version)
            .execute(&mut *conn)
            .await
            .map_err(classify)?;
        }
        Ok(())
    }

    async fn apply_write(conn: &mut PgConnection, write: &WriteOp, version: i64) -> AppResult<()> {
        match write {
            WriteOp::Put { collection, id, body } => {
                sqlx::query(
                    r#"
                    INSERT INTO documents (collection, id, version, body)
                    VALUES ($1, $2, $3, $4)
                    ON CONFLICT (collection, id)
                    DO UPDATE SET version = EXCLUDED.version, body = EXCLUDED.body
                    "#,
                )
                .bind(collection.as_str())
                .bind(id)
                .bind(version)
                .bind(body)
                .execute(&mut *conn)
                .await
                .map_err(classify)?;
            }
            WriteOp::Delete { collection, id } => {
                sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = $2")
                    .bind(collection.as_str())
                    .bind(id)
                    .execute(&mut *conn)
                    .await
                    .map_err(classify)?;
            }
        }
        Ok(())
    }

    async fn check_guard(
        conn: &mut PgConnection,
        guard: &ReadGuard,
        locked: &BTreeMap<Collection, u64>,
    ) -> AppResult<()> {
        match guard {
            ReadGuard::Collection { collection, version } => {
                if locked.get(collection).copied().unwrap_or(0) != *version {
                    return Err(AppError::TransactionConflict(format!(
                        "{} was modified concurrently",
                        collection
                    )));
                }
            }
            ReadGuard::Document {
                collection,
                id,
                version,
            } => {
                let current = sqlx::query_scalar::<_, i64>(
                    "SELECT version FROM documents WHERE collection = $1 AND id = $2 FOR UPDATE",
                )
                .bind(collection.as_str())
                .bind(id)
                .fetch_optional(&mut *conn)
                .await
                .map_err(classify)?
                .map(|v| v as u64);

                if current != *version {
                    return Err(AppError::TransactionConflict(format!(
                        "{} {} was modified concurrently",
                        collection, id
                    )));
                }
            }
        }
        Ok(())
    }

    async fn write_all(&self, writes: Vec<WriteOp>) -> AppResult<()> {
        let mut tx = self.db.begin().await?;
        let collections: BTreeSet<Collection> = writes.iter().map(WriteOp::collection).collect();
        Self::lock_collections(&mut tx, &collections).await?;

        let version = Self::next_version(&mut tx).await?;
        for write in &writes {
            Self::apply_write(&mut tx, write, version).await?;
        }
        Self::bump_collections(&mut tx, collections, version).await?;

        tx.commit().await.map_err(classify)
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn get_by_id(&self, collection: Collection, id: Uuid) -> AppResult<Option<StoredDocument>> {
        let row = sqlx::query_as::<_, (i64, Value)>(
            "SELECT version, body FROM documents WHERE collection = $1 AND id = $2",
        )
        .bind(collection.as_str())
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.map(|(version, body)| StoredDocument {
            id,
            version: version as u64,
            body,
        }))
    }

    async fn query(&self, collection: Collection, query: &Query) -> AppResult<QueryResult> {
        // One snapshot for both the collection version and the documents
        let mut tx: Transaction<'_, Postgres> = self.db.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .execute(&mut *tx)
            .await?;

        let collection_version = sqlx::query_scalar::<_, i64>(
            "SELECT version FROM collection_versions WHERE collection = $1",
        )
        .bind(collection.as_str())
        .fetch_optional(&mut *tx)
        .await?
        .unwrap_or(0) as u64;

        let rows = sqlx::query_as::<_, (Uuid, i64, Value)>(
            "SELECT id, version, body FROM documents WHERE collection = $1 AND body @> $2",
        )
        .bind(collection.as_str())
        .bind(query.containment())
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        let documents = rows.into_iter().map(|(id, version, body)| StoredDocument {
            id,
            version: version as u64,
            body,
        });

        Ok(QueryResult {
            documents: query.apply(documents),
            collection_version,
        })
    }

    async fn put(&self, collection: Collection, id: Uuid, body: Value) -> AppResult<()> {
        self.write_all(vec![WriteOp::Put { collection, id, body }]).await
    }

    async fn update_fields(
        &self,
        collection: Collection,
        id: Uuid,
        fields: Map<String, Value>,
    ) -> AppResult<()> {
        let mut tx = self.db.begin().await?;
        Self::lock_collections(&mut tx, &BTreeSet::from([collection])).await?;
        let version = Self::next_version(&mut tx).await?;

        let updated = sqlx::query(
            r#"
            UPDATE documents
            SET body = body || $3, version = $4
            WHERE collection = $1 AND id = $2
            "#,
        )
        .bind(collection.as_str())
        .bind(id)
        .bind(Value::Object(fields))
        .bind(version)
        .execute(&mut *tx)
        .await
        .map_err(classify)?;

        if updated.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("{} {}", collection, id)));
        }

        Self::bump_collections(&mut tx, [collection], version).await?;
        tx.commit().await.map_err(classify)
    }

    async fn delete(&self, collection: Collection, id: Uuid) -> AppResult<bool> {
        let mut tx = self.db.begin().await?;
        Self::lock_collections(&mut tx, &BTreeSet::from([collection])).await?;

        let deleted = sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = $2")
            .bind(collection.as_str())
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(classify)?;

        if deleted.rows_affected() == 0 {
            return Ok(false);
        }

        let version = Self::next_version(&mut tx).await?;
        Self::bump_collections(&mut tx, [collection], version).await?;
        tx.commit().await.map_err(classify)?;
        Ok(true)
    }

    async fn commit(&self, changes: ChangeSet) -> AppResult<()> {
        if changes.is_empty() {
            return Ok(());
        }

        let mut tx = self.db.begin().await?;

        let mut collections: BTreeSet<Collection> = changes.writes.iter().map(WriteOp::collection).collect();
        collections.extend(changes.reads.iter().filter_map(|guard| match guard {
            ReadGuard::Collection { collection, .. } => Some(*collection),
            ReadGuard::Document { .. } => None,
        }));
        let locked = Self::lock_collections(&mut tx, &collections).await?;

        for guard in &changes.reads {
            Self::check_guard(&mut tx, guard, &locked).await?;
        }

        let version = Self::next_version(&mut tx).await?;
        for write in &changes.writes {
            Self::apply_write(&mut tx, write, version).await?;
        }
        Self::bump_collections(&mut tx, changes.writes.iter().map(WriteOp::collection), version).await?;

        tx.commit().await.map_err(classify)
    }
}

/// Treat lost races as conflicts so the retry loop picks them up
fn classify(err: sqlx::Error) -> AppError {
    if let sqlx::Error::Database(db_err) = &err {
        if matches!(
            db_err.code().as_deref(),
            Some(SERIALIZATION_FAILURE) | Some(DEADLOCK_DETECTED)
        ) {
            return AppError::TransactionConflict(db_err.message().to_string());
        }
    }
    AppError::DatabaseError(err)
}
