//! Metadata store: per-object key/value pairs kept in a companion relation
//! `{object, name, value}`.

use crate::domain::object::NamedObject;
use crate::error::Result;
use crate::storage::connection::{Dialect, RelationalStore, SqlArg};
use async_trait::async_trait;
use sqlx::Row;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Persistence for object metadata.
#[async_trait]
pub trait MetaStore: Send + Sync {
    /// Loads the stored metadata onto `object`.
    async fn apply(&self, object: &mut NamedObject) -> Result<()>;

    /// Writes what changed since the object was hydrated or last saved.
    async fn save(&self, object: &mut NamedObject) -> Result<()>;

    /// Deletes every metadata row of `object`.
    async fn remove(&self, object: &NamedObject) -> Result<()>;

    /// Creates the metadata relation if it does not exist.
    async fn create_schema(&self) -> Result<()>;
}

/// [`MetaStore`] over a table in the relational store.
#[derive(Clone)]
pub struct SqlMetaStore {
    store: Arc<RelationalStore>,
    table: String,
}

impl SqlMetaStore {
    /// `table` is the full (already prefixed) relation name.
    pub fn new(store: Arc<RelationalStore>, table: impl Into<String>) -> Self {
        Self {
            store,
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    async fn delete_key(&self, object_id: i64, key: &str) -> Result<u64> {
        let mut ph = self.store.placeholders();
        let sql = format!(
            "DELETE FROM {} WHERE object = {} AND name = {}",
            self.table,
            ph.next(),
            ph.next()
        );
        Ok(self
            .store
            .execute(&sql, &[SqlArg::Int(object_id), SqlArg::from(key)])
            .await?)
    }

    async fn insert(&self, object_id: i64, key: &str, value: &str) -> Result<()> {
        let mut ph = self.store.placeholders();
        let sql = format!(
            "INSERT INTO {} (object, name, value) VALUES ({}, {}, {})",
            self.table,
            ph.next(),
            ph.next(),
            ph.next()
        );
        self.store
            .execute(
                &sql,
                &[SqlArg::Int(object_id), SqlArg::from(key), SqlArg::from(value)],
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl MetaStore for SqlMetaStore {
    async fn apply(&self, object: &mut NamedObject) -> Result<()> {
        let mut ph = self.store.placeholders();
        let sql = format!(
            "SELECT name, value FROM {} WHERE object = {} ORDER BY name, value",
            self.table,
            ph.next()
        );
        let rows = self.store.fetch_all(&sql, &[SqlArg::Int(object.id())]).await?;

        // Several rows may share a key; the last one in sort order wins.
        let mut metadata = BTreeMap::new();
        for row in rows {
            let key: String = row.try_get("name")?;
            let value: String = row.try_get("value")?;
            metadata.insert(key, value);
        }
        object.hydrate_metadata(metadata);
        Ok(())
    }

    async fn save(&self, object: &mut NamedObject) -> Result<()> {
        let delta = object.metadata_delta();
        if delta.is_empty() {
            return Ok(());
        }

        for key in &delta.removals {
            self.delete_key(object.id(), key).await?;
        }
        for (key, value) in &delta.upserts {
            self.delete_key(object.id(), key).await?;
            self.insert(object.id(), key, value).await?;
        }
        tracing::debug!(
            object = object.id(),
            upserts = delta.upserts.len(),
            removals = delta.removals.len(),
            "saved metadata delta"
        );

        object.mark_metadata_saved();
        Ok(())
    }

    async fn remove(&self, object: &NamedObject) -> Result<()> {
        let mut ph = self.store.placeholders();
        let sql = format!("DELETE FROM {} WHERE object = {}", self.table, ph.next());
        let removed = self.store.execute(&sql, &[SqlArg::Int(object.id())]).await?;
        tracing::debug!(object = object.id(), removed, "removed metadata");
        Ok(())
    }

    async fn create_schema(&self) -> Result<()> {
        match self.store.dialect() {
            Dialect::MySql => {
                let ddl = format!(
                    "CREATE TABLE IF NOT EXISTS {} (
                        object BIGINT NOT NULL,
                        name VARCHAR(255) NOT NULL,
                        value TEXT NOT NULL,
                        KEY object (object),
                        KEY name (name)
                    ){}",
                    self.table,
                    self.store.table_options()
                );
                self.store.exec(&ddl).await?;
            }
            Dialect::Postgres | Dialect::Sqlite => {
                let ddl = format!(
                    "CREATE TABLE IF NOT EXISTS {} (
                        object BIGINT NOT NULL,
                        name VARCHAR(255) NOT NULL,
                        value TEXT NOT NULL
                    )",
                    self.table
                );
                self.store.exec(&ddl).await?;
                for column in ["object", "name"] {
                    self.store
                        .exec(&format!(
                            "CREATE INDEX IF NOT EXISTS {table}_{column} ON {table} ({column})",
                            table = self.table,
                            column = column
                        ))
                        .await?;
                }
            }
        }
        tracing::info!(table = %self.table, "metadata schema ready");
        Ok(())
    }
}
