//! The object repository.
//!
//! It is responsible for:
//! 1.  Writing named objects to their relation and keeping the name unique.
//! 2.  Serving point lookups through the cache, and invalidating both cache
//!     axes (id and name) whenever a row is renamed or deleted.
//! 3.  Delegating metadata persistence to a [`MetaStore`] and metadata
//!     searches to the [`PredicateCompiler`].

use crate::domain::compiler::{PredicateCompiler, BASE_ALIAS};
use crate::domain::object::{CachedRow, EntityDescriptor, NamedEntity, NamedObject};
use crate::domain::predicate::SearchPredicate;
use crate::error::{Result, StoreError};
use crate::storage::cache::CacheClient;
use crate::storage::connection::{is_duplicate_key, Placeholders, RelationalStore, SqlArg};
use crate::storage::meta::{MetaStore, SqlMetaStore};
use sqlx::Row;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DEFAULT_LIMIT: i64 = 50;

/// Column the plain search sorts by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortField {
    #[default]
    Id,
    Name,
}

impl SortField {
    fn column(&self) -> &'static str {
        match self {
            SortField::Id => "id",
            SortField::Name => "name",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDir {
    Asc,
    #[default]
    Desc,
}

impl SortDir {
    fn as_sql(&self) -> &'static str {
        match self {
            SortDir::Asc => "ASC",
            SortDir::Desc => "DESC",
        }
    }
}

/// Paging and ordering for [`ObjectRepository::search`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchOptions {
    pub offset: i64,
    pub limit: i64,
    pub sort_field: SortField,
    pub sort_dir: SortDir,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: DEFAULT_LIMIT,
            sort_field: SortField::Id,
            sort_dir: SortDir::Desc,
        }
    }
}

/// Paging and ordering for [`ObjectRepository::meta_search`]; always sorted by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetaSearchOptions {
    pub offset: i64,
    pub limit: i64,
    pub id_order: SortDir,
}

impl Default for MetaSearchOptions {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: DEFAULT_LIMIT,
            id_order: SortDir::Desc,
        }
    }
}

/// One page of a search plus the unpaginated match count.
#[derive(Debug, Clone)]
pub struct SearchResult<T> {
    pub total_matching: i64,
    pub page: Vec<T>,
}

/// How [`ObjectRepository::load`] interprets its input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Id(i64),
    Name(String),
}

impl Lookup {
    /// All-digit input is an id, anything else a (trimmed) name.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(id) = trimmed.parse::<i64>() {
                return Lookup::Id(id);
            }
        }
        Lookup::Name(trimmed.to_string())
    }
}

/// Cache-backed store of named objects of one type.
pub struct ObjectRepository<T> {
    store: Arc<RelationalStore>,
    cache: Arc<dyn CacheClient>,
    meta: Arc<dyn MetaStore>,
    descriptor: EntityDescriptor<T>,
    table: String,
    meta_table: String,
    cache_prefix: String,
}

impl<T: NamedEntity> ObjectRepository<T> {
    /// Builds a repository over `<prefix><type>` and `<prefix><type>_meta`,
    /// with metadata kept by a [`SqlMetaStore`] on the same store.
    pub fn new(
        store: Arc<RelationalStore>,
        cache: Arc<dyn CacheClient>,
        descriptor: EntityDescriptor<T>,
    ) -> Self {
        let table = store.table(descriptor.type_name());
        let meta_table = store.table(&format!("{}_meta", descriptor.type_name()));
        let cache_prefix = format!("{}{}_", store.prefix(), descriptor.type_name());
        let meta = Arc::new(SqlMetaStore::new(store.clone(), meta_table.clone()));
        Self {
            store,
            cache,
            meta,
            descriptor,
            table,
            meta_table,
            cache_prefix,
        }
    }

    /// Swaps in a different metadata store. `meta_search` still reads the
    /// `<type>_meta` relation directly.
    pub fn with_meta_store(mut self, meta: Arc<dyn MetaStore>) -> Self {
        self.meta = meta;
        self
    }

    pub fn type_name(&self) -> &str {
        self.descriptor.type_name()
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn meta_table(&self) -> &str {
        &self.meta_table
    }

    pub fn cache_key_for_id(&self, id: i64) -> String {
        format!("{}{}", self.cache_prefix, id)
    }

    pub fn cache_key_for_name(&self, name: &str) -> String {
        format!("{}name_{}", self.cache_prefix, name)
    }

    /// Creates the object relation and the metadata relation.
    pub async fn install_schema(&self) -> Result<()> {
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id {},
                name VARCHAR(255) NOT NULL UNIQUE
            ){}",
            self.table,
            self.store.dialect().serial_primary_key(),
            self.store.table_options()
        );
        self.store.exec(&ddl).await?;
        self.meta.create_schema().await?;
        info!(table = %self.table, "object schema installed");
        Ok(())
    }

    /// Inserts a new object named `name` (trimmed) with no metadata.
    pub async fn create(&self, name: &str) -> Result<T> {
        let name = normalize_name(name)?;
        let mut ph = self.store.placeholders();
        let sql = format!("INSERT INTO {} (name) VALUES ({})", self.table, ph.next());

        let id = self
            .store
            .insert_returning_id(&sql, "id", &[SqlArg::Text(name.clone())])
            .await
            .map_err(|e| self.write_error(e, &name))?;

        debug!(type_name = self.type_name(), id, name = %name, "created object");
        Ok(self.descriptor.construct(NamedObject::new(id, name)))
    }

    /// Saves the metadata delta, then renames if the trimmed name changed.
    ///
    /// Both cache keys are invalidated only after a successful rename;
    /// metadata-only updates leave the cache alone. The name stored in the
    /// row is invalidated too, in case another handle renamed it meanwhile.
    pub async fn update(&self, entity: &mut T) -> Result<()> {
        let object = entity.object_mut();
        self.meta.save(object).await?;

        let new_name = object.name.trim().to_string();
        if new_name == object.persisted_name() {
            object.name = new_name;
            return Ok(());
        }
        if new_name.is_empty() {
            return Err(StoreError::invalid("object name must not be empty"));
        }

        let stored_name = self.current_name(object.id()).await?;
        let mut ph = self.store.placeholders();
        let sql = format!(
            "UPDATE {} SET name = {} WHERE id = {}",
            self.table,
            ph.next(),
            ph.next()
        );
        self.store
            .execute(&sql, &[SqlArg::Text(new_name.clone()), SqlArg::Int(object.id())])
            .await
            .map_err(|e| self.write_error(e, &new_name))?;

        let old_name = object.persisted_name().to_string();
        self.invalidate(object.id(), &old_name, stored_name.as_deref())
            .await?;
        debug!(id = object.id(), from = %old_name, to = %new_name, "renamed object");
        object.mark_renamed(new_name);
        Ok(())
    }

    /// Deletes the row, then its metadata, then both cache entries.
    pub async fn delete(&self, entity: &T) -> Result<()> {
        let object = entity.object();
        let stored_name = self.current_name(object.id()).await?;
        let mut ph = self.store.placeholders();
        let sql = format!("DELETE FROM {} WHERE id = {}", self.table, ph.next());
        self.store.execute(&sql, &[SqlArg::Int(object.id())]).await?;

        self.meta.remove(object).await?;
        self.invalidate(object.id(), object.persisted_name(), stored_name.as_deref())
            .await?;
        debug!(id = object.id(), "deleted object");
        Ok(())
    }

    /// Loads by id when `id_or_name` is all digits, by name otherwise.
    pub async fn load(&self, id_or_name: &str) -> Result<Option<T>> {
        self.load_lookup(Lookup::parse(id_or_name)).await
    }

    pub async fn load_by_id(&self, id: i64) -> Result<Option<T>> {
        self.load_lookup(Lookup::Id(id)).await
    }

    /// Name lookup that never reinterprets digits as an id.
    pub async fn load_by_name(&self, name: &str) -> Result<Option<T>> {
        self.load_lookup(Lookup::Name(name.trim().to_string())).await
    }

    async fn load_lookup(&self, lookup: Lookup) -> Result<Option<T>> {
        let (key, requested_name) = match &lookup {
            Lookup::Id(id) => (self.cache_key_for_id(*id), None),
            Lookup::Name(name) => (self.cache_key_for_name(name), Some(name.clone())),
        };

        let cached = self.cache.fetch(&key).await.map_err(StoreError::Cache)?;
        let row = match cached {
            Some(raw) => {
                debug!(key = %key, "cache hit");
                serde_json::from_str::<CachedRow>(&raw)?
            }
            None => {
                debug!(key = %key, "cache miss");
                let mut ph = self.store.placeholders();
                let (column, arg) = match lookup {
                    Lookup::Id(id) => ("id", SqlArg::Int(id)),
                    Lookup::Name(name) => ("name", SqlArg::Text(name)),
                };
                let sql = format!(
                    "SELECT name, id FROM {} WHERE {} = {}",
                    self.table,
                    column,
                    ph.next()
                );
                let Some(found) = self.store.fetch_optional(&sql, &[arg]).await? else {
                    return Ok(None);
                };
                let row = CachedRow {
                    id: found.try_get("id")?,
                    name: found.try_get("name")?,
                };
                // A case-insensitive collation can match a differently
                // spelled name; renames only ever clear the stored spelling.
                if requested_name.map_or(true, |requested| requested == row.name) {
                    self.cache
                        .store(&key, serde_json::to_string(&row)?)
                        .await
                        .map_err(StoreError::Cache)?;
                }
                row
            }
        };

        let mut object = NamedObject::new(row.id, row.name);
        self.meta.apply(&mut object).await?;
        Ok(Some(self.descriptor.construct(object)))
    }

    /// Lists objects whose name contains `query` (all objects when empty).
    /// `%` and `_` in `query` match literally.
    pub async fn search(&self, query: &str, options: SearchOptions) -> Result<SearchResult<T>> {
        let query = query.trim();
        let filter = |ph: &mut Placeholders| {
            if query.is_empty() {
                (String::new(), Vec::new())
            } else {
                (
                    format!(" WHERE name LIKE {} ESCAPE '{}'", ph.next(), LIKE_ESCAPE),
                    vec![SqlArg::Text(format!("%{}%", escape_like(query)))],
                )
            }
        };

        let mut ph = self.store.placeholders();
        let (where_sql, args) = filter(&mut ph);
        let count_sql = format!("SELECT COUNT(*) AS total FROM {}{}", self.table, where_sql);
        let total_matching: i64 = self.store.fetch_one(&count_sql, &args).await?.try_get("total")?;

        let mut ph = self.store.placeholders();
        let (where_sql, mut args) = filter(&mut ph);
        let page_sql = format!(
            "SELECT id FROM {}{} ORDER BY {} {} LIMIT {} OFFSET {}",
            self.table,
            where_sql,
            options.sort_field.column(),
            options.sort_dir.as_sql(),
            ph.next(),
            ph.next()
        );
        args.push(SqlArg::Int(options.limit.max(0)));
        args.push(SqlArg::Int(options.offset.max(0)));

        let ids = self.fetch_ids(&page_sql, &args).await?;
        let page = self.load_all(ids).await?;
        Ok(SearchResult {
            total_matching,
            page,
        })
    }

    /// Lists objects whose metadata satisfies `predicate`, ordered by id.
    pub async fn meta_search(
        &self,
        predicate: &SearchPredicate,
        options: MetaSearchOptions,
    ) -> Result<SearchResult<T>> {
        if predicate.is_empty() {
            return Err(StoreError::invalid(
                "metadata predicate must not be empty; use search() to list all objects",
            ));
        }
        let compiler = PredicateCompiler::new(self.meta_table.clone());
        let from = format!(
            "FROM {meta} {base} INNER JOIN {table} o ON o.id = {base}.object",
            meta = self.meta_table,
            base = BASE_ALIAS,
            table = self.table
        );

        let mut ph = self.store.placeholders();
        let compiled = compiler.compile(predicate, &mut ph)?;
        let count_sql = format!(
            "SELECT COUNT(DISTINCT {base}.object) AS total {from} WHERE {cond}",
            base = BASE_ALIAS,
            from = from,
            cond = compiled.sql
        );
        let total_matching: i64 = self
            .store
            .fetch_one(&count_sql, &compiled.args)
            .await?
            .try_get("total")?;

        let mut ph = self.store.placeholders();
        let compiled = compiler.compile(predicate, &mut ph)?;
        let page_sql = format!(
            "SELECT {base}.object AS id {from} WHERE {cond} GROUP BY {base}.object \
             ORDER BY {base}.object {dir} LIMIT {limit} OFFSET {offset}",
            base = BASE_ALIAS,
            from = from,
            cond = compiled.sql,
            dir = options.id_order.as_sql(),
            limit = ph.next(),
            offset = ph.next()
        );
        let mut args = compiled.args;
        args.push(SqlArg::Int(options.limit.max(0)));
        args.push(SqlArg::Int(options.offset.max(0)));
        debug!(sql = %page_sql, "metadata search");

        let ids = self.fetch_ids(&page_sql, &args).await?;
        let page = self.load_all(ids).await?;
        Ok(SearchResult {
            total_matching,
            page,
        })
    }

    async fn fetch_ids(&self, sql: &str, args: &[SqlArg]) -> Result<Vec<i64>> {
        let rows = self.store.fetch_all(sql, args).await?;
        let mut ids = Vec::with_capacity(rows.len());
        for row in rows {
            ids.push(row.try_get::<i64, _>("id")?);
        }
        Ok(ids)
    }

    /// Hydrates through `load` so each row can come from the cache. Rows
    /// deleted between the id query and the load are skipped.
    async fn load_all(&self, ids: Vec<i64>) -> Result<Vec<T>> {
        let mut page = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(entity) = self.load_by_id(id).await? {
                page.push(entity);
            }
        }
        Ok(page)
    }

    /// Name currently stored in the row, if the row still exists.
    async fn current_name(&self, id: i64) -> Result<Option<String>> {
        let mut ph = self.store.placeholders();
        let sql = format!("SELECT name FROM {} WHERE id = {}", self.table, ph.next());
        match self.store.fetch_optional(&sql, &[SqlArg::Int(id)]).await? {
            Some(row) => Ok(Some(row.try_get("name")?)),
            None => Ok(None),
        }
    }

    async fn invalidate(&self, id: i64, name: &str, stored_name: Option<&str>) -> Result<()> {
        self.cache
            .delete(&self.cache_key_for_id(id))
            .await
            .map_err(StoreError::Cache)?;
        self.cache
            .delete(&self.cache_key_for_name(name))
            .await
            .map_err(StoreError::Cache)?;
        if let Some(stored) = stored_name.filter(|stored| *stored != name) {
            self.cache
                .delete(&self.cache_key_for_name(stored))
                .await
                .map_err(StoreError::Cache)?;
        }
        Ok(())
    }

    fn write_error(&self, err: sqlx::Error, name: &str) -> StoreError {
        if is_duplicate_key(&err) {
            warn!(type_name = self.type_name(), name = %name, "duplicate object name");
            StoreError::DuplicateName {
                name: name.to_string(),
            }
        } else {
            StoreError::Storage(err)
        }
    }
}

const LIKE_ESCAPE: char = '!';

fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | LIKE_ESCAPE) {
            out.push(LIKE_ESCAPE);
        }
        out.push(c);
    }
    out
}

fn normalize_name(raw: &str) -> Result<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(StoreError::invalid("object name must not be empty"));
    }
    Ok(name.to_string())
}
