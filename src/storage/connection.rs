//! Relational store: a `sqlx::AnyPool` plus the connection-level parameters
//! needed to namespace tables and render dialect-specific SQL.

use crate::error::{Result, StoreError};
use crate::infra::config::StoreConfig;
use sqlx::any::{AnyArguments, AnyPoolOptions, AnyRow};
use sqlx::query::Query;
use sqlx::{Any, AnyPool};

/// SQL dialect of the connected database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    Sqlite,
    MySql,
}

impl Dialect {
    /// Picks the dialect from the URL scheme.
    pub fn from_url(url: &str) -> Result<Self> {
        let scheme = url.split(':').next().unwrap_or_default().to_lowercase();
        match scheme.as_str() {
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            "sqlite" => Ok(Dialect::Sqlite),
            "mysql" | "mariadb" => Ok(Dialect::MySql),
            other => Err(StoreError::Config(format!(
                "unsupported database scheme '{}'",
                other
            ))),
        }
    }

    /// Renders the `n`th (1-based) positional placeholder.
    pub fn placeholder(&self, n: usize) -> String {
        match self {
            Dialect::Postgres => format!("${}", n),
            Dialect::Sqlite => format!("?{}", n),
            Dialect::MySql => "?".to_string(),
        }
    }

    /// Whether `INSERT .. RETURNING` is available. MySQL has no RETURNING.
    pub fn supports_returning(&self) -> bool {
        matches!(self, Dialect::Postgres | Dialect::Sqlite)
    }

    /// Column definition for an auto-increment, never-reused primary key.
    pub fn serial_primary_key(&self) -> &'static str {
        match self {
            Dialect::Postgres => "BIGSERIAL PRIMARY KEY",
            Dialect::Sqlite => "INTEGER PRIMARY KEY AUTOINCREMENT",
            Dialect::MySql => "BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY",
        }
    }
}

/// Hands out placeholders in emission order, so binding stays positional.
#[derive(Debug)]
pub struct Placeholders {
    dialect: Dialect,
    issued: usize,
}

impl Placeholders {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect, issued: 0 }
    }

    pub fn next(&mut self) -> String {
        self.issued += 1;
        self.dialect.placeholder(self.issued)
    }
}

/// A bound statement argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlArg {
    Int(i64),
    Text(String),
}

impl From<i64> for SqlArg {
    fn from(v: i64) -> Self {
        SqlArg::Int(v)
    }
}

impl From<String> for SqlArg {
    fn from(v: String) -> Self {
        SqlArg::Text(v)
    }
}

impl From<&str> for SqlArg {
    fn from(v: &str) -> Self {
        SqlArg::Text(v.to_string())
    }
}

fn bind_args<'q>(
    mut query: Query<'q, Any, AnyArguments<'q>>,
    args: &[SqlArg],
) -> Query<'q, Any, AnyArguments<'q>> {
    for arg in args {
        query = match arg {
            SqlArg::Int(v) => query.bind(*v),
            SqlArg::Text(v) => query.bind(v.clone()),
        };
    }
    query
}

/// True when `err` is the database's unique-constraint violation.
pub fn is_duplicate_key(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            if db_err.is_unique_violation() {
                return true;
            }
            // Postgres 23505, SQLite UNIQUE / PRIMARYKEY, MySQL ER_DUP_ENTRY
            matches!(
                db_err.code().as_deref(),
                Some("23505") | Some("2067") | Some("1555") | Some("1062")
            )
        }
        _ => false,
    }
}

/// Connection pool plus the parameters used to namespace and create tables.
#[derive(Clone)]
pub struct RelationalStore {
    pool: AnyPool,
    dialect: Dialect,
    prefix: String,
    engine: String,
    charset: String,
    collate: String,
}

impl RelationalStore {
    /// Connects using `config`. In-memory SQLite gets a single long-lived
    /// connection, otherwise every pooled connection would see its own database.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        sqlx::any::install_default_drivers();
        let dialect = Dialect::from_url(&config.database_url)?;

        let mut options = AnyPoolOptions::new().max_connections(config.max_connections.max(1));
        if dialect == Dialect::Sqlite && config.database_url.contains(":memory:") {
            options = options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }
        let pool = options.connect(&config.database_url).await?;

        tracing::debug!(?dialect, prefix = %config.table_prefix, "connected relational store");
        Ok(Self::from_pool(pool, dialect, config))
    }

    /// Wraps an existing pool.
    pub fn from_pool(pool: AnyPool, dialect: Dialect, config: &StoreConfig) -> Self {
        Self {
            pool,
            dialect,
            prefix: config.table_prefix.clone(),
            engine: config.engine.clone(),
            charset: config.charset.clone(),
            collate: config.collate.clone(),
        }
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Prefixed table name.
    pub fn table(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    pub fn placeholders(&self) -> Placeholders {
        Placeholders::new(self.dialect)
    }

    /// Trailing table options for `CREATE TABLE` (MySQL only).
    pub fn table_options(&self) -> String {
        match self.dialect {
            Dialect::MySql => format!(
                " ENGINE={} DEFAULT CHARSET={} COLLATE={}",
                self.engine, self.charset, self.collate
            ),
            _ => String::new(),
        }
    }

    /// Executes a DDL statement.
    pub async fn exec(&self, ddl: &str) -> Result<(), sqlx::Error> {
        sqlx::query(ddl).execute(&self.pool).await?;
        Ok(())
    }

    /// Executes a statement, returning the affected row count.
    pub async fn execute(&self, sql: &str, args: &[SqlArg]) -> Result<u64, sqlx::Error> {
        let result = bind_args(sqlx::query(sql), args).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Runs an INSERT and returns the id assigned to the new row.
    ///
    /// `sql` must not carry a RETURNING clause; `id_column` is appended for
    /// dialects that support it. MySQL reads `LAST_INSERT_ID()` on the same
    /// connection that ran the insert.
    pub async fn insert_returning_id(
        &self,
        sql: &str,
        id_column: &str,
        args: &[SqlArg],
    ) -> Result<i64, sqlx::Error> {
        if self.dialect.supports_returning() {
            let sql = format!("{} RETURNING {}", sql, id_column);
            let row = bind_args(sqlx::query(&sql), args).fetch_one(&self.pool).await?;
            return sqlx::Row::try_get::<i64, _>(&row, id_column);
        }
        let mut conn = self.pool.acquire().await?;
        bind_args(sqlx::query(sql), args).execute(&mut *conn).await?;
        let row = sqlx::query("SELECT CAST(LAST_INSERT_ID() AS SIGNED) AS id")
            .fetch_one(&mut *conn)
            .await?;
        sqlx::Row::try_get::<i64, _>(&row, "id")
    }

    pub async fn fetch_all(&self, sql: &str, args: &[SqlArg]) -> Result<Vec<AnyRow>, sqlx::Error> {
        bind_args(sqlx::query(sql), args).fetch_all(&self.pool).await
    }

    pub async fn fetch_optional(
        &self,
        sql: &str,
        args: &[SqlArg],
    ) -> Result<Option<AnyRow>, sqlx::Error> {
        bind_args(sqlx::query(sql), args)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn fetch_one(&self, sql: &str, args: &[SqlArg]) -> Result<AnyRow, sqlx::Error> {
        bind_args(sqlx::query(sql), args).fetch_one(&self.pool).await
    }
}
