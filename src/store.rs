//! Record store: the three keyed collections (users, todo lists, todos) on SQLite.
//!
//! Memberships are not stored as collections. A list belongs to a user through
//! `todo_lists.user_id` and a todo to a list through `todos.list_id`; both are
//! foreign keys, and `todos(list_id, user_id)` references `todo_lists(id, user_id)`
//! so a todo can only sit in a list owned by its own user.
//!
//! Writers go through [`Store::begin_write`], which holds the process-wide write
//! lock for the lifetime of the transaction.

use std::{
    io,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use sqlx::{
    pool::PoolConnection,
    query::Query,
    sqlite::{
        SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow,
    },
    FromRow, Sqlite, SqliteConnection, SqlitePool, Transaction,
};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use crate::error::StoreError;

pub type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

/// Suffixes of the lock artifacts kept next to the database file.
pub const LOCK_SUFFIXES: [&str; 2] = [".lock", ".lock.tmp"];

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY NOT NULL,
        username TEXT NOT NULL,
        email TEXT NOT NULL,
        password_hash TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS todo_lists (
        id TEXT PRIMARY KEY NOT NULL,
        title TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        user_id TEXT NOT NULL REFERENCES users(id),
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE (id, user_id)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS todos (
        id TEXT PRIMARY KEY NOT NULL,
        title TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        list_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        due_date TEXT,
        priority INTEGER NOT NULL DEFAULT 1,
        is_completed BOOLEAN NOT NULL DEFAULT 0,
        completed_at TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        FOREIGN KEY (list_id, user_id) REFERENCES todo_lists(id, user_id),
        CHECK ((is_completed = 1) = (completed_at IS NOT NULL))
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_todo_lists_user_id ON todo_lists(user_id)",
    "CREATE INDEX IF NOT EXISTS idx_todos_list_id ON todos(list_id)",
    "CREATE INDEX IF NOT EXISTS idx_todos_user_id ON todos(user_id)",
];

/// Where the store keeps its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    File(PathBuf),
    /// Nothing survives the process; for tests and throwaway runs.
    Memory,
}

/// An entity kept in one of the top-level collections.
pub trait Record: for<'r> FromRow<'r, SqliteRow> + Send + Unpin {
    /// Human-readable name used in "not found" messages.
    const KIND: &'static str;
    const TABLE: &'static str;
    /// Column list, primary key first. Order must match [`Record::bind_columns`].
    const COLUMNS: &'static [&'static str];

    fn id(&self) -> &str;

    fn bind_columns<'q>(&'q self, query: SqliteQuery<'q>) -> SqliteQuery<'q>;
}

macro_rules! bind_filter {
    ($query:expr, $filter:expr) => {{
        let mut query = $query;
        for (_, value) in &$filter.clauses {
            query = match value {
                FilterValue::Text(text) => query.bind(text.as_str()),
                FilterValue::Bool(flag) => query.bind(*flag),
            };
        }
        query
    }};
}

/// Equality predicate over record columns, joined with AND. An empty filter matches everything.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    clauses: Vec<(&'static str, FilterValue)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterValue {
    Text(String),
    Bool(bool),
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: &'static str, value: impl Into<FilterValue>) -> Self {
        self.clauses.push((column, value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    fn where_clause<R: Record>(&self) -> String {
        if self.clauses.is_empty() {
            return String::new();
        }
        let conditions: Vec<String> = self
            .clauses
            .iter()
            .map(|(column, _)| {
                debug_assert!(R::COLUMNS.contains(column), "unknown column {column}");
                format!("{column} = ?")
            })
            .collect();
        format!(" WHERE {}", conditions.join(" AND "))
    }
}

/// Process-wide handle on the record store.
pub struct Store {
    pool: SqlitePool,
    write_lock: Mutex<()>,
    lock_file: Option<PathBuf>,
}

impl Store {
    /// Opens the store, creating the collections if they do not exist yet.
    ///
    /// For a file-backed store, stale lock artifacts from an unclean shutdown are
    /// removed first and a fresh `<db>.lock` is held until [`Store::close`].
    pub async fn open(location: &StoreLocation) -> Result<Self, StoreError> {
        match location {
            StoreLocation::Memory => {
                let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
                // One pinned connection: every new in-memory connection is a new, empty database.
                let pool = SqlitePoolOptions::new()
                    .min_connections(1)
                    .max_connections(1)
                    .idle_timeout(None::<Duration>)
                    .max_lifetime(None::<Duration>)
                    .connect_with(options)
                    .await?;
                info!("using in-memory storage (data is not persisted)");
                Self::initialize(pool, None).await
            }
            StoreLocation::File(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                clear_lock_artifacts(path)?;

                let options = SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(true)
                    .journal_mode(SqliteJournalMode::Wal)
                    .foreign_keys(true);
                let pool = SqlitePoolOptions::new()
                    .max_connections(10)
                    .connect_with(options)
                    .await?;

                let lock_file = lock_artifact(path, LOCK_SUFFIXES[0]);
                std::fs::write(&lock_file, std::process::id().to_string())?;
                info!(path = %path.display(), "using persistent storage");
                Self::initialize(pool, Some(lock_file)).await
            }
        }
    }

    async fn initialize(pool: SqlitePool, lock_file: Option<PathBuf>) -> Result<Self, StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        info!("collections initialised");

        Ok(Self {
            pool,
            write_lock: Mutex::new(()),
            lock_file,
        })
    }

    /// A connection for reads. Sees only committed state.
    pub async fn acquire(&self) -> Result<PoolConnection<Sqlite>, StoreError> {
        Ok(self.pool.acquire().await?)
    }

    /// Takes the write lock and opens a transaction.
    pub async fn begin_write(&self) -> Result<WriteTxn<'_>, StoreError> {
        let guard = self.write_lock.lock().await;
        let tx = self.pool.begin().await?;
        Ok(WriteTxn { tx, _guard: guard })
    }

    /// Flushes and closes every connection, then releases the lock artifact.
    pub async fn close(&self) -> Result<(), StoreError> {
        self.pool.close().await;
        if let Some(lock_file) = &self.lock_file {
            match std::fs::remove_file(lock_file) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        info!("database connection closed");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}

/// An open write transaction. Dropping it without [`WriteTxn::commit`] discards its changes.
pub struct WriteTxn<'s> {
    tx: Transaction<'static, Sqlite>,
    _guard: MutexGuard<'s, ()>,
}

impl WriteTxn<'_> {
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }

    pub async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }

    /// Commits when `outcome` is `Ok`, rolls back otherwise, and hands the outcome back.
    pub async fn finish<T, E>(self, operation: &'static str, outcome: Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError> + std::fmt::Display,
    {
        match outcome {
            Ok(value) => {
                self.commit().await?;
                debug!(operation, "committed");
                Ok(value)
            }
            Err(err) => {
                warn!(operation, error = %err, "rolling back");
                if let Err(rollback_err) = self.rollback().await {
                    error!(operation, error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }
}

/// Fetches a record, failing with `NotFound` when it is absent.
pub async fn get<R: Record>(conn: &mut SqliteConnection, id: &str) -> Result<R, StoreError> {
    find::<R>(conn, id).await?.ok_or_else(|| StoreError::NotFound {
        kind: R::KIND,
        id: id.to_string(),
    })
}

pub async fn find<R: Record>(conn: &mut SqliteConnection, id: &str) -> Result<Option<R>, StoreError> {
    let sql = format!("SELECT {} FROM {} WHERE id = ?", R::COLUMNS.join(", "), R::TABLE);
    let record = sqlx::query_as::<_, R>(&sql)
        .bind(id)
        .fetch_optional(conn)
        .await?;
    Ok(record)
}

/// Inserts the record, or overwrites every column of the existing one with the same id.
pub async fn put<R: Record>(conn: &mut SqliteConnection, record: &R) -> Result<(), StoreError> {
    let placeholders = vec!["?"; R::COLUMNS.len()].join(", ");
    let assignments = R::COLUMNS[1..]
        .iter()
        .map(|column| format!("{column} = excluded.{column}"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT(id) DO UPDATE SET {}",
        R::TABLE,
        R::COLUMNS.join(", "),
        placeholders,
        assignments
    );
    record.bind_columns(sqlx::query(&sql)).execute(conn).await?;
    debug!(table = R::TABLE, id = record.id(), "record stored");
    Ok(())
}

/// Deletes one record, failing with `NotFound` when it is absent.
pub async fn delete<R: Record>(conn: &mut SqliteConnection, id: &str) -> Result<(), StoreError> {
    let sql = format!("DELETE FROM {} WHERE id = ?", R::TABLE);
    let rows_affected = sqlx::query(&sql).bind(id).execute(conn).await?.rows_affected();
    if rows_affected == 0 {
        return Err(StoreError::NotFound {
            kind: R::KIND,
            id: id.to_string(),
        });
    }
    debug!(table = R::TABLE, id, "record deleted");
    Ok(())
}

/// Deletes every record matching `filter` and returns how many went.
pub async fn delete_where<R: Record>(
    conn: &mut SqliteConnection,
    filter: &Filter,
) -> Result<u64, StoreError> {
    let sql = format!("DELETE FROM {}{}", R::TABLE, filter.where_clause::<R>());
    let rows_affected = bind_filter!(sqlx::query(&sql), filter)
        .execute(conn)
        .await?
        .rows_affected();
    debug!(table = R::TABLE, rows_affected, "records deleted");
    Ok(rows_affected)
}

/// Every record of the collection, in insertion order.
pub async fn list_all<R: Record>(conn: &mut SqliteConnection) -> Result<Vec<R>, StoreError> {
    list_where::<R>(conn, &Filter::new()).await
}

/// Records matching `filter`, in insertion order.
pub async fn list_where<R: Record>(
    conn: &mut SqliteConnection,
    filter: &Filter,
) -> Result<Vec<R>, StoreError> {
    let sql = format!(
        "SELECT {} FROM {}{} ORDER BY rowid",
        R::COLUMNS.join(", "),
        R::TABLE,
        filter.where_clause::<R>()
    );
    let records = bind_filter!(sqlx::query_as::<_, R>(&sql), filter)
        .fetch_all(conn)
        .await?;
    Ok(records)
}

pub async fn count_where<R: Record>(
    conn: &mut SqliteConnection,
    filter: &Filter,
) -> Result<i64, StoreError> {
    let sql = format!("SELECT COUNT(*) FROM {}{}", R::TABLE, filter.where_clause::<R>());
    let count = bind_filter!(sqlx::query_scalar::<_, i64>(&sql), filter)
        .fetch_one(conn)
        .await?;
    Ok(count)
}

fn lock_artifact(db_path: &Path, suffix: &str) -> PathBuf {
    let mut name = db_path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Removes lock artifacts left next to `db_path`. Returns the paths that were removed.
pub fn clear_lock_artifacts(db_path: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let mut removed = Vec::new();
    for suffix in LOCK_SUFFIXES {
        let lock_file = lock_artifact(db_path, suffix);
        match std::fs::remove_file(&lock_file) {
            Ok(()) => {
                warn!(path = %lock_file.display(), "removed stale lock file");
                removed.push(lock_file);
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(removed)
}
