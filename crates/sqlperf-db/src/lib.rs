//! Persistence layer for the SQL performance dashboard.
//!
//! The crate owns two things: the append-only `query_logs` table (the audit
//! log of every submitted statement) and the executor that runs user SQL
//! against the target database while timing it. [`pipeline::QueryAuditor`]
//! composes both into the execute → log sequence served over HTTP.

pub mod executor;
pub mod pipeline;

use std::{path::Path, str::FromStr, time::Duration};

use chrono::{DateTime, SecondsFormat, Utc};
use futures::TryStreamExt;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Row, SqlitePool,
};
use thiserror::Error;

pub use executor::{ExecutionOutcome, QueryExecutor, SqliteQueryExecutor};
pub use pipeline::QueryAuditor;

/// Default SQLite busy timeout in milliseconds when the DB is under load.
pub(crate) const SQLITE_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Page size used when a caller asks for an out-of-range number of log rows.
pub const DEFAULT_TAKE: u32 = 50;

/// Largest page size a caller may request.
pub const MAX_TAKE: u32 = 500;

/// Maps a requested page size onto the served one.
///
/// Anything outside `1..=MAX_TAKE` falls back to [`DEFAULT_TAKE`] instead of
/// the nearest bound, so `take=1000` yields 50 rows, not 500.
pub fn clamp_take(requested: i64) -> u32 {
    if requested <= 0 || requested > i64::from(MAX_TAKE) {
        DEFAULT_TAKE
    } else {
        requested as u32
    }
}

/// Handle to the audit log store.
#[derive(Clone, Debug)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Establishes (or creates) a connection pool to the SQLite database located at
    /// the given URL (e.g. `sqlite://sqlperformance.db`) and applies migrations.
    pub async fn connect(database_url: &str) -> Result<Self, PersistenceError> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_millis(SQLITE_BUSY_TIMEOUT_MS));

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(8)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Connects to a file path via `sqlite://` scheme.
    pub async fn connect_file(path: &Path) -> Result<Self, PersistenceError> {
        let url = format!("sqlite://{}", path.display());
        Self::connect(&url).await
    }

    /// Persists one execution record and returns it with its assigned id.
    pub async fn append(&self, entry: NewQueryLog) -> Result<QueryLogRecord, PersistenceError> {
        if entry.query_text.is_empty() {
            return Err(PersistenceError::MissingField("query_text"));
        }

        let id = sqlx::query(
            r#"
            INSERT INTO query_logs (
                query_text, duration_ms, rows_returned,
                is_successful, error_message, executed_at_utc
            ) VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.query_text)
        .bind(entry.duration_ms as i64)
        .bind(entry.rows_returned as i64)
        .bind(entry.is_successful as i32)
        .bind(entry.error_message.as_deref())
        .bind(format_timestamp(&entry.executed_at))
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        self.fetch(id).await?.ok_or_else(|| {
            PersistenceError::Corrupt(format!("query log {id} inserted but missing when reloaded"))
        })
    }

    /// Retrieves a single record by id.
    pub async fn fetch(&self, id: i64) -> Result<Option<QueryLogRecord>, PersistenceError> {
        let row = sqlx::query("SELECT * FROM query_logs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(map_query_log).transpose()
    }

    /// Returns up to `clamp_take(take)` records, most recent first.
    pub async fn list(&self, take: i64) -> Result<Vec<QueryLogRecord>, PersistenceError> {
        let limit = clamp_take(take);
        let mut rows = sqlx::query(
            r#"
            SELECT * FROM query_logs
            ORDER BY executed_at_utc DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(i64::from(limit))
        .fetch(&self.pool);

        let mut out = Vec::with_capacity(limit as usize);
        while let Some(row) = rows.try_next().await? {
            out.push(map_query_log(row)?);
        }
        Ok(out)
    }
}

/// Fixed-width RFC3339 so the TEXT column sorts chronologically.
fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_datetime(value: String) -> Result<DateTime<Utc>, PersistenceError> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| {
            PersistenceError::Corrupt(format!("invalid RFC3339 timestamp '{value}': {err}"))
        })
}

fn map_query_log(row: SqliteRow) -> Result<QueryLogRecord, PersistenceError> {
    let is_successful: i32 = row.try_get("is_successful")?;

    Ok(QueryLogRecord {
        id: row.try_get("id")?,
        query_text: row.try_get("query_text")?,
        duration_ms: row.try_get::<i64, _>("duration_ms")? as u64,
        rows_returned: row.try_get::<i64, _>("rows_returned")? as u64,
        is_successful: is_successful != 0,
        error_message: row.try_get("error_message")?,
        executed_at: parse_datetime(row.try_get("executed_at_utc")?)?,
    })
}

/// Infrastructure failures of the audit log store. These are never folded into
/// a query outcome; they surface to the caller as hard errors.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("query log field '{0}' is required")]
    MissingField(&'static str),
    #[error("audit log database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("audit log migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("corrupt query log row: {0}")]
    Corrupt(String),
}

/// Input payload for [`Database::append`].
#[derive(Debug, Clone, PartialEq)]
pub struct NewQueryLog {
    pub query_text: String,
    pub duration_ms: u64,
    pub rows_returned: u64,
    pub is_successful: bool,
    pub error_message: Option<String>,
    pub executed_at: DateTime<Utc>,
}

impl NewQueryLog {
    /// Builds the log entry for an execution, stamped with the current time.
    pub fn from_outcome(query_text: impl Into<String>, outcome: &ExecutionOutcome) -> Self {
        Self {
            query_text: query_text.into(),
            duration_ms: outcome.duration_ms(),
            rows_returned: outcome.rows_returned(),
            is_successful: outcome.is_successful(),
            error_message: outcome.error_message().map(str::to_owned),
            executed_at: Utc::now(),
        }
    }
}

/// Persisted execution record.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryLogRecord {
    pub id: i64,
    pub query_text: String,
    pub duration_ms: u64,
    pub rows_returned: u64,
    pub is_successful: bool,
    pub error_message: Option<String>,
    pub executed_at: DateTime<Utc>,
}
