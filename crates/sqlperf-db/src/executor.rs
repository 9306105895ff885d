//! Runs user-submitted SQL against the target database and times it.

use std::{
    path::Path,
    str::FromStr,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteConnection},
    ConnectOptions, Connection,
};
use tracing::{debug, info, instrument, warn};

use crate::SQLITE_BUSY_TIMEOUT_MS;

const UNKNOWN_ERROR_MESSAGE: &str = "query failed without an error message";

/// Result of running one statement. A failed query is an ordinary value here;
/// only the audit store can produce hard errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Completed {
        duration: Duration,
        rows_returned: u64,
    },
    Failed {
        duration: Duration,
        rows_returned: u64,
        message: String,
    },
}

impl ExecutionOutcome {
    pub fn duration(&self) -> Duration {
        match self {
            Self::Completed { duration, .. } | Self::Failed { duration, .. } => *duration,
        }
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration().as_millis() as u64
    }

    pub fn rows_returned(&self) -> u64 {
        match self {
            Self::Completed { rows_returned, .. } | Self::Failed { rows_returned, .. } => {
                *rows_returned
            }
        }
    }

    pub fn is_successful(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Completed { .. } => None,
            Self::Failed { message, .. } => Some(message.as_str()),
        }
    }
}

/// Executor contract: run a raw statement and report how it went.
#[async_trait]
pub trait QueryExecutor: Send + Sync + std::fmt::Debug {
    async fn execute(&self, query: &str) -> ExecutionOutcome;
}

/// Opens a fresh SQLite connection per statement. The measured duration
/// covers connection setup and full consumption of the result stream.
#[derive(Debug, Clone)]
pub struct SqliteQueryExecutor {
    options: SqliteConnectOptions,
}

impl SqliteQueryExecutor {
    pub fn new(options: SqliteConnectOptions) -> Self {
        Self { options }
    }

    /// Builds an executor for a `sqlite://` URL, creating the file if needed.
    pub fn from_url(database_url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_millis(SQLITE_BUSY_TIMEOUT_MS));
        Ok(Self::new(options))
    }

    pub fn from_file(path: &Path) -> Result<Self, sqlx::Error> {
        Self::from_url(&format!("sqlite://{}", path.display()))
    }
}

#[async_trait]
impl QueryExecutor for SqliteQueryExecutor {
    #[instrument(skip_all, fields(query_len = query.len()))]
    async fn execute(&self, query: &str) -> ExecutionOutcome {
        let started = Instant::now();
        let mut rows_returned = 0;
        let result = stream_rows(&self.options, query, &mut rows_returned).await;
        let duration = started.elapsed();

        match result {
            Ok(conn) => {
                if let Err(error) = conn.close().await {
                    warn!(%error, "failed to close target connection");
                }
                debug!(
                    rows_returned,
                    duration_ms = duration.as_millis() as u64,
                    "query completed"
                );
                ExecutionOutcome::Completed {
                    duration,
                    rows_returned,
                }
            }
            Err(error) => {
                let message = describe_error(&error);
                info!(rows_returned, error = %message, "query failed");
                ExecutionOutcome::Failed {
                    duration,
                    rows_returned,
                    message,
                }
            }
        }
    }
}

/// Connects, runs every statement in `query` and counts the rows produced.
/// `rows_returned` keeps the partial count when the stream fails midway.
async fn stream_rows(
    options: &SqliteConnectOptions,
    query: &str,
    rows_returned: &mut u64,
) -> Result<SqliteConnection, sqlx::Error> {
    let mut conn = options.connect().await?;
    {
        let mut results = sqlx::raw_sql(query).fetch_many(&mut conn);
        while let Some(step) = results.try_next().await? {
            if step.is_right() {
                *rows_returned += 1;
            }
        }
    }
    Ok(conn)
}

fn describe_error(error: &sqlx::Error) -> String {
    let message = error.to_string();
    if message.trim().is_empty() {
        UNKNOWN_ERROR_MESSAGE.to_string()
    } else {
        message
    }
}
