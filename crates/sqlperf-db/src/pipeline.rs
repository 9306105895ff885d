//! Execute-then-log pipeline shared by the HTTP handlers.

use std::sync::Arc;

use tracing::{info, instrument};

use crate::{executor::QueryExecutor, Database, NewQueryLog, PersistenceError, QueryLogRecord};

/// Runs submitted statements and writes exactly one audit record per attempt.
#[derive(Debug, Clone)]
pub struct QueryAuditor {
    executor: Arc<dyn QueryExecutor>,
    store: Database,
}

impl QueryAuditor {
    pub fn new(executor: Arc<dyn QueryExecutor>, store: Database) -> Self {
        Self { executor, store }
    }

    pub fn store(&self) -> &Database {
        &self.store
    }

    /// Executes `query` and persists the outcome. Query failures come back as
    /// an unsuccessful record; only a failing audit write is an `Err`.
    #[instrument(skip_all)]
    pub async fn execute(&self, query: &str) -> Result<QueryLogRecord, PersistenceError> {
        let outcome = self.executor.execute(query).await;
        let record = self
            .store
            .append(NewQueryLog::from_outcome(query, &outcome))
            .await?;

        info!(
            id = record.id,
            success = record.is_successful,
            duration_ms = record.duration_ms,
            rows_returned = record.rows_returned,
            "query execution logged"
        );
        Ok(record)
    }

    pub async fn recent(&self, take: i64) -> Result<Vec<QueryLogRecord>, PersistenceError> {
        self.store.list(take).await
    }
}
