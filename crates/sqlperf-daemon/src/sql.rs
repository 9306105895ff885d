use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use sqlperf_db::{QueryLogRecord, DEFAULT_TAKE};
use utoipa::{IntoParams, ToSchema};

use crate::server::{ApiError, AppState, ErrorBody};

#[derive(Debug, Deserialize, ToSchema)]
pub(crate) struct ExecuteBody {
    #[schema(example = "SELECT 1;")]
    pub query: String,
}

/// Outcome of one submitted statement. A failed query still answers 200;
/// the failure lives in `isSuccessful` / `errorMessage`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ExecuteResponse {
    pub id: i64,
    pub duration_ms: u64,
    pub rows_returned: u64,
    pub is_successful: bool,
    pub error_message: Option<String>,
    pub executed_at_utc: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct QueryLogResponse {
    pub id: i64,
    pub query_text: String,
    pub duration_ms: u64,
    pub rows_returned: u64,
    pub is_successful: bool,
    pub error_message: Option<String>,
    pub executed_at_utc: String,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub(crate) struct LogsQuery {
    /// Page size; values outside 1..=500 fall back to 50.
    #[param(example = 50)]
    pub take: Option<i64>,
}

impl From<QueryLogRecord> for ExecuteResponse {
    fn from(record: QueryLogRecord) -> Self {
        Self {
            id: record.id,
            duration_ms: record.duration_ms,
            rows_returned: record.rows_returned,
            is_successful: record.is_successful,
            error_message: record.error_message,
            executed_at_utc: record.executed_at.to_rfc3339(),
        }
    }
}

impl From<QueryLogRecord> for QueryLogResponse {
    fn from(record: QueryLogRecord) -> Self {
        Self {
            id: record.id,
            query_text: record.query_text,
            duration_ms: record.duration_ms,
            rows_returned: record.rows_returned,
            is_successful: record.is_successful,
            error_message: record.error_message,
            executed_at_utc: record.executed_at.to_rfc3339(),
        }
    }
}

#[utoipa::path(
    post,
    path = "/api/sql/execute",
    request_body = ExecuteBody,
    responses(
        (status = 200, description = "Statement executed (successfully or not) and logged", body = ExecuteResponse),
        (status = 400, description = "Empty query", body = ErrorBody),
        (status = 500, description = "Audit log could not be written", body = ErrorBody)
    )
)]
pub(crate) async fn execute_query(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ExecuteBody>,
) -> Result<Json<ExecuteResponse>, ApiError> {
    if payload.query.is_empty() {
        return Err(ApiError::bad_request("query must not be empty"));
    }

    let record = state
        .auditor
        .execute(&payload.query)
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(ExecuteResponse::from(record)))
}

#[utoipa::path(
    get,
    path = "/api/sql/logs",
    params(LogsQuery),
    responses(
        (status = 200, description = "Recent executions, newest first", body = [QueryLogResponse]),
        (status = 500, description = "Audit log could not be read", body = ErrorBody)
    )
)]
pub(crate) async fn list_logs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LogsQuery>,
) -> Result<Json<Vec<QueryLogResponse>>, ApiError> {
    let take = params.take.unwrap_or(i64::from(DEFAULT_TAKE));

    let logs = state
        .auditor
        .recent(take)
        .await
        .map_err(ApiError::internal)?
        .into_iter()
        .map(QueryLogResponse::from)
        .collect();

    Ok(Json(logs))
}
