use std::{env, net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use axum::{
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use sqlperf_db::{Database, QueryAuditor, SqliteQueryExecutor};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use utoipa::{OpenApi, ToSchema};

use crate::sql::{execute_query, list_logs};

const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:5286";
const DEFAULT_DB_URL: &str = "sqlite://sqlperformance.db";

pub async fn run() -> Result<()> {
    let config = AppConfig::from_env()?;

    let db = Database::connect(&config.log_db_url)
        .await
        .context("failed to open audit log database")?;
    let executor = SqliteQueryExecutor::from_url(&config.target_db_url)
        .context("invalid SQLPERF_TARGET_DB_URL")?;

    let auditor = QueryAuditor::new(Arc::new(executor), db);
    let state = Arc::new(AppState { auditor });

    let app = build_router(state)
        .layer(cors_layer(&config.cors_origins))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .context("failed to bind listen socket")?;

    info!(
        addr = %config.listen_addr,
        log_db = %config.log_db_url,
        target_db = %config.target_db_url,
        "sqlperf-daemon listening"
    );
    axum::serve(listener, app)
        .await
        .context("HTTP server exited")?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    let sql_routes = Router::new()
        .route("/execute", post(execute_query))
        .route("/logs", get(list_logs));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/api-docs/openapi.json", get(openapi_json))
        .nest("/api/sql", sql_routes)
        .with_state(state)
}

fn cors_layer(origins: &[HeaderValue]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    if origins.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(AllowOrigin::list(origins.iter().cloned()))
    }
}

pub(crate) struct AppState {
    pub(crate) auditor: QueryAuditor,
}

#[derive(Debug, Clone)]
struct AppConfig {
    listen_addr: SocketAddr,
    log_db_url: String,
    target_db_url: String,
    cors_origins: Vec<HeaderValue>,
}

impl AppConfig {
    fn from_env() -> Result<Self> {
        Self::from_vars(|key| env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let non_empty = |key: &str| var(key).filter(|value| !value.trim().is_empty());

        let listen_addr = non_empty("SQLPERF_API_ADDR")
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string())
            .parse()
            .context("invalid SQLPERF_API_ADDR")?;

        let log_db_url = non_empty("SQLPERF_LOG_DB_URL")
            .or_else(|| non_empty("DATABASE_URL"))
            .unwrap_or_else(|| DEFAULT_DB_URL.to_string());

        // User statements run against the log database unless told otherwise.
        let target_db_url =
            non_empty("SQLPERF_TARGET_DB_URL").unwrap_or_else(|| log_db_url.clone());

        let cors_origins = non_empty("SQLPERF_CORS_ORIGINS")
            .map(|raw| parse_origins(&raw))
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            listen_addr,
            log_db_url,
            target_db_url,
            cors_origins,
        })
    }
}

fn parse_origins(raw: &str) -> Result<Vec<HeaderValue>> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            HeaderValue::from_str(item)
                .with_context(|| format!("invalid origin '{item}' in SQLPERF_CORS_ORIGINS"))
        })
        .collect()
}

#[utoipa::path(
    get,
    path = "/healthz",
    responses((status = 200, description = "Service is healthy"))
)]
async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(docs::ApiDoc::openapi())
}

#[derive(Debug)]
pub(crate) struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub(crate) fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub(crate) fn internal<E: std::fmt::Display>(err: E) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!(status = %self.status, message = %self.message, "api error");
        let body = Json(ErrorBody {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub(crate) struct ErrorBody {
    error: String,
}

pub mod docs {
    use super::*;
    use crate::sql::{ExecuteBody, ExecuteResponse, QueryLogResponse};

    #[derive(OpenApi)]
    #[openapi(
        info(title = "SQL Performance Dashboard API", version = "0.1.0"),
        paths(healthz, crate::sql::execute_query, crate::sql::list_logs),
        components(schemas(ExecuteBody, ExecuteResponse, QueryLogResponse, ErrorBody))
    )]
    pub struct ApiDoc;
}
