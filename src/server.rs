//! HTTP surface for `createAlarm`.
//!
//! Built on Axum. Each request runs a fresh extraction bound to its own
//! cancellation token, which is cancelled when the client goes away.

use crate::config::ServerConfig;
use crate::record::Readout;
use crate::service::AlarmService;
use crate::CalarmError;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Router state.
pub type SharedService = Arc<AlarmService>;

/// Body of `POST /create_alarm`.
#[derive(Debug, Deserialize)]
pub struct CreateAlarmRequest {
    /// Free-form event description.
    pub input: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Error body returned for every non-201 outcome of `/create_alarm`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    /// HTTP status this error is answered with.
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<CalarmError> for ApiError {
    fn from(err: CalarmError) -> Self {
        let status = match &err {
            CalarmError::InvalidInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
            CalarmError::GeneratorUnavailable(_) => StatusCode::BAD_GATEWAY,
            CalarmError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

/// Any unusable request body (bad syntax, wrong shape, wrong content type)
/// is answered with 422 like blank input.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            message: rejection.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

/// Build the router with tracing and CORS applied.
pub fn build_router(service: SharedService, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/create_alarm", post(create_alarm_handler))
        .layer(cors_layer(allowed_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    if allowed_origins.iter().any(|o| o == "*") {
        return cors.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    cors.allow_origin(AllowOrigin::list(origins))
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn create_alarm_handler(
    State(service): State<SharedService>,
    body: Result<Json<CreateAlarmRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Readout>), ApiError> {
    let Json(request) = body?;

    // Dropping the handler future (client disconnect) cancels the extraction.
    let token = CancellationToken::new();
    let _guard = token.clone().drop_guard();

    match service.create_alarm(&request.input, token).await {
        Ok(readout) => Ok((StatusCode::CREATED, Json(readout))),
        Err(err) => {
            let api = ApiError::from(err);
            if api.status.is_server_error() {
                error!(status = api.status.as_u16(), error = %api.message, "create_alarm failed");
            }
            Err(api)
        }
    }
}

/// Bind `host:port` and serve until the process is stopped.
pub async fn serve(service: AlarmService, config: &ServerConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let app = build_router(Arc::new(service), &config.allowed_origins);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "calarm listening");
    axum::serve(listener, app).await?;

    Ok(())
}
