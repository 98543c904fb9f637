//! Main axum router and HTTP request handlers for the metrics gateway.
//!
//! Routes:
//! - `POST /metrics`                          - Ingest a metric batch
//! - `POST /instances/{instance_id}/metrics`  - Ingest into a hosted instance
//! - `GET  /healthz`                          - Health check
//! - `GET  /metrics`                          - Prometheus metrics

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use tracing::{error, instrument, warn};

use crate::auth::extractor::extract_credential;
use crate::auth::{AuthError, Identity};
use crate::publish::MetricData;
use crate::AppState;

/// Org-impersonation header. Honored only for the static admin identity.
pub const ORG_OVERRIDE_HEADER: &str = "X-Org-Id";

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the axum [`Router`] with all HTTP routes and shared state.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Ingest endpoints; GET /metrics is the Prometheus exposition.
        .route("/metrics", post(handle_ingest).get(handle_metrics))
        .route(
            "/instances/{instance_id}/metrics",
            post(handle_instance_ingest),
        )
        .route("/healthz", get(handle_health))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `POST /metrics`
///
/// Authenticates the caller, stamps every sample in the batch with the
/// caller's org, and forwards the batch to the publisher.
#[instrument(skip(state, headers, body))]
async fn handle_ingest(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let identity = authenticate_request(&state, &headers).await?;
    let batch = parse_batch(&body)?;
    publish_for_org(&state, &identity, batch).await
}

/// `POST /instances/{instance_id}/metrics`
///
/// Same as [`handle_ingest`], with an additional check that the target
/// hosted-metrics instance belongs to the caller's org.
#[instrument(skip(state, headers, body), fields(%instance_id))]
async fn handle_instance_ingest(
    State(state): State<Arc<AppState>>,
    Path(instance_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let identity = authenticate_request(&state, &headers).await?;
    state.gateway.check_instance(&identity, &instance_id).await?;
    let batch = parse_batch(&body)?;
    publish_for_org(&state, &identity, batch).await
}

/// `GET /healthz`
async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health_state = crate::health::HealthState {
        config: Arc::clone(&state.config),
        http_client: state.http_client.clone(),
    };
    crate::health::health_handler(axum::extract::State(health_state)).await
}

/// `GET /metrics`
///
/// Returns Prometheus metrics collected by the gateway.
async fn handle_metrics(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let mut buf = String::new();
    prometheus_client::encoding::text::encode(&mut buf, &state.metrics.registry)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("metrics encoding failed: {e}")))?;

    Ok((
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        buf,
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Resolve the request's credential to an identity, then apply the
/// org-override header if present.
async fn authenticate_request(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<Identity, AppError> {
    let credential = extract_credential(headers)?;
    let mut identity = state.gateway.authenticate(&credential).await?;

    if let Some(org_id) = org_override(headers, &identity)? {
        identity.org_id = org_id;
    }
    Ok(identity)
}

/// Parse the org-override header.
///
/// Only the admin identity may impersonate; anyone else presenting the
/// header is rejected outright rather than silently ignored. The override
/// changes the effective org for this request only and never touches the
/// cache.
fn org_override(headers: &HeaderMap, identity: &Identity) -> Result<Option<i64>, AppError> {
    let Some(value) = headers.get(ORG_OVERRIDE_HEADER) else {
        return Ok(None);
    };
    if !identity.is_admin {
        warn!(org_id = identity.org_id, "non-admin attempted org override");
        return Err(AppError::Unauthorized(
            "org override requires the admin key".to_string(),
        ));
    }
    let org_id = value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<i64>().ok())
        .filter(|id| *id != 0)
        .ok_or_else(|| AppError::Unauthorized(format!("invalid {ORG_OVERRIDE_HEADER} header")))?;
    Ok(Some(org_id))
}

fn parse_batch(body: &[u8]) -> Result<Vec<MetricData>, AppError> {
    serde_json::from_slice(body)
        .map_err(|e| AppError::BadRequest(format!("invalid metric payload: {e}")))
}

/// Stamp the batch with the caller's org and hand it to the publisher.
/// Whatever org the agent claimed in the payload is discarded.
async fn publish_for_org(
    state: &AppState,
    identity: &Identity,
    mut batch: Vec<MetricData>,
) -> Result<Response, AppError> {
    for sample in &mut batch {
        sample.org_id = identity.org_id;
    }

    state
        .metrics
        .metrics
        .samples_received
        .inc_by(batch.len() as u64);
    state
        .publisher
        .publish(&batch)
        .await
        .map_err(AppError::Internal)?;

    Ok((StatusCode::OK, "ok").into_response())
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Application-level error type that maps cleanly to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// The caller is not authenticated or not authorised.
    Unauthorized(String),
    /// The request payload could not be parsed.
    BadRequest(String),
    /// The authority is unreachable and no cached trust exists.
    AuthorityUnavailable,
    /// An unexpected internal error.
    Internal(anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Unauthorized(msg) => (
                StatusCode::UNAUTHORIZED,
                [(header::WWW_AUTHENTICATE, "Basic realm=\"metricsgw\"")],
                msg,
            )
                .into_response(),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            AppError::AuthorityUnavailable => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "authority unavailable".to_string(),
            )
                .into_response(),
            AppError::Internal(err) => {
                error!(error = %err, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
                    .into_response()
            }
        }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Unauthorized | AuthError::InvalidOrgId | AuthError::InvalidInstanceId => {
                AppError::Unauthorized(err.to_string())
            }
            AuthError::AuthorityUnavailable => AppError::AuthorityUnavailable,
            AuthError::Internal(e) => AppError::Internal(e),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err)
    }
}
