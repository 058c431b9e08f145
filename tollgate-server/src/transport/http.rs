//! HTTP/JSON transport
//!
//! A gateway or resource server calls this sidecar before and after each
//! gated operation.
//!
//! # API Endpoints
//!
//! ## POST /admit
//!
//! Run the admission gates for an identity.
//!
//! ```json
//! { "identity": "HIP-1001", "actor_name": "City Clinic", "address": "10.0.0.7" }
//! ```
//!
//! `actor_name` and `address` are optional and only used for the audit event
//! published when the request is blocked.
//!
//! Responds 200 with `{"allowed": true, "reasons": []}`, 429 with the reasons
//! every failing gate gave, or 503 when the store is unavailable and the
//! server fails closed.
//!
//! ## DELETE /quota/{identity}
//!
//! Reset the session quota. Responds `{"reset": true}` if a counter existed.
//!
//! ## POST /events
//!
//! Publish an audit event. The body is an event with `category`,
//! `actor_identity` and the optional `actor_name`, `subject`, `name`, `email`
//! and `address`. Responds 202.
//!
//! ## POST /queues/{queue}
//!
//! Forward an arbitrary JSON record to a named queue. Responds 202, or 400
//! for the audit queue, which only takes events published through `/events`.
//!
//! ## GET /cache/{kind}/{identity}
//!
//! Responds 200 with `{"value": ..., "refresh_in_secs": 3540}` or 404 on a miss.
//!
//! ## PUT /cache/{kind}/{identity}
//!
//! Store the JSON body with the configured lifetime. Responds 204.
//!
//! ## GET /health
//!
//! Health check endpoint. Returns "OK" with 200 status.

use super::Transport;
use crate::services::Services;
use anyhow::Result;
use async_trait::async_trait;
use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tollgate::{AuditEvent, CacheKey, Decision, DenyReason, Error, EventCategory};

/// Admission request
#[derive(Debug, Serialize, Deserialize)]
pub struct HttpAdmitRequest {
    /// Identity whose counters are checked
    pub identity: String,
    /// Display name of the caller, for the blocked-request event
    #[serde(default)]
    pub actor_name: Option<String>,
    /// Network origin of the caller
    #[serde(default)]
    pub address: Option<String>,
}

/// Admission outcome
#[derive(Debug, Serialize, Deserialize)]
pub struct HttpAdmitResponse {
    pub allowed: bool,
    /// Every gate that refused the request, in evaluation order
    pub reasons: Vec<DenyReason>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HttpResetResponse {
    pub reset: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HttpCacheResponse {
    pub value: Value,
    /// Whole seconds until the entry expires; absent if it never does
    pub refresh_in_secs: Option<u64>,
}

/// Error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct HttpErrorResponse {
    /// Error message
    pub error: String,
}

type HttpResult<T> = std::result::Result<T, (StatusCode, Json<HttpErrorResponse>)>;

/// HTTP transport implementation
pub struct HttpTransport {
    addr: SocketAddr,
}

impl HttpTransport {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn start(self, services: Arc<Services>) -> Result<()> {
        let app = router(services);

        tracing::info!("HTTP server listening on {}", self.addr);

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}

/// All routes over the shared components
pub fn router(services: Arc<Services>) -> Router {
    Router::new()
        .route("/admit", post(handle_admit))
        .route("/quota/{identity}", delete(handle_reset_quota))
        .route("/events", post(handle_event))
        .route("/queues/{queue}", post(handle_forward))
        .route(
            "/cache/{kind}/{identity}",
            get(handle_cache_get).put(handle_cache_put),
        )
        .route("/health", get(|| async { "OK" }))
        .with_state(services)
}

fn failure(context: &str, e: Error) -> (StatusCode, Json<HttpErrorResponse>) {
    let status = match e {
        Error::ReservedQueue { .. } => StatusCode::BAD_REQUEST,
        Error::MalformedPayload { .. } | Error::Serialize(_) | Error::InvalidConfig(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        _ => StatusCode::SERVICE_UNAVAILABLE,
    };
    tracing::error!("{} failed: {}", context, e);
    (
        status,
        Json(HttpErrorResponse {
            error: format!("{context} failed: {e}"),
        }),
    )
}

async fn handle_admit(
    State(services): State<Arc<Services>>,
    Json(req): Json<HttpAdmitRequest>,
) -> (StatusCode, Json<HttpAdmitResponse>) {
    let decision = services
        .admission
        .admit_with_policy(&req.identity, services.failure_policy)
        .await;

    let status = match &decision {
        Decision::Allowed => StatusCode::OK,
        Decision::Denied(reasons) if reasons.contains(&DenyReason::StoreUnavailable) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        Decision::Denied(_) => {
            let mut event = AuditEvent::new(EventCategory::RequestBlocked, req.identity.as_str());
            if let Some(name) = &req.actor_name {
                event = event.actor_name(name.as_str()).name(name.as_str());
            }
            if let Some(address) = &req.address {
                event = event.address(address.as_str());
            }
            // A failed audit never lifts the block
            if let Err(e) = services.events.emit(&event).await {
                tracing::warn!(identity = %req.identity, error = %e, "blocked request not audited");
            }
            StatusCode::TOO_MANY_REQUESTS
        }
    };

    (
        status,
        Json(HttpAdmitResponse {
            allowed: decision.is_allowed(),
            reasons: decision.reasons().to_vec(),
        }),
    )
}

async fn handle_reset_quota(
    State(services): State<Arc<Services>>,
    Path(identity): Path<String>,
) -> HttpResult<Json<HttpResetResponse>> {
    let reset = services
        .admission
        .reset_session(&identity)
        .await
        .map_err(|e| failure("Quota reset", e))?;
    Ok(Json(HttpResetResponse { reset }))
}

async fn handle_event(
    State(services): State<Arc<Services>>,
    Json(event): Json<AuditEvent>,
) -> HttpResult<StatusCode> {
    services
        .events
        .emit(&event)
        .await
        .map_err(|e| failure("Event publish", e))?;
    Ok(StatusCode::ACCEPTED)
}

async fn handle_forward(
    State(services): State<Arc<Services>>,
    Path(queue): Path<String>,
    Json(record): Json<Value>,
) -> HttpResult<StatusCode> {
    services
        .events
        .forward(&queue, &record)
        .await
        .map_err(|e| failure("Record forward", e))?;
    Ok(StatusCode::ACCEPTED)
}

async fn handle_cache_get(
    State(services): State<Arc<Services>>,
    Path((kind, identity)): Path<(String, String)>,
) -> HttpResult<Json<HttpCacheResponse>> {
    let key = CacheKey::new(&kind, &identity);
    let entry = services
        .cache
        .get_cached::<Value>(&key)
        .await
        .map_err(|e| failure("Cache read", e))?;

    match entry {
        Some(entry) => Ok(Json(HttpCacheResponse {
            value: entry.value,
            refresh_in_secs: entry.ttl.map(|ttl| ttl.as_secs()),
        })),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(HttpErrorResponse {
                error: format!("No cached entry for {key}"),
            }),
        )),
    }
}

async fn handle_cache_put(
    State(services): State<Arc<Services>>,
    Path((kind, identity)): Path<(String, String)>,
    Json(value): Json<Value>,
) -> HttpResult<StatusCode> {
    services
        .cache
        .populate(&CacheKey::new(&kind, &identity), &value)
        .await
        .map_err(|e| failure("Cache populate", e))?;
    Ok(StatusCode::NO_CONTENT)
}
