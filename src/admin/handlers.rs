use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::admin::AdminState;
use crate::cache::CacheStats;
use crate::crypto::CipherKey;
use crate::error::RegistryError;
use crate::load_balancer::UpstreamTarget;
use crate::net::dialer::TransportKind;
use crate::proxy::ListenerInfo;
use crate::registry::ConnectionInfo;
use crate::resilience::retry_with_backoff;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub connections: usize,
    pub admission_running: usize,
    pub admission_queued: usize,
    pub admission_max: usize,
    pub upstream_targets: Vec<UpstreamTarget>,
    pub listeners: usize,
    pub proxy_connections: u64,
    pub cache: CacheStats,
}

/// Body of `POST /admin/connections`. Without `host`/`port` the target
/// comes from the load balancer.
#[derive(Debug, Deserialize)]
pub struct OpenRequest {
    pub name: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    #[serde(default)]
    pub transport: TransportKind,
    pub timeout_ms: Option<u64>,
    /// Retry transient failures with the configured policy.
    #[serde(default)]
    pub retry: bool,
}

/// How `data` in a send request is encoded.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadEncoding {
    #[default]
    Utf8,
    Hex,
}

/// Body of `POST /admin/connections/{name}/send`.
#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub data: String,
    #[serde(default)]
    pub encoding: PayloadEncoding,
    /// Encrypt with the configured cipher key.
    #[serde(default)]
    pub encrypt: bool,
}

/// Body of `POST /admin/connections/{name}/receive`.
#[derive(Debug, Default, Deserialize)]
pub struct ReceiveRequest {
    /// Decrypt with the configured cipher key.
    #[serde(default)]
    pub encrypt: bool,
}

#[derive(Debug, Serialize)]
pub struct SendResponse {
    pub bytes_written: usize,
}

/// Received payload; `closed` is set when the connection ended instead.
#[derive(Debug, Serialize)]
pub struct ReceiveResponse {
    pub closed: bool,
    pub bytes: usize,
    pub hex: Option<String>,
    pub text: Option<String>,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Admin failures as HTTP responses.
pub enum ApiError {
    Registry(RegistryError),
    BadRequest(String),
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        Self::Registry(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = match self {
            ApiError::Registry(err) => err,
            ApiError::BadRequest(message) => {
                return (StatusCode::BAD_REQUEST, Json(ErrorBody { error: message })).into_response();
            }
        };
        let status = match &err {
            RegistryError::DuplicateName(_) | RegistryError::InvalidState { .. } => StatusCode::CONFLICT,
            RegistryError::UnknownConnection(_) => StatusCode::NOT_FOUND,
            RegistryError::NoTargets => StatusCode::SERVICE_UNAVAILABLE,
            RegistryError::ConnectTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            RegistryError::Transport { .. } => StatusCode::BAD_GATEWAY,
            RegistryError::Decryption { .. } | RegistryError::Encryption { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
        };
        (status, Json(ErrorBody { error: err.to_string() })).into_response()
    }
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let admission = state.registry.admission();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        connections: state.registry.len(),
        admission_running: admission.running(),
        admission_queued: admission.queued(),
        admission_max: admission.max(),
        upstream_targets: state.registry.balancer().targets(),
        listeners: state.proxy.active_listeners().len(),
        proxy_connections: state.proxy.active_connections(),
        cache: state.proxy.cache().stats(),
    })
}

pub async fn list_connections(State(state): State<AdminState>) -> Json<Vec<ConnectionInfo>> {
    Json(state.registry.snapshot())
}

pub async fn open_connection(
    State(state): State<AdminState>,
    Json(request): Json<OpenRequest>,
) -> Result<(StatusCode, Json<ConnectionInfo>), ApiError> {
    let timeout = request.timeout_ms.map(Duration::from_millis);
    let target = match (request.host, request.port) {
        (Some(host), Some(port)) => Some(UpstreamTarget::new(host, port)),
        _ => None,
    };
    let policy = if request.retry {
        state.retry
    } else {
        crate::resilience::RetryPolicy::once()
    };

    let registry = &state.registry;
    let name = request.name.as_str();
    let transport = request.transport;
    let info = retry_with_backoff(
        &policy,
        |_| {
            let target = target.clone();
            async move {
                match target {
                    Some(target) => registry.open(name, target, transport, timeout).await,
                    None => registry.open_load_balanced(name, transport, timeout).await,
                }
            }
        },
        RegistryError::is_retryable,
    )
    .await?;

    Ok((StatusCode::CREATED, Json(info)))
}

pub async fn close_connection(
    State(state): State<AdminState>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.registry.close(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn cipher_key(state: &AdminState, encrypt: bool) -> Result<Option<&CipherKey>, ApiError> {
    if !encrypt {
        return Ok(None);
    }
    state
        .cipher_key
        .as_deref()
        .map(Some)
        .ok_or_else(|| ApiError::BadRequest("no cipher key configured (cipher.key_hex)".into()))
}

pub async fn send_payload(
    State(state): State<AdminState>,
    Path(name): Path<String>,
    Json(request): Json<SendRequest>,
) -> Result<Json<SendResponse>, ApiError> {
    let payload = match request.encoding {
        PayloadEncoding::Utf8 => request.data.into_bytes(),
        PayloadEncoding::Hex => {
            hex::decode(request.data.trim()).map_err(|e| ApiError::BadRequest(format!("invalid hex payload: {e}")))?
        }
    };
    let key = cipher_key(&state, request.encrypt)?;
    let bytes_written = state.registry.send(&name, &payload, key).await?;
    Ok(Json(SendResponse { bytes_written }))
}

/// Waits for the next payload. Bounded by the admin request timeout; an
/// encrypted receive cut short mid-frame leaves the stream out of sync.
pub async fn receive_payload(
    State(state): State<AdminState>,
    Path(name): Path<String>,
    request: Option<Json<ReceiveRequest>>,
) -> Result<Json<ReceiveResponse>, ApiError> {
    let Json(request) = request.unwrap_or_default();
    let key = cipher_key(&state, request.encrypt)?;
    let response = match state.registry.receive(&name, key).await? {
        Some(payload) => ReceiveResponse {
            closed: false,
            bytes: payload.len(),
            hex: Some(hex::encode(&payload)),
            text: std::str::from_utf8(&payload).ok().map(str::to_string),
        },
        None => ReceiveResponse {
            closed: true,
            bytes: 0,
            hex: None,
            text: None,
        },
    };
    Ok(Json(response))
}

pub async fn list_listeners(State(state): State<AdminState>) -> Json<Vec<ListenerInfo>> {
    Json(state.proxy.active_listeners())
}

pub async fn get_cache(State(state): State<AdminState>) -> Json<CacheStats> {
    Json(state.proxy.cache().stats())
}

pub async fn flush_cache(State(state): State<AdminState>) -> Json<serde_json::Value> {
    let flushed = state.proxy.cache().flush();
    tracing::info!(flushed, "Response cache flushed");
    Json(serde_json::json!({ "flushed": flushed }))
}
