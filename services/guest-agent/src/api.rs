//! HTTP surface for the control plane

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{any, get, post},
    Router,
};
use guest_core::{endpoints, InstallRequest, ResizeRequest, StopRequest};
use guest_lifecycle::{Capability, GuestError, LifecycleManager};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, info_span, instrument, warn, Instrument};
use uuid::Uuid;

#[derive(Clone)]
pub struct AgentState {
    manager: Arc<LifecycleManager>,
    preparing: Arc<AtomicBool>,
}

impl AgentState {
    pub fn new(manager: Arc<LifecycleManager>) -> Self {
        Self {
            manager,
            preparing: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl std::fmt::Debug for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentState")
            .field("manager", &self.manager)
            .field("preparing", &self.preparing.load(Ordering::SeqCst))
            .finish()
    }
}

/// A [`GuestError`] rendered as a JSON error response.
#[derive(Debug)]
pub struct ApiError(GuestError);

impl From<GuestError> for ApiError {
    fn from(err: GuestError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            GuestError::Execution(_) => StatusCode::BAD_GATEWAY,
            GuestError::Persistence { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GuestError::Unsupported { .. } => StatusCode::NOT_IMPLEMENTED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() && status != StatusCode::NOT_IMPLEMENTED {
            warn!(error = %self.0, "Request failed");
        }
        let body = json!({
            "error": self.0.to_string(),
            "retryable": self.0.is_retryable(),
        });
        (status, Json(body)).into_response()
    }
}

type ApiResult = Result<Json<Value>, ApiError>;

pub fn router(state: AgentState) -> Router {
    let mut app = Router::new()
        .route(endpoints::HEALTH, get(health_check))
        .route(endpoints::API_V1_STATUS, get(status))
        .route(endpoints::API_V1_STATUS_UPDATE, post(update_status))
        .route(endpoints::API_V1_STATUS_FAIL, post(fail_install))
        .route(endpoints::API_V1_PREPARE, post(prepare))
        .route(endpoints::API_V1_RESTART, post(restart))
        .route(endpoints::API_V1_STOP, post(stop))
        .route(endpoints::API_V1_RESIZE, post(resize))
        .route(endpoints::API_V1_FILESYSTEM, get(filesystem_stats))
        .route(endpoints::API_V1_CAPABILITIES, get(capabilities));

    // Operations of capabilities the engine lacks answer 501.
    let gated = [
        (endpoints::API_V1_USERS, Capability::UserManagement),
        (endpoints::API_V1_DATABASES, Capability::DatabaseManagement),
        (endpoints::API_V1_ROOT, Capability::RootAccess),
    ];
    for (path, capability) in gated {
        if !state.manager.capabilities().supports(capability) {
            app = app.route(
                path,
                any(move || async move { ApiError(GuestError::Unsupported { capability }) }),
            );
        }
    }

    app.with_state(state)
}

#[instrument]
async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "guest-agent",
        "version": guest_core::VERSION
    }))
}

#[instrument(skip(state))]
async fn status(State(state): State<AgentState>) -> Json<Value> {
    let tracker = state.manager.tracker();
    Json(json!({
        "instance_id": tracker.instance_id(),
        "status": tracker.status(),
        "installed": tracker.is_installed(),
        "preparing": state.preparing.load(Ordering::SeqCst),
    }))
}

#[instrument(skip(state))]
async fn update_status(State(state): State<AgentState>) -> ApiResult {
    let reconciled = state.manager.update_status().await?;
    Ok(Json(json!({
        "reconciled": reconciled.is_some(),
        "status": state.manager.tracker().status(),
    })))
}

#[instrument(skip(state))]
async fn fail_install(State(state): State<AgentState>) -> ApiResult {
    state.manager.report_install_failure().await?;
    Ok(Json(json!({ "status": state.manager.tracker().status() })))
}

/// Clears the in-flight prepare flag when dropped, panics included.
struct PrepareGuard(Arc<AtomicBool>);

impl PrepareGuard {
    /// `None` while another prepare holds the flag.
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        if flag.swap(true, Ordering::SeqCst) {
            None
        } else {
            Some(Self(Arc::clone(flag)))
        }
    }
}

impl Drop for PrepareGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Starts the install in the background; progress shows in the status.
#[instrument(skip(state, request), fields(memory_mb = request.memory_mb))]
async fn prepare(
    State(state): State<AgentState>,
    Json(request): Json<InstallRequest>,
) -> Response {
    let Some(guard) = PrepareGuard::acquire(&state.preparing) else {
        return (
            StatusCode::CONFLICT,
            Json(json!({ "error": "prepare already in progress" })),
        )
            .into_response();
    };

    let operation_id = Uuid::new_v4();
    info!(%operation_id, ?request, "Prepare accepted");

    let manager = Arc::clone(&state.manager);
    tokio::spawn(
        async move {
            let _guard = guard;
            match manager.prepare(&request).await {
                Ok(status) => info!(%status, "Prepare finished"),
                Err(e) => error!(error = %e, "Prepare failed, status left as building"),
            }
        }
        .instrument(info_span!("prepare_task", %operation_id)),
    );

    (
        StatusCode::ACCEPTED,
        Json(json!({ "operation_id": operation_id })),
    )
        .into_response()
}

#[instrument(skip(state))]
async fn restart(State(state): State<AgentState>) -> ApiResult {
    state.manager.restart().await?;
    Ok(Json(json!({ "restarted": true })))
}

#[instrument(skip(state))]
async fn stop(State(state): State<AgentState>, Json(request): Json<StopRequest>) -> ApiResult {
    state.manager.stop(request.prevent_autostart).await?;
    Ok(Json(json!({
        "stopped": true,
        "prevent_autostart": request.prevent_autostart,
    })))
}

#[instrument(skip(state))]
async fn resize(State(state): State<AgentState>, Json(request): Json<ResizeRequest>) -> ApiResult {
    state
        .manager
        .apply_configuration_and_restart(request.memory_mb)
        .await?;
    Ok(Json(json!({ "memory_mb": request.memory_mb })))
}

#[derive(Debug, Deserialize)]
struct FilesystemQuery {
    path: Option<PathBuf>,
}

#[instrument(skip(state))]
async fn filesystem_stats(
    State(state): State<AgentState>,
    Query(query): Query<FilesystemQuery>,
) -> ApiResult {
    let path = query
        .path
        .unwrap_or_else(|| state.manager.profile().data_dir.clone());
    let stats = state.manager.get_filesystem_stats(&path).await?;
    Ok(Json(json!({ "path": path, "stats": stats })))
}

#[instrument(skip(state))]
async fn capabilities(State(state): State<AgentState>) -> Json<Value> {
    let supported: Vec<Capability> = state.manager.capabilities().iter().collect();
    Json(json!({ "supported": supported }))
}
