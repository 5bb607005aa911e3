//! HTTP and WebSocket surface.
//!
//! One WebSocket per owner connection streams job lifecycle events; REST
//! endpoints cover submission, listing, cancellation, and intent routing.
//! A connection starts with a full job snapshot and gets a fresh one
//! whenever it lags the broadcast channel, so a dropped event is never a
//! lost update.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, JobError};
use crate::jobs::model::TaskType;
use crate::jobs::submission::SubmissionApi;
use crate::memory::MemoryManager;
use crate::notify::hub::NotificationHub;
use crate::router::IntentRouter;
use crate::store::{JobSnapshot, Store};

/// Jobs included in a connection snapshot.
const SNAPSHOT_LIMIT: usize = 50;

/// Shared state behind every handler.
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub hub: Arc<NotificationHub>,
    pub submission: Arc<SubmissionApi>,
    pub router: Arc<IntentRouter>,
    pub memory: Arc<MemoryManager>,
}

/// Build the full route table.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws/{owner}", get(ws_upgrade))
        .route("/api/owners/{owner}/jobs", get(list_jobs).post(submit_job))
        .route("/api/owners/{owner}/jobs/{id}", get(get_job))
        .route("/api/owners/{owner}/jobs/{id}/cancel", post(cancel_job))
        .route("/api/owners/{owner}/intents", post(route_intent))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

// ── WebSocket ───────────────────────────────────────────────────────

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Path(owner): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, owner, state))
}

async fn serve_socket(mut socket: WebSocket, owner: String, state: Arc<AppState>) {
    info!(owner_id = %owner, "WebSocket connected");
    let mut events = state.hub.subscribe(&owner).await;

    if send_snapshot(&mut socket, &owner, &state).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    let Ok(text) = serde_json::to_string(&event) else { continue };
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    // Missed events are reconciled with a fresh snapshot.
                    warn!(owner_id = %owner, missed, "Connection lagged, resyncing");
                    if send_snapshot(&mut socket, &owner, &state).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Ping(payload))) => {
                    if socket.send(Message::Pong(payload)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(owner_id = %owner, error = %e, "WebSocket receive error");
                    break;
                }
            },
        }
    }

    info!(owner_id = %owner, "WebSocket disconnected");
}

async fn send_snapshot(
    socket: &mut WebSocket,
    owner: &str,
    state: &AppState,
) -> Result<(), axum::Error> {
    let jobs = match state.store.list_jobs_for_owner(owner, SNAPSHOT_LIMIT).await {
        Ok(jobs) => jobs,
        Err(e) => {
            warn!(owner_id = %owner, error = %e, "Snapshot query failed");
            Vec::new()
        }
    };
    let snapshots: Vec<JobSnapshot> = jobs.iter().map(JobSnapshot::from).collect();
    let payload = json!({"event": "snapshot", "jobs": snapshots});
    socket
        .send(Message::Text(payload.to_string().into()))
        .await
}

// ── REST ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ListQuery {
    #[serde(default = "default_list_limit")]
    limit: usize,
}

fn default_list_limit() -> usize {
    SNAPSHOT_LIMIT
}

async fn list_jobs(
    Path(owner): Path<String>,
    Query(query): Query<ListQuery>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let jobs = state
        .store
        .list_jobs_for_owner(&owner, query.limit.min(500))
        .await
        .map_err(Error::from)?;
    let snapshots: Vec<JobSnapshot> = jobs.iter().map(JobSnapshot::from).collect();
    Ok(Json(json!({"jobs": snapshots})))
}

async fn get_job(
    Path((owner, id)): Path<(String, Uuid)>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let job = state
        .store
        .get_job_for_owner(&owner, id)
        .await
        .map_err(Error::from)?
        .ok_or(Error::Job(JobError::NotFound { id }))?;
    Ok(Json(json!({"job": job})))
}

#[derive(Deserialize)]
struct SubmitRequest {
    task_type: String,
    #[serde(default)]
    params: serde_json::Value,
    priority: Option<u8>,
}

async fn submit_job(
    Path(owner): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(request): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let task_type = TaskType::parse(&request.task_type)
        .ok_or_else(|| Error::Job(JobError::UnknownTaskType(request.task_type.clone())))?;
    let job = state
        .submission
        .submit(&owner, task_type, request.params, request.priority)
        .await?;
    Ok((StatusCode::CREATED, Json(json!({"job": job}))))
}

async fn cancel_job(
    Path((owner, id)): Path<(String, Uuid)>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let job = state.submission.cancel(&owner, id).await?;
    Ok(Json(json!({"job": job})))
}

#[derive(Deserialize)]
struct IntentRequest {
    utterance: String,
    #[serde(default = "default_agent")]
    agent_id: String,
    session_id: Option<Uuid>,
}

fn default_agent() -> String {
    "assistant".into()
}

/// Route an utterance. Worker-bound intents are submitted as jobs in the
/// same call; the response carries both the intent and, when one was
/// created, the job.
async fn route_intent(
    Path(owner): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(request): Json<IntentRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if let Err(e) = state
        .memory
        .append_message(
            &owner,
            &request.agent_id,
            crate::memory::MessageRole::User,
            crate::memory::MessageKind::Chat,
            &request.utterance,
        )
        .await
    {
        warn!(owner_id = %owner, error = %e, "Could not record utterance");
    }

    let intent = state
        .router
        .route(&owner, &request.agent_id, &request.utterance, request.session_id)
        .await;

    if !intent.requires_worker {
        return Ok(Json(json!({"intent": intent, "job": null})));
    }

    match state
        .submission
        .submit(&owner, intent.task_type, intent.parameters.clone(), None)
        .await
    {
        Ok(job) => Ok(Json(json!({"intent": intent, "job": job}))),
        Err(e) => {
            // Routed but not runnable as-is (e.g. parameters incomplete);
            // hand the intent back with the reason instead of failing.
            debug!(owner_id = %owner, error = %e, "Routed intent not submittable");
            Ok(Json(json!({"intent": intent, "job": null, "detail": e.to_string()})))
        }
    }
}

// ── Error mapping ───────────────────────────────────────────────────

/// Wrapper mapping domain errors onto HTTP statuses.
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::Job(JobError::NotFound { .. }) => StatusCode::NOT_FOUND,
            Error::Job(JobError::NotCancellable { .. }) => StatusCode::CONFLICT,
            Error::Job(_) => StatusCode::BAD_REQUEST,
            Error::Memory(crate::error::MemoryError::SessionNotFound { .. }) => {
                StatusCode::NOT_FOUND
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            warn!(error = %self.0, "Request failed");
        }
        (status, Json(json!({"error": self.0.to_string()}))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_statuses() {
        let not_found = ApiError(Error::Job(JobError::NotFound { id: Uuid::nil() }));
        assert_eq!(not_found.into_response().status(), StatusCode::NOT_FOUND);

        let invalid = ApiError(Error::Job(JobError::InvalidPayload {
            task_type: "lead_generation".into(),
            reason: "missing field".into(),
        }));
        assert_eq!(invalid.into_response().status(), StatusCode::BAD_REQUEST);

        let conflict = ApiError(Error::Job(JobError::NotCancellable {
            id: Uuid::nil(),
            state: "completed".into(),
        }));
        assert_eq!(conflict.into_response().status(), StatusCode::CONFLICT);
    }
}
