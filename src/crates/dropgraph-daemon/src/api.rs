//! The daemon's own supervisory REST surface: start, stop, and query the
//! three manager kinds it can run as child processes. Unlike the managers
//! themselves (whose REST façade is someone else's concern entirely), the
//! daemon has no other external interface, so this one is implemented here.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::DaemonError;
use crate::process::{ManagerKind, Supervisor};

pub fn create_router(supervisor: Arc<Supervisor>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/managers/:kind", post(start_manager).get(get_manager).delete(stop_manager))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(supervisor)
}

async fn health() -> &'static str {
    "ok"
}

fn parse_kind(raw: &str) -> Result<ManagerKind, Response> {
    ManagerKind::parse(raw).ok_or_else(|| (StatusCode::NOT_FOUND, format!("unknown manager kind '{raw}'")).into_response())
}

impl IntoResponse for DaemonError {
    fn into_response(self) -> Response {
        let status = match self {
            DaemonError::AlreadyRunning(_, _) => StatusCode::CONFLICT,
            DaemonError::NotRunning(_) => StatusCode::NOT_FOUND,
            DaemonError::SpawnFailed(_, _) | DaemonError::CorruptPidFile(_, _) | DaemonError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

async fn start_manager(State(supervisor): State<Arc<Supervisor>>, Path(kind): Path<String>) -> Response {
    let kind = match parse_kind(&kind) {
        Ok(k) => k,
        Err(r) => return r,
    };
    match supervisor.start(kind).await {
        Ok(pid) => (StatusCode::CREATED, Json(serde_json::json!({"kind": kind.as_str(), "pid": pid}))).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn get_manager(State(supervisor): State<Arc<Supervisor>>, Path(kind): Path<String>) -> Response {
    let kind = match parse_kind(&kind) {
        Ok(k) => k,
        Err(r) => return r,
    };
    match supervisor.status(kind) {
        Ok(status) if status.running => Json(status).into_response(),
        Ok(_) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => e.into_response(),
    }
}

async fn stop_manager(State(supervisor): State<Arc<Supervisor>>, Path(kind): Path<String>) -> Response {
    let kind = match parse_kind(&kind) {
        Ok(k) => k,
        Err(r) => return r,
    };
    match supervisor.stop(kind).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}
