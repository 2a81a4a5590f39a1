//! HTTP surface: heartbeat intake, status, and the beacon script.
//!
//! All routes live under the configured mount prefix. The heartbeat body is
//! optional and parsed leniently; a missing or malformed body is a plain
//! genuine heartbeat.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, header};
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::watch;

use standin_agent::Agent;
use standin_core::identity::{SELF_ORIGIN_HEADER, classify_origin};

use crate::beacon::render_script;
use crate::controller::{StatusSnapshot, TransitionController};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub success: bool,
    /// Whether the stand-in currently holds the session.
    pub ghosting: bool,
}

#[derive(Debug, Default, Deserialize)]
struct HeartbeatBody {
    #[serde(default)]
    origin: Option<String>,
}

pub struct AppState<A: Agent> {
    controller: Arc<TransitionController<A>>,
    beacon_script: String,
    holding_page: String,
}

impl<A: Agent> AppState<A> {
    pub fn new(controller: Arc<TransitionController<A>>, mount: &str, beacon_interval_ms: u64) -> Self {
        Self {
            controller,
            beacon_script: render_script(&format!("{mount}/heartbeat"), beacon_interval_ms),
            holding_page: holding_page(mount),
        }
    }
}

/// Build the router with every route under `mount` (already normalized).
pub fn router<A: Agent>(state: AppState<A>, mount: &str) -> Router {
    let index = if mount.is_empty() { "/" } else { mount };
    Router::new()
        .route(&format!("{mount}/heartbeat"), post(heartbeat::<A>))
        .route(&format!("{mount}/status"), get(status::<A>))
        .route(&format!("{mount}/beacon.js"), get(beacon_js::<A>))
        .route(index, get(index_page::<A>))
        .with_state(Arc::new(state))
}

/// Serve until `shutdown` flips to `true`.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|&stop| stop).await;
        })
        .await
}

async fn heartbeat<A: Agent>(
    State(state): State<Arc<AppState<A>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Json<HeartbeatResponse> {
    let parsed: HeartbeatBody = if body.is_empty() {
        HeartbeatBody::default()
    } else {
        serde_json::from_slice(&body).unwrap_or_default()
    };
    let origin = classify_origin(
        headers.contains_key(SELF_ORIGIN_HEADER),
        parsed.origin.as_deref(),
    );
    state.controller.record_signal(origin);
    Json(HeartbeatResponse {
        success: true,
        ghosting: state.controller.is_ghosting(),
    })
}

async fn status<A: Agent>(State(state): State<Arc<AppState<A>>>) -> Json<StatusSnapshot> {
    Json(state.controller.status())
}

async fn beacon_js<A: Agent>(State(state): State<Arc<AppState<A>>>) -> impl IntoResponse {
    (
        [
            (header::CONTENT_TYPE, "text/javascript; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        state.beacon_script.clone(),
    )
}

async fn index_page<A: Agent>(State(state): State<Arc<AppState<A>>>) -> Html<String> {
    Html(state.holding_page.clone())
}

/// Minimal page that loads the beacon; lets the service itself be the
/// agent's target.
fn holding_page(mount: &str) -> String {
    format!(
        "<!doctype html>\n<html><head><meta charset=\"utf-8\"><title>standin</title>\
         <script src=\"{mount}/beacon.js\"></script></head>\
         <body><p>Session held.</p></body></html>\n"
    )
}
