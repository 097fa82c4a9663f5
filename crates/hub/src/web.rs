use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;
use serde_json::json;
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use crate::actuator::Actuator;
use crate::controller::{Controller, ControllerStatus, Master};
use crate::state::{SharedState, StatusResponse};

pub struct AppState<A> {
    pub shared: SharedState,
    pub controller: Arc<Controller<A>>,
}

impl<A> Clone for AppState<A> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            controller: Arc::clone(&self.controller),
        }
    }
}

#[derive(Serialize)]
struct StatusBody {
    hub: StatusResponse,
    controller: ControllerStatus,
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router<A: Actuator>(state: AppState<A>) -> Router {
    Router::new()
        .route("/api/status", get(api_status::<A>))
        .route("/api/master/on", post(master_on::<A>))
        .route("/api/master/off", post(master_off::<A>))
        .route("/api/zones/{zone_id}/on", post(zone_on::<A>))
        .route("/api/zones/{zone_id}/off", post(zone_off::<A>))
        .route("/api/zones/{zone_id}/stop", post(zone_stop::<A>))
        .with_state(state)
}

fn error_response(status: StatusCode, detail: String) -> Response {
    (status, Json(json!({ "error": detail }))).into_response()
}

async fn api_status<A: Actuator>(State(app): State<AppState<A>>) -> Json<StatusBody> {
    let controller = app.controller.status().await;
    let hub = app.shared.read().await.to_status();
    Json(StatusBody { hub, controller })
}

async fn master_on<A: Actuator>(State(app): State<AppState<A>>) -> Response {
    let outcome = app.controller.turn_on().await;
    Json(json!({ "master": Master::Running, "cycle": outcome })).into_response()
}

async fn master_off<A: Actuator>(State(app): State<AppState<A>>) -> Response {
    match app.controller.turn_off().await {
        Ok(()) => Json(json!({ "master": Master::Idle })).into_response(),
        Err(e) => error_response(StatusCode::BAD_GATEWAY, format!("{e:#}")),
    }
}

async fn zone_on<A: Actuator>(
    State(app): State<AppState<A>>,
    Path(zone_id): Path<String>,
) -> Response {
    manual(&app, &zone_id, true).await
}

async fn zone_off<A: Actuator>(
    State(app): State<AppState<A>>,
    Path(zone_id): Path<String>,
) -> Response {
    manual(&app, &zone_id, false).await
}

async fn zone_stop<A: Actuator>(
    State(app): State<AppState<A>>,
    Path(zone_id): Path<String>,
) -> Response {
    if !app.controller.has_zone(&zone_id) {
        return error_response(StatusCode::NOT_FOUND, format!("unknown zone '{zone_id}'"));
    }
    match app.controller.stop_zone(&zone_id).await {
        Ok(()) => Json(json!({ "zone_id": zone_id, "on": false })).into_response(),
        Err(e) => error_response(StatusCode::BAD_GATEWAY, format!("{e:#}")),
    }
}

async fn manual<A: Actuator>(app: &AppState<A>, zone_id: &str, on: bool) -> Response {
    if !app.controller.has_zone(zone_id) {
        return error_response(StatusCode::NOT_FOUND, format!("unknown zone '{zone_id}'"));
    }
    let result = if on {
        app.controller.manual_on(zone_id).await
    } else {
        app.controller.manual_off(zone_id).await
    };
    match result {
        Ok(()) => Json(json!({ "zone_id": zone_id, "on": on })).into_response(),
        Err(e) => error_response(StatusCode::BAD_GATEWAY, format!("{e:#}")),
    }
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve<A: Actuator>(state: AppState<A>) -> Result<()> {
    let port: u16 = env::var("WEB_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind web port {port}"))?;

    info!("web api listening on http://{addr}");

    axum::serve(listener, router(state))
        .await
        .context("web server error")
}

// ===========================================================================
// Tests
// ===========================================================================
