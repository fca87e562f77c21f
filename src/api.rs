// src/api.rs
// Admin surface consumed by the external dashboard: subscription management,
// manual runs, and last-run summaries. Rendering lives elsewhere; this is
// JSON only.

use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::config::WatchEntity;
use crate::pipeline::RunSummary;
use crate::scheduler::{Scheduler, Subscription, Trigger};

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Scheduler,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/subscriptions", get(list_subscriptions))
        .route("/subscriptions", post(subscribe))
        .route("/subscriptions/{key}", axum::routing::delete(unsubscribe))
        .route("/subscriptions/{key}/run", post(run_now))
        .route("/subscriptions/{key}/last-run", get(last_run))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

async fn list_subscriptions(State(state): State<AppState>) -> Json<Vec<Subscription>> {
    Json(state.scheduler.list_subscriptions())
}

#[derive(serde::Deserialize)]
struct SubscribeReq {
    #[serde(flatten)]
    entity: WatchEntity,
}

async fn subscribe(
    State(state): State<AppState>,
    Json(body): Json<SubscribeReq>,
) -> (StatusCode, Json<Vec<Subscription>>) {
    let interval = Duration::from_secs(body.entity.interval_secs.max(1));
    state.scheduler.subscribe(body.entity, interval);
    (StatusCode::CREATED, Json(state.scheduler.list_subscriptions()))
}

async fn unsubscribe(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    state
        .scheduler
        .unsubscribe(&key)
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(|e| (StatusCode::NOT_FOUND, e.to_string()))
}

#[derive(serde::Serialize)]
struct RunNowResp {
    trigger: Trigger,
}

async fn run_now(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<RunNowResp>, (StatusCode, String)> {
    state
        .scheduler
        .run_now(&key)
        .map(|trigger| Json(RunNowResp { trigger }))
        .map_err(|e| (StatusCode::NOT_FOUND, e.to_string()))
}

async fn last_run(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Json<Option<RunSummary>> {
    Json(state.scheduler.last_summary(&key))
}
