//! API route definitions.

use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use super::error::ApiError;
use super::state::AppState;
use crate::alert::AlertFilter;
use crate::ingest::Sample;

type ApiResult<T> = Result<T, ApiError>;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/ingest", post(ingest))
        .route("/analyze", post(analyze))
        .route("/baseline", get(baseline))
        .route("/window", get(window))
        .route("/slots/reset", post(reset_slot))
        .route("/alerts", get(list_alerts))
        .route("/alerts/{id}", get(get_alert))
        .route("/alerts/{id}/ack", post(ack_alert))
        .route("/subscriptions", get(list_subscriptions).post(create_subscription))
        .route("/subscriptions/{id}", axum::routing::delete(delete_subscription))
        .route("/subscriptions/{id}/poll", get(poll_subscription))
        .route("/subscriptions/{id}/ack", post(ack_subscription))
}

fn meta() -> Value {
    json!({
        "timestamp": Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    })
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let stats = state.engine.stats().await;
    Json(json!({
        "data": {
            "status": "ok",
            "service": "pulsewatch",
            "version": env!("CARGO_PKG_VERSION"),
            "engine": stats
        },
        "meta": meta()
    }))
}

#[derive(Debug, Deserialize)]
struct IngestRequest {
    source_key: String,
    metric_name: String,
    value: f64,
    /// Defaults to the time the request is handled.
    timestamp: Option<DateTime<Utc>>,
}

impl IngestRequest {
    fn into_sample(self, now: DateTime<Utc>) -> Sample {
        Sample::new(
            self.source_key,
            self.metric_name,
            self.value,
            self.timestamp.unwrap_or(now),
        )
    }
}

async fn ingest(
    State(state): State<AppState>,
    Json(req): Json<IngestRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let outcome = state.engine.ingest(req.into_sample(Utc::now())).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "data": outcome, "meta": meta() })),
    ))
}

#[derive(Debug, Deserialize)]
struct AnalyzeRequest {
    samples: Vec<IngestRequest>,
}

/// Batch ingest. Each sample gets its own result; failures do not abort
/// the batch.
async fn analyze(State(state): State<AppState>, Json(req): Json<AnalyzeRequest>) -> Json<Value> {
    let now = Utc::now();
    let samples: Vec<Sample> = req.samples.into_iter().map(|r| r.into_sample(now)).collect();
    let total = samples.len();
    let results: Vec<Value> = state
        .engine
        .ingest_batch(samples)
        .await
        .into_iter()
        .map(|r| match r {
            Ok(outcome) => json!({ "ok": outcome }),
            Err(e) => ApiError(e).body(),
        })
        .collect();
    let anomalies = results
        .iter()
        .filter(|r| r.pointer("/ok/anomaly").is_some_and(|a| !a.is_null()))
        .count();
    Json(json!({
        "data": results,
        "meta": { "total": total, "anomalies": anomalies, "timestamp": Utc::now().to_rfc3339() }
    }))
}

#[derive(Debug, Deserialize)]
struct SlotQuery {
    source_key: String,
    metric_name: String,
}

async fn baseline(State(state): State<AppState>, Query(q): Query<SlotQuery>) -> ApiResult<Json<Value>> {
    let baseline = state.engine.baseline(&q.source_key, &q.metric_name).await?;
    Ok(Json(json!({ "data": baseline, "meta": meta() })))
}

async fn window(State(state): State<AppState>, Query(q): Query<SlotQuery>) -> ApiResult<Json<Value>> {
    let samples = state.engine.window(&q.source_key, &q.metric_name).await?;
    Ok(Json(json!({ "data": samples, "meta": { "total": samples.len() } })))
}

async fn reset_slot(State(state): State<AppState>, Json(q): Json<SlotQuery>) -> ApiResult<StatusCode> {
    state.engine.reset_slot(&q.source_key, &q.metric_name).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_alerts(State(state): State<AppState>, Query(filter): Query<AlertFilter>) -> Json<Value> {
    let alerts = state.engine.alerts(&filter).await;
    Json(json!({ "data": alerts, "meta": { "total": alerts.len() } }))
}

async fn get_alert(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Value>> {
    let alert = state.engine.alert(id).await?;
    Ok(Json(json!({ "data": alert })))
}

async fn ack_alert(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Value>> {
    let alert = state.engine.acknowledge(id).await?;
    Ok(Json(json!({ "data": alert, "meta": meta() })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SubscribeRequest {
    filter: AlertFilter,
    /// Start at the current head instead of replaying the retained log.
    from_now: bool,
}

async fn create_subscription(
    State(state): State<AppState>,
    Json(req): Json<SubscribeRequest>,
) -> (StatusCode, Json<Value>) {
    let sub = state.engine.subscribe(req.filter, req.from_now).await;
    (StatusCode::CREATED, Json(json!({ "data": sub })))
}

async fn list_subscriptions(State(state): State<AppState>) -> Json<Value> {
    let subs = state.engine.subscriptions().await;
    Json(json!({ "data": subs, "meta": { "total": subs.len() } }))
}

async fn delete_subscription(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<StatusCode> {
    state.engine.unsubscribe(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct PollQuery {
    cursor: Option<u64>,
    limit: Option<usize>,
    wait_ms: Option<u64>,
}

async fn poll_subscription(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(q): Query<PollQuery>,
) -> ApiResult<Json<Value>> {
    let wait = q.wait_ms.map(Duration::from_millis);
    let batch = state.engine.poll(id, q.cursor, q.limit, wait).await?;
    Ok(Json(json!({ "data": batch })))
}

#[derive(Debug, Deserialize)]
struct AckRequest {
    up_to_sequence: u64,
    timeout_ms: Option<u64>,
}

async fn ack_subscription(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<AckRequest>,
) -> ApiResult<Json<Value>> {
    let timeout = req.timeout_ms.map(Duration::from_millis);
    let cursor = state
        .engine
        .ack_delivery(id, req.up_to_sequence, timeout)
        .await?;
    Ok(Json(json!({ "data": { "subscription_id": id, "cursor": cursor } })))
}
