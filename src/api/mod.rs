//! HTTP surface of the monitor, served under `/api/v1`.

mod error;
mod routes;
pub mod state;

pub use self::error::ApiError;
use self::state::AppState;
use axum::Router;
use tower_http::trace::TraceLayer;

/// Build the application router with all API routes.
pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", routes::api_routes())
        .fallback(fallback)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn fallback() -> (axum::http::StatusCode, &'static str) {
    (axum::http::StatusCode::NOT_FOUND, "not found")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitorConfig;
    use crate::engine::MonitorEngine;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app() -> Router {
        router(AppState::new(
            MonitorEngine::new(MonitorConfig::default()).unwrap(),
        ))
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let req = match body {
            Some(b) => builder
                .header("content-type", "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    fn ts(secs: i64) -> String {
        crate::testutil::at(secs).to_rfc3339()
    }

    async fn ingest(app: &Router, value: f64, secs: i64) -> (StatusCode, Value) {
        send(
            app,
            Method::POST,
            "/api/v1/ingest",
            Some(json!({
                "source_key": "svc-a",
                "metric_name": "cpu",
                "value": value,
                "timestamp": ts(secs)
            })),
        )
        .await
    }

    async fn warm(app: &Router) {
        for i in 0..10 {
            let v = if i % 2 == 0 { 9.0 } else { 11.0 };
            let (status, _) = ingest(app, v, i).await;
            assert_eq!(status, StatusCode::ACCEPTED);
        }
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = send(&app(), Method::GET, "/api/v1/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "ok");
        assert_eq!(body["data"]["engine"]["slots"], 0);
    }

    #[tokio::test]
    async fn test_unknown_route_falls_back() {
        let (status, _) = send(&app(), Method::GET, "/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_baseline_cold_then_warm() {
        let app = app();
        let uri = "/api/v1/baseline?source_key=svc-a&metric_name=cpu";
        let (status, body) = send(&app, Method::GET, uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "no_baseline");
        assert_eq!(body["error"]["source_key"], "svc-a");

        warm(&app).await;
        let (status, body) = send(&app, Method::GET, uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["mean"], 10.0);
        assert_eq!(body["data"]["sample_count"], 10);
    }

    #[tokio::test]
    async fn test_stale_and_invalid_samples() {
        let app = router(AppState::new(
            MonitorEngine::new(MonitorConfig {
                window: crate::config::WindowConfig {
                    capacity: 2,
                    ..Default::default()
                },
                ..MonitorConfig::default()
            })
            .unwrap(),
        ));
        ingest(&app, 1.0, 10).await;
        ingest(&app, 1.0, 20).await;
        let (status, body) = ingest(&app, 1.0, 0).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "stale_sample");

        let (status, _) = send(
            &app,
            Method::POST,
            "/api/v1/ingest",
            Some(json!({ "source_key": "", "metric_name": "cpu", "value": 1.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_alert_lifecycle_over_http() {
        let app = app();
        warm(&app).await;
        let (status, body) = ingest(&app, 15.0, 10).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["data"]["anomaly"]["severity"], "critical");
        let id = body["data"]["changes"][0]["alert"]["id"].as_str().unwrap().to_string();

        let (status, body) = send(&app, Method::GET, "/api/v1/alerts?state=open&source_key=svc-a", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["meta"]["total"], 1);

        let ack = format!("/api/v1/alerts/{}/ack", id);
        let (status, body) = send(&app, Method::POST, &ack, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["state"], "acknowledged");

        let (status, body) = send(&app, Method::POST, &ack, None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "invalid_state_transition");

        let missing = format!("/api/v1/alerts/{}/ack", uuid::Uuid::new_v4());
        let (status, _) = send(&app, Method::POST, &missing, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_subscription_poll_and_ack() {
        let app = app();
        let (status, body) = send(
            &app,
            Method::POST,
            "/api/v1/subscriptions",
            Some(json!({ "filter": { "source_key": "svc-a" } })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = body["data"]["id"].as_str().unwrap().to_string();

        warm(&app).await;
        ingest(&app, 15.0, 10).await;

        let poll = format!("/api/v1/subscriptions/{}/poll", id);
        let (_, first) = send(&app, Method::GET, &poll, None).await;
        let (_, second) = send(&app, Method::GET, &poll, None).await;
        assert_eq!(first["data"]["items"], second["data"]["items"]);
        assert_eq!(first["data"]["items"][0]["kind"], "opened");

        let ack = format!("/api/v1/subscriptions/{}/ack", id);
        let (status, body) = send(&app, Method::POST, &ack, Some(json!({ "up_to_sequence": 1 }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["cursor"], 1);

        let (_, after) = send(&app, Method::GET, &poll, None).await;
        assert_eq!(after["data"]["items"].as_array().unwrap().len(), 0);

        let del = format!("/api/v1/subscriptions/{}", id);
        let (status, _) = send(&app, Method::DELETE, &del, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&app, Method::GET, &poll, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_analyze_reports_per_sample_results() {
        let app = app();
        let (status, body) = send(
            &app,
            Method::POST,
            "/api/v1/analyze",
            Some(json!({
                "samples": [
                    { "source_key": "svc-a", "metric_name": "cpu", "value": 1.0, "timestamp": ts(0) },
                    { "source_key": "svc-a", "metric_name": "", "value": 1.0 }
                ]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["meta"]["total"], 2);
        assert!(body["data"][0]["ok"].is_object());
        assert_eq!(body["data"][1]["error"]["code"], "invalid_sample");
    }
}
