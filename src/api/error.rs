//! Mapping of engine errors onto HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Map, Value};

use crate::error::MonitorError;

pub struct ApiError(pub MonitorError);

impl From<MonitorError> for ApiError {
    fn from(err: MonitorError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0 {
            MonitorError::StaleSample { .. } => StatusCode::CONFLICT,
            MonitorError::InvalidStateTransition { .. } => StatusCode::CONFLICT,
            MonitorError::InvalidSample { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            MonitorError::NoBaseline { .. }
            | MonitorError::UnknownSlot { .. }
            | MonitorError::AlertNotFound { .. }
            | MonitorError::SubscriptionNotFound { .. } => StatusCode::NOT_FOUND,
            MonitorError::DeliveryTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    pub fn body(&self) -> Value {
        let mut error = Map::new();
        error.insert("code".into(), json!(self.0.code()));
        error.insert("message".into(), json!(self.0.to_string()));
        if let Some((source_key, metric_name)) = self.0.slot() {
            error.insert("source_key".into(), json!(source_key));
            error.insert("metric_name".into(), json!(metric_name));
        }
        json!({ "error": error })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}
