// crates/runbook-ingest/src/webhook.rs
// ============================================================================
// Module: Webhook Server
// Description: HTTP front door accepting signed alert POSTs (§4.10).
// Purpose: Verify the shared-secret HMAC, parse the alert, and hand it to
//          whatever invokes the orchestrator.
// Dependencies: axum, hmac, sha2, subtle, runbook-core::alert
// ============================================================================

//! `GET /health` always answers `200`. `POST /api/v1/alerts` requires a
//! UTF-8 JSON body; when a shared secret is configured the request must
//! also carry `x-detectforge-signature`, the hex HMAC-SHA256 of the raw
//! body under that secret, compared in constant time (§4.10). Unknown
//! paths fall through to axum's default `404`; a known path called with
//! the wrong method gets axum's default `405` for free, since each route
//! is registered for exactly one method.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::routing::get;
use axum::routing::post;
use axum::Json;
use axum::Router;
use hmac::Hmac;
use hmac::Mac;
use serde_json::json;
use serde_json::Value;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use runbook_core::alert::AlertEvent;
use runbook_core::identifiers::ExecutionId;

use crate::error::IngestError;

const SIGNATURE_HEADER: &str = "x-detectforge-signature";

/// Invoked with a validated [`AlertEvent`] once a webhook POST passes
/// signature and shape checks. Implementations typically call
/// [`runbook_core::orchestrator::run`] and return its execution id.
pub trait AlertHandler: Send + Sync {
    /// Handles one validated alert.
    ///
    /// # Errors
    ///
    /// Returns a human-readable message on failure; surfaced to the caller as `500`.
    fn handle(&self, alert: AlertEvent) -> Result<ExecutionId, String>;
}

/// Shared state for the webhook router.
#[derive(Clone)]
pub struct WebhookState {
    handler: Arc<dyn AlertHandler>,
    hmac_secret: Option<String>,
}

impl WebhookState {
    /// Builds webhook state. `hmac_secret` of `None` disables signature verification.
    #[must_use]
    pub fn new(handler: Arc<dyn AlertHandler>, hmac_secret: Option<String>) -> Self {
        Self { handler, hmac_secret }
    }
}

/// Builds the webhook [`Router`] (§4.10: `GET /health`, `POST /api/v1/alerts`).
#[must_use]
pub fn router(state: WebhookState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/alerts", post(ingest_alert))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok", "timestamp": chrono::Utc::now().to_rfc3339()}))
}

async fn ingest_alert(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    if let Some(secret) = &state.hmac_secret {
        match verify_signature(secret, &headers, &body) {
            Ok(()) => {}
            Err(err) => return error_response(StatusCode::UNAUTHORIZED, &err),
        }
    }

    let value: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(err) => {
            return error_response(StatusCode::BAD_REQUEST, &IngestError::MalformedJson(err.to_string()))
        }
    };

    let alert = match AlertEvent::from_json_value(&value) {
        Ok(alert) => alert,
        Err(err) => {
            return error_response(StatusCode::BAD_REQUEST, &IngestError::InvalidAlert(err.to_string()))
        }
    };

    match state.handler.handle(alert) {
        Ok(execution_id) => (
            StatusCode::OK,
            Json(json!({"success": true, "execution_id": execution_id.as_str()})),
        ),
        Err(message) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &IngestError::HandlerFailed(message)),
    }
}

fn verify_signature(secret: &str, headers: &HeaderMap, body: &[u8]) -> Result<(), IngestError> {
    let provided_hex = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or(IngestError::InvalidSignature)?;
    let provided = hex::decode(provided_hex).map_err(|_| IngestError::InvalidSignature)?;

    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|_| IngestError::InvalidSignature)?;
    mac.update(body);
    let expected = mac.finalize().into_bytes();

    if expected.as_slice().ct_eq(&provided).into() {
        Ok(())
    } else {
        Err(IngestError::InvalidSignature)
    }
}

fn error_response(status: StatusCode, err: &IngestError) -> (StatusCode, Json<Value>) {
    let message = if matches!(err, IngestError::InvalidSignature) {
        "Invalid signature".to_owned()
    } else {
        err.to_string()
    };
    (status, Json(json!({"success": false, "error": message})))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    struct EchoHandler;

    impl AlertHandler for EchoHandler {
        fn handle(&self, _alert: AlertEvent) -> Result<ExecutionId, String> {
            Ok(ExecutionId::from_string("exec-1"))
        }
    }

    fn sample_alert_body() -> Vec<u8> {
        serde_json::to_vec(&json!({
            "@timestamp": "2026-01-01T00:00:00Z",
            "event": {"kind": "alert"},
        }))
        .expect("serialize")
    }

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("mac");
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let state = WebhookState::new(Arc::new(EchoHandler), None);
        let app = router(state);
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn valid_signature_is_accepted() {
        let secret = "shared-secret";
        let body = sample_alert_body();
        let signature = sign(secret, &body);
        let state = WebhookState::new(Arc::new(EchoHandler), Some(secret.to_owned()));
        let app = router(state);
        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/alerts")
            .header(SIGNATURE_HEADER, signature)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .expect("request");
        let response = app.oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn wrong_signature_is_rejected() {
        let body = sample_alert_body();
        let state = WebhookState::new(Arc::new(EchoHandler), Some("shared-secret".to_owned()));
        let app = router(state);
        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/alerts")
            .header(SIGNATURE_HEADER, "deadbeef")
            .body(Body::from(body))
            .expect("request");
        let response = app.oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unknown_path_is_not_found() {
        let state = WebhookState::new(Arc::new(EchoHandler), None);
        let app = router(state);
        let response = app
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn wrong_method_on_known_path_is_not_allowed() {
        let state = WebhookState::new(Arc::new(EchoHandler), None);
        let app = router(state);
        let response = app
            .oneshot(Request::builder().method("POST").uri("/health").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn malformed_json_is_bad_request() {
        let state = WebhookState::new(Arc::new(EchoHandler), None);
        let app = router(state);
        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/alerts")
            .body(Body::from("not json"))
            .expect("request");
        let response = app.oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
