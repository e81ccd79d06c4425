use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures_util::StreamExt;
use relaygate_core::error::BridgeError;
use relaygate_core::gateway::Gateway;
use relaygate_core::model::MessagesRequest;
use relaygate_core::normalizer::count_tokens;
use relaygate_core::stream::{ClientEvent, encode_sse};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Events buffered between the translation task and the HTTP body.
const EVENT_BUFFER: usize = 64;

#[derive(Clone)]
pub struct AppState {
    gateway: Arc<Gateway>,
}

/// Error response in the Messages API shape.
#[derive(Debug)]
pub struct ApiError(BridgeError);

impl From<BridgeError> for ApiError {
    fn from(e: BridgeError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = json!({
            "type": "error",
            "error": {
                "type": self.0.error_type(),
                "message": self.0.to_string(),
            }
        });
        (status, Json(body)).into_response()
    }
}

fn parse_request(body: &Bytes) -> Result<MessagesRequest, ApiError> {
    serde_json::from_slice(body)
        .map_err(|e| ApiError(BridgeError::Validation(format!("invalid request body: {e}"))))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn count_tokens_handler(body: Bytes) -> Result<Json<serde_json::Value>, ApiError> {
    let req = parse_request(&body)?;
    Ok(Json(json!({ "input_tokens": count_tokens(&req) })))
}

async fn messages(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let req = parse_request(&body)?;
    if !req.stream {
        let resp = state.gateway.messages(&req).await?;
        return Ok(Json(resp).into_response());
    }

    // Validation errors still get a plain HTTP error before the stream opens.
    let prepared = state.gateway.prepare(&req)?;
    let (mut tx, rx) = mpsc::channel::<ClientEvent>(EVENT_BUFFER);
    let gateway = state.gateway.clone();
    tokio::spawn(async move {
        if let Err(e) = gateway.stream_prepared(&req, &prepared, &mut tx).await {
            tracing::debug!(error = %e, "stream ended early");
        }
    });

    let frames = ReceiverStream::new(rx).map(|event| encode_sse(&event).map(Bytes::from));
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header("x-accel-buffering", "no")
        .body(Body::from_stream(frames))
        .map_err(|e| ApiError(BridgeError::Other(e.into())))
}

/// Build the router; all state lives in the injected gateway.
pub fn router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/messages", post(messages))
        .route("/v1/messages/count_tokens", post(count_tokens_handler))
        .with_state(AppState { gateway })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use relaygate_core::config::Config;
    use relaygate_core::services::Services;
    use relaygate_core::upstream::ReplaySource;
    use serde_json::Value;
    use tower::ServiceExt; // for oneshot

    fn frame(delta: &str) -> String {
        format!("data: {}\n", json!({"type": "text-delta", "delta": delta}))
    }

    fn app(chunks: Vec<String>) -> Router {
        let mut cfg = Config::default();
        cfg.executor.enabled = false;
        let services = Services::with_source(Arc::new(ReplaySource::new(chunks)), &cfg).unwrap();
        router(Arc::new(Gateway::new(services)))
    }

    fn post_json(path: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_text(resp: Response) -> String {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn health_is_ok() {
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = app(vec![]).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let v: Value = serde_json::from_str(&body_text(resp).await).unwrap();
        assert_eq!(v["status"], "ok");
    }

    #[tokio::test]
    async fn non_streaming_message() {
        let req = post_json(
            "/v1/messages",
            r#"{"model":"claude-3-5-sonnet","max_tokens":64,"messages":[{"role":"user","content":"hi"}]}"#,
        );
        let resp = app(vec![frame("Hello"), frame("!")]).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let v: Value = serde_json::from_str(&body_text(resp).await).unwrap();
        assert_eq!(v["type"], "message");
        assert_eq!(v["role"], "assistant");
        assert_eq!(v["model"], "claude-3-5-sonnet");
        assert_eq!(v["content"], json!([{"type": "text", "text": "Hello!"}]));
        assert_eq!(v["stop_reason"], "end_turn");
        assert_eq!(v["stop_sequence"], Value::Null);
    }

    #[tokio::test]
    async fn streaming_message_is_sse() {
        let req = post_json(
            "/v1/messages",
            r#"{"model":"claude-3-5-sonnet","stream":true,"messages":[{"role":"user","content":"hi"}]}"#,
        );
        let resp = app(vec![frame("He"), frame("llo")]).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["content-type"], "text/event-stream");
        assert_eq!(resp.headers()["cache-control"], "no-cache");
        assert_eq!(resp.headers()["x-accel-buffering"], "no");

        let body = body_text(resp).await;
        let names: Vec<&str> = body
            .lines()
            .filter_map(|l| l.strip_prefix("event: "))
            .collect();
        assert_eq!(
            names,
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );
        assert!(body.contains(r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"He"}}"#));
        assert!(body.ends_with("event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n"));
    }

    #[tokio::test]
    async fn streaming_recovery_with_disabled_executor_reports_failure() {
        let text = "I cannot execute that. Run: \n```bash\nls -la\n```";
        let req = post_json(
            "/v1/messages",
            r#"{"model":"claude","stream":true,"messages":[{"role":"user","content":"ls"}]}"#,
        );
        let body = body_text(app(vec![frame(text)]).oneshot(req).await.unwrap()).await;
        assert!(body.contains(r#""content_block":{"type":"tool_use""#));
        assert!(body.contains("Command failed"));
        assert!(body.contains(r#""stop_reason":"tool_use""#));
    }

    #[tokio::test]
    async fn malformed_json_is_400() {
        let resp = app(vec![])
            .oneshot(post_json("/v1/messages", "{not json"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let v: Value = serde_json::from_str(&body_text(resp).await).unwrap();
        assert_eq!(v["type"], "error");
        assert_eq!(v["error"]["type"], "invalid_request_error");
    }

    #[tokio::test]
    async fn empty_messages_stream_is_400() {
        let resp = app(vec![])
            .oneshot(post_json(
                "/v1/messages",
                r#"{"model":"claude","stream":true,"messages":[]}"#,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn upstream_failure_non_streaming_is_502() {
        let mut cfg = Config::default();
        cfg.executor.enabled = false;
        let src = ReplaySource::new(Vec::<String>::new()).failing_after("refused");
        let services = Services::with_source(Arc::new(src), &cfg).unwrap();
        let resp = router(Arc::new(Gateway::new(services)))
            .oneshot(post_json(
                "/v1/messages",
                r#"{"model":"claude","messages":[{"role":"user","content":"hi"}]}"#,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        let v: Value = serde_json::from_str(&body_text(resp).await).unwrap();
        assert_eq!(v["error"]["type"], "api_error");
    }

    #[tokio::test]
    async fn count_tokens_endpoint() {
        let resp = app(vec![])
            .oneshot(post_json(
                "/v1/messages/count_tokens",
                r#"{"model":"claude","system":"abcd","messages":[{"role":"user","content":"abcdefgh"}]}"#,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let v: Value = serde_json::from_str(&body_text(resp).await).unwrap();
        assert_eq!(v["input_tokens"], 3);
    }
}
