use axum::{
    Router,
    body::Body,
    http::{HeaderValue, Method, Request, header},
    middleware,
    middleware::Next,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;

use super::AppState;
use super::handlers::{ask, health};

fn build_localhost_cors(api_port: u16) -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        format!("http://127.0.0.1:{}", api_port),
        format!("http://localhost:{}", api_port),
    ]
    .iter()
    .filter_map(|o| o.parse().ok())
    .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(tower_http::cors::Any)
}

pub fn build_api_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health::health_endpoint))
        .route("/api/ask", post(ask::ask_endpoint))
        .route("/api/query", post(ask::query_endpoint))
        .route("/api/classify", post(ask::classify_endpoint))
        .route("/api/logs", get(super::sse_logs_endpoint))
        .layer(middleware::from_fn(security_headers))
        .layer(build_localhost_cors(state.api_port))
        .with_state(state)
}

async fn security_headers(req: Request<Body>, next: Next) -> axum::response::Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("default-src 'none'; frame-ancestors 'none'"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::AppConfig;
    use crate::core::routing::IntentRouter;
    use crate::core::testing::{ScriptedLlm, ScriptedWarehouse};
    use crate::core::types::SchemaMetadata;
    use crate::core::warehouse::{RawColumn, RawField, RawStatementResult};
    use axum::http::StatusCode;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use tower::util::ServiceExt;

    fn state(llm: &Arc<ScriptedLlm>, warehouse: &Arc<ScriptedWarehouse>) -> AppState {
        let mut config = AppConfig::default();
        config.warehouse.poll_interval_ms = 0;
        state_with(llm, warehouse, &config)
    }

    /// Polls every 10ms and never gives up on its own.
    fn slow_state(llm: &Arc<ScriptedLlm>, warehouse: &Arc<ScriptedWarehouse>) -> AppState {
        let mut config = AppConfig::default();
        config.warehouse.poll_interval_ms = 10;
        config.warehouse.max_poll_attempts = 100_000;
        state_with(llm, warehouse, &config)
    }

    fn state_with(
        llm: &Arc<ScriptedLlm>,
        warehouse: &Arc<ScriptedWarehouse>,
        config: &AppConfig,
    ) -> AppState {
        let (log_tx, _) = tokio::sync::broadcast::channel(16);
        AppState {
            router: Arc::new(IntentRouter::from_config(
                llm.clone(),
                warehouse.clone(),
                config,
            )),
            schema: SchemaMetadata::new(serde_json::json!({"scada": {"readings": ["temp"]}})),
            log_tx,
            api_port: 17900,
            shutdown: CancellationToken::new(),
        }
    }

    async fn json_request(
        app: Router,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let body = match body {
            Some(json) => Body::from(serde_json::to_string(&json).unwrap()),
            None => Body::empty(),
        };

        let req = Request::builder()
            .method(method)
            .uri(path)
            .header("content-type", "application/json")
            .body(body)
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body_bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let json: serde_json::Value =
            serde_json::from_slice(&body_bytes).unwrap_or(serde_json::json!({}));
        (status, json)
    }

    #[tokio::test]
    async fn security_headers_present_on_responses() {
        let app = build_api_router(state(
            &Arc::new(ScriptedLlm::new()),
            &Arc::new(ScriptedWarehouse::new()),
        ));
        let req = Request::builder()
            .method(Method::GET)
            .uri("/api/health")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();

        assert_eq!(
            resp.headers().get("x-content-type-options").unwrap(),
            "nosniff"
        );
        assert_eq!(resp.headers().get("x-frame-options").unwrap(), "DENY");
        assert!(resp.headers().get("content-security-policy").is_some());
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let app = build_api_router(state(
            &Arc::new(ScriptedLlm::new()),
            &Arc::new(ScriptedWarehouse::new()),
        ));
        let (status, json) = json_request(app, Method::GET, "/api/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn query_returns_envelope_with_wire_names() {
        let llm = Arc::new(ScriptedLlm::new());
        llm.push_text(&["SELECT AVG(temp) AS avg FROM scada.readings"]);
        llm.push_text(&["Average was 21.5."]);
        let warehouse = Arc::new(
            ScriptedWarehouse::new()
                .then_finished(true)
                .with_result(RawStatementResult {
                    column_metadata: Some(vec![RawColumn {
                        name: Some("avg".to_string()),
                        label: None,
                        type_name: Some("float8".to_string()),
                    }]),
                    records: Some(vec![vec![Some(RawField::double(21.5))]]),
                    total_num_rows: Some(1),
                }),
        );
        let app = build_api_router(state(&llm, &warehouse));

        let (status, json) = json_request(
            app,
            Method::POST,
            "/api/query",
            Some(serde_json::json!({ "message": "average temperature" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["query"], "SELECT AVG(temp) AS avg FROM scada.readings");
        assert_eq!(json["result"]["columnMetadata"][0]["name"], "avg");
        assert_eq!(json["result"]["records"][0][0], 21.5);
        assert_eq!(json["result"]["totalNumRows"], 1);
        assert_eq!(json["insights"], "Average was 21.5.");
    }

    #[tokio::test]
    async fn query_execution_failure_keeps_the_sql() {
        let llm = Arc::new(ScriptedLlm::new());
        llm.push_text(&["SELECT nope FROM scada.readings"]);
        let warehouse = Arc::new(
            ScriptedWarehouse::new().then_failed("FAILED", "column \"nope\" does not exist"),
        );
        let app = build_api_router(state(&llm, &warehouse));

        let (status, json) = json_request(
            app,
            Method::POST,
            "/api/query",
            Some(serde_json::json!({ "message": "q", "history": [{"role": "user", "content": "hi"}] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["errorType"], "execution_error");
        assert_eq!(json["query"], "SELECT nope FROM scada.readings");
    }

    #[tokio::test]
    async fn classify_returns_intent() {
        let llm = Arc::new(ScriptedLlm::new());
        llm.push_text(&["Chat"]);
        let app = build_api_router(state(&llm, &Arc::new(ScriptedWarehouse::new())));
        let (status, json) = json_request(
            app,
            Method::POST,
            "/api/classify",
            Some(serde_json::json!({ "message": "hello there" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["intent"], "chat");
    }

    #[tokio::test]
    async fn ask_surfaces_classification_failures() {
        let llm = Arc::new(ScriptedLlm::new());
        llm.push_text(&["perhaps"]);
        let app = build_api_router(state(&llm, &Arc::new(ScriptedWarehouse::new())));
        let (status, json) = json_request(
            app,
            Method::POST,
            "/api/ask",
            Some(serde_json::json!({ "message": "hmm" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(json["success"], false);
        assert_eq!(json["phase"], "classification");
    }

    #[tokio::test]
    async fn empty_message_is_rejected() {
        let app = build_api_router(state(
            &Arc::new(ScriptedLlm::new()),
            &Arc::new(ScriptedWarehouse::new()),
        ));
        let (status, json) = json_request(
            app,
            Method::POST,
            "/api/ask",
            Some(serde_json::json!({ "message": "   " })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["success"], false);
    }

    async fn wait_for(mut done: impl FnMut() -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while !done() {
            assert!(tokio::time::Instant::now() < deadline, "condition not reached in 2s");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn dropped_request_cancels_the_running_statement() {
        let llm = Arc::new(ScriptedLlm::new());
        llm.push_text(&["SELECT temp FROM scada.readings"]);
        let warehouse = Arc::new(ScriptedWarehouse::new());
        let app = build_api_router(slow_state(&llm, &warehouse));

        let req = Request::builder()
            .method(Method::POST)
            .uri("/api/query")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"message":"latest temperature"}"#))
            .unwrap();
        let outcome = tokio::time::timeout(Duration::from_millis(50), app.oneshot(req)).await;
        assert!(outcome.is_err(), "statement should still be running");

        wait_for(|| warehouse.cancel_calls() == 1).await;
        assert_eq!(warehouse.submit_calls(), 1);
        assert_eq!(warehouse.fetch_calls(), 0);
    }

    #[tokio::test]
    async fn server_shutdown_cancels_in_flight_queries() {
        let llm = Arc::new(ScriptedLlm::new());
        llm.push_text(&["SELECT temp FROM scada.readings"]);
        let warehouse = Arc::new(ScriptedWarehouse::new());
        let state = slow_state(&llm, &warehouse);
        let shutdown = state.shutdown.clone();
        let app = build_api_router(state);

        let request = tokio::spawn(json_request(
            app,
            Method::POST,
            "/api/query",
            Some(serde_json::json!({ "message": "latest temperature" })),
        ));
        wait_for(|| warehouse.describe_calls() > 0).await;
        shutdown.cancel();

        let (status, json) = request.await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["errorType"], "execution_error");
        assert_eq!(json["query"], "SELECT temp FROM scada.readings");
        assert_eq!(warehouse.cancel_calls(), 1);
    }
}
