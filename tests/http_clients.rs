use std::sync::{Arc, Mutex};

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
    routing::post,
};
use serde_json::{Value, json};
use tokio::sync::oneshot;

use querybrain::core::config::AppConfig;
use querybrain::core::llm::{AnthropicProvider, LlmProvider};
use querybrain::core::routing::{IntentResponse, IntentRouter};
use querybrain::core::types::{CellValue, Envelope, ErrorType, SchemaMetadata};
use querybrain::core::warehouse::{HttpWarehouseClient, MalformedPayload, WarehouseClient};

const SQL: &str = "SELECT COUNT(*) AS n FROM scada.readings";

struct MockServer {
    base_url: String,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl MockServer {
    async fn start(app: Router) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
        });
        Self {
            base_url: format!("http://127.0.0.1:{}", port),
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

fn sse_body(chunks: &[&str]) -> String {
    let mut body = String::from("event: message_start\ndata: {\"type\":\"message_start\"}\n\n");
    for chunk in chunks {
        let event = json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": { "type": "text_delta", "text": chunk }
        });
        body.push_str(&format!("event: content_block_delta\ndata: {}\n\n", event));
    }
    body.push_str("event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n");
    body
}

/// Answers by prompt shape: the classifier gets a tiny token budget, the SQL
/// prompt asks for a Redshift query and everything else is an insight request.
async fn mock_messages(headers: HeaderMap, Json(payload): Json<Value>) -> impl IntoResponse {
    if headers.get("x-api-key").and_then(|v| v.to_str().ok()) != Some("test-key") {
        return (StatusCode::UNAUTHORIZED, "bad key".to_string()).into_response();
    }
    let prompt = payload["messages"][0]["content"].as_str().unwrap_or("");
    let body = if payload["max_tokens"] == 10 {
        sse_body(&["q", "l"])
    } else if prompt.contains("Generate a Redshift SQL query") {
        sse_body(&["```sql\n", SQL, "\n```"])
    } else {
        sse_body(&["There are ", "42 readings."])
    };
    ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
}

#[derive(Clone, Default)]
struct WarehouseState {
    actions: Arc<Mutex<Vec<String>>>,
    fail_statement: bool,
    malformed_result: bool,
}

async fn mock_data_api(
    State(state): State<WarehouseState>,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    let target = headers
        .get("x-amz-target")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let request: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
    let describes = {
        let mut actions = state.actions.lock().unwrap();
        actions.push(target.clone());
        actions
            .iter()
            .filter(|a| a.as_str() == "RedshiftData.DescribeStatement")
            .count()
    };

    let reply = match target.as_str() {
        "RedshiftData.ExecuteStatement" => {
            assert_eq!(request["Sql"], SQL);
            assert_eq!(request["Database"], "plant");
            json!({ "Id": "stmt-42" })
        }
        "RedshiftData.DescribeStatement" if describes < 3 => {
            json!({ "Id": request["Id"], "Status": "STARTED" })
        }
        "RedshiftData.DescribeStatement" if state.fail_statement => json!({
            "Id": request["Id"],
            "Status": "FAILED",
            "Error": "ERROR: permission denied for relation readings"
        }),
        "RedshiftData.DescribeStatement" => {
            json!({ "Id": request["Id"], "Status": "FINISHED", "HasResultSet": true })
        }
        "RedshiftData.GetStatementResult" if state.malformed_result => json!({
            "ColumnMetadata": [{ "name": "n", "label": "n", "typeName": "int8" }],
            "Records": [[{ "longValue": "abc" }]],
            "TotalNumRows": 1
        }),
        "RedshiftData.GetStatementResult" => json!({
            "ColumnMetadata": [{ "name": "n", "label": "n", "typeName": "int8" }],
            "Records": [[{ "longValue": 42 }]],
            "TotalNumRows": 1
        }),
        other => {
            return (StatusCode::BAD_REQUEST, format!("unknown target {}", other)).into_response();
        }
    };
    Json(reply).into_response()
}

async fn start_llm() -> MockServer {
    MockServer::start(Router::new().route("/v1/messages", post(mock_messages))).await
}

async fn start_warehouse(state: WarehouseState) -> MockServer {
    MockServer::start(
        Router::new()
            .route("/", post(mock_data_api))
            .with_state(state),
    )
    .await
}

fn config_for(warehouse: &MockServer) -> AppConfig {
    let mut config = AppConfig::default();
    config.warehouse.endpoint = format!("{}/", warehouse.base_url);
    config.warehouse.database = "plant".to_string();
    config.warehouse.poll_interval_ms = 0;
    config
}

fn schema() -> SchemaMetadata {
    SchemaMetadata::new(json!({ "scada": { "readings": ["ts", "temp"] } }))
}

#[tokio::test]
async fn question_flows_through_real_http_clients() {
    let llm_server = start_llm().await;
    let state = WarehouseState::default();
    let warehouse_server = start_warehouse(state.clone()).await;

    let config = config_for(&warehouse_server);
    let llm: Arc<dyn LlmProvider> = Arc::new(AnthropicProvider::new(
        "test-key".to_string(),
        Some(llm_server.base_url.clone()),
    ));
    let warehouse: Arc<dyn WarehouseClient> =
        Arc::new(HttpWarehouseClient::new(&config.warehouse, None));
    let router = IntentRouter::from_config(llm, warehouse, &config);

    let response = router
        .respond("how many readings are there", &schema(), &[])
        .await
        .unwrap();

    let envelope = match response {
        IntentResponse::Query { envelope } => envelope,
        other => panic!("expected a query response, got {:?}", other),
    };
    match envelope {
        Envelope::Success {
            query,
            result,
            insights,
        } => {
            assert_eq!(query, SQL);
            assert_eq!(result.records, vec![vec![CellValue::Long(42)]]);
            assert_eq!(insights.as_str(), "There are 42 readings.");
        }
        other => panic!("expected success, got {:?}", other),
    }

    let actions = state.actions.lock().unwrap().clone();
    assert_eq!(
        actions,
        vec![
            "RedshiftData.ExecuteStatement",
            "RedshiftData.DescribeStatement",
            "RedshiftData.DescribeStatement",
            "RedshiftData.DescribeStatement",
            "RedshiftData.GetStatementResult",
        ]
    );

    llm_server.shutdown().await;
    warehouse_server.shutdown().await;
}

#[tokio::test]
async fn failed_statement_error_comes_back_verbatim() {
    let llm_server = start_llm().await;
    let state = WarehouseState {
        fail_statement: true,
        ..Default::default()
    };
    let warehouse_server = start_warehouse(state.clone()).await;

    let config = config_for(&warehouse_server);
    let llm: Arc<dyn LlmProvider> = Arc::new(AnthropicProvider::new(
        "test-key".to_string(),
        Some(llm_server.base_url.clone()),
    ));
    let warehouse: Arc<dyn WarehouseClient> =
        Arc::new(HttpWarehouseClient::new(&config.warehouse, None));
    let router = IntentRouter::from_config(llm, warehouse, &config);

    let envelope = router
        .pipeline()
        .orchestrate("how many readings are there", &schema(), &[])
        .await;

    assert_eq!(envelope.error_type(), Some(ErrorType::ExecutionError));
    assert_eq!(envelope.query(), Some(SQL));
    let json = serde_json::to_value(&envelope).unwrap();
    assert_eq!(
        json["error"],
        "Query execution failed: ERROR: permission denied for relation readings"
    );
    assert!(
        !state
            .actions
            .lock()
            .unwrap()
            .iter()
            .any(|a| a == "RedshiftData.GetStatementResult")
    );

    llm_server.shutdown().await;
    warehouse_server.shutdown().await;
}

#[tokio::test]
async fn rejected_api_key_is_a_generation_error() {
    let llm_server = start_llm().await;
    let warehouse_server = start_warehouse(WarehouseState::default()).await;

    let config = config_for(&warehouse_server);
    let llm: Arc<dyn LlmProvider> = Arc::new(AnthropicProvider::new(
        "wrong-key".to_string(),
        Some(llm_server.base_url.clone()),
    ));
    let warehouse: Arc<dyn WarehouseClient> =
        Arc::new(HttpWarehouseClient::new(&config.warehouse, None));
    let router = IntentRouter::from_config(llm, warehouse, &config);

    let envelope = router
        .pipeline()
        .orchestrate("how many readings are there", &schema(), &[])
        .await;

    assert_eq!(envelope.error_type(), Some(ErrorType::GenerationError));
    assert_eq!(envelope.query(), None);

    llm_server.shutdown().await;
    warehouse_server.shutdown().await;
}

#[tokio::test]
async fn undecodable_result_page_is_malformed_not_transient() {
    let llm_server = start_llm().await;
    let state = WarehouseState {
        malformed_result: true,
        ..Default::default()
    };
    let warehouse_server = start_warehouse(state.clone()).await;

    let config = config_for(&warehouse_server);
    let llm: Arc<dyn LlmProvider> = Arc::new(AnthropicProvider::new(
        "test-key".to_string(),
        Some(llm_server.base_url.clone()),
    ));
    let http_warehouse = HttpWarehouseClient::new(&config.warehouse, None);

    let err = http_warehouse.fetch("stmt-42").await.unwrap_err();
    assert!(err.downcast_ref::<MalformedPayload>().is_some());

    let warehouse: Arc<dyn WarehouseClient> = Arc::new(http_warehouse);
    let router = IntentRouter::from_config(llm, warehouse, &config);
    let envelope = router
        .pipeline()
        .orchestrate("how many readings are there", &schema(), &[])
        .await;

    assert_eq!(envelope.error_type(), Some(ErrorType::ExecutionError));
    assert_eq!(envelope.query(), Some(SQL));
    let json = serde_json::to_value(&envelope).unwrap();
    let error = json["error"].as_str().unwrap();
    assert!(error.starts_with("Malformed warehouse payload"), "{}", error);
    assert!(error.contains("GetStatementResult"));

    llm_server.shutdown().await;
    warehouse_server.shutdown().await;
}
