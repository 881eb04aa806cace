use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;

use super::{MalformedPayload, RawStatementResult, StatementDescription, WarehouseClient};
use crate::core::config::WarehouseConfig;

const TARGET_PREFIX: &str = "RedshiftData";
const CONTENT_TYPE: &str = "application/x-amz-json-1.1";

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ExecuteStatementOutput {
    #[serde(default)]
    id: Option<String>,
}

/// JSON-over-HTTP client for a Redshift Data API compatible endpoint,
/// usually a signing gateway in front of the real service.
pub struct HttpWarehouseClient {
    endpoint: String,
    database: String,
    workgroup: Option<String>,
    secret_arn: Option<String>,
    token: Option<String>,
    client: Client,
}

impl HttpWarehouseClient {
    pub fn new(config: &WarehouseConfig, token: Option<String>) -> Self {
        Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            database: config.database.clone(),
            workgroup: config.workgroup.clone(),
            secret_arn: config.secret_arn.clone(),
            token,
            client: Client::new(),
        }
    }

    fn execute_body(&self, sql: &str) -> Value {
        let mut body = json!({
            "Database": self.database,
            "Sql": sql,
            "WithEvent": true,
        });
        if let Some(workgroup) = &self.workgroup {
            body["WorkgroupName"] = json!(workgroup);
        }
        if let Some(secret_arn) = &self.secret_arn {
            body["SecretArn"] = json!(secret_arn);
        }
        body
    }

    async fn call<T: DeserializeOwned>(&self, action: &str, body: &Value) -> Result<T> {
        debug!("Warehouse call {}", action);
        let mut request = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", CONTENT_TYPE)
            .header("X-Amz-Target", format!("{}.{}", TARGET_PREFIX, action))
            .body(body.to_string());
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let res = request.send().await?;
        let status = res.status();
        if !status.is_success() {
            return Err(anyhow!(
                "Warehouse {} failed ({}): {}",
                action,
                status,
                res.text().await.unwrap_or_default()
            ));
        }
        let text = res.text().await?;
        serde_json::from_str(&text).map_err(|source| {
            MalformedPayload {
                action: action.to_string(),
                source,
            }
            .into()
        })
    }
}

#[async_trait]
impl WarehouseClient for HttpWarehouseClient {
    async fn submit(&self, sql: &str) -> Result<Option<String>> {
        let out: ExecuteStatementOutput = self.call("ExecuteStatement", &self.execute_body(sql)).await?;
        Ok(out.id.filter(|id| !id.trim().is_empty()))
    }

    async fn describe(&self, execution_id: &str) -> Result<StatementDescription> {
        self.call("DescribeStatement", &json!({ "Id": execution_id }))
            .await
    }

    async fn fetch(&self, execution_id: &str) -> Result<RawStatementResult> {
        self.call("GetStatementResult", &json!({ "Id": execution_id }))
            .await
    }

    async fn cancel(&self, execution_id: &str) -> Result<()> {
        let _: Value = self
            .call("CancelStatement", &json!({ "Id": execution_id }))
            .await?;
        Ok(())
    }
}
