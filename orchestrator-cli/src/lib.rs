//! Thin `reqwest` client for the subset of the C11 HTTP surface the CLI
//! drives (`workflow/execute`, `workflow/status/{id}`,
//! `workflow/resume/{id}`, `workflow/templates`).

use serde_json::Value;

pub const DEFAULT_ORCHESTRATOR_URL: &str = "http://127.0.0.1:8080";

pub fn orchestrator_url(explicit: Option<&str>) -> String {
    explicit
        .map(String::from)
        .or_else(|| std::env::var("ORCHESTRATOR_URL").ok())
        .unwrap_or_else(|| DEFAULT_ORCHESTRATOR_URL.to_string())
}

pub struct OrchestratorClient {
    base_url: String,
    http: reqwest::Client,
}

impl OrchestratorClient {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            http: reqwest::Client::new(),
        }
    }

    async fn send(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, Box<dyn std::error::Error>> {
        let url = format!("{}{path}", self.base_url);
        let mut req = self.http.request(method, url);
        if let Some(body) = body {
            req = req.json(&body);
        }
        let resp = req.send().await?;
        let status = resp.status();
        let value: Value = resp.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            return Err(format!("request failed ({status}): {value}").into());
        }
        Ok(value)
    }

    pub async fn list_templates(&self) -> Result<Value, Box<dyn std::error::Error>> {
        self.send(reqwest::Method::GET, "/workflow/templates", None).await
    }

    pub async fn execute(
        &self,
        template_name: &str,
        context: Value,
    ) -> Result<Value, Box<dyn std::error::Error>> {
        self.send(
            reqwest::Method::POST,
            "/workflow/execute",
            Some(serde_json::json!({"template_name": template_name, "context": context})),
        )
        .await
    }

    pub async fn status(&self, workflow_id: &str) -> Result<Value, Box<dyn std::error::Error>> {
        self.send(
            reqwest::Method::GET,
            &format!("/workflow/status/{workflow_id}"),
            None,
        )
        .await
    }

    pub async fn resume(
        &self,
        workflow_id: &str,
        approval_decision: &str,
    ) -> Result<Value, Box<dyn std::error::Error>> {
        self.send(
            reqwest::Method::POST,
            &format!("/workflow/resume/{workflow_id}"),
            Some(serde_json::json!({"approval_decision": approval_decision})),
        )
        .await
    }
}
