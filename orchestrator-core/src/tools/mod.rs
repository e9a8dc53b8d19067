//! MCP Tool Catalog (C6): a read-only `server -> [tool schema]` map
//! discovered from an external tool-registry, plus deterministic selection
//! across the `minimal`/`progressive`/`full` strategies (§4.6).
//!
//! The registry discovery client is a plain HTTP GET + JSON body parse,
//! grounded on the upstream project's MCP Streamable HTTP session but
//! stripped of the JSON-RPC envelope, stdio transport and SSE parsing —
//! this component only needs read-only catalog discovery, not tool
//! invocation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::OrchestratorError;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// A read-only snapshot of the external tool registry (§4.6).
#[derive(Clone, Debug, Default)]
pub struct ToolCatalog {
    pub version: String,
    pub servers: HashMap<String, Vec<ToolSchema>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToolStrategy {
    Minimal,
    Progressive,
    Full,
}

/// Keyword → server priority map for `minimal` loading. A static table
/// rather than inline match arms, so it can grow without touching the
/// selection algorithm.
static KEYWORD_SERVER_PRIORITY: &[(&str, &str)] = &[
    ("file", "filesystem"),
    ("directory", "filesystem"),
    ("path", "filesystem"),
    ("git", "git"),
    ("commit", "git"),
    ("branch", "git"),
    ("pull request", "github"),
    ("pr", "github"),
    ("issue", "github"),
    ("deploy", "infra"),
    ("infrastructure", "infra"),
    ("database", "db"),
    ("sql", "db"),
    ("query", "db"),
    ("search", "search"),
    ("find", "search"),
];

fn servers_for_task(task: &str) -> Vec<String> {
    let lowered = task.to_lowercase();
    let mut servers = Vec::new();
    for (keyword, server) in KEYWORD_SERVER_PRIORITY {
        if lowered.contains(keyword) && !servers.contains(&server.to_string()) {
            servers.push(server.to_string());
        }
    }
    servers
}

/// Deterministic given `(task, agent_priority_servers, strategy,
/// catalog.version)` — no clock, no randomness, no mutation of `catalog`.
pub fn select(
    task: &str,
    agent_priority_servers: &[String],
    strategy: ToolStrategy,
    catalog: &ToolCatalog,
) -> Vec<ToolSchema> {
    let mut server_order: Vec<String> = match strategy {
        ToolStrategy::Minimal => servers_for_task(task),
        ToolStrategy::Progressive => {
            let mut servers = servers_for_task(task);
            for s in agent_priority_servers {
                if !servers.contains(s) {
                    servers.push(s.clone());
                }
            }
            servers
        }
        ToolStrategy::Full => {
            let mut servers: Vec<String> = catalog.servers.keys().cloned().collect();
            servers.sort();
            servers
        }
    };
    server_order.sort();
    server_order.dedup();

    let mut tools = Vec::new();
    for server in &server_order {
        if let Some(schemas) = catalog.servers.get(server) {
            tools.extend(schemas.iter().cloned());
        }
    }
    tools
}

/// HTTP client that discovers the catalog from a tool-registry endpoint
/// (`GET {base_url}/tools` returning `{"version": "...", "servers": {...}}`).
pub struct ToolCatalogClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct CatalogResponse {
    version: String,
    servers: HashMap<String, Vec<ToolSchema>>,
}

impl ToolCatalogClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    pub async fn discover(&self) -> Result<ToolCatalog, OrchestratorError> {
        let url = format!("{}/tools", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| OrchestratorError::AgentUnreachable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(OrchestratorError::AgentUnreachable(format!(
                "tool registry {url} returned {}",
                response.status()
            )));
        }
        let body: CatalogResponse = response
            .json()
            .await
            .map_err(|e| OrchestratorError::ProviderError(format!("malformed catalog response: {e}")))?;
        Ok(ToolCatalog {
            version: body.version,
            servers: body.servers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> ToolCatalog {
        let mut servers = HashMap::new();
        servers.insert(
            "filesystem".into(),
            vec![ToolSchema {
                name: "read_file".into(),
                description: "reads a file".into(),
                parameters: serde_json::json!({}),
            }],
        );
        servers.insert(
            "github".into(),
            vec![ToolSchema {
                name: "open_pr".into(),
                description: "opens a pull request".into(),
                parameters: serde_json::json!({}),
            }],
        );
        servers.insert(
            "infra".into(),
            vec![ToolSchema {
                name: "deploy".into(),
                description: "deploys a service".into(),
                parameters: serde_json::json!({}),
            }],
        );
        ToolCatalog {
            version: "v1".into(),
            servers,
        }
    }

    #[test]
    fn minimal_strategy_matches_keyword_only() {
        let tools = select("open a pull request", &[], ToolStrategy::Minimal, &catalog());
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "open_pr");
    }

    #[test]
    fn progressive_strategy_adds_agent_priority_servers() {
        let tools = select(
            "open a pull request",
            &["infra".to_string()],
            ToolStrategy::Progressive,
            &catalog(),
        );
        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert!(names.contains(&"open_pr"));
        assert!(names.contains(&"deploy"));
    }

    #[test]
    fn full_strategy_returns_every_server() {
        let tools = select("no keywords here", &[], ToolStrategy::Full, &catalog());
        assert_eq!(tools.len(), 3);
    }

    #[test]
    fn selection_is_deterministic_across_repeated_calls() {
        let cat = catalog();
        let a = select("deploy the database", &["github".to_string()], ToolStrategy::Progressive, &cat);
        let b = select("deploy the database", &["github".to_string()], ToolStrategy::Progressive, &cat);
        let names_a: Vec<_> = a.iter().map(|t| t.name.clone()).collect();
        let names_b: Vec<_> = b.iter().map(|t| t.name.clone()).collect();
        assert_eq!(names_a, names_b);
    }
}
