//! Remote planner agent
//!
//! Sends the conversation and the tenant's schema to an external HTTP planner,
//! which answers with SQL and/or prose. The SQL runs locally against the
//! tenant's read-only connections; the planner never sees a database handle.

use super::{execute_guarded, format_rows, latest_question, AgentFactory, AgentReply, QueryOutcome, SqlAgent};
use crate::config::AgentConfig;
use crate::errors::{AppError, Result};
use crate::session::{ChatMessage, Role};
use crate::tenant::{SchemaInfo, TenantHandle};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Serialize)]
struct PlanRequest<'a> {
    model: &'a str,
    schema: &'a SchemaInfo,
    messages: Vec<PlanMessage<'a>>,
}

#[derive(Serialize)]
struct PlanMessage<'a> {
    role: Role,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct PlanResponse {
    #[serde(default)]
    sql: Option<String>,
    #[serde(default)]
    answer: Option<String>,
}

struct PlannerClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

impl PlannerClient {
    async fn plan(&self, schema: &SchemaInfo, conversation: &[ChatMessage]) -> Result<PlanResponse> {
        let request = PlanRequest {
            model: &self.model,
            schema,
            messages: conversation
                .iter()
                .map(|m| PlanMessage {
                    role: m.role,
                    content: &m.content,
                })
                .collect(),
        };

        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let response = builder.send().await.map_err(|e| AppError::AgentError {
            message: format!("Planner request failed: {}", e),
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::AgentError {
                message: format!("Planner error {}: {}", status, body),
            });
        }

        response.json().await.map_err(|e| AppError::AgentError {
            message: format!("Failed to parse planner response: {}", e),
        })
    }
}

/// Builds [`RemoteAgent`]s sharing one HTTP client
pub struct RemoteAgentFactory {
    planner: Arc<PlannerClient>,
    max_rows: usize,
}

impl RemoteAgentFactory {
    pub fn new(config: &AgentConfig) -> Result<Self> {
        let endpoint = config.endpoint.clone().ok_or_else(|| AppError::Configuration {
            message: "agent.endpoint is required for the remote provider".to_string(),
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            planner: Arc::new(PlannerClient {
                client,
                endpoint,
                api_key: config.api_key.clone(),
                model: config.model.clone(),
            }),
            max_rows: config.max_result_rows,
        })
    }
}

impl AgentFactory for RemoteAgentFactory {
    fn provider(&self) -> &str {
        "remote"
    }

    fn build(&self, handle: TenantHandle, schema: &SchemaInfo) -> Result<Arc<dyn SqlAgent>> {
        Ok(Arc::new(RemoteAgent {
            planner: self.planner.clone(),
            handle,
            schema: schema.clone(),
            max_rows: self.max_rows,
        }))
    }
}

pub struct RemoteAgent {
    planner: Arc<PlannerClient>,
    handle: TenantHandle,
    schema: SchemaInfo,
    max_rows: usize,
}

#[async_trait]
impl SqlAgent for RemoteAgent {
    fn name(&self) -> &str {
        "remote"
    }

    async fn respond(&self, conversation: &[ChatMessage]) -> Result<AgentReply> {
        if latest_question(conversation).is_none() {
            return Ok(AgentReply::failed("no question to answer"));
        }

        let plan = self.planner.plan(&self.schema, conversation).await?;
        debug!(
            tenant_id = %self.handle.tenant_id(),
            sql = ?plan.sql,
            "Planner responded"
        );

        let Some(sql) = plan.sql.filter(|s| !s.trim().is_empty()) else {
            return Ok(AgentReply {
                answer: plan
                    .answer
                    .unwrap_or_else(|| "I could not work out a query for that.".to_string()),
                ..Default::default()
            });
        };

        match execute_guarded(&self.handle, &sql, self.max_rows).await? {
            QueryOutcome::Rows(rows) => Ok(AgentReply {
                answer: plan.answer.unwrap_or_else(|| format_rows(&rows)),
                executed_sql: Some(sql),
                rows: Some(rows),
                error: None,
            }),
            QueryOutcome::Rejected(error) => {
                warn!(tenant_id = %self.handle.tenant_id(), error = %error, "Planner SQL rejected");
                Ok(AgentReply {
                    executed_sql: Some(sql),
                    ..AgentReply::failed(error)
                })
            }
        }
    }
}
