//! Agent collaborators
//!
//! An agent receives a conversation and a handle to exactly one tenant's
//! store and answers the latest question, optionally reporting the SQL it ran
//! and the rows it got back. Two providers ship:
//! - `rules`: keyword matching over the tenant's known tables
//! - `remote`: an external HTTP planner proposes SQL which runs locally
//!
//! Agents only ever execute SQL through [`execute_guarded`], which refuses
//! mutating statements and runs on the tenant's read-only connections.

pub mod remote;
pub mod rules;

pub use remote::RemoteAgentFactory;
pub use rules::{RuleAgent, RuleAgentFactory};

use crate::config::AgentConfig;
use crate::errors::{AppError, Result};
use crate::session::{ChatMessage, Role};
use crate::tenant::{mask_quoted, Row, SchemaInfo, TenantHandle};
use async_trait::async_trait;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};

/// Rows rendered as a full table before switching to a summary
const FULL_TABLE_ROWS: usize = 10;

/// Rows shown in a summary
const SUMMARY_ROWS: usize = 5;

/// Outcome of one agent turn
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentReply {
    pub answer: String,
    pub executed_sql: Option<String>,
    pub rows: Option<Vec<Row>>,
    pub error: Option<String>,
}

impl AgentReply {
    pub fn failed(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            answer: format!("I encountered an error: {}", error),
            error: Some(error),
            ..Default::default()
        }
    }
}

/// Natural-language to SQL agent bound to one tenant
#[async_trait]
pub trait SqlAgent: Send + Sync {
    fn name(&self) -> &str;

    /// Answer the latest user message of `conversation`
    async fn respond(&self, conversation: &[ChatMessage]) -> Result<AgentReply>;
}

/// Builds agents bound to a tenant handle
pub trait AgentFactory: Send + Sync {
    fn provider(&self) -> &str;

    fn build(&self, handle: TenantHandle, schema: &SchemaInfo) -> Result<Arc<dyn SqlAgent>>;
}

/// Create the agent factory named by configuration
pub fn create_agent_factory(config: &AgentConfig) -> Result<Arc<dyn AgentFactory>> {
    match config.provider.as_str() {
        "rules" => Ok(Arc::new(RuleAgentFactory::new(config.max_result_rows))),
        "remote" => Ok(Arc::new(RemoteAgentFactory::new(config)?)),
        other => {
            tracing::warn!(provider = other, "Unknown agent provider, using rules");
            Ok(Arc::new(RuleAgentFactory::new(config.max_result_rows)))
        }
    }
}

/// Most recent user message
pub fn latest_question(conversation: &[ChatMessage]) -> Option<&str> {
    conversation
        .iter()
        .rev()
        .find(|message| message.role == Role::User)
        .map(|message| message.content.trim())
        .filter(|question| !question.is_empty())
}

/// Result of running agent-produced SQL
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    Rows(Vec<Row>),
    /// Refused or failed in a way the user should see
    Rejected(String),
}

fn mutating_keyword_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\b(drop|delete|update|insert|alter|create|truncate|replace)\b")
            .expect("valid keyword pattern")
    })
}

/// First mutating keyword outside quoted text, uppercased
pub fn mutating_keyword(sql: &str) -> Option<String> {
    mutating_keyword_pattern()
        .captures(&mask_quoted(sql))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_ascii_uppercase())
}

/// Run SQL on the tenant's read-only connections
///
/// Statement and query errors come back as [`QueryOutcome::Rejected`];
/// isolation violations and infrastructure failures are errors.
pub async fn execute_guarded(handle: &TenantHandle, sql: &str, max_rows: usize) -> Result<QueryOutcome> {
    if let Some(keyword) = mutating_keyword(sql) {
        return Ok(QueryOutcome::Rejected(format!(
            "Operation '{}' is not allowed for security reasons.",
            keyword
        )));
    }

    match handle.query_readonly(sql, max_rows).await {
        Ok(rows) => Ok(QueryOutcome::Rows(rows)),
        Err(AppError::AgentError { message }) => Ok(QueryOutcome::Rejected(message)),
        Err(AppError::Database(e)) => Ok(QueryOutcome::Rejected(format!("Query execution error: {}", e))),
        Err(other) => Err(other),
    }
}

fn display_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => "NULL".to_string(),
        other => other.to_string(),
    }
}

/// Render rows as plain text for a chat answer
pub fn format_rows(rows: &[Row]) -> String {
    let Some(first) = rows.first() else {
        return "No results found.".to_string();
    };

    if rows.len() == 1 && first.len() == 1 {
        let value = first.values().next().map(display_value).unwrap_or_default();
        return format!("Result: {}", value);
    }

    if rows.len() > FULL_TABLE_ROWS {
        return format!(
            "Found {} results. Showing first {}:\n{}",
            rows.len(),
            SUMMARY_ROWS,
            format_rows(&rows[..SUMMARY_ROWS])
        );
    }

    let headers: Vec<&str> = first.keys().map(String::as_str).collect();
    let header_line = headers.join(" | ");
    let mut lines = vec![header_line.clone(), "-".repeat(header_line.len())];
    for row in rows {
        let cells: Vec<String> = headers
            .iter()
            .map(|h| row.get(*h).map(display_value).unwrap_or_default())
            .collect();
        lines.push(cells.join(" | "));
    }
    lines.join("\n")
}
