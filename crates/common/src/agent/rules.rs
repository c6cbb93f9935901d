//! Keyword rule agent
//!
//! Maps a handful of question shapes onto fixed SELECTs over the tables the
//! tenant actually has. Useful as a default provider and for demos; it does no
//! language understanding beyond substring matching.

use super::{execute_guarded, format_rows, latest_question, AgentFactory, AgentReply, QueryOutcome, SqlAgent};
use crate::errors::Result;
use crate::session::ChatMessage;
use crate::tenant::schema::quote_ident;
use crate::tenant::{SchemaInfo, TenantHandle};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

pub struct RuleAgentFactory {
    max_rows: usize,
}

impl RuleAgentFactory {
    pub fn new(max_rows: usize) -> Self {
        Self { max_rows }
    }
}

impl AgentFactory for RuleAgentFactory {
    fn provider(&self) -> &str {
        "rules"
    }

    fn build(&self, handle: TenantHandle, schema: &SchemaInfo) -> Result<Arc<dyn SqlAgent>> {
        Ok(Arc::new(RuleAgent {
            handle,
            tables: schema.table_names().into_iter().map(String::from).collect(),
            max_rows: self.max_rows,
        }))
    }
}

pub struct RuleAgent {
    handle: TenantHandle,
    tables: Vec<String>,
    max_rows: usize,
}

impl RuleAgent {
    fn has_table(&self, name: &str) -> bool {
        self.tables.iter().any(|t| t == name)
    }

    /// Pick the SELECT answering `question`
    pub fn plan(&self, question: &str) -> String {
        let q = question.to_lowercase();
        let mentions = |words: &[&str]| words.iter().any(|w| q.contains(w));

        if mentions(&["tables"]) {
            return "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name".to_string();
        }

        if q.contains("customers") && self.has_table("customers") {
            let sql = if mentions(&["count", "how many"]) {
                "SELECT COUNT(*) AS customer_count FROM customers"
            } else if mentions(&["top", "best"]) {
                "SELECT * FROM customers LIMIT 5"
            } else {
                "SELECT * FROM customers LIMIT 10"
            };
            return sql.to_string();
        }

        if q.contains("orders") && self.has_table("orders") {
            let sql = if mentions(&["total", "sum"]) {
                "SELECT SUM(price * quantity) AS total_revenue FROM orders"
            } else if mentions(&["recent", "latest"]) {
                "SELECT * FROM orders ORDER BY order_date DESC LIMIT 5"
            } else {
                "SELECT * FROM orders LIMIT 10"
            };
            return sql.to_string();
        }

        if mentions(&["revenue", "sales"]) && self.has_table("orders") {
            return "SELECT product, SUM(price * quantity) AS revenue FROM orders GROUP BY product ORDER BY revenue DESC"
                .to_string();
        }

        match self.tables.first() {
            Some(table) => format!("SELECT * FROM {} LIMIT 5", quote_ident(table)),
            None => "SELECT 'No tables available' AS message".to_string(),
        }
    }
}

#[async_trait]
impl SqlAgent for RuleAgent {
    fn name(&self) -> &str {
        "rules"
    }

    async fn respond(&self, conversation: &[ChatMessage]) -> Result<AgentReply> {
        let Some(question) = latest_question(conversation) else {
            return Ok(AgentReply::failed("no question to answer"));
        };

        let sql = self.plan(question);
        debug!(tenant_id = %self.handle.tenant_id(), sql = %sql, "Rule agent planned query");

        let rows = match execute_guarded(&self.handle, &sql, self.max_rows).await? {
            QueryOutcome::Rows(rows) => rows,
            QueryOutcome::Rejected(error) => {
                return Ok(AgentReply {
                    executed_sql: Some(sql),
                    ..AgentReply::failed(error)
                })
            }
        };

        let formatted = format_rows(&rows);
        let answer = if question.to_lowercase().contains("tables") {
            format!("Here are the available tables in your database:\n{}", formatted)
        } else if rows.is_empty() {
            "I found no results for your query.".to_string()
        } else {
            format!("Based on your question '{}', here's what I found:\n\n{}", question, formatted)
        };

        Ok(AgentReply {
            answer,
            executed_sql: Some(sql),
            rows: Some(rows),
            error: None,
        })
    }
}
