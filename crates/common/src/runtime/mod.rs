//! Runtime composition root
//!
//! Owns the session registry, tenant store, resource cache and agent factory.
//! Built once in `main`, shared with the HTTP layer as state, and shut down
//! explicitly on exit.

use crate::agent::{create_agent_factory, AgentFactory, AgentReply, SqlAgent};
use crate::cache::ResourceCache;
use crate::config::AppConfig;
use crate::errors::{AppError, Result};
use crate::metrics;
use crate::session::{ChatMessage, Session, SessionRegistry};
use crate::tenant::{
    parse_csv, sample_dataset, DataSource, Row, SchemaInfo, TabularData, TenantHandle, TenantId,
    TenantStore,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Rows shown per table in database info
const PREVIEW_ROWS: usize = 3;

/// Everything a session needs to answer questions, built lazily
pub struct SessionResource {
    pub tenant_id: TenantId,
    pub handle: TenantHandle,
    pub agent: Arc<dyn SqlAgent>,
    pub schema: SchemaInfo,
    pub built_at: DateTime<Utc>,
    turn_lock: Mutex<()>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadSummary {
    pub source: DataSource,
    pub tables: Vec<String>,
    pub schema: SchemaInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableSummary {
    pub columns: Vec<String>,
    pub row_count: i64,
    pub sample_data: Vec<Row>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseInfo {
    pub tables: Vec<String>,
    pub table_info: BTreeMap<String, TableSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub active_sessions: usize,
    pub cached_resources: usize,
    pub open_stores: usize,
    pub agent_provider: String,
    pub uptime_secs: u64,
}

pub struct Runtime {
    config: AppConfig,
    sessions: SessionRegistry,
    tenants: Arc<TenantStore>,
    cache: Arc<ResourceCache<SessionResource>>,
    agents: Arc<dyn AgentFactory>,
    started_at: Instant,
}

impl Runtime {
    /// Build the runtime with the agent provider named in configuration
    pub fn new(config: AppConfig) -> Result<Self> {
        let agents = create_agent_factory(&config.agent)?;
        Self::with_agent_factory(config, agents)
    }

    pub fn with_agent_factory(config: AppConfig, agents: Arc<dyn AgentFactory>) -> Result<Self> {
        let tenants = Arc::new(TenantStore::new(&config.storage)?);
        let cache: Arc<ResourceCache<SessionResource>> =
            Arc::new(ResourceCache::new(config.build_wait_timeout()));
        let sessions = SessionRegistry::new(&config.session).with_hook(cache.clone());

        info!(
            agent_provider = agents.provider(),
            storage_root = %tenants.root().display(),
            "Runtime initialized"
        );

        Ok(Self {
            config,
            sessions,
            tenants,
            cache,
            agents,
            started_at: Instant::now(),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn tenants(&self) -> &TenantStore {
        &self.tenants
    }

    /// Start a session for `username`, taken verbatim as the tenant id
    pub fn login(&self, username: &str) -> Result<Session> {
        let tenant_id = TenantId::parse(username)?;
        Ok(self.sessions.create_session(&tenant_id))
    }

    pub fn logout(&self, session_id: &str) -> bool {
        self.sessions.destroy(session_id)
    }

    /// Resolve a presented token into its live session
    pub fn authenticate(&self, session_id: &str) -> Result<Session> {
        self.sessions.resolve(session_id)
    }

    /// Cached per-session resource, built on first use
    pub async fn resource(&self, session: &Session) -> Result<Arc<SessionResource>> {
        let tenants = self.tenants.clone();
        let agents = self.agents.clone();
        let tenant_id = session.tenant_id.clone();

        let resource = self
            .cache
            .get_or_build(&session.session_id, move || async move {
                let handle = tenants.ensure_exists(&tenant_id).await?;
                let schema = handle.schema().await?;
                let agent = agents.build(handle.clone(), &schema)?;
                Ok(SessionResource {
                    tenant_id,
                    handle,
                    agent,
                    schema,
                    built_at: Utc::now(),
                    turn_lock: Mutex::new(()),
                })
            })
            .await?;

        if resource.tenant_id != session.tenant_id || resource.handle.tenant_id() != &session.tenant_id {
            error!(
                security = true,
                session_id = %session.session_id,
                session_tenant = %session.tenant_id,
                resource_tenant = %resource.tenant_id,
                "Cached resource bound to a different tenant"
            );
            self.cache.invalidate(&session.session_id);
            return Err(AppError::TenantMismatch);
        }
        Ok(resource)
    }

    /// Replace tables from an uploaded CSV file
    pub async fn load_upload(&self, session: &Session, file_name: &str, bytes: &[u8]) -> Result<LoadSummary> {
        let data = match parse_csv(file_name, bytes) {
            Ok(data) => data,
            Err(e) => {
                metrics::record_data_load(DataSource::Upload.as_str(), "rejected");
                return Err(e);
            }
        };
        self.load(session, data).await
    }

    /// Replace tables with the built-in sample dataset
    pub async fn load_sample(&self, session: &Session) -> Result<LoadSummary> {
        self.load(session, sample_dataset()).await
    }

    async fn load(&self, session: &Session, data: TabularData) -> Result<LoadSummary> {
        let source = data.source;
        let schema = match self.tenants.load_tabular(&session.tenant_id, &data).await {
            Ok(schema) => schema,
            Err(e) => {
                let outcome = if e.is_client_error() { "rejected" } else { "failure" };
                metrics::record_data_load(source.as_str(), outcome);
                return Err(e);
            }
        };

        let affected = self.sessions.sessions_for_tenant(&session.tenant_id);
        let invalidated = self.cache.invalidate_many(&affected);
        metrics::record_data_load(source.as_str(), "success");

        info!(
            tenant_id = %session.tenant_id,
            session_id = %session.session_id,
            source = source.as_str(),
            tables = ?data.table_names(),
            invalidated,
            "Tenant data loaded"
        );

        Ok(LoadSummary {
            source,
            tables: data.table_names(),
            schema,
        })
    }

    /// Tables with columns, counts and preview rows from the session's snapshot
    pub async fn database_info(&self, session: &Session) -> Result<DatabaseInfo> {
        let resource = self.resource(session).await?;

        let mut table_info = BTreeMap::new();
        for table in &resource.schema.tables {
            let sample_data = resource.handle.preview(&table.name, PREVIEW_ROWS).await?;
            table_info.insert(
                table.name.clone(),
                TableSummary {
                    columns: table.column_names().into_iter().map(String::from).collect(),
                    row_count: table.row_count,
                    sample_data,
                },
            );
        }

        Ok(DatabaseInfo {
            tables: resource.schema.table_names().into_iter().map(String::from).collect(),
            table_info,
        })
    }

    /// Live schema, bypassing the cache
    pub async fn database_schema(&self, session: &Session) -> Result<SchemaInfo> {
        self.tenants.describe(&session.tenant_id).await
    }

    /// One conversational turn; turns on a session run one at a time
    pub async fn chat(&self, session: &Session, message: &str) -> Result<AgentReply> {
        let started = Instant::now();
        let resource = self.resource(session).await?;
        let _turn = resource.turn_lock.lock().await;

        let question = ChatMessage::user(message);
        let mut conversation = self.sessions.history(session.session_id.as_str())?;
        conversation.push(question.clone());

        let timeout = self.config.agent_timeout();
        let reply = match tokio::time::timeout(timeout, resource.agent.respond(&conversation)).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(AppError::AgentError { message })) => {
                warn!(session_id = %session.session_id, error = %message, "Agent turn failed");
                AgentReply::failed(message)
            }
            Ok(Err(e)) => {
                metrics::record_chat_turn("failure", started.elapsed().as_secs_f64());
                return Err(e);
            }
            Err(_) => {
                warn!(
                    session_id = %session.session_id,
                    timeout_secs = timeout.as_secs(),
                    "Agent turn timed out"
                );
                AgentReply::failed(format!("the agent did not answer within {}s", timeout.as_secs()))
            }
        };

        self.sessions.append_history(
            session.session_id.as_str(),
            [question, ChatMessage::assistant(reply.answer.clone())],
        )?;

        let outcome = if reply.error.is_some() { "agent_error" } else { "success" };
        metrics::record_chat_turn(outcome, started.elapsed().as_secs_f64());
        info!(
            session_id = %session.session_id,
            tenant_id = %session.tenant_id,
            agent = resource.agent.name(),
            outcome,
            rows = reply.rows.as_ref().map(Vec::len).unwrap_or(0),
            "Chat turn completed"
        );
        Ok(reply)
    }

    /// Evict sessions idle past the configured threshold
    pub fn sweep(&self) -> usize {
        self.sessions.expire_idle(self.sessions.idle_timeout())
    }

    pub fn health(&self) -> HealthSnapshot {
        HealthSnapshot {
            active_sessions: self.sessions.active_count(),
            cached_resources: self.cache.len(),
            open_stores: self.tenants.open_count(),
            agent_provider: self.agents.provider().to_string(),
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }

    /// Storage root accepts writes
    pub async fn ready(&self) -> Result<()> {
        self.tenants.check_writable().await
    }

    /// End all sessions, drop cached resources and close every store
    pub async fn shutdown(&self) {
        let sessions = self.sessions.clear();
        self.cache.clear();
        self.tenants.close_all().await;
        info!(sessions, "Runtime shut down");
    }
}
