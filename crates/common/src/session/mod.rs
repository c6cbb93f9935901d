//! Session registry
//!
//! Maps opaque session tokens to a tenant identity plus lifecycle metadata and
//! a bounded conversation history. Sessions are volatile: they live only in
//! this process and end on logout, idle expiry, or shutdown. Components that
//! hold per-session state register a [`SessionHook`] to hear about endings.

use crate::auth::generate_session_token;
use crate::config::SessionConfig;
use crate::errors::{AppError, Result};
use crate::metrics;
use crate::tenant::TenantId;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Opaque session token handed to clients
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        Self(generate_session_token())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(token: &str) -> Self {
        Self(token.to_string())
    }
}

impl Borrow<str> for SessionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One turn of conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    Logout,
    Expired,
    Shutdown,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::Logout => "logout",
            EndReason::Expired => "expired",
            EndReason::Shutdown => "shutdown",
        }
    }
}

/// Receives session endings so per-session state can be released
pub trait SessionHook: Send + Sync {
    fn session_ended(&self, session_id: &SessionId, reason: EndReason);
}

/// Point-in-time view of a session, without its history
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub session_id: SessionId,
    pub tenant_id: TenantId,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

#[derive(Debug)]
struct SessionRecord {
    tenant_id: TenantId,
    created_at: DateTime<Utc>,
    last_active_at: DateTime<Utc>,
    history: Vec<ChatMessage>,
}

impl SessionRecord {
    fn snapshot(&self, session_id: &SessionId) -> Session {
        Session {
            session_id: session_id.clone(),
            tenant_id: self.tenant_id.clone(),
            created_at: self.created_at,
            last_active_at: self.last_active_at,
        }
    }

    fn is_idle(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        match (now - self.last_active_at).to_std() {
            Ok(elapsed) => elapsed > threshold,
            Err(_) => false,
        }
    }
}

/// Concurrent registry of live sessions
pub struct SessionRegistry {
    sessions: DashMap<SessionId, SessionRecord>,
    idle_timeout: Duration,
    max_history: usize,
    hooks: Vec<Arc<dyn SessionHook>>,
}

impl SessionRegistry {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            idle_timeout: Duration::from_secs(config.idle_timeout_secs),
            max_history: config.max_history_messages,
            hooks: Vec::new(),
        }
    }

    /// Register a listener for session endings
    pub fn with_hook(mut self, hook: Arc<dyn SessionHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Issue a fresh session bound to `tenant_id`
    pub fn create_session(&self, tenant_id: &TenantId) -> Session {
        self.expire_idle(self.idle_timeout);

        let now = Utc::now();
        loop {
            let session_id = SessionId::generate();
            if let Entry::Vacant(slot) = self.sessions.entry(session_id.clone()) {
                let record = slot.insert(SessionRecord {
                    tenant_id: tenant_id.clone(),
                    created_at: now,
                    last_active_at: now,
                    history: Vec::new(),
                });
                let session = record.snapshot(&session_id);
                drop(record);

                info!(
                    session_id = %session_id,
                    tenant_id = %tenant_id,
                    "Session created"
                );
                metrics::record_session_created();
                metrics::set_active_sessions(self.sessions.len());
                return session;
            }
        }
    }

    /// Validate a token and touch its last-activity time
    pub fn resolve(&self, session_id: &str) -> Result<Session> {
        let now = Utc::now();
        {
            let mut record = self
                .sessions
                .get_mut(session_id)
                .ok_or_else(|| AppError::SessionNotFound {
                    id: session_id.to_string(),
                })?;

            if !record.is_idle(now, self.idle_timeout) {
                record.last_active_at = record.last_active_at.max(now);
                let session = record.snapshot(record.key());
                debug!(session_id = %session_id, tenant_id = %session.tenant_id, "Session resolved");
                return Ok(session);
            }
        }

        let threshold = self.idle_timeout;
        if let Some((key, _)) = self
            .sessions
            .remove_if(session_id, |_, record| record.is_idle(now, threshold))
        {
            self.ended(&key, EndReason::Expired);
            return Err(AppError::SessionExpired {
                id: session_id.to_string(),
            });
        }

        // touched concurrently after our idle check
        self.resolve(session_id)
    }

    /// End a session; returns whether one was removed
    pub fn destroy(&self, session_id: &str) -> bool {
        match self.sessions.remove(session_id) {
            Some((key, _)) => {
                self.ended(&key, EndReason::Logout);
                true
            }
            None => false,
        }
    }

    /// Evict every session idle for longer than `threshold`
    pub fn expire_idle(&self, threshold: Duration) -> usize {
        let now = Utc::now();
        let stale: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().is_idle(now, threshold))
            .map(|entry| entry.key().clone())
            .collect();

        let mut evicted = 0;
        for session_id in stale {
            if let Some((key, _)) = self
                .sessions
                .remove_if(&session_id, |_, record| record.is_idle(now, threshold))
            {
                self.ended(&key, EndReason::Expired);
                evicted += 1;
            }
        }

        if evicted > 0 {
            info!(evicted, remaining = self.sessions.len(), "Idle sessions expired");
        }
        evicted
    }

    /// Live sessions bound to a tenant
    pub fn sessions_for_tenant(&self, tenant_id: &TenantId) -> Vec<SessionId> {
        self.sessions
            .iter()
            .filter(|entry| &entry.value().tenant_id == tenant_id)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Append messages, keeping only the newest `max_history_messages`
    pub fn append_history(
        &self,
        session_id: &str,
        messages: impl IntoIterator<Item = ChatMessage>,
    ) -> Result<()> {
        let mut record = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| AppError::SessionNotFound {
                id: session_id.to_string(),
            })?;

        record.history.extend(messages);
        let overflow = record.history.len().saturating_sub(self.max_history);
        if overflow > 0 {
            record.history.drain(..overflow);
        }
        Ok(())
    }

    pub fn history(&self, session_id: &str) -> Result<Vec<ChatMessage>> {
        self.sessions
            .get(session_id)
            .map(|record| record.history.clone())
            .ok_or_else(|| AppError::SessionNotFound {
                id: session_id.to_string(),
            })
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    /// End every session
    pub fn clear(&self) -> usize {
        let ids: Vec<SessionId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        let mut cleared = 0;
        for session_id in ids {
            if let Some((key, _)) = self.sessions.remove(&session_id) {
                self.ended(&key, EndReason::Shutdown);
                cleared += 1;
            }
        }
        cleared
    }

    fn ended(&self, session_id: &SessionId, reason: EndReason) {
        for hook in &self.hooks {
            hook.session_ended(session_id, reason);
        }
        info!(session_id = %session_id, reason = reason.as_str(), "Session ended");
        metrics::record_session_ended(reason.as_str());
        metrics::set_active_sessions(self.sessions.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(SessionId, EndReason)>>);

    impl SessionHook for Recorder {
        fn session_ended(&self, session_id: &SessionId, reason: EndReason) {
            self.0.lock().unwrap().push((session_id.clone(), reason));
        }
    }

    fn registry() -> SessionRegistry {
        SessionRegistry::new(&SessionConfig {
            idle_timeout_secs: 3600,
            sweep_interval_secs: 0,
            max_history_messages: 4,
        })
    }

    fn tenant(name: &str) -> TenantId {
        TenantId::parse(name).unwrap()
    }

    #[test]
    fn test_create_and_resolve() {
        let registry = registry();
        let session = registry.create_session(&tenant("alice"));

        assert!(session.session_id.as_str().starts_with("sess_"));
        let resolved = registry.resolve(session.session_id.as_str()).unwrap();
        assert_eq!(resolved.tenant_id, tenant("alice"));
        assert!(resolved.last_active_at >= session.last_active_at);
        assert_eq!(registry.active_count(), 1);
    }

    #[test]
    fn test_tokens_are_unique() {
        let registry = registry();
        let a = registry.create_session(&tenant("alice"));
        let b = registry.create_session(&tenant("alice"));
        assert_ne!(a.session_id, b.session_id);
        assert_eq!(registry.sessions_for_tenant(&tenant("alice")).len(), 2);
        assert!(registry.sessions_for_tenant(&tenant("bob")).is_empty());
    }

    #[test]
    fn test_destroy_then_resolve_fails() {
        let recorder = Arc::new(Recorder::default());
        let registry = registry().with_hook(recorder.clone());
        let session = registry.create_session(&tenant("alice"));
        let id = session.session_id.as_str();

        assert!(registry.destroy(id));
        assert!(!registry.destroy(id));
        assert!(matches!(
            registry.resolve(id),
            Err(AppError::SessionNotFound { .. })
        ));

        let ended = recorder.0.lock().unwrap();
        assert_eq!(ended.as_slice(), &[(session.session_id.clone(), EndReason::Logout)]);
    }

    #[test]
    fn test_unknown_session() {
        let registry = registry();
        assert!(matches!(
            registry.resolve("sess_nope"),
            Err(AppError::SessionNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_idle_sessions_expire() {
        let recorder = Arc::new(Recorder::default());
        let registry = registry().with_hook(recorder.clone());
        let stale = registry.create_session(&tenant("alice"));

        tokio::time::sleep(Duration::from_millis(20)).await;
        let fresh = registry.create_session(&tenant("bob"));

        assert_eq!(registry.expire_idle(Duration::from_millis(10)), 1);
        assert!(matches!(
            registry.resolve(stale.session_id.as_str()),
            Err(AppError::SessionNotFound { .. })
        ));
        assert!(registry.resolve(fresh.session_id.as_str()).is_ok());
        assert_eq!(recorder.0.lock().unwrap()[0].1, EndReason::Expired);
    }

    #[tokio::test]
    async fn test_resolve_reports_expiry() {
        let registry = SessionRegistry::new(&SessionConfig {
            idle_timeout_secs: 0,
            sweep_interval_secs: 0,
            max_history_messages: 4,
        });
        let session = registry.create_session(&tenant("alice"));
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert!(matches!(
            registry.resolve(session.session_id.as_str()),
            Err(AppError::SessionExpired { .. })
        ));
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn test_history_is_bounded() {
        let registry = registry();
        let id = registry.create_session(&tenant("alice")).session_id;

        for i in 0..3 {
            registry
                .append_history(
                    id.as_str(),
                    [ChatMessage::user(format!("q{i}")), ChatMessage::assistant(format!("a{i}"))],
                )
                .unwrap();
        }

        let history = registry.history(id.as_str()).unwrap();
        let contents: Vec<_> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["q1", "a1", "q2", "a2"]);
        assert!(registry.append_history("sess_missing", Vec::new()).is_err());
    }

    #[test]
    fn test_clear_notifies_hooks() {
        let recorder = Arc::new(Recorder::default());
        let registry = registry().with_hook(recorder.clone());
        registry.create_session(&tenant("alice"));
        registry.create_session(&tenant("bob"));

        assert_eq!(registry.clear(), 2);
        assert_eq!(registry.active_count(), 0);
        assert!(recorder
            .0
            .lock()
            .unwrap()
            .iter()
            .all(|(_, reason)| *reason == EndReason::Shutdown));
    }
}
