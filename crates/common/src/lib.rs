//! DataChat Common Library
//!
//! Shared code for the DataChat gateway including:
//! - Session registry and authentication
//! - Per-tenant isolated storage
//! - Session-scoped resource cache
//! - Agent collaborators
//! - Error types and handling
//! - Configuration management
//! - Metrics and observability

pub mod agent;
pub mod auth;
pub mod cache;
pub mod config;
pub mod errors;
pub mod metrics;
pub mod runtime;
pub mod session;
pub mod tenant;

// Re-export commonly used types
pub use config::AppConfig;
pub use errors::{AppError, Result};
pub use runtime::Runtime;
pub use session::{Session, SessionId};
pub use tenant::TenantId;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
