//! # Sluice Storage
//!
//! Tenant-scoped metadata storage for Sluice using PostgreSQL. Every
//! operation takes the tenant as an explicit parameter and binds it in the
//! statement predicate; soft-deleted rows are invisible to reads and to
//! uniqueness checks.

pub mod crypto;
pub mod migrations;
pub mod models;
pub mod postgres;
pub mod store;
pub mod tenant;

// Re-export commonly used types
pub use crypto::SecretCipher;
pub use models::{
    Connection, ConnectionUpdate, CreateNotification, ExecutionStat, ExecutionStatDay,
    JobDefinition, JobDefinitionSnapshot, JobDefinitionStat, JobExecution, NewConnection,
    NewDefinition, Notification,
};
pub use postgres::PostgresStorage;
pub use store::{ConnectionStore, JobStore, NotificationStore};
pub use tenant::TenantId;

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for storage operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Job definition not ready: {0}")]
    NotReady(String),

    #[error("Tenant isolation violation: {0}")]
    TenantViolation(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Migration error: {0}")]
    Migration(String),
}

impl From<sluice_core::Error> for Error {
    fn from(e: sluice_core::Error) -> Self {
        Error::ValidationError(e.to_string())
    }
}

impl Error {
    /// Whether the error is a transient storage fault that a caller with a
    /// bounded retry policy may retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Database(_))
    }
}
