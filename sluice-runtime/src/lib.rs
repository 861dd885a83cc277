//! # Sluice Runtime
//!
//! Execution runtime for Sluice migration jobs: the durable execution
//! workflow, its activities, the container runner, and retry logic.

pub mod activities;
pub mod container;
pub mod heartbeat;
pub mod retry;
pub mod token;
pub mod workflow;

// Re-export commonly used types
pub use activities::{Activities, EngineSettings, Prepared};
pub use container::{ContainerRunner, ContainerSpec, DockerRunner, RunOutput};
pub use heartbeat::{Heartbeat, HeartbeatMonitor};
pub use retry::{RetryPolicy, RetryStrategy};
pub use token::{mint_callback_token, verify_callback_token, CallbackClaims};
pub use workflow::{ActivityOptions, ExecutionParams, ExecutionWorkflow};

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for runtime operations
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum Error {
    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Job definition not ready: {0}")]
    NotReady(String),

    #[error("Tenant violation: {0}")]
    TenantViolation(String),

    #[error("Failed to pull image: {0}")]
    PullFailed(String),

    #[error("Failed to create container: {0}")]
    CreateFailed(String),

    #[error("Failed to start container: {0}")]
    StartFailed(String),

    #[error("Failed to read container logs: {0}")]
    LogsFailed(String),

    #[error("Container wait error: {0}")]
    WaitFailed(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Heartbeat timeout: {0}")]
    HeartbeatTimeout(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map a storage error into the runtime domain, preserving semantic
    /// meaning for retry classification: business-logic failures stay
    /// non-retryable while transport faults become retryable internals.
    pub fn from_storage(e: sluice_storage::Error) -> Self {
        use sluice_storage::Error as StorageError;

        match e {
            StorageError::NotFound(msg) => Error::NotFound(msg),
            StorageError::NotReady(msg) => Error::NotReady(msg),
            StorageError::TenantViolation(msg) => Error::TenantViolation(msg),
            StorageError::ValidationError(msg)
            | StorageError::AlreadyExists(msg)
            | StorageError::Crypto(msg)
            | StorageError::Migration(msg) => Error::Execution(msg),
            StorageError::Database(e) => Error::Internal(format!("storage error: {e}")),
        }
    }
}

impl From<sluice_core::Error> for Error {
    fn from(e: sluice_core::Error) -> Self {
        Error::Execution(e.to_string())
    }
}
