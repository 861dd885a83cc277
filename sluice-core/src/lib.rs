//! # Sluice Core
//!
//! Core domain types for Sluice: identity and role handling, the job
//! definition lifecycle state machine, connection formats, and the
//! engine configuration builder.

pub mod connection;
pub mod definition;
pub mod engine_config;
pub mod execution;
pub mod identity;

// Re-export commonly used types
pub use connection::{ConnectionStatus, DataFormat};
pub use definition::{DefinitionStatus, DefinitionUpdate, ResolvedDefinition};
pub use engine_config::{build_engine_config, EngineConnection};
pub use execution::ExecutionStatus;
pub use identity::{has_at_least, highest_role, normalize_roles, Identity, Role};

/// Result type for core domain operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for core domain operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Invalid data format: {0}")]
    InvalidDataFormat(String),

    #[error("Invalid definition: {0}")]
    InvalidDefinition(String),

    #[error("Invalid engine config: {0}")]
    InvalidEngineConfig(String),
}
