//! # Sluice Worker
//!
//! Long-lived orchestrator process: serves the job/connection API and the
//! engine completion callback, and drives execution workflows on worker
//! tasks behind a concurrency cap.

pub mod config;
pub mod handlers;
pub mod mailer;

pub use config::Config;
pub use handlers::{router, AppState};
pub use mailer::LoggingMailer;
