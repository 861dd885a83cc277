//! Mail transport handoff
//!
//! The SMTP wire protocol is an external collaborator. The worker ships a
//! transport that records the outgoing mail in the structured log; a
//! deployment wires in a real transport behind the same trait.

use async_trait::async_trait;
use sluice_notify::Mailer;
use tracing::info;

/// Mailer that logs outgoing alert mail instead of speaking SMTP.
pub struct LoggingMailer {
    from: String,
    smtp_host: String,
    smtp_port: u16,
}

impl LoggingMailer {
    pub fn new(from: String, smtp_host: String, smtp_port: u16) -> Self {
        Self {
            from,
            smtp_host,
            smtp_port,
        }
    }
}

#[async_trait]
impl Mailer for LoggingMailer {
    async fn send(&self, subject: &str, body: &str) -> sluice_notify::Result<()> {
        info!(
            from = %self.from,
            smtp = format!("{}:{}", self.smtp_host, self.smtp_port),
            subject,
            body_bytes = body.len(),
            "alert mail handed off"
        );
        Ok(())
    }
}
