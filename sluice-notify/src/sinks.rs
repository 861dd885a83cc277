//! Notification sinks
//!
//! Sinks deliver persisted notifications to out-of-band channels. Delivery
//! is best-effort: the service logs sink failures and moves on.

use async_trait::async_trait;
use sluice_storage::Notification;
use tracing::{debug, info};

/// A delivery channel for notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a notification. Errors are logged by the service, never
    /// propagated to the publisher.
    async fn notify(&self, notification: &Notification) -> crate::Result<()>;

    /// Channel name used in delivery-failure logs.
    fn name(&self) -> &'static str;
}

/// Transport used by the email sink. The SMTP wire protocol is an external
/// collaborator; production wires in a real transport, tests a recording
/// one.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, subject: &str, body: &str) -> crate::Result<()>;
}

/// Formats notifications into alert emails and hands them to a `Mailer`.
pub struct EmailNotifier {
    mailer: Box<dyn Mailer>,
    recipients: Vec<String>,
}

impl EmailNotifier {
    pub fn new(mailer: Box<dyn Mailer>, recipients: Vec<String>) -> Self {
        let recipients = recipients
            .into_iter()
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .collect();
        Self { mailer, recipients }
    }

    fn subject(notification: &Notification) -> String {
        match notification.title.trim() {
            "" => "[Sluice] Notification".to_string(),
            title => format!("[Sluice] {title}"),
        }
    }

    fn body(notification: &Notification) -> String {
        let mut body = String::new();
        body.push_str(&format!("Event: {}\n", notification.event_type));
        body.push_str(&format!("Severity: {}\n", notification.severity));
        if !notification.message.is_empty() {
            body.push_str(&format!("\n{}\n", notification.message));
        }
        if let Some(metadata) = &notification.metadata {
            body.push_str(&format!("\nDetails: {}\n", metadata.0));
        }
        body
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn notify(&self, notification: &Notification) -> crate::Result<()> {
        if self.recipients.is_empty() {
            return Ok(());
        }
        self.mailer
            .send(&Self::subject(notification), &Self::body(notification))
            .await?;
        debug!(
            notification_id = %notification.id,
            recipients = self.recipients.len(),
            "alert email dispatched"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "email"
    }
}

/// Pushes notifications to an HTTP webhook endpoint. Disabled when no
/// endpoint is configured.
pub struct PushNotifier {
    client: reqwest::Client,
    endpoint: Option<String>,
}

impl PushNotifier {
    pub fn new(endpoint: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint
                .map(|e| e.trim().to_string())
                .filter(|e| !e.is_empty()),
        }
    }
}

#[async_trait]
impl Notifier for PushNotifier {
    async fn notify(&self, notification: &Notification) -> crate::Result<()> {
        let Some(endpoint) = &self.endpoint else {
            return Ok(());
        };

        self.client
            .post(endpoint)
            .json(notification)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| crate::Error::InvalidEvent(format!("push delivery failed: {e}")))?;

        info!(
            notification_id = %notification.id,
            event_type = %notification.event_type,
            "push notification dispatched"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "push"
    }
}
