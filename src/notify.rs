//! Requester notifications

use crate::workflow::StepFailure;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

pub const NOTIFICATION_SUBJECT: &str = "AI Coding Agent - Changes Complete";

/// A message for the person who requested a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    /// Compose the completion notice for a published change
    pub fn changes_complete(to: &str, pr_url: &str, files: &[String]) -> Self {
        let body = format!(
            "Your coding agent workflow has completed successfully!\n\n\
             Status: completed\n\
             Pull Request: {pr_url}\n\
             Files Modified: {}\n\n\
             Review and merge your changes at the link above.",
            files.join(", ")
        );
        Self {
            to: to.to_string(),
            subject: NOTIFICATION_SUBJECT.to_string(),
            body,
            timestamp: Utc::now(),
        }
    }
}

/// Acknowledgement from a notifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub notification_id: String,
    pub status: String,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> Result<DeliveryReceipt, StepFailure>;
}

fn local_notification_id() -> String {
    format!("notif_{}", Utc::now().timestamp_millis())
}

/// Writes notifications to the log instead of sending them anywhere
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, notification: &Notification) -> Result<DeliveryReceipt, StepFailure> {
        info!(
            to = %notification.to,
            subject = %notification.subject,
            "Notification prepared:\n{}",
            notification.body
        );
        Ok(DeliveryReceipt {
            notification_id: local_notification_id(),
            status: "sent".to_string(),
        })
    }
}

/// Posts notifications as JSON to a webhook
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

#[derive(Debug, Deserialize)]
struct WebhookAck {
    id: Option<String>,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, StepFailure> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StepFailure::config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn deliver(&self, notification: &Notification) -> Result<DeliveryReceipt, StepFailure> {
        let response = self.client.post(&self.url).json(notification).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(StepFailure::from_http_status(
                status.as_u16(),
                false,
                format!("notification webhook returned {status}"),
            ));
        }

        // Webhooks are free to answer with an empty or non-JSON body.
        let notification_id = response
            .json::<WebhookAck>()
            .await
            .ok()
            .and_then(|ack| ack.id)
            .unwrap_or_else(local_notification_id);

        info!("Notification {} delivered to {}", notification_id, notification.to);
        Ok(DeliveryReceipt {
            notification_id,
            status: "sent".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_notice_content() {
        let notice = Notification::changes_complete(
            "dev@example.com",
            "https://github.com/acme/widgets/pull/7",
            &["README.md".to_string()],
        );
        assert_eq!(notice.subject, NOTIFICATION_SUBJECT);
        assert!(notice.body.contains("Pull Request: https://github.com/acme/widgets/pull/7"));
        assert!(notice.body.contains("Files Modified: README.md"));
    }

    #[tokio::test]
    async fn test_log_notifier_issues_id() {
        let notice = Notification::changes_complete("dev@example.com", "https://x/pull/1", &[]);
        let receipt = LogNotifier.deliver(&notice).await.unwrap();
        assert!(receipt.notification_id.starts_with("notif_"));
        assert_eq!(receipt.status, "sent");
    }
}
