//! Notify: tell the requester the change-request is ready

use crate::notify::{Notification, Notifier};
use crate::workflow::StepFailure;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyOutput {
    pub notification_id: String,
    pub status: String,
}

pub async fn run(
    notifier: &dyn Notifier,
    recipient: &str,
    pr_url: &str,
    files: &[String],
) -> Result<NotifyOutput, StepFailure> {
    let notification = Notification::changes_complete(recipient, pr_url, files);
    let receipt = notifier
        .deliver(&notification)
        .await
        .map_err(|f| f.context("Failed to notify user"))?;

    Ok(NotifyOutput {
        notification_id: receipt.notification_id,
        status: receipt.status,
    })
}
