//! Notification dispatch for the reporting stage
//!
//! Channels are best-effort: a failure is recorded in the scan's
//! `report_errors` and never bubbles up as a stage failure.

use async_trait::async_trait;
use bugbot_core::models::NotifyChannel;
use bugbot_core::{Error, Result};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

/// Notification sink used by the reporting worker
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a scan summary to one channel.
    async fn notify(&self, channel: NotifyChannel, scan_id: &str, summary: &str) -> Result<()>;
}

/// Webhook-backed notifier; Slack is the only wired channel
pub struct WebhookNotifier {
    http: reqwest::Client,
    slack_webhook: Option<String>,
}

impl WebhookNotifier {
    /// Notifier configured from `SLACK_WEBHOOK_URL`.
    pub fn from_env() -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            http,
            slack_webhook: bugbot_core::config::env_opt("SLACK_WEBHOOK_URL"),
        }
    }

    /// Notifier with an explicit webhook; used by tests.
    pub fn with_slack_webhook(url: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            http,
            slack_webhook: Some(url),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, channel: NotifyChannel, scan_id: &str, summary: &str) -> Result<()> {
        match channel {
            NotifyChannel::Slack => {
                let webhook = self.slack_webhook.as_ref().ok_or_else(|| {
                    Error::BackendUnavailable("SLACK_WEBHOOK_URL not configured".to_string())
                })?;
                let response = self
                    .http
                    .post(webhook)
                    .json(&json!({
                        "text": format!("BugBot scan {scan_id} finished\n{summary}"),
                    }))
                    .send()
                    .await
                    .map_err(|e| Error::BackendUnavailable(format!("slack: {e}")))?;
                if !response.status().is_success() {
                    return Err(Error::BackendUnavailable(format!(
                        "slack returned {}",
                        response.status()
                    )));
                }
                info!("slack notification sent for {}", scan_id);
                Ok(())
            }
            NotifyChannel::Email | NotifyChannel::GithubIssue => {
                debug!("channel {:?} has no configured adapter", channel);
                Err(Error::BackendUnavailable(format!(
                    "no adapter configured for {channel:?}"
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn slack_delivery_posts_to_the_webhook() -> anyhow::Result<()> {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .with_status(200)
            .create_async()
            .await;

        let notifier = WebhookNotifier::with_slack_webhook(format!("{}/hook", server.url()));
        notifier
            .notify(NotifyChannel::Slack, "s-1", "1 critical finding")
            .await?;
        mock.assert_async().await;
        Ok(())
    }

    #[tokio::test]
    async fn unconfigured_channels_fail_softly() {
        let notifier = WebhookNotifier::with_slack_webhook("http://127.0.0.1:1".to_string());
        let err = notifier
            .notify(NotifyChannel::Email, "s-1", "summary")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BackendUnavailable(_)));
    }
}
