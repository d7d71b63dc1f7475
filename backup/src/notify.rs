use async_trait::async_trait;
use log::{info, warn};
use reqwest::Client;
use std::time::Duration;

use crate::ports::{Notification, Notifier};
use crate::BackupError;

/// POSTs each notification as JSON to every configured URL.
pub struct WebhookNotifier {
    client: Client,
    urls: Vec<String>,
}

impl WebhookNotifier {
    pub fn new(urls: Vec<String>, timeout: Duration) -> Result<Self, BackupError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackupError::Configuration(format!("webhook client: {e}")))?;
        Ok(Self { client, urls })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), BackupError> {
        let mut failures = Vec::new();

        for url in &self.urls {
            match self.client.post(url).json(notification).send().await {
                Ok(response) if response.status().is_success() => {
                    info!("Notified {} about task {}", url, notification.task_id);
                }
                Ok(response) => {
                    warn!("Webhook {} answered {}", url, response.status());
                    failures.push(format!("{url}: HTTP {}", response.status().as_u16()));
                }
                Err(e) => {
                    warn!("Webhook {} failed: {}", url, e);
                    failures.push(format!("{url}: {e}"));
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(BackupError::Connection(format!(
                "notification delivery failed: {}",
                failures.join("; ")
            )))
        }
    }
}
