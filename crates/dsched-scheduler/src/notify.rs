//! Failure notification sinks.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dsched_core::AppConfig;
use serde::Serialize;

use crate::NotifyError;

/// Receives failure alerts. Delivery is best effort; the execution handler
/// logs and discards any error returned here.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, title: &str, message: &str) -> Result<(), NotifyError>;
}

/// Emits alerts as `error` level log events.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, title: &str, message: &str) -> Result<(), NotifyError> {
        tracing::error!(title, message, "scheduler: alert");
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct WebhookAlert<'a> {
    title: &'a str,
    message: &'a str,
    level: &'static str,
    source: &'static str,
    timestamp: String,
}

/// POSTs alerts as JSON to a chat or alerting webhook.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    /// # Errors
    ///
    /// Returns [`NotifyError::Http`] if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, title: &str, message: &str) -> Result<(), NotifyError> {
        let alert = WebhookAlert {
            title,
            message,
            level: "error",
            source: "scheduler",
            timestamp: Utc::now().to_rfc3339(),
        };

        let response = self.client.post(&self.url).json(&alert).send().await?;
        if !response.status().is_success() {
            return Err(NotifyError::UnexpectedStatus {
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }
}

/// Webhook delivery when `notify_webhook_url` is set, log-only otherwise.
///
/// # Errors
///
/// Returns [`NotifyError::Http`] if the webhook client cannot be built.
pub fn notifier_from_config(config: &AppConfig) -> Result<Arc<dyn Notifier>, NotifyError> {
    match &config.notify_webhook_url {
        Some(url) => {
            let timeout = Duration::from_secs(config.notify_timeout_secs);
            Ok(Arc::new(WebhookNotifier::new(url.clone(), timeout)?))
        }
        None => Ok(Arc::new(LogNotifier)),
    }
}
