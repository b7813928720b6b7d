//! Webhook-backed operator channel

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::{NotifyError, OperatorChannel, OrderNotification};

/// Response body the webhook may return
#[derive(Debug, Deserialize)]
struct WebhookReply {
    #[serde(default)]
    message_ref: Option<String>,
}

/// Delivers notifications as JSON POSTs to a configured URL
pub struct WebhookChannel {
    client: reqwest::Client,
    url: String,
}

impl WebhookChannel {
    pub fn new(url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { client, url }
    }
}

#[async_trait]
impl OperatorChannel for WebhookChannel {
    async fn deliver(
        &self,
        notification: &OrderNotification,
    ) -> Result<Option<String>, NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(notification)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Rejected(status.as_u16()));
        }

        // The channel may answer with a handle to the mirrored message;
        // an empty or unparseable body just means no handle.
        let reply: WebhookReply = response
            .json()
            .await
            .unwrap_or(WebhookReply { message_ref: None });
        Ok(reply.message_ref)
    }
}

/// No-op channel used when no webhook is configured
pub struct NullChannel;

#[async_trait]
impl OperatorChannel for NullChannel {
    async fn deliver(
        &self,
        notification: &OrderNotification,
    ) -> Result<Option<String>, NotifyError> {
        tracing::debug!(order_id = notification.order_id(), "notification dropped (no channel configured)");
        Ok(None)
    }
}
