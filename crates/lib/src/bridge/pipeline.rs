//! Message handler that forwards every inbound message to the webhook.

use crate::bridge::forwarder::Forwarder;
use crate::channels::{InboundMessage, MessageHandler};
use async_trait::async_trait;

pub struct WebhookPipeline {
    forwarder: Forwarder,
}

impl WebhookPipeline {
    pub fn new(forwarder: Forwarder) -> Self {
        Self { forwarder }
    }
}

#[async_trait]
impl MessageHandler for WebhookPipeline {
    async fn on_message(&self, message: InboundMessage) -> anyhow::Result<()> {
        let result = self.forwarder.forward(&message).await;
        if result.success {
            log::info!(
                "forwarded message from {} (user {}) to webhook, session {}",
                message.from,
                message.user_id,
                result.session_id.as_deref().unwrap_or("-")
            );
        } else {
            log::warn!(
                "forwarding message from {} (user {}) failed: {}",
                message.from,
                message.user_id,
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
        Ok(())
    }
}
