//! Forwarder: posts normalized inbound messages to the configured webhook. Single attempt,
//! no retry; every failure comes back as a structured [`ForwardResult`].

use crate::channels::InboundMessage;
use crate::config::BridgeConfig;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Upper bound for one webhook round trip. The session awaits delivery inline, so a
/// webhook that never answers must not hold its event loop.
pub const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ForwardResult {
    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            session_id: None,
            session_url: None,
            error: Some(error.into()),
        }
    }
}

/// Webhook acknowledgement; every field optional.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebhookAck {
    #[serde(default = "default_true")]
    success: bool,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    session_url: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Clone)]
pub struct Forwarder {
    config: Arc<BridgeConfig>,
    client: reqwest::Client,
}

impl Forwarder {
    pub fn new(config: Arc<BridgeConfig>) -> Self {
        Self::with_timeout(config, WEBHOOK_TIMEOUT)
    }

    pub fn with_timeout(config: Arc<BridgeConfig>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                log::warn!("forwarder: building HTTP client failed ({}), using defaults", e);
                reqwest::Client::new()
            });
        Self { config, client }
    }

    pub async fn forward(&self, message: &InboundMessage) -> ForwardResult {
        if !self.config.enabled {
            return ForwardResult::failed("Bridge is disabled");
        }
        let Some(url) = self.config.webhook_url.as_deref() else {
            return ForwardResult::failed("Webhook URL not configured");
        };

        let res = match self.client.post(url).json(message).send().await {
            Ok(res) => res,
            Err(e) => {
                log::warn!("forwarder: POST {} failed: {}", url, e);
                return ForwardResult::failed(e.to_string());
            }
        };
        let status = res.status();
        if !status.is_success() {
            let body = res
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            log::warn!("forwarder: webhook answered {}: {}", status.as_u16(), body);
            return ForwardResult::failed(format!("HTTP {}: {}", status.as_u16(), body));
        }

        let ack = res
            .json::<WebhookAck>()
            .await
            .unwrap_or(WebhookAck {
                success: true,
                session_id: None,
                session_url: None,
                error: None,
            });
        ForwardResult {
            success: ack.success,
            session_id: ack.session_id,
            session_url: ack.session_url,
            error: ack.error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{ChatType, InboundMetadata};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn message() -> InboundMessage {
        InboundMessage {
            user_id: "u1".to_string(),
            integration_id: "whatsapp".to_string(),
            chat_id: "1@s.whatsapp.net".to_string(),
            from: "1".to_string(),
            text: "hello".to_string(),
            timestamp: 1_700_000_000_000,
            metadata: Some(InboundMetadata {
                conversation_id: "1@s.whatsapp.net".to_string(),
                chat_type: ChatType::Direct,
                sender_name: None,
                sender_id: Some("1@s.whatsapp.net".to_string()),
                group_subject: None,
                message_id: Some("M1".to_string()),
            }),
        }
    }

    fn forwarder(webhook: Option<String>, enabled: bool) -> Forwarder {
        Forwarder::new(Arc::new(BridgeConfig {
            webhook_url: webhook,
            raccoon_api_url: None,
            enabled,
        }))
    }

    #[tokio::test]
    async fn disabled_bridge_makes_no_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let res = forwarder(Some(server.uri()), false).forward(&message()).await;
        assert_eq!(res, ForwardResult::failed("Bridge is disabled"));
    }

    #[tokio::test]
    async fn missing_webhook_fails_fast() {
        let res = forwarder(None, true).forward(&message()).await;
        assert!(!res.success);
        assert_eq!(res.error.as_deref(), Some("Webhook URL not configured"));
    }

    #[tokio::test]
    async fn posts_payload_and_reads_ack() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_partial_json(serde_json::json!({
                "userId": "u1",
                "integrationId": "whatsapp",
                "chatId": "1@s.whatsapp.net",
                "text": "hello",
                "metadata": { "chatType": "direct" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sessionId": "s-1",
                "sessionUrl": "https://raccoon.example/s-1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let res = forwarder(Some(format!("{}/hook", server.uri())), true)
            .forward(&message())
            .await;
        assert!(res.success);
        assert_eq!(res.session_id.as_deref(), Some("s-1"));
        assert_eq!(res.session_url.as_deref(), Some("https://raccoon.example/s-1"));
    }

    #[tokio::test]
    async fn non_json_success_body_still_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(202).set_body_string("accepted"))
            .mount(&server)
            .await;

        let res = forwarder(Some(server.uri()), true).forward(&message()).await;
        assert!(res.success);
        assert!(res.session_id.is_none());
    }

    #[tokio::test]
    async fn http_error_embeds_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("oops"))
            .mount(&server)
            .await;

        let res = forwarder(Some(server.uri()), true).forward(&message()).await;
        assert_eq!(res, ForwardResult::failed("HTTP 500: oops"));
    }

    #[tokio::test]
    async fn unresponsive_webhook_times_out_as_structured_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let forwarder = Forwarder::with_timeout(
            Arc::new(BridgeConfig {
                webhook_url: Some(server.uri()),
                raccoon_api_url: None,
                enabled: true,
            }),
            Duration::from_millis(100),
        );
        let started = std::time::Instant::now();
        let res = forwarder.forward(&message()).await;
        assert!(started.elapsed() < Duration::from_secs(4));
        assert!(!res.success);
        assert!(res.error.is_some());
    }

    #[tokio::test]
    async fn network_error_is_structured() {
        let res = forwarder(Some("http://127.0.0.1:1/hook".to_string()), true)
            .forward(&message())
            .await;
        assert!(!res.success);
        assert!(res.error.is_some());
    }
}
