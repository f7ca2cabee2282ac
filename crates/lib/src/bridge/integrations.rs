//! Raccoon API client: lists user <-> integration credential bindings.

use crate::config::BridgeConfig;
use crate::credentials::Credentials;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

const INTEGRATIONS_PATH: &str = "/i/moltbot/integrations";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum IntegrationsError {
    #[error("Raccoon API URL not configured")]
    NotConfigured,
    #[error("integrations request failed: HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("integrations request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid integrations response: {0}")]
    Decode(String),
}

/// Optional per-integration metadata. Unknown fields are kept.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationMetadata {
    #[serde(default, alias = "phoneNumber")]
    pub phone: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl IntegrationMetadata {
    pub fn phone(&self) -> Option<&str> {
        self.phone.as_deref().map(str::trim).filter(|p| !p.is_empty())
    }
}

/// One user's binding to an integration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Integration {
    pub user_id: String,
    pub integration_id: String,
    #[serde(default)]
    pub credentials: Option<Credentials>,
    #[serde(default)]
    pub metadata: Option<IntegrationMetadata>,
}

#[derive(Debug, Deserialize)]
struct IntegrationsResponse {
    #[serde(default)]
    integrations: Vec<Integration>,
}

#[derive(Clone)]
pub struct IntegrationsClient {
    config: Arc<BridgeConfig>,
    client: reqwest::Client,
}

impl IntegrationsClient {
    pub fn new(config: Arc<BridgeConfig>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                log::warn!("integrations: building HTTP client failed ({}), using defaults", e);
                reqwest::Client::new()
            });
        Self { config, client }
    }

    /// `GET {apiUrl}/i/moltbot/integrations`.
    pub async fn fetch(&self) -> Result<Vec<Integration>, IntegrationsError> {
        let base = self
            .config
            .raccoon_api_url
            .as_deref()
            .ok_or(IntegrationsError::NotConfigured)?;
        let url = format!("{}{}", base.trim_end_matches('/'), INTEGRATIONS_PATH);
        let res = self.client.get(&url).send().await?;
        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(IntegrationsError::Http { status, body });
        }
        let data: IntegrationsResponse = res
            .json()
            .await
            .map_err(|e| IntegrationsError::Decode(e.to_string()))?;
        log::debug!("integrations: fetched {} binding(s)", data.integrations.len());
        Ok(data.integrations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(api: Option<String>) -> IntegrationsClient {
        IntegrationsClient::new(Arc::new(BridgeConfig {
            webhook_url: None,
            raccoon_api_url: api,
            enabled: true,
        }))
    }

    #[tokio::test]
    async fn fetch_parses_bindings() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/i/moltbot/integrations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "integrations": [
                    {
                        "userId": "u1",
                        "integrationId": "whatsapp",
                        "credentials": { "creds": { "me": { "id": "1@s.whatsapp.net" } } },
                        "metadata": { "phoneNumber": "+1 555", "label": "work" }
                    },
                    { "userId": "u2", "integrationId": "telegram" }
                ]
            })))
            .mount(&server)
            .await;

        let list = client(Some(format!("{}/", server.uri()))).fetch().await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].user_id, "u1");
        let meta = list[0].metadata.as_ref().unwrap();
        assert_eq!(meta.phone(), Some("+1 555"));
        assert_eq!(meta.extra["label"], "work");
        assert!(list[1].credentials.is_none());
    }

    #[tokio::test]
    async fn fetch_without_api_url_fails_fast() {
        let err = client(None).fetch().await.unwrap_err();
        assert!(matches!(err, IntegrationsError::NotConfigured));
    }

    #[tokio::test]
    async fn fetch_reports_http_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let err = client(Some(server.uri())).fetch().await.unwrap_err();
        match err {
            IntegrationsError::Http { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "maintenance");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
