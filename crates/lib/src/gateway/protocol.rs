//! Gateway HTTP wire types.

use crate::channels::{MediaAttachment, UserConnection};
use serde::{Deserialize, Serialize};

/// Body of `POST /raccoonai/send`. Presence of the required fields is checked by the
/// handler so a missing field answers 400 rather than failing to parse.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundPayload {
    #[serde(default)]
    pub integration_id: Option<String>,
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    /// Required only when more than one user is connected.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Only the first item is sent.
    #[serde(default)]
    pub media: Option<Vec<MediaAttachment>>,
}

impl OutboundPayload {
    pub fn first_media(&self) -> Option<&MediaAttachment> {
        self.media.as_ref().and_then(|m| m.first())
    }
}

/// Body of `GET /raccoonai/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub initialized: bool,
    pub connections: Vec<UserConnection>,
}
