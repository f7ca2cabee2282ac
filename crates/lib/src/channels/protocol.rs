//! Protocol connection seam: the messaging-network client is provided by a library with a
//! socket-like API. A connector opens one connection per user and hands back the socket
//! plus a typed event stream; the session consumes that stream.

use crate::channels::outbound::OutgoingContent;
use crate::credentials::Credentials;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("connection is not open")]
    NotConnected,
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("send failed: {0}")]
    Send(String),
    #[error("{0}")]
    Other(String),
}

/// Events emitted by one protocol connection, in order.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// Handshake completed; the socket is authenticated.
    Opened,
    /// Connection closed. `reason_code` is the protocol's disconnect status code, if any.
    Closed { reason_code: Option<u16> },
    /// The library rotated credentials; they must be persisted.
    CredentialsUpdated { creds: Credentials },
    /// One received message.
    MessageReceived { raw: RawMessage },
}

/// Close reasons the session distinguishes. Codes follow the protocol's disconnect statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    LoggedOut,
    ConnectionLost,
    ConnectionReplaced,
    RestartRequired,
    Other(u16),
    Unknown,
}

impl DisconnectReason {
    pub fn from_code(code: Option<u16>) -> Self {
        match code {
            Some(401) => Self::LoggedOut,
            Some(408) => Self::ConnectionLost,
            Some(440) => Self::ConnectionReplaced,
            Some(515) => Self::RestartRequired,
            Some(c) => Self::Other(c),
            None => Self::Unknown,
        }
    }

    /// Whether the session should schedule an automatic reconnect (subject to the attempt cap).
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::RestartRequired | Self::ConnectionReplaced | Self::ConnectionLost
        )
    }

    /// Error label recorded on the session for a non-recoverable close.
    pub fn label(self) -> String {
        match self {
            Self::LoggedOut => "logged_out".to_string(),
            Self::ConnectionLost => "disconnect_408".to_string(),
            Self::ConnectionReplaced => "disconnect_440".to_string(),
            Self::RestartRequired => "disconnect_515".to_string(),
            Self::Other(c) => format!("disconnect_{}", c),
            Self::Unknown => "disconnect_unknown".to_string(),
        }
    }
}

/// Addressing part of a received message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageKey {
    #[serde(default)]
    pub remote_jid: Option<String>,
    #[serde(default)]
    pub from_me: bool,
    #[serde(default)]
    pub id: Option<String>,
    /// Sender within a group conversation.
    #[serde(default)]
    pub participant: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendedTextMessage {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptionedMessage {
    #[serde(default)]
    pub caption: Option<String>,
}

/// Content variants the bridge reads text from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageContent {
    #[serde(default)]
    pub conversation: Option<String>,
    #[serde(default)]
    pub extended_text_message: Option<ExtendedTextMessage>,
    #[serde(default)]
    pub image_message: Option<CaptionedMessage>,
    #[serde(default)]
    pub video_message: Option<CaptionedMessage>,
}

/// A message as delivered by the protocol library.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    #[serde(default)]
    pub key: MessageKey,
    #[serde(default)]
    pub message: Option<MessageContent>,
    /// Sender display name.
    #[serde(default)]
    pub push_name: Option<String>,
    /// Seconds since epoch.
    #[serde(default)]
    pub message_timestamp: Option<u64>,
}

/// An open protocol connection.
#[async_trait]
pub trait ProtocolSocket: Send + Sync {
    /// Identity of the authenticated account (e.g. `15551234567:2@s.whatsapp.net`), once known.
    fn own_jid(&self) -> Option<String>;

    async fn send_presence_available(&self) -> Result<(), ProtocolError>;

    async fn read_messages(&self, keys: &[MessageKey]) -> Result<(), ProtocolError>;

    /// Display subject of a group conversation.
    async fn group_subject(&self, jid: &str) -> Result<String, ProtocolError>;

    /// Send content to a conversation; returns the message id when the library reports one.
    async fn send_message(
        &self,
        jid: &str,
        content: OutgoingContent,
    ) -> Result<Option<String>, ProtocolError>;

    async fn close(&self) -> Result<(), ProtocolError>;
}

/// A freshly opened connection: the socket and its event stream.
pub struct ProtocolConnection {
    pub socket: Arc<dyn ProtocolSocket>,
    pub events: mpsc::Receiver<ConnectionEvent>,
}

/// Opens protocol connections using the credentials stored in `auth_dir`.
#[async_trait]
pub trait ProtocolConnector: Send + Sync {
    async fn connect(
        &self,
        user_id: &str,
        auth_dir: &Path,
    ) -> Result<ProtocolConnection, ProtocolError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_codes() {
        assert!(DisconnectReason::from_code(Some(515)).is_transient());
        assert!(DisconnectReason::from_code(Some(440)).is_transient());
        assert!(DisconnectReason::from_code(Some(408)).is_transient());
        assert!(!DisconnectReason::from_code(Some(401)).is_transient());
        assert!(!DisconnectReason::from_code(Some(500)).is_transient());
        assert!(!DisconnectReason::from_code(None).is_transient());
    }

    #[test]
    fn labels() {
        assert_eq!(DisconnectReason::from_code(Some(401)).label(), "logged_out");
        assert_eq!(DisconnectReason::from_code(Some(500)).label(), "disconnect_500");
        assert_eq!(DisconnectReason::from_code(None).label(), "disconnect_unknown");
    }

    #[test]
    fn raw_message_from_library_json() {
        let raw: RawMessage = serde_json::from_value(serde_json::json!({
            "key": { "remoteJid": "123@g.us", "fromMe": false, "id": "ABC", "participant": "555:1@s.whatsapp.net" },
            "message": { "extendedTextMessage": { "text": "hello" } },
            "pushName": "Ann",
            "messageTimestamp": 1700000000
        }))
        .unwrap();
        assert_eq!(raw.key.remote_jid.as_deref(), Some("123@g.us"));
        assert_eq!(raw.key.participant.as_deref(), Some("555:1@s.whatsapp.net"));
        assert_eq!(raw.message_timestamp, Some(1_700_000_000));
        assert_eq!(
            raw.message
                .and_then(|m| m.extended_text_message)
                .and_then(|e| e.text)
                .as_deref(),
            Some("hello")
        );
    }
}
