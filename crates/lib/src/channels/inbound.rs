//! Inbound message from a session: normalized from the raw protocol message and delivered
//! to the registered [`MessageHandler`].

use crate::channels::protocol::{MessageContent, RawMessage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Integration tag carried by every inbound message and expected on outbound requests.
pub const INTEGRATION_ID: &str = "whatsapp";

const GROUP_SUFFIX: &str = "@g.us";
const BROADCAST_SUFFIX: &str = "@broadcast";
const USER_SERVER: &str = "@s.whatsapp.net";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    Direct,
    Group,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMetadata {
    pub conversation_id: String,
    pub chat_type: ChatType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

/// A normalized message; also the JSON body posted to the webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub user_id: String,
    pub integration_id: String,
    pub chat_id: String,
    pub from: String,
    pub text: String,
    /// Epoch milliseconds.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<InboundMetadata>,
}

impl InboundMessage {
    pub fn chat_type(&self) -> Option<ChatType> {
        self.metadata.as_ref().map(|m| m.chat_type)
    }
}

/// Downstream consumer of every session's inbound messages.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn on_message(&self, message: InboundMessage) -> anyhow::Result<()>;
}

pub fn is_group_jid(jid: &str) -> bool {
    jid.ends_with(GROUP_SUFFIX)
}

pub fn is_broadcast_jid(jid: &str) -> bool {
    jid.ends_with(BROADCAST_SUFFIX)
}

/// Phone-like prefix of a jid: the part before `@`, cut at any `:` device suffix.
pub fn phone_from_jid(jid: &str) -> Option<String> {
    let user = jid.split('@').next().unwrap_or("");
    let phone = user.split(':').next().unwrap_or("");
    if phone.is_empty() {
        None
    } else {
        Some(phone.to_string())
    }
}

/// Address for sending: bare numbers get the user server suffix.
pub fn to_jid(chat_id: &str) -> String {
    if chat_id.contains('@') {
        chat_id.to_string()
    } else {
        format!("{}{}", chat_id, USER_SERVER)
    }
}

fn non_empty(s: Option<&String>) -> Option<&str> {
    s.map(String::as_str).filter(|t| !t.is_empty())
}

/// First non-empty text among body, extended text, image caption, video caption.
pub fn extract_text(content: &MessageContent) -> Option<&str> {
    non_empty(content.conversation.as_ref())
        .or_else(|| {
            content
                .extended_text_message
                .as_ref()
                .and_then(|m| non_empty(m.text.as_ref()))
        })
        .or_else(|| {
            content
                .image_message
                .as_ref()
                .and_then(|m| non_empty(m.caption.as_ref()))
        })
        .or_else(|| {
            content
                .video_message
                .as_ref()
                .and_then(|m| non_empty(m.caption.as_ref()))
        })
}

/// Normalize a raw message. Returns `None` for messages that must not reach the handler:
/// no conversation id, broadcast/status, sent by this account, or no usable text.
/// The group subject is left unset; the session looks it up separately.
pub fn normalize(user_id: &str, raw: &RawMessage, now_ms: i64) -> Option<InboundMessage> {
    let chat_id = raw.key.remote_jid.as_deref().filter(|j| !j.is_empty())?;
    if is_broadcast_jid(chat_id) {
        return None;
    }
    if raw.key.from_me {
        return None;
    }
    let text = raw.message.as_ref().and_then(extract_text)?;
    if text.trim().is_empty() {
        return None;
    }

    let chat_type = if is_group_jid(chat_id) {
        ChatType::Group
    } else {
        ChatType::Direct
    };
    let sender_raw = match chat_type {
        ChatType::Group => raw.key.participant.as_deref().unwrap_or(chat_id),
        ChatType::Direct => chat_id,
    };
    let from = phone_from_jid(sender_raw).unwrap_or_else(|| chat_id.to_string());
    let timestamp = raw
        .message_timestamp
        .and_then(|secs| i64::try_from(secs).ok())
        .and_then(|secs| secs.checked_mul(1000))
        .unwrap_or(now_ms);

    Some(InboundMessage {
        user_id: user_id.to_string(),
        integration_id: INTEGRATION_ID.to_string(),
        chat_id: chat_id.to_string(),
        from,
        text: text.to_string(),
        timestamp,
        metadata: Some(InboundMetadata {
            conversation_id: chat_id.to_string(),
            chat_type,
            sender_name: raw.push_name.clone().filter(|n| !n.is_empty()),
            sender_id: Some(sender_raw.to_string()),
            group_subject: None,
            message_id: raw.key.id.clone(),
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::protocol::{CaptionedMessage, ExtendedTextMessage, MessageKey};

    fn text_message(jid: &str, text: &str) -> RawMessage {
        RawMessage {
            key: MessageKey {
                remote_jid: Some(jid.to_string()),
                from_me: false,
                id: Some("MSG1".to_string()),
                participant: None,
            },
            message: Some(MessageContent {
                conversation: Some(text.to_string()),
                ..Default::default()
            }),
            push_name: Some("Ann".to_string()),
            message_timestamp: Some(1_700_000_000),
        }
    }

    #[test]
    fn phone_from_jid_strips_device_and_server() {
        assert_eq!(phone_from_jid("15551234567:12@s.whatsapp.net").as_deref(), Some("15551234567"));
        assert_eq!(phone_from_jid("15551234567@s.whatsapp.net").as_deref(), Some("15551234567"));
        assert_eq!(phone_from_jid("@s.whatsapp.net"), None);
        assert_eq!(phone_from_jid(""), None);
    }

    #[test]
    fn to_jid_appends_server_for_bare_numbers() {
        assert_eq!(to_jid("15551234567"), "15551234567@s.whatsapp.net");
        assert_eq!(to_jid("123@x"), "123@x");
    }

    #[test]
    fn direct_message_normalizes() {
        let msg = normalize("u1", &text_message("15551234567@s.whatsapp.net", "hi"), 0).unwrap();
        assert_eq!(msg.user_id, "u1");
        assert_eq!(msg.integration_id, "whatsapp");
        assert_eq!(msg.chat_id, "15551234567@s.whatsapp.net");
        assert_eq!(msg.from, "15551234567");
        assert_eq!(msg.text, "hi");
        assert_eq!(msg.timestamp, 1_700_000_000_000);
        let meta = msg.metadata.unwrap();
        assert_eq!(meta.chat_type, ChatType::Direct);
        assert_eq!(meta.sender_name.as_deref(), Some("Ann"));
        assert_eq!(meta.message_id.as_deref(), Some("MSG1"));
    }

    #[test]
    fn group_sender_comes_from_participant() {
        let mut raw = text_message("120363@g.us", "hello group");
        raw.key.participant = Some("4915112345678:3@s.whatsapp.net".to_string());
        let msg = normalize("u1", &raw, 0).unwrap();
        assert_eq!(msg.chat_type(), Some(ChatType::Group));
        assert_eq!(msg.from, "4915112345678");
        assert_eq!(
            msg.metadata.unwrap().sender_id.as_deref(),
            Some("4915112345678:3@s.whatsapp.net")
        );
    }

    #[test]
    fn missing_timestamp_uses_now() {
        let mut raw = text_message("1@s.whatsapp.net", "hi");
        raw.message_timestamp = None;
        assert_eq!(normalize("u1", &raw, 42).unwrap().timestamp, 42);
    }

    #[test]
    fn discards_unaddressable_broadcast_self_and_empty() {
        let mut no_jid = text_message("x", "hi");
        no_jid.key.remote_jid = None;
        assert!(normalize("u1", &no_jid, 0).is_none());

        assert!(normalize("u1", &text_message("status@broadcast", "hi"), 0).is_none());

        let mut mine = text_message("1@s.whatsapp.net", "hi");
        mine.key.from_me = true;
        assert!(normalize("u1", &mine, 0).is_none());

        assert!(normalize("u1", &text_message("1@s.whatsapp.net", "   \n"), 0).is_none());

        let mut no_content = text_message("1@s.whatsapp.net", "hi");
        no_content.message = None;
        assert!(normalize("u1", &no_content, 0).is_none());
    }

    #[test]
    fn text_falls_through_empty_fields() {
        let content = MessageContent {
            conversation: Some(String::new()),
            extended_text_message: Some(ExtendedTextMessage { text: None }),
            image_message: Some(CaptionedMessage {
                caption: Some("photo caption".to_string()),
            }),
            video_message: Some(CaptionedMessage {
                caption: Some("video caption".to_string()),
            }),
        };
        assert_eq!(extract_text(&content), Some("photo caption"));
    }

    #[test]
    fn out_of_range_timestamp_falls_back_to_now() {
        let mut raw = text_message("1@s.whatsapp.net", "hi");
        raw.message_timestamp = Some(u64::MAX / 2);
        assert_eq!(normalize("u1", &raw, 42).unwrap().timestamp, 42);
        raw.message_timestamp = Some(u64::MAX);
        assert_eq!(normalize("u1", &raw, 42).unwrap().timestamp, 42);
        raw.message_timestamp = Some(1_700_000_000);
        assert_eq!(normalize("u1", &raw, 42).unwrap().timestamp, 1_700_000_000_000);
    }

    #[test]
    fn webhook_payload_shape() {
        let msg = normalize("u1", &text_message("1@s.whatsapp.net", "hi"), 0).unwrap();
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["userId"], "u1");
        assert_eq!(v["integrationId"], "whatsapp");
        assert_eq!(v["metadata"]["chatType"], "direct");
        assert_eq!(v["metadata"]["conversationId"], "1@s.whatsapp.net");
        assert!(v["metadata"].get("groupSubject").is_none());
    }
}
