//! WhatsApp channel: protocol seam, per-user sessions and the connection manager.
//!
//! The manager owns one [`Session`] per user. Each session consumes its connection's event
//! stream, normalizes inbound messages and hands them to the registered [`MessageHandler`].

mod inbound;
mod manager;
mod memory;
mod nonfatal;
mod outbound;
mod protocol;
mod session;

pub use inbound::{
    is_broadcast_jid, is_group_jid, normalize, phone_from_jid, to_jid, ChatType, InboundMessage,
    InboundMetadata, MessageHandler, INTEGRATION_ID,
};
pub use manager::{ConnectError, ConnectionManager};
pub use memory::{MemoryConnector, MemorySocket, SentMessage};
pub use nonfatal::best_effort;
pub use outbound::{
    build_content, media_kind_from_url, MediaAttachment, MediaKind, OutgoingContent, SendResult,
};
pub use protocol::{
    CaptionedMessage, ConnectionEvent, DisconnectReason, ExtendedTextMessage, MessageContent,
    MessageKey, ProtocolConnection, ProtocolConnector, ProtocolError, ProtocolSocket, RawMessage,
};
pub use session::{
    ConnectionStatus, Session, UserConnection, MAX_RECONNECT_ATTEMPTS, RECONNECT_DELAY,
};
