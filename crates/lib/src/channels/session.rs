//! Per-user session: owns one protocol connection, consumes its event stream and tracks
//! the connection lifecycle.
//!
//! `connecting -> connected -> (disconnected | error)`. Transient closes reconnect after a
//! fixed delay, at most [`MAX_RECONNECT_ATTEMPTS`] times in a row; a logout is terminal.
//! Each reconnect installs a new socket and bumps a generation counter so events from a
//! replaced socket are ignored.

use crate::channels::inbound::{
    normalize, phone_from_jid, to_jid, ChatType, InboundMessage, MessageHandler,
};
use crate::channels::nonfatal::best_effort;
use crate::channels::outbound::{build_content, MediaAttachment, SendResult};
use crate::channels::protocol::{
    ConnectionEvent, DisconnectReason, ProtocolConnection, ProtocolConnector, ProtocolError,
    ProtocolSocket, RawMessage,
};
use crate::credentials::{CredentialStore, Credentials};
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;

pub const MAX_RECONNECT_ATTEMPTS: u32 = 3;
pub const RECONNECT_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
    Error,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Snapshot of one user's session, as reported by status queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserConnection {
    pub user_id: String,
    pub status: ConnectionStatus,
    /// Local path; never reported over HTTP.
    #[serde(skip_serializing, default)]
    pub auth_dir: PathBuf,
    #[serde(default)]
    pub phone: Option<String>,
    /// Last failure reason, e.g. `logged_out` or `disconnect_500`.
    #[serde(default)]
    pub error: Option<String>,
    pub reconnect_attempts: u32,
    #[serde(default)]
    pub last_connected_at: Option<DateTime<Utc>>,
}

/// Shared slot for the downstream handler; set once by the manager, read by every session.
pub(crate) type HandlerSlot = Arc<RwLock<Option<Arc<dyn MessageHandler>>>>;

#[derive(Clone)]
pub(crate) struct SessionDeps {
    pub connector: Arc<dyn ProtocolConnector>,
    pub store: CredentialStore,
    pub handler: HandlerSlot,
    pub reconnect_delay: Duration,
}

struct SessionState {
    conn: UserConnection,
    socket: Option<Arc<dyn ProtocolSocket>>,
    generation: u64,
}

pub struct Session {
    user_id: String,
    deps: SessionDeps,
    state: RwLock<SessionState>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
    reconnect: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Session {
    pub(crate) fn new(
        user_id: &str,
        auth_dir: PathBuf,
        phone: Option<String>,
        deps: SessionDeps,
    ) -> Arc<Self> {
        Arc::new(Self {
            user_id: user_id.to_string(),
            deps,
            state: RwLock::new(SessionState {
                conn: UserConnection {
                    user_id: user_id.to_string(),
                    status: ConnectionStatus::Connecting,
                    auth_dir,
                    phone,
                    error: None,
                    reconnect_attempts: 0,
                    last_connected_at: None,
                },
                socket: None,
                generation: 0,
            }),
            event_loop: Mutex::new(None),
            reconnect: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub async fn snapshot(&self) -> UserConnection {
        self.state.read().await.conn.clone()
    }

    pub async fn status(&self) -> ConnectionStatus {
        self.state.read().await.conn.status
    }

    pub async fn phone(&self) -> Option<String> {
        self.state.read().await.conn.phone.clone()
    }

    /// True once the session has been torn down; a closed session never reconnects.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn is_current(&self, generation: u64) -> bool {
        self.state.read().await.generation == generation
    }

    /// Open a new protocol connection, replacing any previous socket, and start consuming
    /// its events. Boxed: the reconnect timer re-enters here from the event loop.
    pub(crate) fn open(self: &Arc<Self>) -> BoxFuture<'static, Result<(), ProtocolError>> {
        Arc::clone(self).open_connection().boxed()
    }

    async fn open_connection(self: Arc<Self>) -> Result<(), ProtocolError> {
        if self.is_closed() {
            return Ok(());
        }
        let auth_dir = self.state.read().await.conn.auth_dir.clone();
        let ProtocolConnection { socket, events } =
            match self.deps.connector.connect(&self.user_id, &auth_dir).await {
                Ok(c) => c,
                Err(e) => {
                    let mut st = self.state.write().await;
                    st.conn.status = ConnectionStatus::Disconnected;
                    st.conn.error = Some("connect_failed".to_string());
                    st.socket = None;
                    return Err(e);
                }
            };

        let (generation, previous) = {
            let mut st = self.state.write().await;
            if self.is_closed() {
                drop(st);
                best_effort("close socket of torn-down session", socket.close()).await;
                return Ok(());
            }
            st.generation += 1;
            st.conn.status = ConnectionStatus::Connecting;
            (st.generation, st.socket.replace(socket))
        };
        if let Some(old) = previous {
            best_effort("close replaced socket", old.close()).await;
        }

        let session = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            session.run_events(generation, events).await;
        });
        let mut slot = self.event_loop.lock().await;
        if let Some(old) = slot.replace(handle) {
            old.abort();
        }
        if self.is_closed() {
            if let Some(h) = slot.take() {
                h.abort();
            }
        }
        log::debug!("session {}: connection {} opening", self.user_id, generation);
        Ok(())
    }

    async fn run_events(
        self: Arc<Self>,
        generation: u64,
        mut events: mpsc::Receiver<ConnectionEvent>,
    ) {
        while let Some(event) = events.recv().await {
            if self.is_closed() || !self.is_current(generation).await {
                return;
            }
            let is_close = matches!(event, ConnectionEvent::Closed { .. });
            if AssertUnwindSafe(self.handle_event(event))
                .catch_unwind()
                .await
                .is_err()
            {
                log::error!("session {}: event handling panicked, event dropped", self.user_id);
            }
            if is_close {
                return;
            }
        }
        if !self.is_closed() && self.is_current(generation).await {
            log::debug!("session {}: event stream ended without close", self.user_id);
            self.on_closed(None).await;
        }
    }

    async fn handle_event(self: &Arc<Self>, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Opened => self.on_opened().await,
            ConnectionEvent::Closed { reason_code } => self.on_closed(reason_code).await,
            ConnectionEvent::CredentialsUpdated { creds } => self.persist_credentials(&creds).await,
            ConnectionEvent::MessageReceived { raw } => self.on_message(raw).await,
        }
    }

    async fn on_opened(&self) {
        let socket = {
            let mut st = self.state.write().await;
            let Some(socket) = st.socket.clone() else {
                return;
            };
            st.conn.status = ConnectionStatus::Connected;
            st.conn.reconnect_attempts = 0;
            st.conn.error = None;
            st.conn.last_connected_at = Some(Utc::now());
            if let Some(phone) = socket.own_jid().as_deref().and_then(phone_from_jid) {
                st.conn.phone = Some(phone);
            }
            socket
        };
        log::info!("session {}: connected", self.user_id);
        best_effort("presence update", socket.send_presence_available()).await;
    }

    async fn on_closed(self: &Arc<Self>, reason_code: Option<u16>) {
        let reason = DisconnectReason::from_code(reason_code);
        let (socket, retry_attempt) = {
            let mut st = self.state.write().await;
            let socket = st.socket.take();
            let conn = &mut st.conn;
            let retry = reason.is_transient()
                && conn.reconnect_attempts < MAX_RECONNECT_ATTEMPTS
                && conn.status != ConnectionStatus::Error;
            if retry {
                conn.reconnect_attempts += 1;
                conn.status = ConnectionStatus::Connecting;
                conn.error = Some(reason.label());
            } else if reason == DisconnectReason::LoggedOut {
                conn.status = ConnectionStatus::Error;
                conn.error = Some(reason.label());
            } else {
                conn.status = ConnectionStatus::Disconnected;
                conn.error = Some(reason.label());
            }
            (socket, retry.then_some(conn.reconnect_attempts))
        };
        if let Some(socket) = socket {
            best_effort("close socket", socket.close()).await;
        }
        match retry_attempt {
            Some(attempt) => {
                log::info!(
                    "session {}: connection closed ({}), reconnect {}/{} in {:?}",
                    self.user_id,
                    reason.label(),
                    attempt,
                    MAX_RECONNECT_ATTEMPTS,
                    self.deps.reconnect_delay
                );
                self.schedule_reconnect().await;
            }
            None if reason == DisconnectReason::LoggedOut => {
                log::warn!("session {}: logged out; credentials must be re-linked", self.user_id);
            }
            None => {
                log::warn!("session {}: disconnected ({})", self.user_id, reason.label());
            }
        }
    }

    /// Arm the reconnect timer. The timer holds only a weak reference and re-checks the
    /// closed flag, so it is a no-op for a session that was torn down meanwhile.
    async fn schedule_reconnect(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let delay = self.deps.reconnect_delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(session) = weak.upgrade() else {
                return;
            };
            if session.is_closed() {
                return;
            }
            if let Err(e) = session.open().await {
                log::warn!("session {}: reconnect failed: {}", session.user_id, e);
            }
        });
        if let Some(old) = self.reconnect.lock().await.replace(handle) {
            old.abort();
        }
    }

    async fn persist_credentials(&self, creds: &Credentials) {
        if let Err(e) = self.deps.store.write(&self.user_id, creds).await {
            log::warn!("session {}: persisting credentials failed: {}", self.user_id, e);
        }
    }

    async fn on_message(&self, raw: RawMessage) {
        let now_ms = Utc::now().timestamp_millis();
        let Some(mut message) = normalize(&self.user_id, &raw, now_ms) else {
            log::debug!("session {}: skipped message {:?}", self.user_id, raw.key.id);
            return;
        };

        let socket = self.state.read().await.socket.clone();
        if let Some(socket) = socket {
            if message.chat_type() == Some(ChatType::Group) {
                let subject =
                    best_effort("group metadata", socket.group_subject(&message.chat_id)).await;
                if let (Some(subject), Some(meta)) = (subject, message.metadata.as_mut()) {
                    meta.group_subject = Some(subject);
                }
            }
            best_effort(
                "read receipt",
                socket.read_messages(std::slice::from_ref(&raw.key)),
            )
            .await;
        }

        self.deliver(message).await;
    }

    async fn deliver(&self, message: InboundMessage) {
        let handler = self.deps.handler.read().await.clone();
        let Some(handler) = handler else {
            log::debug!("session {}: no message handler registered, dropping", self.user_id);
            return;
        };
        match AssertUnwindSafe(handler.on_message(message))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::error!("session {}: message handler failed: {:#}", self.user_id, e),
            Err(_) => log::error!("session {}: message handler panicked", self.user_id),
        }
    }

    /// Send text (and optionally one media item) to a conversation. Never returns an error;
    /// failures are reported in the result.
    pub async fn send(
        &self,
        chat_id: &str,
        text: &str,
        media: Option<&MediaAttachment>,
    ) -> SendResult {
        let socket = {
            let st = self.state.read().await;
            match (&st.socket, st.conn.status) {
                (Some(socket), ConnectionStatus::Connected) => socket.clone(),
                (_, status) => {
                    return SendResult::err(format!(
                        "WhatsApp not connected for user {} (status: {})",
                        self.user_id, status
                    ))
                }
            }
        };
        let content = build_content(text, media);
        match socket.send_message(&to_jid(chat_id), content).await {
            Ok(message_id) => SendResult::ok(message_id),
            Err(e) => {
                log::warn!("session {}: send to {} failed: {}", self.user_id, chat_id, e);
                SendResult::err(e.to_string())
            }
        }
    }

    /// Tear down: cancel any pending reconnect, close the socket, stop the event loop.
    pub(crate) async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(h) = self.reconnect.lock().await.take() {
            h.abort();
        }
        let socket = {
            let mut st = self.state.write().await;
            st.conn.status = ConnectionStatus::Disconnected;
            st.socket.take()
        };
        if let Some(socket) = socket {
            best_effort("close socket", socket.close()).await;
        }
        if let Some(h) = self.event_loop.lock().await.take() {
            h.abort();
        }
        log::debug!("session {}: closed", self.user_id);
    }
}
