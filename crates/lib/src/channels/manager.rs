//! Connection manager: owns one [`Session`] per user id, discovers users from the
//! integrations listing, relays every session's inbound messages to one handler and routes
//! outbound sends to the right session.

use crate::bridge::{IntegrationMetadata, IntegrationsClient, IntegrationsError};
use crate::channels::inbound::{MessageHandler, INTEGRATION_ID};
use crate::channels::outbound::{MediaAttachment, SendResult};
use crate::channels::protocol::{ProtocolConnector, ProtocolError};
use crate::channels::session::{
    ConnectionStatus, HandlerSlot, Session, SessionDeps, UserConnection, RECONNECT_DELAY,
};
use crate::config::BridgeConfig;
use crate::credentials::{phone_from_credentials, CredentialError, CredentialStore, Credentials};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("writing credentials: {0}")]
    Credentials(#[from] CredentialError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

pub struct ConnectionManager {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    deps: SessionDeps,
    integrations: IntegrationsClient,
    initialized: AtomicBool,
    init_lock: Mutex<()>,
}

impl ConnectionManager {
    pub fn new(
        config: Arc<BridgeConfig>,
        store: CredentialStore,
        connector: Arc<dyn ProtocolConnector>,
    ) -> Self {
        let handler: HandlerSlot = Arc::new(RwLock::new(None));
        Self {
            sessions: RwLock::new(HashMap::new()),
            deps: SessionDeps {
                connector,
                store,
                handler,
                reconnect_delay: RECONNECT_DELAY,
            },
            integrations: IntegrationsClient::new(config),
            initialized: AtomicBool::new(false),
            init_lock: Mutex::new(()),
        }
    }

    /// Override the delay before a transient disconnect is retried.
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.deps.reconnect_delay = delay;
        self
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Connect every user with a WhatsApp binding from the integrations listing. A second
    /// call after a successful one is a no-op. One user's failure never stops the others.
    pub async fn initialize(&self) -> Result<(), IntegrationsError> {
        let _guard = self.init_lock.lock().await;
        if self.is_initialized() {
            return Ok(());
        }
        let integrations = self.integrations.fetch().await?;
        let bindings: Vec<_> = integrations
            .into_iter()
            .filter(|i| i.integration_id == INTEGRATION_ID)
            .filter_map(|i| {
                let creds = i.credentials.filter(|c| !c.is_empty())?;
                Some((i.user_id, creds, i.metadata))
            })
            .collect();
        log::info!("manager: {} user(s) with WhatsApp credentials", bindings.len());

        for (user_id, creds, metadata) in bindings {
            if let Err(e) = self.connect_user(&user_id, &creds, metadata.as_ref()).await {
                log::warn!("manager: connecting user {} failed: {}", user_id, e);
            }
        }
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Write the user's credentials and open a session. No-op when the user is already
    /// connected; any other existing session for the user is replaced.
    pub async fn connect_user(
        &self,
        user_id: &str,
        credentials: &Credentials,
        metadata: Option<&IntegrationMetadata>,
    ) -> Result<(), ConnectError> {
        if let Some(existing) = self.session(user_id).await {
            if existing.status().await == ConnectionStatus::Connected {
                log::debug!("manager: user {} already connected", user_id);
                return Ok(());
            }
        }

        let auth_dir = self.deps.store.write(user_id, credentials).await?;
        let phone = metadata
            .and_then(|m| m.phone())
            .map(str::to_string)
            .or_else(|| phone_from_credentials(credentials));
        let session = Session::new(user_id, auth_dir, phone, self.deps.clone());

        let previous = self
            .sessions
            .write()
            .await
            .insert(user_id.to_string(), session.clone());
        if let Some(old) = previous {
            old.close().await;
        }

        log::info!("manager: connecting user {}", user_id);
        session.open().await?;
        Ok(())
    }

    /// Register the single downstream handler for all sessions' inbound messages.
    pub async fn set_on_message(&self, handler: Arc<dyn MessageHandler>) {
        *self.deps.handler.write().await = Some(handler);
    }

    pub async fn send_message(
        &self,
        user_id: &str,
        chat_id: &str,
        text: &str,
        media: Option<&MediaAttachment>,
    ) -> SendResult {
        match self.session(user_id).await {
            Some(session) => session.send(chat_id, text, media).await,
            None => SendResult::err(format!("User {} is not connected", user_id)),
        }
    }

    pub async fn get_connected_user_ids(&self) -> Vec<String> {
        let sessions: Vec<Arc<Session>> = self.sessions.read().await.values().cloned().collect();
        let mut out = Vec::new();
        for session in sessions {
            if session.status().await == ConnectionStatus::Connected {
                out.push(session.user_id().to_string());
            }
        }
        out
    }

    /// First user whose stored phone and `phone` agree after stripping non-digits, where
    /// either may carry extra leading digits (country code).
    pub async fn get_user_id_by_phone(&self, phone: &str) -> Option<String> {
        let wanted = digits(phone);
        if wanted.is_empty() {
            return None;
        }
        let sessions: Vec<Arc<Session>> = self.sessions.read().await.values().cloned().collect();
        for session in sessions {
            let Some(stored) = session.phone().await.map(|p| digits(&p)) else {
                continue;
            };
            if stored.is_empty() {
                continue;
            }
            if stored.ends_with(&wanted) || wanted.ends_with(&stored) {
                return Some(session.user_id().to_string());
            }
        }
        None
    }

    pub async fn status(&self, user_id: &str) -> Option<ConnectionStatus> {
        match self.session(user_id).await {
            Some(s) => Some(s.status().await),
            None => None,
        }
    }

    /// Snapshots of every tracked session, sorted by user id.
    pub async fn snapshots(&self) -> Vec<UserConnection> {
        let sessions: Vec<Arc<Session>> = self.sessions.read().await.values().cloned().collect();
        let mut out = Vec::with_capacity(sessions.len());
        for session in sessions {
            out.push(session.snapshot().await);
        }
        out.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        out
    }

    pub async fn disconnect_user(&self, user_id: &str) {
        let removed = self.sessions.write().await.remove(user_id);
        if let Some(session) = removed {
            session.close().await;
            log::info!("manager: disconnected user {}", user_id);
        }
    }

    /// Disconnect everyone; a later `initialize` starts from scratch.
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<Session>> = self.sessions.write().await.drain().map(|(_, s)| s).collect();
        let count = sessions.len();
        futures_util::future::join_all(sessions.iter().map(|s| s.close())).await;
        self.initialized.store(false, Ordering::SeqCst);
        log::info!("manager: shut down {} session(s)", count);
    }

    async fn session(&self, user_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(user_id).cloned()
    }
}

fn digits(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_digit()).collect()
}
