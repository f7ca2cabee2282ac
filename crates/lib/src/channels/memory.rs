//! In-process protocol connector. Nothing leaves the process: sends are recorded and logged,
//! and events are injected with [`MemoryConnector::emit`]. Used by tests and by the CLI
//! gateway when no network connector is linked.

use crate::channels::outbound::OutgoingContent;
use crate::channels::protocol::{
    ConnectionEvent, MessageKey, ProtocolConnection, ProtocolConnector, ProtocolError,
    ProtocolSocket,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

const EVENT_BUFFER: usize = 64;

/// A message recorded by a [`MemorySocket`].
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub jid: String,
    pub content: OutgoingContent,
    pub message_id: String,
}

pub struct MemorySocket {
    user_id: String,
    own_jid: Option<String>,
    group_subjects: Arc<Mutex<HashMap<String, String>>>,
    sent: Mutex<Vec<SentMessage>>,
    read: Mutex<Vec<MessageKey>>,
    presence_updates: AtomicUsize,
    subject_lookups: AtomicUsize,
    fail_sends: AtomicBool,
    closed: AtomicBool,
}

impl MemorySocket {
    pub async fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().await.clone()
    }

    pub async fn read_receipts(&self) -> Vec<MessageKey> {
        self.read.lock().await.clone()
    }

    pub fn presence_updates(&self) -> usize {
        self.presence_updates.load(Ordering::SeqCst)
    }

    pub fn subject_lookups(&self) -> usize {
        self.subject_lookups.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Make every subsequent send fail.
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    fn ensure_open(&self) -> Result<(), ProtocolError> {
        if self.is_closed() {
            Err(ProtocolError::NotConnected)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ProtocolSocket for MemorySocket {
    fn own_jid(&self) -> Option<String> {
        self.own_jid.clone()
    }

    async fn send_presence_available(&self) -> Result<(), ProtocolError> {
        self.ensure_open()?;
        self.presence_updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn read_messages(&self, keys: &[MessageKey]) -> Result<(), ProtocolError> {
        self.ensure_open()?;
        self.read.lock().await.extend_from_slice(keys);
        Ok(())
    }

    async fn group_subject(&self, jid: &str) -> Result<String, ProtocolError> {
        self.subject_lookups.fetch_add(1, Ordering::SeqCst);
        self.group_subjects
            .lock()
            .await
            .get(jid)
            .cloned()
            .ok_or_else(|| ProtocolError::Other(format!("no metadata for group {}", jid)))
    }

    async fn send_message(
        &self,
        jid: &str,
        content: OutgoingContent,
    ) -> Result<Option<String>, ProtocolError> {
        self.ensure_open()?;
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(ProtocolError::Send("rejected by memory socket".to_string()));
        }
        let message_id = format!("mem-{}", uuid::Uuid::new_v4().simple());
        log::info!(
            "memory socket {}: send {} to {}: {:?}",
            self.user_id,
            message_id,
            jid,
            content
        );
        self.sent.lock().await.push(SentMessage {
            jid: jid.to_string(),
            content,
            message_id: message_id.clone(),
        });
        Ok(Some(message_id))
    }

    async fn close(&self) -> Result<(), ProtocolError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct MemoryLink {
    events: mpsc::Sender<ConnectionEvent>,
    socket: Arc<MemorySocket>,
}

/// Connector handing out [`MemorySocket`]s. With auto-open, every connection immediately
/// reports `Opened`.
pub struct MemoryConnector {
    auto_open: bool,
    identities: Mutex<HashMap<String, String>>,
    failing: Mutex<HashSet<String>>,
    links: Mutex<HashMap<String, MemoryLink>>,
    connects: Mutex<HashMap<String, usize>>,
    group_subjects: Arc<Mutex<HashMap<String, String>>>,
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::with_auto_open(true)
    }

    /// Connections stay in `connecting` until an `Opened` event is emitted.
    pub fn manual() -> Self {
        Self::with_auto_open(false)
    }

    fn with_auto_open(auto_open: bool) -> Self {
        Self {
            auto_open,
            identities: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            links: Mutex::new(HashMap::new()),
            connects: Mutex::new(HashMap::new()),
            group_subjects: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Account identity reported by sockets opened for this user from now on.
    pub async fn set_identity(&self, user_id: &str, jid: &str) {
        self.identities
            .lock()
            .await
            .insert(user_id.to_string(), jid.to_string());
    }

    pub async fn set_connect_failure(&self, user_id: &str, fail: bool) {
        let mut failing = self.failing.lock().await;
        if fail {
            failing.insert(user_id.to_string());
        } else {
            failing.remove(user_id);
        }
    }

    pub async fn set_group_subject(&self, jid: &str, subject: &str) {
        self.group_subjects
            .lock()
            .await
            .insert(jid.to_string(), subject.to_string());
    }

    async fn count_connect(&self, user_id: &str) {
        *self
            .connects
            .lock()
            .await
            .entry(user_id.to_string())
            .or_insert(0) += 1;
    }

    /// Number of connect calls made for this user (successful or not).
    pub async fn connect_count(&self, user_id: &str) -> usize {
        self.connects.lock().await.get(user_id).copied().unwrap_or(0)
    }

    /// Socket of the user's most recent connection.
    pub async fn socket(&self, user_id: &str) -> Option<Arc<MemorySocket>> {
        self.links
            .lock()
            .await
            .get(user_id)
            .map(|l| l.socket.clone())
    }

    /// Push an event into the user's most recent connection. False if there is none or
    /// nobody is listening any more.
    pub async fn emit(&self, user_id: &str, event: ConnectionEvent) -> bool {
        let tx = match self.links.lock().await.get(user_id) {
            Some(link) => link.events.clone(),
            None => return false,
        };
        tx.send(event).await.is_ok()
    }
}

#[async_trait]
impl ProtocolConnector for MemoryConnector {
    async fn connect(
        &self,
        user_id: &str,
        auth_dir: &Path,
    ) -> Result<ProtocolConnection, ProtocolError> {
        if self.failing.lock().await.contains(user_id) {
            self.count_connect(user_id).await;
            return Err(ProtocolError::Connect(format!(
                "memory connector refused {}",
                user_id
            )));
        }
        log::debug!(
            "memory connector: connecting {} with credentials in {}",
            user_id,
            auth_dir.display()
        );

        let socket = Arc::new(MemorySocket {
            user_id: user_id.to_string(),
            own_jid: self.identities.lock().await.get(user_id).cloned(),
            group_subjects: self.group_subjects.clone(),
            sent: Mutex::new(Vec::new()),
            read: Mutex::new(Vec::new()),
            presence_updates: AtomicUsize::new(0),
            subject_lookups: AtomicUsize::new(0),
            fail_sends: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        if self.auto_open {
            // Buffered; delivered once the session starts reading.
            let _ = tx.try_send(ConnectionEvent::Opened);
        }
        self.links.lock().await.insert(
            user_id.to_string(),
            MemoryLink {
                events: tx,
                socket: socket.clone(),
            },
        );
        // Counted once the link is live so callers can emit into it right away.
        self.count_connect(user_id).await;
        Ok(ProtocolConnection {
            socket,
            events: rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn auto_open_queues_opened_event() {
        let connector = MemoryConnector::new();
        let mut conn = connector.connect("u1", Path::new("/tmp")).await.unwrap();
        assert!(matches!(conn.events.recv().await, Some(ConnectionEvent::Opened)));
        assert_eq!(connector.connect_count("u1").await, 1);
    }

    #[tokio::test]
    async fn refused_connect_is_counted() {
        let connector = MemoryConnector::manual();
        connector.set_connect_failure("u1", true).await;
        assert!(connector.connect("u1", Path::new("/tmp")).await.is_err());
        assert_eq!(connector.connect_count("u1").await, 1);
        assert!(connector.socket("u1").await.is_none());
    }

    #[tokio::test]
    async fn closed_socket_rejects_sends() {
        let connector = MemoryConnector::manual();
        let conn = connector.connect("u1", Path::new("/tmp")).await.unwrap();
        conn.socket.close().await.unwrap();
        let res = conn
            .socket
            .send_message("1@s.whatsapp.net", OutgoingContent::Text { text: "x".into() })
            .await;
        assert!(matches!(res, Err(ProtocolError::NotConnected)));
    }
}
