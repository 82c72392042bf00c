//! Sessions and the session registry.
//!
//! Each connection owns a read loop and a buffered writer task; the session
//! is the handle the rest of the server uses to reach that writer. The
//! registry guards the session table and the agent-id index under one lock
//! so eviction on pubkey collision is atomic.

use crate::ratelimit::TokenBucket;
use agentchat_crypto::sign::eddsa::Ed25519PublicKey;
use agentchat_protocol::ServerFrame;
use agentchat_services::Outbound;
use agentchat_types::ids::AgentId;
use agentchat_types::time::now_ms;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::{mpsc, Notify};

/// Messages consumed by a connection's writer task.
pub enum WriterMsg {
    Frame(ServerFrame),
    Close,
}

/// An authenticated connection.
pub struct Session {
    pub id: u64,
    pub agent_id: AgentId,
    pub name: String,
    pub pubkey: Option<Ed25519PublicKey>,
    pub connected_at_ms: u64,
    pub presence: Mutex<String>,
    /// Names of joined channels; the channel engine maintains the other side.
    pub channels: Mutex<HashSet<String>>,
    pub bucket: Mutex<TokenBucket>,
    tx: mpsc::Sender<WriterMsg>,
    closed: AtomicBool,
    closed_notify: Notify,
}

impl Session {
    pub fn new(
        id: u64,
        agent_id: AgentId,
        name: String,
        pubkey: Option<Ed25519PublicKey>,
        bucket: TokenBucket,
        tx: mpsc::Sender<WriterMsg>,
    ) -> Arc<Self> {
        Arc::new(Session {
            id,
            agent_id,
            name,
            pubkey,
            connected_at_ms: now_ms(),
            presence: Mutex::new("online".to_string()),
            channels: Mutex::new(HashSet::new()),
            bucket: Mutex::new(bucket),
            tx,
            closed: AtomicBool::new(false),
            closed_notify: Notify::new(),
        })
    }

    /// Whether this session authenticated with a pubkey.
    pub fn persistent(&self) -> bool {
        self.pubkey.is_some()
    }

    /// Enqueues a frame. A full queue means the peer is not draining; the
    /// session is closed rather than letting one slow reader block fan-out.
    pub fn send(&self, frame: ServerFrame) -> bool {
        if self.is_closed() {
            return false;
        }
        match self.tx.try_send(WriterMsg::Frame(frame)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(target: "session", agent = %self.agent_id, "write queue overflow, closing");
                self.close();
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Marks the session closed and wakes its read loop.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.tx.try_send(WriterMsg::Close);
            self.closed_notify.notify_waiters();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Resolves when `close` is called. Registers interest before the flag
    /// check so a concurrent `close` cannot slip between them.
    pub async fn closed(&self) {
        let mut notified = std::pin::pin!(self.closed_notify.notified());
        notified.as_mut().enable();
        if self.is_closed() {
            return;
        }
        notified.await;
    }

    pub fn rate_check(&self) -> bool {
        self.bucket.lock().unwrap_or_else(|e| e.into_inner()).try_take()
    }
}

#[derive(Default)]
struct RegistryInner {
    sessions: HashMap<u64, Arc<Session>>,
    by_agent: HashMap<AgentId, u64>,
}

/// The session table plus the `agent-id → session` index, one lock for both.
#[derive(Default)]
pub struct Registry {
    inner: RwLock<RegistryInner>,
}

impl Registry {
    /// Installs an authenticated session. If another session holds the same
    /// agent id it is removed from the table and returned for the caller to
    /// detach and close — under the same lock acquisition, so two racing
    /// logins cannot both install.
    pub fn install(&self, session: Arc<Session>) -> Option<Arc<Session>> {
        let mut inner = self.write();
        let evicted = inner
            .by_agent
            .get(&session.agent_id)
            .copied()
            .and_then(|old_id| inner.sessions.remove(&old_id));
        inner.by_agent.insert(session.agent_id.clone(), session.id);
        inner.sessions.insert(session.id, session);
        evicted
    }

    /// Removes a session at disconnect. The agent-id reservation is only
    /// released if this session still owns it (it may have been evicted).
    pub fn remove(&self, session: &Session) {
        let mut inner = self.write();
        inner.sessions.remove(&session.id);
        if inner.by_agent.get(&session.agent_id) == Some(&session.id) {
            inner.by_agent.remove(&session.agent_id);
        }
    }

    pub fn by_agent(&self, agent: &AgentId) -> Option<Arc<Session>> {
        let inner = self.read();
        inner
            .by_agent
            .get(agent)
            .and_then(|id| inner.sessions.get(id))
            .cloned()
    }

    pub fn count(&self) -> usize {
        self.read().sessions.len()
    }

    pub fn all(&self) -> Vec<Arc<Session>> {
        self.read().sessions.values().cloned().collect()
    }

    /// Enqueues a frame for a connected agent; drops it otherwise.
    pub fn deliver_to(&self, agent: &AgentId, frame: ServerFrame) {
        if let Some(session) = self.by_agent(agent) {
            session.send(frame);
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, RegistryInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, RegistryInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Outbound for Registry {
    fn deliver(&self, agent: &AgentId, frame: ServerFrame) {
        self.deliver_to(agent, frame);
    }

    fn is_connected(&self, agent: &AgentId) -> bool {
        self.by_agent(agent).is_some()
    }
}
