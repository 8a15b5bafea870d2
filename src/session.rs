use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde_json::{Map, Value};
use tokio::sync::{Mutex, MutexGuard};

use crate::element::ElementRegistry;

/// Negotiated capabilities of a session.
pub type Capabilities = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Ready,
    Terminated,
}

/// Per-session timeouts, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub implicit_wait_ms: u64,
    pub script_timeout_ms: u64,
    pub page_load_timeout_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            implicit_wait_ms: 0,
            script_timeout_ms: 30_000,
            page_load_timeout_ms: 300_000,
        }
    }
}

/// Mutable state of one session. Only reachable through [`Session::lock`],
/// so at most one command touches it at a time.
pub struct SessionContext {
    id: String,
    capabilities: Arc<Capabilities>,
    state: SessionState,
    pub timeouts: Timeouts,
    pub elements: ElementRegistry,
    backend: Option<Box<dyn std::any::Any + Send + Sync>>,
}

impl SessionContext {
    fn new(id: String, capabilities: Arc<Capabilities>, timeouts: Timeouts) -> Self {
        Self {
            id,
            capabilities,
            state: SessionState::Created,
            timeouts,
            elements: ElementRegistry::new(),
            backend: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_terminated(&self) -> bool {
        self.state == SessionState::Terminated
    }

    /// Mark a freshly created session ready for commands. Has no effect once
    /// the session is terminated.
    pub fn mark_ready(&mut self) {
        if self.state == SessionState::Created {
            self.state = SessionState::Ready;
        }
    }

    /// Mark the session terminated and drop everything it holds.
    pub fn terminate(&mut self) {
        self.state = SessionState::Terminated;
        self.elements.clear();
        self.backend = None;
    }

    /// Attach backend-owned state (a browser handle, a window, ...).
    pub fn set_backend_state<T: std::any::Any + Send + Sync>(&mut self, state: T) {
        self.backend = Some(Box::new(state));
    }

    pub fn backend_state<T: std::any::Any>(&self) -> Option<&T> {
        self.backend.as_ref()?.downcast_ref()
    }

    pub fn backend_state_mut<T: std::any::Any>(&mut self) -> Option<&mut T> {
        self.backend.as_mut()?.downcast_mut()
    }
}

/// A handle to one automated browser session.
///
/// Cloning is cheap; all clones share the same command lock.
#[derive(Clone)]
pub struct Session {
    pub id: String,
    capabilities: Arc<Capabilities>,
    created_at: Instant,
    /// Registry insertion order; breaks `created_at` ties.
    seq: u64,
    context: Arc<Mutex<SessionContext>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

impl Session {
    fn new(id: String, capabilities: Capabilities, timeouts: Timeouts, seq: u64) -> Self {
        let capabilities = Arc::new(capabilities);
        let context = SessionContext::new(id.clone(), capabilities.clone(), timeouts);
        Self {
            id,
            capabilities,
            created_at: Instant::now(),
            seq,
            context: Arc::new(Mutex::new(context)),
        }
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Acquire the session's command lock, waiting for any in-flight command.
    pub async fn lock(&self) -> MutexGuard<'_, SessionContext> {
        self.context.lock().await
    }

    /// True if both handles refer to the same session instance.
    pub fn same_as(&self, other: &Session) -> bool {
        Arc::ptr_eq(&self.context, &other.context)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("session not found: {0}")]
    NotFound(String),
    #[error("maximum number of sessions reached ({0})")]
    MaxSessionsReached(usize),
}

struct RegistryInner {
    sessions: HashMap<String, Session>,
    max_sessions: Option<usize>,
    default_timeouts: Timeouts,
    next_seq: u64,
}

/// Manages live sessions by id.
///
/// The map has its own lock, independent of every session's command lock,
/// so creating or looking up a session never waits on a running command.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    /// Default maximum number of concurrent sessions.
    ///
    /// Each session normally backs a whole browser process.
    pub const DEFAULT_MAX_SESSIONS: usize = 64;

    pub fn new() -> Self {
        Self::with_max_sessions(Some(Self::DEFAULT_MAX_SESSIONS))
    }

    /// Create an empty registry with an optional maximum session count.
    pub fn with_max_sessions(max_sessions: Option<usize>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(RegistryInner {
                sessions: HashMap::new(),
                max_sessions,
                default_timeouts: Timeouts::default(),
                next_seq: 0,
            })),
        }
    }

    /// Timeouts new sessions start with.
    pub fn with_default_timeouts(self, timeouts: Timeouts) -> Self {
        self.inner.write().default_timeouts = timeouts;
        self
    }

    /// Create a session in the `Created` state under a fresh id. The caller
    /// finishes setup under the session lock and then calls
    /// [`SessionContext::mark_ready`].
    pub fn create(&self, capabilities: Capabilities) -> Result<Session, RegistryError> {
        let mut inner = self.inner.write();

        if let Some(max) = inner.max_sessions {
            if inner.sessions.len() >= max {
                return Err(RegistryError::MaxSessionsReached(max));
            }
        }

        let id = loop {
            let candidate = uuid::Uuid::new_v4().to_string();
            if !inner.sessions.contains_key(&candidate) {
                break candidate;
            }
        };

        let seq = inner.next_seq;
        inner.next_seq += 1;
        let session = Session::new(id.clone(), capabilities, inner.default_timeouts, seq);
        inner.sessions.insert(id, session.clone());
        tracing::info!(session = %session.id, "session created");
        Ok(session)
    }

    /// Look up a session by id, returning a clone if found.
    ///
    /// The session may be deleted as soon as this returns; check
    /// [`SessionContext::is_terminated`] after taking its lock.
    pub fn get(&self, id: &str) -> Option<Session> {
        self.inner.read().sessions.get(id).cloned()
    }

    /// Terminate and remove a session.
    ///
    /// Waits for the session's command lock first, so a command already
    /// running finishes before the session goes away.
    pub async fn delete(&self, id: &str) -> Result<(), RegistryError> {
        let session = self
            .get(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        let mut context = session.lock().await;
        if context.is_terminated() {
            return Err(RegistryError::NotFound(id.to_string()));
        }
        context.terminate();
        self.unregister(&session);
        Ok(())
    }

    /// Drop `session` from the map. The caller must already have terminated
    /// it while holding its lock.
    pub fn unregister(&self, session: &Session) {
        let mut inner = self.inner.write();
        if inner
            .sessions
            .get(&session.id)
            .is_some_and(|current| current.same_as(session))
        {
            inner.sessions.remove(&session.id);
            tracing::info!(session = %session.id, "session deleted");
        }
    }

    /// Snapshot of all live sessions, oldest first.
    pub fn list(&self) -> Vec<Session> {
        let inner = self.inner.read();
        let mut sessions: Vec<Session> = inner.sessions.values().cloned().collect();
        sessions.sort_by_key(|s| s.seq);
        sessions
    }

    pub fn len(&self) -> usize {
        self.inner.read().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn caps() -> Capabilities {
        let mut caps = Capabilities::new();
        caps.insert("browserName".into(), Value::from("test"));
        caps
    }

    #[tokio::test]
    async fn create_registers_session_awaiting_setup() {
        let registry = SessionRegistry::new();
        let session = registry.create(caps()).unwrap();
        assert!(!session.id.is_empty());
        assert_eq!(session.capabilities()["browserName"], "test");

        let found = registry.get(&session.id).expect("session should exist");
        assert!(found.same_as(&session));
        let mut ctx = found.lock().await;
        assert_eq!(ctx.state(), SessionState::Created);
        ctx.mark_ready();
        assert_eq!(ctx.state(), SessionState::Ready);
        ctx.terminate();
        ctx.mark_ready();
        assert!(ctx.is_terminated());
    }

    #[tokio::test]
    async fn list_keeps_creation_order() {
        let registry = SessionRegistry::with_max_sessions(None);
        let created: Vec<String> = (0..50)
            .map(|_| registry.create(caps()).unwrap().id)
            .collect();
        let listed: Vec<String> = registry.list().into_iter().map(|s| s.id).collect();
        assert_eq!(listed, created);
    }

    #[tokio::test]
    async fn ids_are_unique() {
        let registry = SessionRegistry::with_max_sessions(None);
        let a = registry.create(caps()).unwrap();
        let b = registry.create(caps()).unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn max_sessions_is_enforced() {
        let registry = SessionRegistry::with_max_sessions(Some(1));
        registry.create(caps()).unwrap();
        assert_eq!(
            registry.create(caps()).unwrap_err(),
            RegistryError::MaxSessionsReached(1)
        );
    }

    #[tokio::test]
    async fn default_timeouts_apply_to_new_sessions() {
        let timeouts = Timeouts {
            implicit_wait_ms: 250,
            script_timeout_ms: 1_000,
            page_load_timeout_ms: 2_000,
        };
        let registry = SessionRegistry::new().with_default_timeouts(timeouts);
        let session = registry.create(caps()).unwrap();
        assert_eq!(session.lock().await.timeouts, timeouts);
    }

    #[tokio::test]
    async fn delete_removes_and_terminates() {
        let registry = SessionRegistry::new();
        let session = registry.create(caps()).unwrap();
        registry.delete(&session.id).await.unwrap();
        assert!(registry.get(&session.id).is_none());
        assert!(session.lock().await.is_terminated());
        assert_eq!(
            registry.delete(&session.id).await.unwrap_err(),
            RegistryError::NotFound(session.id.clone())
        );
    }

    #[tokio::test]
    async fn delete_waits_for_in_flight_command() {
        let registry = SessionRegistry::new();
        let session = registry.create(caps()).unwrap();

        let busy = session.clone();
        let (locked_tx, locked_rx) = tokio::sync::oneshot::channel();
        let command = tokio::spawn(async move {
            let mut ctx = busy.lock().await;
            locked_tx.send(()).unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            ctx.timeouts.implicit_wait_ms = 42;
        });

        locked_rx.await.unwrap();
        registry.delete(&session.id).await.unwrap();
        command.await.unwrap();
        // The command's write landed before termination.
        let ctx = session.lock().await;
        assert_eq!(ctx.timeouts.implicit_wait_ms, 42);
        assert!(ctx.is_terminated());
    }

    #[tokio::test]
    async fn registry_lock_is_independent_of_session_lock() {
        let registry = SessionRegistry::new();
        let session = registry.create(caps()).unwrap();
        let _held = session.lock().await;
        // Creating and looking up sessions does not wait on the held lock.
        let other = registry.create(caps()).unwrap();
        assert!(registry.get(&other.id).is_some());
        assert_eq!(registry.list().len(), 2);
    }

    #[tokio::test]
    async fn unregister_ignores_replaced_session() {
        let registry = SessionRegistry::new();
        let session = registry.create(caps()).unwrap();
        let stranger = Session::new(session.id.clone(), caps(), Timeouts::default(), 0);
        registry.unregister(&stranger);
        assert!(registry.get(&session.id).is_some());
    }

    #[tokio::test]
    async fn backend_state_round_trips() {
        let registry = SessionRegistry::new();
        let session = registry.create(caps()).unwrap();
        let mut ctx = session.lock().await;
        ctx.set_backend_state(vec![1u8, 2, 3]);
        ctx.backend_state_mut::<Vec<u8>>().unwrap().push(4);
        assert_eq!(ctx.backend_state::<Vec<u8>>().unwrap(), &vec![1, 2, 3, 4]);
        assert!(ctx.backend_state::<String>().is_none());
        ctx.terminate();
        assert!(ctx.backend_state::<Vec<u8>>().is_none());
    }
}
