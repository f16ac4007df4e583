//! Session layer of the streamable HTTP transport.
//!
//! A session is created by an `initialize` request that carries no session id.
//! The server allocates a [`SessionId`], returns it in the `Mcp-Session-Id`
//! response header, and every later request echoing that id is routed to the
//! same [`Session`] and its [`Transport`]. Closing the transport removes the
//! session from the [`SessionRegistry`].

mod registry;
mod stream;
mod transport;

pub use registry::{RegistryConfig, SessionRegistry};
pub use stream::PushStream;
pub use transport::{CloseReason, Transport};

use crate::error::{SessionError, SessionResult};
use crate::handler::McpHandler;
use crate::protocol::{JsonRpcRequest, JsonRpcResponse};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Opaque session token. Generated server-side, never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Created; the handshake reply has not been flushed yet.
    Initializing,
    /// Handshake complete; requests are routed here.
    Active,
    /// Transport ended. Never visible through the registry.
    Closed,
}

const INITIALIZING: u8 = 0;
const ACTIVE: u8 = 1;
const CLOSED: u8 = 2;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One logical client connection.
pub struct Session {
    id: SessionId,
    transport: Transport,
    state: AtomicU8,
    /// Receiving end of the push channel while no stream is attached.
    parked: Mutex<Option<mpsc::Receiver<String>>>,
    close_on_stream_end: bool,
    created_at: Instant,
    last_activity: Mutex<Instant>,
}

impl Session {
    pub(crate) fn new(
        id: SessionId,
        handler: Arc<McpHandler>,
        config: &RegistryConfig,
    ) -> SessionResult<Self> {
        let transport = Transport::new(id.clone(), handler);
        let (sink, receiver) = mpsc::channel(config.stream_buffer.max(1));
        transport.bind(sink)?;

        let now = Instant::now();
        Ok(Self {
            id,
            transport,
            state: AtomicU8::new(INITIALIZING),
            parked: Mutex::new(Some(receiver)),
            close_on_stream_end: config.close_on_stream_end,
            created_at: now,
            last_activity: Mutex::new(now),
        })
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn state(&self) -> SessionState {
        if self.transport.is_closed() {
            return SessionState::Closed;
        }
        match self.state.load(Ordering::Acquire) {
            INITIALIZING => SessionState::Initializing,
            ACTIVE => SessionState::Active,
            _ => SessionState::Closed,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }

    /// Mark the handshake reply as flushed.
    pub fn activate(&self) {
        if self
            .state
            .compare_exchange(INITIALIZING, ACTIVE, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            tracing::info!(session_id = %self.id, "Session active");
        }
    }

    /// Route one message through this session's transport.
    pub async fn handle(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        self.touch();
        self.transport.handle(request).await
    }

    /// Close the transport; the registry drops the session as a consequence.
    pub fn close(&self, reason: CloseReason) {
        self.state.store(CLOSED, Ordering::Release);
        self.transport.close(reason);
    }

    /// Attach the push stream. Fails if another stream holds it.
    pub fn attach_stream(self: &Arc<Self>) -> SessionResult<PushStream> {
        if self.is_closed() {
            return Err(SessionError::NotFound(self.id.clone()));
        }
        let receiver = lock(&self.parked)
            .take()
            .ok_or_else(|| SessionError::StreamAttached(self.id.clone()))?;
        self.touch();
        tracing::info!(session_id = %self.id, "Push stream attached");
        Ok(PushStream::new(Arc::clone(self), receiver))
    }

    pub fn has_stream(&self) -> bool {
        !self.is_closed() && lock(&self.parked).is_none()
    }

    /// Called when an attached stream goes away without the session closing.
    pub(crate) fn stream_ended(&self, receiver: mpsc::Receiver<String>) {
        if self.is_closed() {
            return;
        }
        if self.close_on_stream_end {
            self.close(CloseReason::StreamEnded);
        } else {
            *lock(&self.parked) = Some(receiver);
            self.touch();
            tracing::info!(session_id = %self.id, "Push stream detached");
        }
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_activity(&self) -> Instant {
        *lock(&self.last_activity)
    }

    pub(crate) fn touch(&self) {
        *lock(&self.last_activity) = Instant::now();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}
