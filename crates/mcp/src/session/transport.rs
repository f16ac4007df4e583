// Per-session transport: owns the outbound stream and the protocol connection

use super::{lock, SessionId};
use crate::error::TransportError;
use crate::handler::{Connection, McpHandler};
use crate::protocol::{JsonRpcRequest, JsonRpcResponse};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

/// Why a transport was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The client sent `DELETE`.
    ClientRequest,
    /// The attached push stream went away.
    StreamEnded,
    /// Writing to the stream failed.
    StreamError,
    /// No activity within the idle timeout.
    Idle,
    /// Dropped from the registry directly.
    Removed,
    /// Server shutdown.
    Shutdown,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::ClientRequest => "client_request",
            CloseReason::StreamEnded => "stream_ended",
            CloseReason::StreamError => "stream_error",
            CloseReason::Idle => "idle",
            CloseReason::Removed => "removed",
            CloseReason::Shutdown => "shutdown",
        }
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

type CloseCallback = Box<dyn FnOnce(&SessionId, CloseReason) + Send>;

/// Binds one outbound message stream to one protocol connection.
///
/// Messages written with [`Transport::send`] are queued on the bound sink in
/// call order. Closing is idempotent and fires the registered close callback
/// exactly once.
pub struct Transport {
    session_id: SessionId,
    handler: Arc<McpHandler>,
    connection: Connection,
    sink: Mutex<Option<mpsc::Sender<String>>>,
    bound: AtomicBool,
    closed: AtomicBool,
    reason: OnceLock<CloseReason>,
    shutdown: CancellationToken,
    on_close: Mutex<Option<CloseCallback>>,
}

impl Transport {
    pub fn new(session_id: SessionId, handler: Arc<McpHandler>) -> Self {
        Self {
            session_id,
            handler,
            connection: Connection::new(),
            sink: Mutex::new(None),
            bound: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            reason: OnceLock::new(),
            shutdown: CancellationToken::new(),
            on_close: Mutex::new(None),
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Attach the outbound stream. Allowed once per transport.
    pub fn bind(&self, sink: mpsc::Sender<String>) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        if self.bound.swap(true, Ordering::AcqRel) {
            return Err(TransportError::AlreadyBound);
        }
        *lock(&self.sink) = Some(sink);
        Ok(())
    }

    /// Queue one message on the bound stream.
    pub fn send<T: Serialize>(&self, message: &T) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let payload = serde_json::to_string(message)?;

        let sink = lock(&self.sink);
        let Some(sender) = sink.as_ref() else {
            return Err(if self.bound.load(Ordering::Acquire) {
                TransportError::Closed
            } else {
                TransportError::Unbound
            });
        };

        match sender.try_send(payload) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(TransportError::Backpressure),
            Err(TrySendError::Closed(_)) => {
                drop(sink);
                self.close(CloseReason::StreamError);
                Err(TransportError::Closed)
            }
        }
    }

    /// Hand a message to the protocol handler and push any notifications it
    /// produced onto the stream. Returns the direct reply.
    pub async fn handle(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let dispatch = self.handler.handle(&self.connection, request).await;

        for notification in &dispatch.notifications {
            if let Err(e) = self.send(notification) {
                tracing::debug!(
                    session_id = %self.session_id,
                    method = %notification.method,
                    error = %e,
                    "Notification dropped"
                );
            }
        }
        dispatch.reply
    }

    /// Register the callback fired when this transport closes. If it has
    /// already closed, the callback runs immediately.
    pub fn on_close<F>(&self, callback: F)
    where
        F: FnOnce(&SessionId, CloseReason) + Send + 'static,
    {
        {
            let mut slot = lock(&self.on_close);
            if !self.is_closed() {
                *slot = Some(Box::new(callback));
                return;
            }
        }
        let reason = self.reason.get().copied().unwrap_or(CloseReason::Removed);
        callback(&self.session_id, reason);
    }

    pub fn close(&self, reason: CloseReason) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.reason.set(reason);
        self.shutdown.cancel();
        lock(&self.sink).take();

        tracing::info!(session_id = %self.session_id, reason = %reason, "Session closed");

        let callback = lock(&self.on_close).take();
        if let Some(callback) = callback {
            callback(&self.session_id, reason);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.reason.get().copied()
    }

    /// Token cancelled when the transport closes.
    pub(crate) fn closed_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}
