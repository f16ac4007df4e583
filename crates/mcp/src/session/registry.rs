// Concurrent session registry with capacity limit and idle reaping

use super::{CloseReason, Session, SessionId};
use crate::error::{SessionError, SessionResult};
use crate::handler::McpHandler;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Attempts at drawing an unused id before giving up.
const ID_ATTEMPTS: usize = 8;

/// Limits and stream policy applied to every session.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Maximum live sessions. 0 means unbounded.
    pub max_sessions: usize,
    /// Messages buffered per session while no stream drains them.
    pub stream_buffer: usize,
    /// Close the session when its push stream ends, instead of detaching.
    pub close_on_stream_end: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_sessions: 1024,
            stream_buffer: 64,
            close_on_stream_end: true,
        }
    }
}

type SessionMap = HashMap<SessionId, Arc<Session>>;

fn read(map: &RwLock<SessionMap>) -> RwLockReadGuard<'_, SessionMap> {
    map.read().unwrap_or_else(PoisonError::into_inner)
}

fn write(map: &RwLock<SessionMap>) -> RwLockWriteGuard<'_, SessionMap> {
    map.write().unwrap_or_else(PoisonError::into_inner)
}

/// Maps session ids to live sessions.
///
/// Sessions are inserted by [`create`](Self::create) and removed by their own
/// transport's close callback, so a closed session never stays reachable.
/// The close callback holds only a weak reference to the map.
pub struct SessionRegistry {
    handler: Arc<McpHandler>,
    config: RegistryConfig,
    sessions: Arc<RwLock<SessionMap>>,
}

impl SessionRegistry {
    pub fn new(handler: Arc<McpHandler>, config: RegistryConfig) -> Self {
        Self {
            handler,
            config,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn handler(&self) -> &Arc<McpHandler> {
        &self.handler
    }

    /// Allocate a fresh id and register a new session under it.
    pub async fn create(&self) -> SessionResult<Arc<Session>> {
        let session = {
            let mut sessions = write(&self.sessions);
            if self.config.max_sessions > 0 && sessions.len() >= self.config.max_sessions {
                tracing::warn!(limit = self.config.max_sessions, "Session limit reached");
                return Err(SessionError::ResourceExhausted(format!(
                    "limit of {} sessions reached",
                    self.config.max_sessions
                )));
            }

            let id = std::iter::repeat_with(SessionId::generate)
                .take(ID_ATTEMPTS)
                .find(|id| !sessions.contains_key(id))
                .ok_or_else(|| {
                    SessionError::ResourceExhausted("could not allocate a session id".to_string())
                })?;

            let session = Arc::new(Session::new(
                id.clone(),
                Arc::clone(&self.handler),
                &self.config,
            )?);
            sessions.insert(id, Arc::clone(&session));
            session
        };

        let sessions = Arc::downgrade(&self.sessions);
        session.transport().on_close(move |id, _reason| {
            if let Some(sessions) = sessions.upgrade() {
                write(&sessions).remove(id);
            }
        });

        tracing::info!(session_id = %session.id(), total = self.len(), "Session created");
        Ok(session)
    }

    /// Live session for `id`. Closed sessions are reported as not found.
    pub async fn lookup(&self, id: &SessionId) -> SessionResult<Arc<Session>> {
        read(&self.sessions)
            .get(id)
            .filter(|session| !session.is_closed())
            .cloned()
            .ok_or_else(|| SessionError::NotFound(id.clone()))
    }

    /// Drop `id` from the registry and close it. Removing an unknown id is a no-op.
    pub async fn remove(&self, id: &SessionId) -> bool {
        let removed = write(&self.sessions).remove(id);
        match removed {
            Some(session) => {
                session.close(CloseReason::Removed);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        read(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = read(&self.sessions).keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Close every session. Returns how many were closed.
    pub async fn close_all(&self, reason: CloseReason) -> usize {
        let sessions: Vec<Arc<Session>> = write(&self.sessions).drain().map(|(_, s)| s).collect();
        for session in &sessions {
            session.close(reason);
        }
        if !sessions.is_empty() {
            tracing::info!(count = sessions.len(), reason = %reason, "Closed all sessions");
        }
        sessions.len()
    }

    /// Close sessions with no attached stream and no activity for `timeout`.
    pub async fn close_idle(&self, timeout: Duration) -> usize {
        let now = Instant::now();
        let idle: Vec<Arc<Session>> = read(&self.sessions)
            .values()
            .filter(|s| !s.has_stream() && now.duration_since(s.last_activity()) >= timeout)
            .cloned()
            .collect();

        for session in &idle {
            session.close(CloseReason::Idle);
        }
        idle.len()
    }

    /// Periodically close idle sessions until `shutdown` is cancelled.
    pub fn spawn_reaper(
        self: &Arc<Self>,
        every: Duration,
        idle_timeout: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // First tick completes immediately.
            ticker.tick().await;

            tracing::debug!(
                every_secs = every.as_secs(),
                idle_timeout_secs = idle_timeout.as_secs(),
                "Session reaper started"
            );
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let reaped = registry.close_idle(idle_timeout).await;
                        if reaped > 0 {
                            tracing::info!(reaped, remaining = registry.len(), "Reaped idle sessions");
                        }
                    }
                }
            }
            tracing::debug!("Session reaper stopped");
        })
    }
}
