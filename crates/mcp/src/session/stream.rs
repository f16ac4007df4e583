// Server-initiated push stream attached to a session

use super::{Session, SessionId};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Reader side of a session's outbound channel.
///
/// Holding a `PushStream` is what "a stream is attached" means. Dropping it
/// either closes the session or parks the channel again so a later `GET` can
/// resume, depending on the registry's `close_on_stream_end` policy. Messages
/// queued while no stream is attached are delivered on the next attach.
pub struct PushStream {
    session: Arc<Session>,
    receiver: Option<mpsc::Receiver<String>>,
    closed: CancellationToken,
}

impl PushStream {
    pub(crate) fn new(session: Arc<Session>, receiver: mpsc::Receiver<String>) -> Self {
        let closed = session.transport().closed_token();
        Self {
            session,
            receiver: Some(receiver),
            closed,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        self.session.id()
    }

    /// Next serialized message, or `None` once the session has closed.
    pub async fn next_message(&mut self) -> Option<String> {
        let receiver = self.receiver.as_mut()?;
        let message = tokio::select! {
            biased;
            message = receiver.recv() => message,
            _ = self.closed.cancelled() => None,
        };
        if message.is_some() {
            self.session.touch();
        }
        message
    }
}

impl Drop for PushStream {
    fn drop(&mut self) {
        if let Some(receiver) = self.receiver.take() {
            self.session.stream_ended(receiver);
        }
    }
}
