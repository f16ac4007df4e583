// MCP server: tool catalog, protocol handler and session registry wired together

use crate::error::SessionResult;
use crate::handler::{HandlerConfig, McpHandler};
use crate::protocol::{JsonRpcRequest, JsonRpcResponse};
use crate::session::{CloseReason, RegistryConfig, Session, SessionId, SessionRegistry};
use crate::tools::{ToolProvider, ToolRegistry};
use std::sync::Arc;

/// Entry point shared by every HTTP request.
pub struct McpServer {
    handler: Arc<McpHandler>,
    sessions: Arc<SessionRegistry>,
}

impl McpServer {
    pub fn new(
        handler_config: HandlerConfig,
        registry_config: RegistryConfig,
        tools: Arc<dyn ToolProvider>,
    ) -> Self {
        let handler = Arc::new(McpHandler::new(handler_config, tools));
        let sessions = Arc::new(SessionRegistry::new(Arc::clone(&handler), registry_config));
        Self { handler, sessions }
    }

    /// Server exposing `echo`, `get_time` and `calculate`.
    pub fn with_builtin_tools(handler_config: HandlerConfig, registry_config: RegistryConfig) -> Self {
        Self::new(
            handler_config,
            registry_config,
            Arc::new(ToolRegistry::with_builtin_tools()),
        )
    }

    pub fn handler(&self) -> &Arc<McpHandler> {
        &self.handler
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Open a session for a session-less `initialize` and run the handshake
    /// on it. If the handshake fails the session is closed again.
    ///
    /// A successful session stays `Initializing`; the caller calls
    /// [`Session::activate`] once the reply has been handed to the transport.
    pub async fn initialize(
        &self,
        request: JsonRpcRequest,
    ) -> SessionResult<(Arc<Session>, JsonRpcResponse)> {
        let session = self.sessions.create().await?;
        let reply = session.handle(request).await;

        if reply.is_error() {
            tracing::warn!(session_id = %session.id(), "Handshake failed");
            session.close(CloseReason::Removed);
        }
        Ok((session, reply))
    }

    pub async fn session(&self, id: &SessionId) -> SessionResult<Arc<Session>> {
        self.sessions.lookup(id).await
    }

    /// Close every session. Returns how many were open.
    pub async fn shutdown(&self) -> usize {
        self.sessions.close_all(CloseReason::Shutdown).await
    }
}
