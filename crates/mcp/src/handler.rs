// Protocol message handler: interprets MCP methods for one connection

use crate::error::ToolError;
use crate::protocol::{
    CallToolParams, CallToolResult, InitializeParams, InitializeResult, JsonRpcError,
    JsonRpcRequest, JsonRpcResponse, ListToolsResult, LoggingMessage, Method, ServerCapabilities,
    ServerInfo, ToolsCapability,
};
use crate::tools::ToolProvider;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

/// Versions accepted during `initialize`, newest first.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] =
    &["2025-06-18", "2025-03-26", "2024-11-05", "2024-10-07"];

/// Identity and negotiation policy advertised during the handshake.
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    pub server_name: String,
    pub server_version: String,
    /// Version answered when the client proposes one we do not support.
    pub protocol_version: String,
    pub supported_versions: Vec<String>,
    pub instructions: Option<String>,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            server_name: "tether".to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            protocol_version: SUPPORTED_PROTOCOL_VERSIONS[0].to_string(),
            supported_versions: SUPPORTED_PROTOCOL_VERSIONS
                .iter()
                .map(|v| v.to_string())
                .collect(),
            instructions: None,
        }
    }
}

impl HandlerConfig {
    /// Accept the client's proposal if supported, otherwise fall back to the default.
    pub fn negotiate(&self, proposed: Option<&str>) -> String {
        match proposed {
            Some(v) if self.supported_versions.iter().any(|s| s == v) => v.to_string(),
            _ => self.protocol_version.clone(),
        }
    }
}

/// Handshake progress of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Uninitialized,
    Handshaking,
    Ready,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Uninitialized,
            1 => ConnectionState::Handshaking,
            _ => ConnectionState::Ready,
        }
    }
}

/// Per-connection protocol state. One per session.
#[derive(Debug)]
pub struct Connection {
    state: AtomicU8,
    protocol_version: OnceLock<String>,
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(ConnectionState::Uninitialized as u8),
            protocol_version: OnceLock::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// Version agreed during the handshake, once it has completed.
    pub fn protocol_version(&self) -> Option<&str> {
        self.protocol_version.get().map(String::as_str)
    }

    /// Claim the handshake. Only one `initialize` can ever win.
    fn begin_handshake(&self) -> bool {
        self.state
            .compare_exchange(
                ConnectionState::Uninitialized as u8,
                ConnectionState::Handshaking as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    fn finish_handshake(&self, version: String) {
        let _ = self.protocol_version.set(version);
        self.state
            .store(ConnectionState::Ready as u8, Ordering::Release);
    }
}

/// Reply to a message plus any notifications to push on the session stream.
#[derive(Debug)]
pub struct Dispatch {
    pub reply: JsonRpcResponse,
    pub notifications: Vec<JsonRpcRequest>,
}

impl From<JsonRpcResponse> for Dispatch {
    fn from(reply: JsonRpcResponse) -> Self {
        Self {
            reply,
            notifications: Vec::new(),
        }
    }
}

/// Stateless dispatcher shared by every session.
pub struct McpHandler {
    config: HandlerConfig,
    tools: Arc<dyn ToolProvider>,
}

impl McpHandler {
    pub fn new(config: HandlerConfig, tools: Arc<dyn ToolProvider>) -> Self {
        Self { config, tools }
    }

    pub fn config(&self) -> &HandlerConfig {
        &self.config
    }

    /// Handle one message on `conn`. Every message, notifications included,
    /// gets exactly one reply.
    pub async fn handle(&self, conn: &Connection, request: JsonRpcRequest) -> Dispatch {
        let id = request.reply_id();
        let method = request.method();
        tracing::debug!(method = %method, state = ?conn.state(), "Handling message");

        match method {
            Method::Initialize => self.initialize(conn, id, request.params).into(),
            // Acknowledged for clients that wait on a reply to the notification.
            Method::Initialized => JsonRpcResponse::success(id, json!({})).into(),
            Method::Ping => JsonRpcResponse::success(id, json!({})).into(),
            Method::ToolsList if conn.is_ready() => {
                let result = ListToolsResult {
                    tools: self.tools.list_tools(),
                };
                JsonRpcResponse::from_result(id, &result).into()
            }
            Method::ToolsCall if conn.is_ready() => self.call_tool(id, request.params).await,
            other => JsonRpcResponse::error(id, JsonRpcError::method_not_found(other.as_str()))
                .into(),
        }
    }

    fn initialize(&self, conn: &Connection, id: Value, params: Option<Value>) -> JsonRpcResponse {
        if !conn.begin_handshake() {
            return JsonRpcResponse::error(
                id,
                JsonRpcError::invalid_request("Invalid Request: session already initialized"),
            );
        }

        // Unknown or malformed members are ignored rather than rejected.
        let params: InitializeParams = params
            .and_then(|p| serde_json::from_value(p).ok())
            .unwrap_or_default();
        let version = self.config.negotiate(params.protocol_version.as_deref());

        if let Some(client) = &params.client_info {
            tracing::info!(
                client = %client.name,
                client_version = %client.version,
                protocol_version = %version,
                "Client initializing"
            );
        }

        let result = InitializeResult {
            protocol_version: version.clone(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: false,
                }),
                logging: Some(json!({})),
            },
            server_info: ServerInfo {
                name: self.config.server_name.clone(),
                version: self.config.server_version.clone(),
            },
            instructions: self.config.instructions.clone(),
        };

        let reply = JsonRpcResponse::from_result(id, &result);
        conn.finish_handshake(version);
        reply
    }

    async fn call_tool(&self, id: Value, params: Option<Value>) -> Dispatch {
        let params: CallToolParams = match params.map(serde_json::from_value) {
            Some(Ok(params)) => params,
            Some(Err(e)) => {
                return JsonRpcResponse::error(
                    id,
                    JsonRpcError::invalid_params(format!("Invalid params: {}", e)),
                )
                .into()
            }
            None => {
                return JsonRpcResponse::error(
                    id,
                    JsonRpcError::invalid_params("Invalid params: missing tool name"),
                )
                .into()
            }
        };

        let CallToolParams { name, arguments } = params;
        let tools = Arc::clone(&self.tools);
        let tool = name.clone();
        // Run the tool in its own task so a panic is contained to this call.
        let outcome = tokio::spawn(async move { tools.call_tool(&tool, arguments).await }).await;

        match outcome {
            Ok(Ok(result)) => JsonRpcResponse::from_result(id, &result).into(),
            Ok(Err(ToolError::NotFound(name))) => {
                tracing::warn!(tool = %name, "Unknown tool requested");
                JsonRpcResponse::error(
                    id,
                    JsonRpcError::invalid_params(format!("Unknown tool: {}", name))
                        .with_data(json!({ "tool": name })),
                )
                .into()
            }
            Ok(Err(e)) => {
                tracing::warn!(tool = %name, error = %e, "Tool execution failed");
                let message = e.to_string();
                Dispatch {
                    reply: JsonRpcResponse::from_result(id, &CallToolResult::error(&message)),
                    notifications: vec![tool_failure_notice(&name, &message)],
                }
            }
            Err(join_error) => {
                tracing::error!(tool = %name, error = %join_error, "Tool task aborted");
                JsonRpcResponse::error(id, JsonRpcError::internal_error("Internal error")).into()
            }
        }
    }
}

fn tool_failure_notice(tool: &str, message: &str) -> JsonRpcRequest {
    let payload = LoggingMessage {
        level: "error".to_string(),
        logger: Some(tool.to_string()),
        data: json!({ "tool": tool, "error": message }),
    };
    JsonRpcRequest::notification("notifications/message", serde_json::to_value(payload).ok())
}
