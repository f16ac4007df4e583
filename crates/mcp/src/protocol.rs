// MCP protocol types and definitions (JSON-RPC 2.0 over streamable HTTP)

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The only JSON-RPC version this server speaks.
pub const JSONRPC_VERSION: &str = "2.0";

/// Header carrying the session identifier in both directions.
pub const SESSION_HEADER: &str = "Mcp-Session-Id";

/// Standard JSON-RPC error codes plus the server-defined session rejection.
pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
    /// No valid session for a non-initialize request.
    pub const BAD_REQUEST: i32 = -32000;
}

fn default_jsonrpc() -> String {
    JSONRPC_VERSION.to_string()
}

/// JSON-RPC 2.0 Request
///
/// A missing `jsonrpc` member is tolerated; a wrong one is rejected by [`parse_request`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default = "default_jsonrpc")]
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<Value>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: default_jsonrpc(),
            id: Some(id.into()),
            method: method.into(),
            params,
        }
    }

    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: default_jsonrpc(),
            id: None,
            method: method.into(),
            params,
        }
    }

    /// Typed view of the method name.
    pub fn method(&self) -> Method {
        Method::from(self.method.as_str())
    }

    /// Correlation id for the reply; notifications answer with `null`.
    pub fn reply_id(&self) -> Value {
        self.id.clone().unwrap_or(Value::Null)
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// JSON-RPC 2.0 Response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: impl Into<Value>, result: Value) -> Self {
        Self {
            jsonrpc: default_jsonrpc(),
            id: id.into(),
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: impl Into<Value>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: default_jsonrpc(),
            id: id.into(),
            result: None,
            error: Some(error),
        }
    }

    /// Serialize a typed result; a result that cannot be represented as JSON
    /// becomes an internal error reply with the same id.
    pub fn from_result(id: Value, result: &impl Serialize) -> Self {
        match serde_json::to_value(result) {
            Ok(value) => Self::success(id, value),
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize result");
                Self::error(id, JsonRpcError::internal_error("Internal error"))
            }
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn error_code(&self) -> Option<i32> {
        self.error.as_ref().map(|e| e.code)
    }
}

/// JSON-RPC 2.0 Error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn parse_error() -> Self {
        Self::custom(error_codes::PARSE_ERROR, "Parse error")
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::custom(error_codes::INVALID_REQUEST, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::custom(
            error_codes::METHOD_NOT_FOUND,
            format!("Method not found: {}", method),
        )
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::custom(error_codes::INVALID_PARAMS, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::custom(error_codes::INTERNAL_ERROR, message)
    }

    pub fn bad_session() -> Self {
        Self::custom(error_codes::BAD_REQUEST, "Bad Request: no valid session")
    }

    pub fn custom(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Parse a raw request body.
///
/// Unparseable JSON is a parse error with a `null` id. Well-formed JSON that is
/// not a request object is an invalid request, carrying the id when one can be
/// recovered from the document.
pub fn parse_request(body: &[u8]) -> Result<JsonRpcRequest, JsonRpcResponse> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|_| JsonRpcResponse::error(Value::Null, JsonRpcError::parse_error()))?;

    let id = value.get("id").cloned().unwrap_or(Value::Null);

    let request: JsonRpcRequest = serde_json::from_value(value).map_err(|e| {
        JsonRpcResponse::error(
            id.clone(),
            JsonRpcError::invalid_request(format!("Invalid Request: {}", e)),
        )
    })?;

    if request.jsonrpc != JSONRPC_VERSION {
        return Err(JsonRpcResponse::error(
            id,
            JsonRpcError::invalid_request(format!(
                "Invalid Request: unsupported jsonrpc version '{}'",
                request.jsonrpc
            )),
        ));
    }

    Ok(request)
}

/// Known MCP methods. Anything else is carried verbatim in `Unknown`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Initialize,
    Initialized,
    Ping,
    ToolsList,
    ToolsCall,
    Unknown(String),
}

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Method::Initialize => "initialize",
            Method::Initialized => "notifications/initialized",
            Method::Ping => "ping",
            Method::ToolsList => "tools/list",
            Method::ToolsCall => "tools/call",
            Method::Unknown(name) => name,
        }
    }
}

impl From<&str> for Method {
    fn from(name: &str) -> Self {
        match name {
            "initialize" => Method::Initialize,
            "notifications/initialized" => Method::Initialized,
            "ping" => Method::Ping,
            "tools/list" => Method::ToolsList,
            "tools/call" => Method::ToolsCall,
            other => Method::Unknown(other.to_string()),
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// MCP-specific protocol messages

/// Tool definition for MCP
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// List tools response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListToolsResult {
    pub tools: Vec<ToolSchema>,
}

/// Call tool request params
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// Call tool response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolResult {
    pub content: Vec<ToolContent>,
    #[serde(rename = "isError", skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl CallToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::text(text)],
            is_error: None,
        }
    }

    /// Error-shaped result. Still a successful JSON-RPC reply.
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::error(text)],
            is_error: Some(true),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ToolContent {
    #[serde(rename = "text")]
    Text { text: String },
}

impl ToolContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::Text {
            text: format!("Error: {}", text.into()),
        }
    }
}

/// Initialize request params
///
/// Every member is optional: unsupported or missing fields are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitializeParams {
    #[serde(rename = "protocolVersion", default)]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub capabilities: Value,
    #[serde(rename = "clientInfo", default)]
    pub client_info: Option<ClientInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    #[serde(default)]
    pub version: String,
}

/// Initialize response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerCapabilities {
    pub tools: Option<ToolsCapability>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsCapability {
    #[serde(rename = "listChanged")]
    pub list_changed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

/// `notifications/message` payload pushed on a session's stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingMessage {
    pub level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logger: Option<String>,
    pub data: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_request() {
        let request =
            parse_request(br#"{"jsonrpc":"2.0","id":7,"method":"tools/list"}"#).unwrap();
        assert_eq!(request.id, Some(json!(7)));
        assert_eq!(request.method(), Method::ToolsList);
        assert!(request.params.is_none());
    }

    #[test]
    fn test_parse_request_without_jsonrpc_member() {
        let request = parse_request(br#"{"id":1,"method":"initialize"}"#).unwrap();
        assert_eq!(request.jsonrpc, "2.0");
        assert_eq!(request.method(), Method::Initialize);
    }

    #[test]
    fn test_parse_error_has_null_id() {
        let reply = parse_request(b"{not json").unwrap_err();
        assert_eq!(reply.error_code(), Some(error_codes::PARSE_ERROR));
        assert_eq!(reply.id, Value::Null);
    }

    #[test]
    fn test_invalid_request_keeps_id() {
        let reply = parse_request(br#"{"jsonrpc":"2.0","id":"abc"}"#).unwrap_err();
        assert_eq!(reply.error_code(), Some(error_codes::INVALID_REQUEST));
        assert_eq!(reply.id, json!("abc"));

        let reply = parse_request(br#"[1, 2, 3]"#).unwrap_err();
        assert_eq!(reply.error_code(), Some(error_codes::INVALID_REQUEST));
        assert_eq!(reply.id, Value::Null);
    }

    #[test]
    fn test_wrong_jsonrpc_version_rejected() {
        let reply = parse_request(br#"{"jsonrpc":"1.0","id":3,"method":"ping"}"#).unwrap_err();
        assert_eq!(reply.error_code(), Some(error_codes::INVALID_REQUEST));
        assert_eq!(reply.id, json!(3));
    }

    #[test]
    fn test_method_dispatch_names() {
        assert_eq!(Method::from("tools/call"), Method::ToolsCall);
        assert_eq!(
            Method::from("notifications/initialized"),
            Method::Initialized
        );
        assert_eq!(
            Method::from("resources/list"),
            Method::Unknown("resources/list".to_string())
        );
        assert_eq!(Method::from("resources/list").as_str(), "resources/list");
    }

    #[test]
    fn test_reply_round_trip_keeps_id() {
        for id in [json!(1), json!("req-1"), Value::Null] {
            let reply = JsonRpcResponse::success(id.clone(), json!({ "ok": true }));
            let text = serde_json::to_string(&reply).unwrap();
            let parsed: JsonRpcResponse = serde_json::from_str(&text).unwrap();
            assert_eq!(parsed.id, id);
            assert_eq!(parsed, reply);
        }
    }

    #[test]
    fn test_error_reply_shape() {
        let reply = JsonRpcResponse::error(json!(4), JsonRpcError::method_not_found("nope"));
        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value["error"]["code"], -32601);
        assert_eq!(value["error"]["message"], "Method not found: nope");
        assert!(value.get("result").is_none());
        assert!(value["error"].get("data").is_none());
    }

    #[test]
    fn test_tool_content_serializes_with_type_tag() {
        let result = CallToolResult::error("boom");
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["content"][0]["type"], "text");
        assert_eq!(value["content"][0]["text"], "Error: boom");
        assert_eq!(value["isError"], true);
    }
}
