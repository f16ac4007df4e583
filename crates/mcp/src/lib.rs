// MCP (Model Context Protocol) over streamable HTTP
// Protocol types, per-connection handler, session layer and the built-in tools.
// The HTTP surface lives in tether-server.

pub mod error;
pub mod handler;
pub mod protocol;
pub mod server;
pub mod session;
pub mod tools;

pub use error::{SessionError, SessionResult, ToolError, TransportError};
pub use handler::{Connection, ConnectionState, Dispatch, HandlerConfig, McpHandler};
pub use server::McpServer;
pub use session::{
    CloseReason, PushStream, RegistryConfig, Session, SessionId, SessionRegistry, SessionState,
    Transport,
};
pub use tools::{Tool, ToolProvider, ToolRegistry};
