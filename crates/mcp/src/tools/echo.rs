// Echo tool

use crate::error::ToolError;
use crate::protocol::{CallToolResult, ToolSchema};
use crate::tools::{json_schema_object, json_schema_string, parse_arguments, Tool};
use serde::Deserialize;

/// Tool that returns the message it was given
pub struct EchoTool;

#[derive(Debug, Deserialize)]
struct EchoArgs {
    message: String,
}

#[async_trait::async_trait]
impl Tool for EchoTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "echo".to_string(),
            description: "Echo back a message".to_string(),
            input_schema: json_schema_object(
                serde_json::json!({
                    "message": json_schema_string("Message to echo back")
                }),
                vec!["message"],
            ),
        }
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<CallToolResult, ToolError> {
        let args: EchoArgs = parse_arguments("echo", arguments)?;
        Ok(CallToolResult::text(format!("Echo: {}", args.message)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ToolContent;
    use serde_json::json;

    #[tokio::test]
    async fn test_echo() {
        let result = EchoTool.execute(json!({ "message": "hi" })).await.unwrap();
        assert_eq!(result.content, vec![ToolContent::text("Echo: hi")]);
        assert!(result.is_error.is_none());
    }

    #[tokio::test]
    async fn test_echo_requires_message() {
        let err = EchoTool.execute(json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
