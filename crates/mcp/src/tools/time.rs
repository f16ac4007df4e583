// Clock tool

use crate::error::ToolError;
use crate::protocol::{CallToolResult, ToolSchema};
use crate::tools::{json_schema_object, parse_arguments, Tool};
use chrono::{DateTime, FixedOffset, Utc};
use serde::Deserialize;

/// Tool that reports the current date and time
pub struct TimeTool;

#[derive(Debug, Deserialize)]
struct TimeArgs {
    #[serde(default = "default_timezone")]
    timezone: String,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

/// Resolve `UTC`, `Z`, or a `±HH:MM` offset.
fn parse_offset(timezone: &str) -> Option<FixedOffset> {
    let tz = timezone.trim();
    if tz.eq_ignore_ascii_case("utc") || tz.eq_ignore_ascii_case("gmt") || tz == "Z" {
        return FixedOffset::east_opt(0);
    }

    let (sign, rest) = match tz.as_bytes().first()? {
        b'+' => (1, &tz[1..]),
        b'-' => (-1, &tz[1..]),
        _ => return None,
    };
    let (hours, minutes) = rest.split_once(':').unwrap_or((rest, "0"));
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if hours > 14 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

fn render(now: DateTime<Utc>, timezone: &str) -> String {
    match parse_offset(timezone) {
        Some(offset) => {
            let local = now.with_timezone(&offset);
            format!(
                "Current Time\n\nTimezone: {}\nTime: {}\nISO: {}",
                timezone,
                local.format("%Y-%m-%d %H:%M:%S"),
                now.to_rfc3339()
            )
        }
        None => format!(
            "Current Time\n\nTimezone: {} (unrecognised, showing UTC)\nTime: {}\nISO: {}",
            timezone,
            now.format("%Y-%m-%d %H:%M:%S"),
            now.to_rfc3339()
        ),
    }
}

#[async_trait::async_trait]
impl Tool for TimeTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "get_time".to_string(),
            description: "Get the current date and time".to_string(),
            input_schema: json_schema_object(
                serde_json::json!({
                    "timezone": {
                        "type": "string",
                        "description": "Timezone: UTC or an offset such as +09:00",
                        "default": "UTC"
                    }
                }),
                vec![],
            ),
        }
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<CallToolResult, ToolError> {
        let args: TimeArgs = parse_arguments("get_time", arguments)?;
        Ok(CallToolResult::text(render(Utc::now(), &args.timezone)))
    }
}
