pub mod calculate;
pub mod echo;
mod registry;
pub mod time;

pub use calculate::CalculateTool;
pub use echo::EchoTool;
pub use registry::{
    json_schema_object, json_schema_string, parse_arguments, Tool, ToolProvider, ToolRegistry,
};
pub use time::TimeTool;
