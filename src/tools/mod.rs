pub mod dispatcher;
pub mod exit;
pub mod function;
pub mod registry;
pub mod schema;

pub use dispatcher::{Dispatched, ToolDispatcher, DEFAULT_TOOL_TIMEOUT_SECS};
pub use exit::{ExitTool, EXIT_TOOL_NAME};
pub use function::FunctionTool;
pub use registry::{Tool, ToolDescriptor, ToolRegistry};
pub use schema::{parameters_schema_for, validate_arguments};
