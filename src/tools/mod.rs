pub mod dataset;
pub mod python;
pub mod registry;
pub mod traits;

pub use dataset::{DatasetQueryTool, SQL_QUERY_TOOL};
pub use python::{PythonReplTool, PYTHON_REPL_TOOL};
pub use registry::{RegistryError, ToolRegistry};
pub use traits::{Tool, ToolDefinition};
