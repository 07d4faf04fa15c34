//! ReAct agents: step decoding, prompting, the executor loop, and the
//! adapter that lets one agent serve as another's tool.

pub mod adapter;
pub mod executor;
pub mod injection_defense;
pub mod parser;
pub mod prompt;

pub use adapter::{describe_result, AgentTool};
pub use executor::{AgentExecutor, ExecutorSettings, RetryPolicy};
pub use parser::{parse_step, ParseError};
pub use prompt::PromptTemplate;
