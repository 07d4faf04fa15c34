//! TaskRouter — natural-language tasks routed through a grand ReAct agent.
//!
//! The grand agent's tools are themselves agents: one that writes and runs
//! Python, and one per CSV dataset that answers with SQL queries.

pub mod agent;
pub mod config;
pub mod dataset;
pub mod inference;
pub mod router;
pub mod sandbox;
pub mod setup;
pub mod tools;
pub mod types;

pub use router::{DatasetBinding, RouterParts, TaskRouter};
