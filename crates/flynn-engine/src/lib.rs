//! The agent orchestration engine.
//!
//! This crate drives the conversation loop: it calls the model, executes
//! the tool calls the model requests, feeds the results back, and repeats
//! until the model answers in plain text. It also owns the two stateful
//! services around that loop: history compression once token usage crosses
//! the threshold, and the background-shell table for commands that outlive
//! a single turn.

pub mod compression;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod process;
pub mod registry;
pub mod tools;
pub mod truncate;

pub use compression::{CompressionController, CompressionReport};
pub use error::EngineError;
pub use executor::ToolExecutor;
pub use orchestrator::{ConversationOrchestrator, OrchestratorConfig};
pub use process::{ProcessManager, ShellOutput, ShellSnapshot, ShellStatus};
pub use registry::{RemoteTool, ToolRegistry, ToolSource};
