//! Shared types and collaborator contracts for the flynn workspace.
//!
//! Everything the engine, providers, and store agree on lives here:
//! message/block shapes, the session model, the tool plugin contract, the
//! provider stream grammar, and the traits for the external collaborators
//! (summarizer, apply-edit, session store, MCP bridge).

pub mod errors;
pub mod events;
pub mod ids;
pub mod mcp;
pub mod messages;
pub mod provider;
pub mod session;
pub mod store;
pub mod stream;
pub mod tokens;
pub mod tools;

pub use errors::ProviderError;
pub use events::AgentEvent;
pub use ids::{SessionId, ToolCallId};
pub use messages::{AssistantTurn, Block, DiffPayload, Message, Role, ToolResult};
pub use session::Session;
