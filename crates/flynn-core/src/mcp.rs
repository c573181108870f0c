use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A remote tool as advertised by an MCP server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RemoteToolSpec {
    pub name: String,
    pub description: String,
    pub parameters_schema: Value,
    /// Which server advertised the tool; used to unregister on disconnect.
    pub server: String,
}

#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("server not connected: {0}")]
    NotConnected(String),

    #[error("remote tool not found: {0}")]
    ToolNotFound(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// The MCP collaborator. Transport and handshake live behind this trait;
/// the engine only discovers, calls, and disconnects tools.
#[async_trait]
pub trait McpBridge: Send + Sync {
    async fn connect(&self, server: &str) -> Result<(), McpError>;
    async fn disconnect(&self, server: &str) -> Result<(), McpError>;
    async fn list_remote_tools(&self, server: &str) -> Result<Vec<RemoteToolSpec>, McpError>;
    async fn call_remote_tool(&self, name: &str, params: Value) -> Result<Value, McpError>;
}
