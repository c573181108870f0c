//! Name → tool mapping for built-in and MCP-bridged tools.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{info, warn};

use flynn_core::mcp::{McpBridge, McpError, RemoteToolSpec};
use flynn_core::messages::ToolResult;
use flynn_core::tools::{Tool, ToolContext, ToolDefinition, ToolError};

/// Where a registered tool came from. Remote tools are unregistered as a
/// group when their server disconnects.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ToolSource {
    BuiltIn,
    Mcp(String),
}

struct ToolEntry {
    tool: Arc<dyn Tool>,
    source: ToolSource,
}

/// Registry of available tools. Built-ins are registered at startup;
/// remote tools come and go with MCP server connections and can never
/// shadow a built-in name.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, ToolEntry>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
        }
    }

    pub fn register_builtin(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.write().insert(
            name,
            ToolEntry {
                tool,
                source: ToolSource::BuiltIn,
            },
        );
    }

    /// Register a remote tool. Returns false (and keeps the existing entry)
    /// when the name is already taken.
    pub fn register_remote(&self, tool: Arc<dyn Tool>, server: &str) -> bool {
        let name = tool.name().to_string();
        let mut tools = self.tools.write();
        if tools.contains_key(&name) {
            warn!(tool = %name, server, "remote tool name already registered, skipped");
            return false;
        }
        tools.insert(
            name,
            ToolEntry {
                tool,
                source: ToolSource::Mcp(server.to_string()),
            },
        );
        true
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.tools.write().remove(name).is_some()
    }

    /// Resolve a tool call by name: the built-in table and the bridged
    /// remote tools share one namespace, built-ins having claimed their
    /// names first.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().get(name).map(|e| Arc::clone(&e.tool))
    }

    pub fn source(&self, name: &str) -> Option<ToolSource> {
        self.tools.read().get(name).map(|e| e.source.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.read().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Tool definitions for the model, sorted by name for a stable prompt.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .read()
            .values()
            .map(|e| e.tool.definition())
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn count(&self) -> usize {
        self.tools.read().len()
    }

    /// Connect to an MCP server and register every tool it advertises.
    /// Returns how many tools were registered.
    pub async fn connect_server(
        &self,
        bridge: &Arc<dyn McpBridge>,
        server: &str,
    ) -> Result<usize, McpError> {
        bridge.connect(server).await?;
        let specs = bridge.list_remote_tools(server).await?;

        let mut registered = 0;
        for spec in specs {
            let tool = Arc::new(RemoteTool::new(spec, Arc::clone(bridge)));
            if self.register_remote(tool, server) {
                registered += 1;
            }
        }
        info!(server, registered, "MCP server connected");
        Ok(registered)
    }

    /// Disconnect a server and unregister its tools. Returns how many
    /// tools were removed.
    pub async fn disconnect_server(
        &self,
        bridge: &Arc<dyn McpBridge>,
        server: &str,
    ) -> Result<usize, McpError> {
        let removed = {
            let mut tools = self.tools.write();
            let names: Vec<String> = tools
                .iter()
                .filter(|(_, e)| e.source == ToolSource::Mcp(server.to_string()))
                .map(|(name, _)| name.clone())
                .collect();
            for name in &names {
                tools.remove(name);
            }
            names.len()
        };
        bridge.disconnect(server).await?;
        info!(server, removed, "MCP server disconnected");
        Ok(removed)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Plugin-shaped adapter over the MCP bridge: calling the tool forwards to
/// `call_remote_tool` on whichever server advertised it.
pub struct RemoteTool {
    spec: RemoteToolSpec,
    bridge: Arc<dyn McpBridge>,
}

impl RemoteTool {
    pub fn new(spec: RemoteToolSpec, bridge: Arc<dyn McpBridge>) -> Self {
        Self { spec, bridge }
    }

    pub fn server(&self) -> &str {
        &self.spec.server
    }
}

#[async_trait]
impl Tool for RemoteTool {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn description(&self) -> &str {
        &self.spec.description
    }

    fn parameters_schema(&self) -> Value {
        self.spec.parameters_schema.clone()
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        match self.bridge.call_remote_tool(&self.spec.name, args).await {
            Ok(value) => Ok(ToolResult::ok(render_value(&value))),
            Err(e) => Ok(ToolResult::failed(e.to_string())),
        }
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flynn_core::ids::SessionId;
    use parking_lot::Mutex;
    use serde_json::json;

    struct DummyTool {
        name: String,
    }

    impl DummyTool {
        fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
            }
        }
    }

    #[async_trait]
    impl Tool for DummyTool {
        fn name(&self) -> &str {
            &self.name
        }
        fn description(&self) -> &str {
            "a dummy tool"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
            Ok(ToolResult::ok("ok"))
        }
    }

    /// In-memory bridge advertising a fixed tool list per server.
    struct FakeBridge {
        tools: Vec<RemoteToolSpec>,
        calls: Mutex<Vec<(String, Value)>>,
        connected: Mutex<Vec<String>>,
    }

    impl FakeBridge {
        fn new(tools: Vec<RemoteToolSpec>) -> Self {
            Self {
                tools,
                calls: Mutex::new(Vec::new()),
                connected: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl McpBridge for FakeBridge {
        async fn connect(&self, server: &str) -> Result<(), McpError> {
            self.connected.lock().push(server.to_string());
            Ok(())
        }
        async fn disconnect(&self, server: &str) -> Result<(), McpError> {
            self.connected.lock().retain(|s| s != server);
            Ok(())
        }
        async fn list_remote_tools(&self, server: &str) -> Result<Vec<RemoteToolSpec>, McpError> {
            Ok(self
                .tools
                .iter()
                .filter(|t| t.server == server)
                .cloned()
                .collect())
        }
        async fn call_remote_tool(&self, name: &str, params: Value) -> Result<Value, McpError> {
            self.calls.lock().push((name.to_string(), params));
            Ok(json!({"answer": 42}))
        }
    }

    fn spec(name: &str, server: &str) -> RemoteToolSpec {
        RemoteToolSpec {
            name: name.to_string(),
            description: "remote".to_string(),
            parameters_schema: json!({"type": "object"}),
            server: server.to_string(),
        }
    }

    #[test]
    fn register_and_get() {
        let registry = ToolRegistry::new();
        registry.register_builtin(Arc::new(DummyTool::new("read_file")));

        assert!(registry.contains("read_file"));
        assert!(!registry.contains("write_file"));
        assert_eq!(registry.count(), 1);
        assert_eq!(registry.source("read_file"), Some(ToolSource::BuiltIn));
    }

    #[test]
    fn names_and_definitions_sorted() {
        let registry = ToolRegistry::new();
        registry.register_builtin(Arc::new(DummyTool::new("grep_search")));
        registry.register_builtin(Arc::new(DummyTool::new("edit_file")));
        registry.register_builtin(Arc::new(DummyTool::new("read_file")));

        assert_eq!(registry.names(), vec!["edit_file", "grep_search", "read_file"]);
        let defs = registry.definitions();
        assert_eq!(defs[0].name, "edit_file");
        assert_eq!(defs[2].name, "read_file");
    }

    #[test]
    fn remote_never_shadows_builtin() {
        let registry = ToolRegistry::new();
        registry.register_builtin(Arc::new(DummyTool::new("read_file")));

        let bridge: Arc<dyn McpBridge> = Arc::new(FakeBridge::new(vec![]));
        let remote = Arc::new(RemoteTool::new(spec("read_file", "srv"), bridge));
        assert!(!registry.register_remote(remote, "srv"));
        assert_eq!(registry.source("read_file"), Some(ToolSource::BuiltIn));
    }

    #[tokio::test]
    async fn connect_registers_and_disconnect_unregisters() {
        let registry = ToolRegistry::new();
        registry.register_builtin(Arc::new(DummyTool::new("read_file")));

        let bridge: Arc<dyn McpBridge> = Arc::new(FakeBridge::new(vec![
            spec("fetch_issue", "tracker"),
            spec("read_file", "tracker"), // collides with the built-in
            spec("other_tool", "other"),
        ]));

        let registered = registry.connect_server(&bridge, "tracker").await.unwrap();
        assert_eq!(registered, 1);
        assert!(registry.contains("fetch_issue"));
        assert_eq!(
            registry.source("fetch_issue"),
            Some(ToolSource::Mcp("tracker".into()))
        );

        let removed = registry.disconnect_server(&bridge, "tracker").await.unwrap();
        assert_eq!(removed, 1);
        assert!(!registry.contains("fetch_issue"));
        assert!(registry.contains("read_file"));
    }

    #[tokio::test]
    async fn remote_tool_forwards_to_bridge() {
        let bridge = Arc::new(FakeBridge::new(vec![]));
        let tool = RemoteTool::new(spec("fetch_issue", "tracker"), bridge.clone() as Arc<dyn McpBridge>);

        let ctx = ToolContext::new(SessionId::new(), "/tmp");
        let result = tool
            .execute(json!({"issue": 7}), &ctx)
            .await
            .unwrap();

        assert!(result.success);
        assert!(result.content.contains("42"));
        let calls = bridge.calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "fetch_issue");
    }

    #[tokio::test]
    async fn remote_tool_failure_becomes_failed_result() {
        struct FailingBridge;

        #[async_trait]
        impl McpBridge for FailingBridge {
            async fn connect(&self, _: &str) -> Result<(), McpError> {
                Ok(())
            }
            async fn disconnect(&self, _: &str) -> Result<(), McpError> {
                Ok(())
            }
            async fn list_remote_tools(&self, _: &str) -> Result<Vec<RemoteToolSpec>, McpError> {
                Ok(vec![])
            }
            async fn call_remote_tool(&self, name: &str, _: Value) -> Result<Value, McpError> {
                Err(McpError::ToolNotFound(name.to_string()))
            }
        }

        let bridge: Arc<dyn McpBridge> = Arc::new(FailingBridge);
        let tool = RemoteTool::new(spec("gone", "srv"), bridge);
        let ctx = ToolContext::new(SessionId::new(), "/tmp");

        let result = tool.execute(json!({}), &ctx).await.unwrap();
        assert!(!result.success);
        assert!(result.content.contains("gone"));
    }
}
