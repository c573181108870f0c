//! Built-in tool plugins.

pub mod delete;
pub mod edit;
pub mod grep;
pub mod read;
pub mod terminal;

use std::sync::Arc;

use flynn_core::provider::ApplyEditService;

use crate::process::ProcessManager;
use crate::registry::ToolRegistry;

pub use delete::DeleteFileTool;
pub use edit::EditFileTool;
pub use grep::GrepSearchTool;
pub use read::ReadFileTool;
pub use terminal::RunTerminalTool;

/// Registry preloaded with the built-in tools.
pub fn create_default_registry(
    process_manager: Arc<ProcessManager>,
    apply_edit: Arc<dyn ApplyEditService>,
) -> ToolRegistry {
    let registry = ToolRegistry::new();
    registry.register_builtin(Arc::new(ReadFileTool));
    registry.register_builtin(Arc::new(EditFileTool::new(apply_edit)));
    registry.register_builtin(Arc::new(DeleteFileTool));
    registry.register_builtin(Arc::new(GrepSearchTool));
    registry.register_builtin(Arc::new(RunTerminalTool::new(process_manager)));
    registry
}
