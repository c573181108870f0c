use flynn_core::errors::ProviderError;
use flynn_core::store::StoreError;
use flynn_core::tools::ToolError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("a run is already active for this session")]
    Busy,

    #[error("run aborted")]
    Aborted,

    #[error("max turns exceeded: {0}")]
    MaxTurnsExceeded(u32),

    #[error("{0}")]
    Internal(String),
}
