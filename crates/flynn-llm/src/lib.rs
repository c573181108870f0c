pub mod anthropic;
pub mod apply_edit;
pub mod sse;
pub mod summarize;
pub mod wire;

pub mod mock;

pub use anthropic::{AnthropicProvider, DEFAULT_MODEL};
pub use apply_edit::LlmApplyEdit;
pub use summarize::LlmSummarizer;
