use serde::{Deserialize, Serialize};

/// Token usage reported by a single model call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    #[serde(default)]
    pub cache_read_tokens: u32,
    #[serde(default)]
    pub cache_creation_tokens: u32,
}

impl TokenUsage {
    /// Total effective context size for this call. The compression
    /// threshold compares against this number.
    pub fn total_tokens(&self) -> u32 {
        self.input_tokens
            + self.output_tokens
            + self.cache_read_tokens
            + self.cache_creation_tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_sums_all_fields() {
        let usage = TokenUsage {
            input_tokens: 1000,
            output_tokens: 200,
            cache_read_tokens: 50_000,
            cache_creation_tokens: 300,
        };
        assert_eq!(usage.total_tokens(), 51_500);
    }

    #[test]
    fn default_is_zero() {
        assert_eq!(TokenUsage::default().total_tokens(), 0);
    }

    #[test]
    fn deserializes_without_cache_fields() {
        let usage: TokenUsage =
            serde_json::from_str(r#"{"input_tokens": 10, "output_tokens": 5}"#).unwrap();
        assert_eq!(usage.total_tokens(), 15);
    }
}
