//! Token usage reported by the terminal response event.

use serde::{Deserialize, Serialize};

/// Token usage for a response.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u32>,
}

impl Usage {
    /// Merge another usage into this one (accumulate across resume legs).
    pub fn merge(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
        if let Some(v) = other.cached_tokens {
            *self.cached_tokens.get_or_insert(0) += v;
        }
        if let Some(v) = other.reasoning_tokens {
            *self.reasoning_tokens.get_or_insert(0) += v;
        }
    }
}

/// Usage block as it appears on the wire.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct WireUsage {
    #[serde(default)]
    pub input_tokens: Option<u32>,
    #[serde(default)]
    pub output_tokens: Option<u32>,
    #[serde(default)]
    pub total_tokens: Option<u32>,
    #[serde(default)]
    pub input_tokens_details: Option<InputTokenDetails>,
    #[serde(default)]
    pub output_tokens_details: Option<OutputTokenDetails>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct InputTokenDetails {
    #[serde(default)]
    pub cached_tokens: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct OutputTokenDetails {
    #[serde(default)]
    pub reasoning_tokens: Option<u32>,
}

impl From<&WireUsage> for Usage {
    fn from(u: &WireUsage) -> Self {
        let input_tokens = u.input_tokens.unwrap_or(0);
        let output_tokens = u.output_tokens.unwrap_or(0);
        Usage {
            input_tokens,
            output_tokens,
            total_tokens: u.total_tokens.unwrap_or(input_tokens + output_tokens),
            cached_tokens: u.input_tokens_details.as_ref().and_then(|d| d.cached_tokens),
            reasoning_tokens: u
                .output_tokens_details
                .as_ref()
                .and_then(|d| d.reasoning_tokens),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_usage_fills_total_and_details() {
        let wire: WireUsage = serde_json::from_value(serde_json::json!({
            "input_tokens": 12,
            "output_tokens": 30,
            "input_tokens_details": {"cached_tokens": 4},
            "output_tokens_details": {"reasoning_tokens": 9}
        }))
        .unwrap();
        let usage = Usage::from(&wire);
        assert_eq!(usage.total_tokens, 42);
        assert_eq!(usage.cached_tokens, Some(4));
        assert_eq!(usage.reasoning_tokens, Some(9));
    }

    #[test]
    fn merge_accumulates_optional_counts() {
        let mut total = Usage {
            input_tokens: 1,
            output_tokens: 2,
            total_tokens: 3,
            ..Default::default()
        };
        total.merge(&Usage {
            input_tokens: 10,
            output_tokens: 20,
            total_tokens: 30,
            cached_tokens: Some(5),
            reasoning_tokens: None,
        });
        assert_eq!(total.total_tokens, 33);
        assert_eq!(total.cached_tokens, Some(5));
        assert_eq!(total.reasoning_tokens, None);
    }
}
