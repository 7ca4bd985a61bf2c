use serde::{Deserialize, Serialize};

/// Token usage reported by a model client for one generation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_estimate: Option<f64>,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            cost_estimate: None,
        }
    }

    pub fn total_tokens(&self) -> u32 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }

    pub fn is_empty(&self) -> bool {
        self.prompt_tokens == 0 && self.completion_tokens == 0
    }
}

impl std::ops::Add for Usage {
    type Output = Usage;

    fn add(self, rhs: Usage) -> Usage {
        let cost_estimate = match (self.cost_estimate, rhs.cost_estimate) {
            (None, None) => None,
            (a, b) => Some(a.unwrap_or(0.0) + b.unwrap_or(0.0)),
        };
        Usage {
            prompt_tokens: self.prompt_tokens.saturating_add(rhs.prompt_tokens),
            completion_tokens: self.completion_tokens.saturating_add(rhs.completion_tokens),
            cost_estimate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_and_emptiness() {
        let u = Usage::new(100, 50);
        assert_eq!(u.total_tokens(), 150);
        assert!(!u.is_empty());
        assert!(Usage::default().is_empty());
    }

    #[test]
    fn addition_accumulates() {
        let a = Usage {
            prompt_tokens: 100,
            completion_tokens: 10,
            cost_estimate: Some(0.01),
        };
        let b = Usage {
            prompt_tokens: 200,
            completion_tokens: 20,
            cost_estimate: None,
        };
        let sum = a + b;
        assert_eq!(sum.prompt_tokens, 300);
        assert_eq!(sum.completion_tokens, 30);
        assert_eq!(sum.cost_estimate, Some(0.01));
    }

    #[test]
    fn addition_saturates() {
        let a = Usage::new(u32::MAX, 1);
        let b = Usage::new(1, 1);
        assert_eq!((a + b).prompt_tokens, u32::MAX);
    }

    #[test]
    fn serde_roundtrip() {
        let u = Usage {
            prompt_tokens: 5,
            completion_tokens: 7,
            cost_estimate: Some(0.003),
        };
        let json = serde_json::to_string(&u).unwrap();
        let parsed: Usage = serde_json::from_str(&json).unwrap();
        assert_eq!(u, parsed);
    }
}
