//! Engine configuration.

use crate::core::HISTORY_CAPACITY;
use serde::{Deserialize, Serialize};

/// Tunables shared by the executor and the state machine.
///
/// Deserializes from any serde format; missing fields take their defaults.
///
/// ```rust
/// use switchboard::EngineConfig;
///
/// let config: EngineConfig = serde_json::from_str(r#"{ "max_rescue_depth": 2 }"#).unwrap();
/// assert_eq!(config.max_rescue_depth(), 2);
/// assert_eq!(config.history_capacity(), 100);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Longest chain of `on_timeout` rescues followed for a single call
    max_rescue_depth: usize,

    /// Retained history entries, never more than [`HISTORY_CAPACITY`]
    history_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_rescue_depth: 8,
            history_capacity: HISTORY_CAPACITY,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the rescue chain bound
    pub fn with_max_rescue_depth(mut self, depth: usize) -> Self {
        self.max_rescue_depth = depth;
        self
    }

    /// Set the history bound
    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    pub fn max_rescue_depth(&self) -> usize {
        self.max_rescue_depth
    }

    pub fn history_capacity(&self) -> usize {
        self.history_capacity.clamp(1, HISTORY_CAPACITY)
    }
}
