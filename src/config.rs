//! Document configuration, loadable from TOML.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid document config: {0}")]
    Toml(#[from] toml::de::Error),
}

/// When groups marked dirty by Create/Destroy propagation are re-synced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirtyFlush {
    /// After the originals and derived deltas of every transaction, inside it.
    #[default]
    EndOfTransaction,
    /// Only when [`crate::core::Document::propagate_dirty_symbols`] is called.
    Manual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentConfig {
    /// Origin stamped on locally authored transactions.
    pub local_user_id: String,
    pub dirty_flush: DirtyFlush,
    /// Padding applied to both boxes before the bounds conflict test.
    pub conflict_bounds_epsilon: f64,
    /// Undo entries kept; 0 keeps all of them.
    pub max_undo_depth: usize,
    /// Also materialize the JSON form of deltas written into records.
    pub track_human_readable: bool,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            local_user_id: "local".to_string(),
            dirty_flush: DirtyFlush::EndOfTransaction,
            conflict_bounds_epsilon: 0.01,
            max_undo_depth: 256,
            track_human_readable: false,
        }
    }
}

impl DocumentConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(input)?)
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.local_user_id = user.into();
        self
    }
}
