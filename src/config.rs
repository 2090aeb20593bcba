//! Hyperparameters consumed at model construction

use crate::error::{NrmsError, NrmsResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Model hyperparameters.
///
/// Missing fields fall back to [`NrmsConfig::default`] when deserializing, so a JSON
/// file only needs to name what it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NrmsConfig {
    /// Number of attention heads
    pub head_num: usize,
    /// Per-head projection width
    pub head_dim: usize,
    /// Hidden width of the additive-attention scorer
    pub attention_hidden_dim: usize,
    /// Drop probability in [0, 1), shared by every dropout site
    pub dropout: f32,
    /// Report tensor shapes at each forward call
    pub verbose: bool,
    /// Base seed for weight initialization
    pub seed: u64,
}

impl Default for NrmsConfig {
    fn default() -> Self {
        Self {
            head_num: 20,
            head_dim: 20,
            attention_hidden_dim: 200,
            dropout: 0.2,
            verbose: false,
            seed: 42,
        }
    }
}

impl NrmsConfig {
    /// Width of every item and user vector: `head_num * head_dim`
    pub fn feature_dim(&self) -> usize {
        self.head_num * self.head_dim
    }

    pub fn validate(&self) -> NrmsResult<()> {
        if self.head_num == 0 {
            return Err(NrmsError::config("head_num must be positive"));
        }
        if self.head_dim == 0 {
            return Err(NrmsError::config("head_dim must be positive"));
        }
        if self.attention_hidden_dim == 0 {
            return Err(NrmsError::config("attention_hidden_dim must be positive"));
        }
        validate_dropout(self.dropout)
    }

    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> NrmsResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file
    pub fn from_path(path: impl AsRef<Path>) -> NrmsResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json(&self) -> NrmsResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

pub(crate) fn validate_dropout(p: f32) -> NrmsResult<()> {
    if !(0.0..1.0).contains(&p) {
        return Err(NrmsError::config(format!(
            "dropout must lie in [0, 1), got {}",
            p
        )));
    }
    Ok(())
}
