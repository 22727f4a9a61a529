use serde::Deserialize;

use crate::error::{KPathsError, Result};

pub const DEFAULT_MAX_DEPTH: usize = 100;
pub const MAX_DEPTH_LIMIT: usize = 10_000;
pub const DEFAULT_MAX_K: usize = 1000;
pub const MAX_K_LIMIT: usize = 100_000;
pub const DEFAULT_COST: f64 = 1.0;

/// Engine-wide settings. Per-request parameters override the defaults and
/// are clamped to the limits.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Depth bound when a request does not set `maxDepth`.
    pub default_max_depth: usize,
    /// Largest `k` a request may ask for; larger values are clamped.
    pub max_k: usize,
    /// Cost of an edge lacking the cost property.
    pub default_cost: f64,
    /// Emit per-candidate expansion traces for every request.
    pub debug: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_max_depth: DEFAULT_MAX_DEPTH,
            max_k: DEFAULT_MAX_K,
            default_cost: DEFAULT_COST,
            debug: false,
        }
    }
}

impl Settings {
    /// Load from a JSON object; missing keys keep their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        let settings: Settings = serde_json::from_str(text)
            .map_err(|e| KPathsError::InvalidRequest(format!("settings: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_max_depth > MAX_DEPTH_LIMIT {
            return Err(KPathsError::InvalidRequest(format!(
                "default_max_depth {} out of range 0..={}",
                self.default_max_depth, MAX_DEPTH_LIMIT
            )));
        }
        if !(1..=MAX_K_LIMIT).contains(&self.max_k) {
            return Err(KPathsError::InvalidRequest(format!(
                "max_k {} out of range 1..={}",
                self.max_k, MAX_K_LIMIT
            )));
        }
        if !self.default_cost.is_finite() || self.default_cost < 0.0 {
            return Err(KPathsError::InvalidRequest(format!(
                "default_cost {} must be finite and non-negative",
                self.default_cost
            )));
        }
        Ok(())
    }
}
