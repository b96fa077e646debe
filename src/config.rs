//! Runtime-tunable bloom settings.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::stages::{ThresholdParams, DEFAULT_BLOOM_STRENGTH, DEFAULT_LUMA_THRESHOLD};

/// Threshold-stage settings, loadable from JSON.
///
/// ```json
/// { "luma_threshold": 2.0, "bloom_strength": 0.2 }
/// ```
///
/// Missing fields take their defaults.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BloomSettings {
    pub luma_threshold: f32,
    pub bloom_strength: f32,
}

impl Default for BloomSettings {
    fn default() -> Self {
        Self {
            luma_threshold: DEFAULT_LUMA_THRESHOLD,
            bloom_strength: DEFAULT_BLOOM_STRENGTH,
        }
    }
}

impl BloomSettings {
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        let settings: Self = serde_json::from_str(json)?;
        Ok(settings.sanitize())
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {}", path.display(), e))?;
        Self::from_json_str(&contents)
            .map_err(|e| anyhow::anyhow!("invalid settings in {}: {}", path.display(), e))
    }

    /// Clamp to non-negative values, replacing non-finite ones with defaults.
    pub fn sanitize(&self) -> Self {
        let defaults = Self::default();
        let clean = |value: f32, default: f32, name: &str| {
            if !value.is_finite() {
                log::warn!("{} is {}, using {}", name, value, default);
                default
            } else if value < 0.0 {
                log::warn!("{} is negative ({}), clamping to 0", name, value);
                0.0
            } else {
                value
            }
        };

        Self {
            luma_threshold: clean(self.luma_threshold, defaults.luma_threshold, "luma_threshold"),
            bloom_strength: clean(self.bloom_strength, defaults.bloom_strength, "bloom_strength"),
        }
    }

    pub fn threshold_params(&self) -> ThresholdParams {
        ThresholdParams {
            luma_threshold: self.luma_threshold,
            bloom_strength: self.bloom_strength,
        }
    }
}
