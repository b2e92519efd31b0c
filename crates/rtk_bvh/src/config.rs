//! Traversal configuration.
//!
//! Epsilons and curve settings depend on scene scale and are tuned per
//! renderer, so they are inputs rather than constants. Configuration can be
//! built in code or loaded from JSON:
//!
//! ```ignore
//! let config = TraversalConfig::from_json_str(r#"{ "curve": { "shape": "cardinal" } }"#)?;
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// How curve segments between keys are shaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CurveShape {
    /// Straight cone frustum between two keys.
    #[default]
    Linear,
    /// Catmull-Rom spline through neighbouring keys, tessellated on the fly.
    Cardinal,
}

/// Curve intersection settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CurveConfig {
    pub shape: CurveShape,
    /// Linear pieces per segment for `Cardinal` curves.
    pub subdivisions: u32,
    /// Upper bound on the radius extension added by minimum width.
    pub maximum_width: f32,
}

impl Default for CurveConfig {
    fn default() -> Self {
        Self {
            shape: CurveShape::Linear,
            subdivisions: 4,
            maximum_width: 0.1,
        }
    }
}

/// Settings for a [`Kernel`](crate::Kernel).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraversalConfig {
    /// Triangle determinant magnitude under which a ray counts as parallel.
    pub triangle_epsilon: f32,
    /// Hits at or below this distance are ignored (self-intersection offset).
    pub min_distance: f32,
    pub curve: CurveConfig,
    /// Gather node/primitive counters in [`KernelStats`](crate::KernelStats).
    pub collect_stats: bool,
}

impl Default for TraversalConfig {
    fn default() -> Self {
        Self {
            triangle_epsilon: 1e-12,
            min_distance: 0.0,
            curve: CurveConfig::default(),
            collect_stats: false,
        }
    }
}

impl TraversalConfig {
    /// Parse and validate a JSON document. Missing fields take defaults.
    pub fn from_json_str(json: &str) -> ConfigResult<Self> {
        let config: TraversalConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json_str(&text)?;
        log::info!("Loaded traversal config from {}", path.display());
        Ok(config)
    }

    /// Serialize to pretty JSON.
    pub fn to_json_string(&self) -> ConfigResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject values the kernel cannot work with.
    pub fn validate(&self) -> ConfigResult<()> {
        if !(self.triangle_epsilon >= 0.0) || !self.triangle_epsilon.is_finite() {
            return Err(ConfigError::Invalid {
                field: "triangle_epsilon",
                reason: "must be finite and non-negative",
            });
        }
        if !(self.min_distance >= 0.0) || !self.min_distance.is_finite() {
            return Err(ConfigError::Invalid {
                field: "min_distance",
                reason: "must be finite and non-negative",
            });
        }
        if self.curve.subdivisions == 0 || self.curve.subdivisions > 64 {
            return Err(ConfigError::Invalid {
                field: "curve.subdivisions",
                reason: "must be between 1 and 64",
            });
        }
        if !(self.curve.maximum_width >= 0.0) {
            return Err(ConfigError::Invalid {
                field: "curve.maximum_width",
                reason: "must be non-negative",
            });
        }
        Ok(())
    }
}
