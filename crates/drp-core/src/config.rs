use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;

/// Per-object settings, loadable from TOML.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DrpObjectConfig {
    #[serde(default)]
    pub finality: FinalityConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalityConfig {
    #[serde(default = "default_finality_threshold")]
    pub finality_threshold: f64,
}

impl Default for FinalityConfig {
    fn default() -> Self {
        Self {
            finality_threshold: default_finality_threshold(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Reject merged vertices that carry no signature.
    #[serde(default)]
    pub require_signatures: bool,
    /// How far in the future a vertex timestamp may lie.
    #[serde(default)]
    pub max_clock_skew_ms: i64,
}

impl DrpObjectConfig {
    /// Parse and validate a TOML document.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML for this shape or a
    /// value is out of range.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).with_context(|| {
            format!("{}: failed to parse config", ErrorCode::ConfigParseError.code())
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file; a missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// # Errors
    ///
    /// Returns an error naming [`ErrorCode::InvalidConfig`] for out-of-range
    /// values.
    pub fn validate(&self) -> Result<()> {
        let threshold = self.finality.finality_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            bail!(
                "{}: finality_threshold must be in (0, 1], got {threshold}",
                ErrorCode::InvalidConfig.code()
            );
        }
        if self.validation.max_clock_skew_ms < 0 {
            bail!(
                "{}: max_clock_skew_ms must not be negative, got {}",
                ErrorCode::InvalidConfig.code(),
                self.validation.max_clock_skew_ms
            );
        }
        Ok(())
    }
}

const fn default_finality_threshold() -> f64 {
    0.51
}
