//! Engine configuration
//!
//! Every section has defaults, so a TOML file only needs the keys it
//! changes:
//!
//! ```toml
//! [stream]
//! min_chunk_size = 8
//!
//! [budget]
//! max_context_tokens = 16000
//!
//! [pipeline]
//! reject_breaking_changes = true
//! ```

use sde_ledger::DEFAULT_MAX_BACKUPS;
use sde_stream::{BudgetConfig, StreamConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration failures
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Not valid TOML for this schema
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Parsed, but a value is out of range
    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// Safe apply pipeline settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Snapshot the file before every apply
    pub enable_backups: bool,
    /// Fail the semantic check on any breaking change, not only dangling references
    pub reject_breaking_changes: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enable_backups: true,
            reject_breaking_changes: false,
        }
    }
}

/// Backup ledger settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub max_backups_per_file: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_backups_per_file: DEFAULT_MAX_BACKUPS,
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub stream: StreamConfig,
    pub budget: BudgetConfig,
    pub pipeline: PipelineConfig,
    pub ledger: LedgerConfig,
}

impl EngineConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn with_stream(mut self, stream: StreamConfig) -> Self {
        self.stream = stream;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_budget(mut self, budget: BudgetConfig) -> Self {
        self.budget = budget;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_backups(mut self, enabled: bool) -> Self {
        self.pipeline.enable_backups = enabled;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_reject_breaking_changes(mut self, reject: bool) -> Self {
        self.pipeline.reject_breaking_changes = reject;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_max_backups(mut self, max: usize) -> Self {
        self.ledger.max_backups_per_file = max;
        self
    }

    /// Parse and validate a TOML document
    ///
    /// # Errors
    /// `Parse` for malformed TOML, `Invalid` for out-of-range values
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    ///
    /// # Errors
    /// `Io` if the file cannot be read, otherwise as [`Self::from_toml_str`]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    /// Check value ranges
    ///
    /// # Errors
    /// `Invalid` naming the first offending key
    pub fn validate(&self) -> Result<(), ConfigError> {
        let budget = &self.budget;
        if budget.chars_per_token == 0 {
            return Err(ConfigError::Invalid("budget.chars_per_token must be positive".into()));
        }
        if budget.max_context_tokens == 0 {
            return Err(ConfigError::Invalid("budget.max_context_tokens must be positive".into()));
        }
        if !(0.0..1.0).contains(&budget.safety_buffer) {
            return Err(ConfigError::Invalid("budget.safety_buffer must be in [0, 1)".into()));
        }
        for (key, ratio) in [
            ("budget.max_truncation_ratio", budget.max_truncation_ratio),
            ("budget.excess_share", budget.excess_share),
        ] {
            if !(ratio > 0.0 && ratio <= 1.0) {
                return Err(ConfigError::Invalid(format!("{key} must be in (0, 1]")));
            }
        }
        if self.stream.hard_timeout_ms < self.stream.soft_timeout_ms {
            return Err(ConfigError::Invalid(
                "stream.hard_timeout_ms must not be below stream.soft_timeout_ms".into(),
            ));
        }
        if self.ledger.max_backups_per_file == 0 {
            return Err(ConfigError::Invalid("ledger.max_backups_per_file must be positive".into()));
        }
        Ok(())
    }
}
