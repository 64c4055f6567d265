use serde::Deserialize;

use crate::error::CaptureError;
use crate::event::LogLevel;

pub const STDOUT_CATEGORY: &str = "system.out";
pub const STDERR_CATEGORY: &str = "system.err";

#[derive(Debug, Clone, Eq, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CaptureConfig {
    /// Category stamped on every captured line.
    pub category: String,
    /// Level announced when capture is first installed.
    pub initial_level: LogLevel,
    /// Pending bytes per thread before a line is emitted without a terminator.
    pub max_line_bytes: Option<usize>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            category: STDOUT_CATEGORY.to_string(),
            initial_level: LogLevel::Lifecycle,
            max_line_bytes: None,
        }
    }
}

impl CaptureConfig {
    pub fn stdout() -> Self {
        Self::default()
    }

    pub fn stderr() -> Self {
        Self {
            category: STDERR_CATEGORY.to_string(),
            ..Self::default()
        }
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.initial_level = level;
        self
    }

    pub fn with_max_line_bytes(mut self, limit: usize) -> Self {
        self.max_line_bytes = Some(limit);
        self
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, CaptureError> {
        let config: Self =
            toml::from_str(raw).map_err(|source| CaptureError::Config { source })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.category.trim().is_empty() {
            return Err(CaptureError::InvalidCategory {
                category: self.category.clone(),
            });
        }
        if self.max_line_bytes == Some(0) {
            return Err(CaptureError::InvalidLineLimit);
        }
        Ok(())
    }
}
