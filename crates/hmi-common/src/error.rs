//! Error types shared across the HMI workspace

use thiserror::Error;

/// Result type alias for shared utilities
pub type Result<T> = std::result::Result<T, HmiError>;

#[derive(Error, Debug)]
pub enum HmiError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid setting '{name}': {value}")]
    InvalidSetting { name: String, value: String },
}

impl HmiError {
    pub fn invalid_setting(name: &str, value: impl Into<String>) -> Self {
        Self::InvalidSetting {
            name: name.to_string(),
            value: value.into(),
        }
    }
}
