mod loader;
mod types;
mod validate;

pub use loader::{load_config, load_config_from_str};
pub use types::*;
pub use validate::validate_config;

use thiserror::Error;

use crate::classifier::PatternError;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    #[error("Invalid unregistered pattern: {0}")]
    InvalidPattern(#[from] PatternError),

    #[error("Exclude directory must be an absolute path: {0}")]
    RelativeExcludeDir(String),

    #[error("Invalid exclude pattern '{pattern}': {reason}")]
    InvalidExcludePattern { pattern: String, reason: String },

    #[error("Recycle bin {path} is unusable: {reason}")]
    RecycleBinUnusable { path: String, reason: String },
}
