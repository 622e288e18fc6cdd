//! Error types for the JiJiDown companion
//!
//! Internal operations return [`Result`]; the public service methods convert
//! these into the boolean/option/result-struct values the UI renders.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors raised inside the companion services
#[derive(Debug, Error)]
pub enum CompanionError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid filename: {0:?}")]
    InvalidFilename(String),

    #[error("Core executable not found: {}", .0.display())]
    CoreMissing(PathBuf),

    #[error("Config file not found: {}", .0.display())]
    ConfigMissing(PathBuf),

    #[error("Core is already running")]
    AlreadyRunning,

    #[error("Core is not running")]
    NotRunning,

    #[error("Core did not exit within {0:?}")]
    StopTimeout(Duration),

    #[error("Invalid config document: {0}")]
    InvalidDocument(String),
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, CompanionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_missing_display() {
        let err = CompanionError::CoreMissing(PathBuf::from("/opt/core"));
        assert_eq!(err.to_string(), "Core executable not found: /opt/core");
    }

    #[test]
    fn test_io_conversion() {
        let err: CompanionError = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, CompanionError::Io(_)));
        assert_eq!(err.to_string(), "IO error: gone");
    }
}
