//! Data structures shared across the companion services
//!
//! This module contains the values handed back to the UI layer: core file
//! information, hash check results, download task snapshots, classified log
//! entries and supervisor status.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

/// Live presence information about the core executable
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoreInfo {
    pub exists: bool,
    pub filename: String,
    pub absolute_path: PathBuf,
}

/// Which tier supplied the expected hash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HashSource {
    Official,
    Backup,
}

/// Outcome of comparing the local core executable against its expected hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HashVerificationResult {
    pub exists: bool,
    pub valid: bool,
    pub official_hash: Option<String>,
    pub local_hash: Option<String>,
    pub hash_source: Option<HashSource>,
    pub message: String,
}

impl HashVerificationResult {
    pub(crate) fn missing() -> Self {
        Self {
            exists: false,
            valid: false,
            official_hash: None,
            local_hash: None,
            hash_source: None,
            message: "Core executable not found".to_string(),
        }
    }

    pub(crate) fn failure(message: impl Into<String>) -> Self {
        Self {
            exists: true,
            valid: false,
            official_hash: None,
            local_hash: None,
            hash_source: None,
            message: message.into(),
        }
    }
}

/// Status of a download task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Downloading,
    Completed,
    Failed,
}

impl DownloadStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, DownloadStatus::Downloading)
    }
}

/// Progress snapshot of a single download
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadTask {
    pub id: String,
    pub filename: String,
    pub url: String,
    /// 0 when the server did not announce a length
    pub total_size: u64,
    pub downloaded_size: u64,
    pub status: DownloadStatus,
    /// Percentage in 0..=100
    pub progress: f64,
    pub speed_bytes_per_sec: f64,
    pub eta_seconds: f64,
    pub error: Option<String>,
}

/// Result returned by `Fetcher::download`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadOutcome {
    pub success: bool,
    pub task_id: String,
    pub file_path: Option<PathBuf>,
    pub error: Option<String>,
    pub message: String,
}

/// Severity derived from a core output line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSeverity {
    Error,
    Warning,
    Info,
    Debug,
    Success,
    Fatal,
}

impl LogSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogSeverity::Error => "error",
            LogSeverity::Warning => "warning",
            LogSeverity::Info => "info",
            LogSeverity::Debug => "debug",
            LogSeverity::Success => "success",
            LogSeverity::Fatal => "fatal",
        }
    }
}

impl fmt::Display for LogSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cleaned core output line with its classification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub text: String,
    pub severity: LogSeverity,
}

/// Lifecycle of the supervised core process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SupervisorState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

/// Point-in-time view of the supervisor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SupervisorStatus {
    pub is_running: bool,
    pub has_process_handle: bool,
    pub observer_count: usize,
    pub state: SupervisorState,
    pub pid: Option<u32>,
}

/// Aggregated result of `ConfigStore::validate`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_source_serializes_lowercase() {
        let json = serde_json::to_string(&HashSource::Backup).unwrap();
        assert_eq!(json, "\"backup\"");
    }

    #[test]
    fn test_download_status_terminal() {
        assert!(!DownloadStatus::Downloading.is_terminal());
        assert!(DownloadStatus::Completed.is_terminal());
        assert!(DownloadStatus::Failed.is_terminal());
    }

    #[test]
    fn test_missing_result_shape() {
        let result = HashVerificationResult::missing();
        assert!(!result.exists);
        assert!(!result.valid);
        assert!(result.hash_source.is_none());
    }
}
