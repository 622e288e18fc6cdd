//! Configuration constants for the JiJiDown companion
//!
//! This module contains application-wide values including remote endpoints,
//! network and shutdown timeouts, log retention limits and settings ranges.

use std::time::Duration;

/// The current application version (keep in sync with Cargo.toml)
pub const APP_VERSION: &str = "0.3.0";

/// Folder name used under the platform config directory
pub const APP_DIR_NAME: &str = "JiJiDown";

/// Settings file name inside the config directory
pub const CONFIG_FILE_NAME: &str = "config.yaml";

/// Remote manifest listing `hash|version|filename` records for every core build
pub static HASH_MANIFEST_URL: &str = "https://jj.紫灵.top/PC/ReWPF/core/JiJiDownCore-hash.txt";

/// Base URL the core executable is fetched from (the filename is appended)
pub static CORE_DOWNLOAD_BASE_URL: &str = "https://jj.紫灵.top/PC/ReWPF/core/";

/// Timeout for the whole manifest request
pub static MANIFEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Connect timeout for the core download
pub static DOWNLOAD_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest silence tolerated between two reads of the download body
pub static DOWNLOAD_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Suffix of the file a download streams into before it replaces the target
pub static PARTIAL_SUFFIX: &str = ".part";

/// Size of each write in the download loop
pub static DOWNLOAD_CHUNK_SIZE: usize = 8192;

/// Minimum interval between two non-terminal progress callbacks
pub static PROGRESS_THROTTLE: Duration = Duration::from_millis(500);

/// Read buffer used while hashing the core executable
pub static HASH_CHUNK_SIZE: usize = 4096;

/// How long `stop()` waits for the core to exit after the terminate signal
pub static STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll interval while waiting for the core to exit
pub static STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Active core log file name inside the logs directory
pub static CORE_LOG_FILE_NAME: &str = "core_log.txt";

/// Maximum number of lines kept in the active core log
pub static MAX_LOG_LINES: usize = 1000;

/// Archived core logs older than this many days are pruned
pub static LOG_RETENTION_DAYS: u64 = 7;

/// Accepted values for `log-level`
pub static LOG_LEVELS: &[&str] = &["info", "warning", "error", "debug", "silent"];

/// Inclusive bounds for `download-task.max-task`
pub static MAX_TASK_RANGE: (i64, i64) = (1, 5);

/// Inclusive bounds for `download-task.download-speed-limit`
pub static SPEED_LIMIT_RANGE: (i64, i64) = (0, 1_048_576);

/// Inclusive bounds for the gRPC and gRPC-Web ports (0 disables the listener)
pub static PORT_RANGE: (i64, i64) = (1024, 49151);

/// The RESTful API port the core always listens on
pub static RESTFUL_API_PORT: i64 = 64001;

/// Default gRPC port
pub static DEFAULT_GRPC_PORT: i64 = 4000;

/// Default gRPC-Web port
pub static DEFAULT_GRPC_WEB_PORT: i64 = 4100;

/// Proxy schemes the core understands
pub static PROXY_SCHEMES: &[&str] = &["http://", "https://", "socks5://"];
