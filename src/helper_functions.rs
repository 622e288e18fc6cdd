//! Common utility functions and validation helpers
//!
//! This module provides human-readable formatting for download progress and
//! the field checks used by the settings validator.

use std::path::Path;

use crate::config::{PORT_RANGE, PROXY_SCHEMES, RESTFUL_API_PORT};

/// Common utility functions used throughout the application
pub struct Utils;

impl Utils {
    /// Format a byte count as B/KB/MB/GB/TB with one decimal
    pub fn format_file_size(size_bytes: u64) -> String {
        if size_bytes == 0 {
            return "0 B".to_string();
        }
        let units = ["B", "KB", "MB", "GB", "TB"];
        let mut size = size_bytes as f64;
        let mut unit = 0;
        while size >= 1024.0 && unit < units.len() - 1 {
            size /= 1024.0;
            unit += 1;
        }
        format!("{:.1} {}", size, units[unit])
    }

    /// Format a transfer rate
    pub fn format_speed(bytes_per_sec: f64) -> String {
        format!("{}/s", Self::format_file_size(bytes_per_sec.max(0.0) as u64))
    }

    /// Format a remaining-time estimate
    pub fn format_eta(seconds: f64) -> String {
        let total = seconds.max(0.0) as u64;
        if total < 60 {
            format!("{}s", total)
        } else if total < 3600 {
            format!("{}m {}s", total / 60, total % 60)
        } else {
            format!("{}h {}m", total / 3600, (total % 3600) / 60)
        }
    }

    /// Create a progress percentage string
    pub fn format_progress(progress: f64) -> String {
        format!("{:.1}%", progress.clamp(0.0, 100.0))
    }
}

/// Input validation utilities
pub struct Validation;

impl Validation {
    /// Empty means "no proxy"; otherwise the scheme must be one the core supports
    pub fn is_valid_proxy_addr(value: &str) -> bool {
        value.is_empty() || PROXY_SCHEMES.iter().any(|scheme| value.starts_with(scheme))
    }

    /// gRPC style listener port: disabled (0) or a registered port
    pub fn is_valid_listener_port(port: i64) -> bool {
        port == 0 || (PORT_RANGE.0..=PORT_RANGE.1).contains(&port)
    }

    /// The RESTful API port is fixed
    pub fn is_valid_restful_port(port: i64) -> bool {
        port == RESTFUL_API_PORT
    }

    /// Validate that a folder path exists and is a directory
    pub fn is_valid_folder(path: &str) -> bool {
        !path.is_empty() && Path::new(path).is_dir()
    }

    /// The folder itself may be created later, but its parent must exist
    pub fn parent_exists(path: &str) -> bool {
        match Path::new(path).parent() {
            Some(parent) if parent.as_os_str().is_empty() => true,
            Some(parent) => Self::is_valid_folder(&parent.to_string_lossy()),
            None => true,
        }
    }
}
