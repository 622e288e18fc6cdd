//! Platform detection and default locations
//!
//! Resolves which core build matches the host and where the companion keeps
//! its config, scratch, download, log and resource folders.

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::APP_DIR_NAME;
use crate::data_structures::CoreInfo;

/// Host operating system family
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum OperatingSystem {
    Windows,
    MacOs,
    Linux,
    Other(String),
}

impl OperatingSystem {
    /// Map a `std::env::consts::OS` style name
    pub fn from_name(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "windows" => OperatingSystem::Windows,
            "macos" | "darwin" => OperatingSystem::MacOs,
            "linux" => OperatingSystem::Linux,
            other => OperatingSystem::Other(other.to_string()),
        }
    }
}

/// The six published core builds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CoreFilename {
    Win64,
    Win32,
    DarwinArm64,
    DarwinAmd64,
    LinuxArm64,
    LinuxAmd64,
}

impl CoreFilename {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoreFilename::Win64 => "JiJiDownCore-win64.exe",
            CoreFilename::Win32 => "JiJiDownCore-win32.exe",
            CoreFilename::DarwinArm64 => "JiJiDownCore-darwin-arm64",
            CoreFilename::DarwinAmd64 => "JiJiDownCore-darwin-amd64",
            CoreFilename::LinuxArm64 => "JiJiDownCore-linux-arm64",
            CoreFilename::LinuxAmd64 => "JiJiDownCore-linux-amd64",
        }
    }
}

impl fmt::Display for CoreFilename {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Default folders used when the settings do not override them
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DefaultPaths {
    pub temp_dir: PathBuf,
    pub download_dir: PathBuf,
    pub config_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub resources_dir: PathBuf,
}

impl DefaultPaths {
    /// Build the working-directory relative folders under `base`
    pub fn under(base: &Path, config_dir: PathBuf) -> Self {
        Self {
            temp_dir: base.join("TEMP"),
            download_dir: base.join("Download"),
            config_dir,
            logs_dir: base.join("logs"),
            resources_dir: base.join("resources"),
        }
    }
}

/// Host description, derived once at startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlatformProfile {
    pub operating_system: OperatingSystem,
    pub architecture: String,
    pub is_64bit: bool,
    pub is_arm: bool,
}

impl PlatformProfile {
    /// Detect the running host
    pub fn current() -> Self {
        Self::new(
            env::consts::OS,
            env::consts::ARCH,
            cfg!(target_pointer_width = "64"),
        )
    }

    /// Build a profile from explicit values
    pub fn new(os: &str, architecture: &str, is_64bit: bool) -> Self {
        let arch = architecture.to_lowercase();
        let is_arm = arch.contains("arm") || arch.contains("aarch64");
        Self {
            operating_system: OperatingSystem::from_name(os),
            architecture: arch,
            is_64bit,
            is_arm,
        }
    }

    /// Core build for this host; unknown systems get the win64 build
    pub fn core_filename(&self) -> CoreFilename {
        match self.operating_system {
            OperatingSystem::Windows if self.is_64bit => CoreFilename::Win64,
            OperatingSystem::Windows => CoreFilename::Win32,
            OperatingSystem::MacOs if self.is_arm => CoreFilename::DarwinArm64,
            OperatingSystem::MacOs => CoreFilename::DarwinAmd64,
            OperatingSystem::Linux if self.is_arm => CoreFilename::LinuxArm64,
            OperatingSystem::Linux => CoreFilename::LinuxAmd64,
            OperatingSystem::Other(_) => CoreFilename::Win64,
        }
    }

    /// Directory holding `config.yaml`
    pub fn config_dir(&self) -> PathBuf {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        match self.operating_system {
            OperatingSystem::Windows => env::var_os("APPDATA")
                .map(PathBuf::from)
                .or_else(dirs::config_dir)
                .unwrap_or_else(|| home.join("AppData").join("Roaming"))
                .join(APP_DIR_NAME),
            _ => home.join(".config").join(APP_DIR_NAME),
        }
    }

    /// Default folders; the non-config ones hang off the working directory
    pub fn default_paths(&self) -> DefaultPaths {
        let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        DefaultPaths::under(&cwd, self.config_dir())
    }

    /// Check the filesystem for the core executable in `resources_dir`
    pub fn core_info(&self, resources_dir: &Path) -> CoreInfo {
        let filename = self.core_filename().as_str().to_string();
        let path = resources_dir.join(&filename);
        let absolute_path = std::path::absolute(&path).unwrap_or(path);
        CoreInfo {
            exists: absolute_path.is_file(),
            filename,
            absolute_path,
        }
    }
}
