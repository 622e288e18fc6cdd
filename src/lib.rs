//! JiJiDown Companion - Download Core Manager Library
//!
//! This library verifies, fetches and supervises the JiJiDown download core,
//! keeps its YAML settings and archives its log output.

pub mod config;
pub mod error;
pub mod data_structures;
pub mod helper_functions;
pub mod system_info;
pub mod config_schema;
pub mod settings;
pub mod integrity;
pub mod fetcher;
pub mod log_parser;
pub mod core_manager;
pub mod log_archive;
pub mod logging;
pub mod app;

// Re-export commonly used items
pub use app::CompanionApp;
pub use config_schema::ConfigKey;
pub use core_manager::{CoreSupervisor, LogObserver, ObserverId};
pub use data_structures::*;
pub use error::{CompanionError, Result};
pub use fetcher::{Fetcher, ProgressCallback};
pub use helper_functions::*;
pub use integrity::{BackupHashTable, HashVerifier};
pub use log_archive::LogArchive;
pub use logging::{apply_level, setup_logging, ArchiveWriter};
pub use settings::ConfigStore;
pub use system_info::{CoreFilename, DefaultPaths, OperatingSystem, PlatformProfile};
