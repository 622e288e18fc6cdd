//! Logging setup and the background core log writer
//!
//! Diagnostics go through the `log` facade with `env_logger` as the backend.
//! Core output is persisted by [`ArchiveWriter`], which owns the
//! [`LogArchive`] on its own thread so the supervisor's reader never touches
//! the disk.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, LevelFilter};

use crate::core_manager::LogObserver;
use crate::data_structures::LogEntry;
use crate::error::Result;
use crate::log_archive::LogArchive;

/// Map a config `log-level` value onto a filter
pub fn level_filter(level: &str) -> LevelFilter {
    match level.to_lowercase().as_str() {
        "silent" | "off" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "warning" | "warn" => LevelFilter::Warn,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    }
}

/// Initialize the global logger at `level`; `RUST_LOG` overrides it.
///
/// Returns `false` when a logger was already installed.
pub fn setup_logging(level: &str) -> bool {
    let installed = env_logger::Builder::new()
        .filter_level(LevelFilter::Trace)
        .parse_env(env_logger::Env::default())
        .format_timestamp_secs()
        .try_init()
        .is_ok();
    if installed {
        apply_level(level);
    }
    installed
}

/// Change the active level once the config is known, unless `RUST_LOG` is set
pub fn apply_level(level: &str) {
    if std::env::var_os(env_logger::DEFAULT_FILTER_ENV).is_some() {
        return;
    }
    log::set_max_level(level_filter(level));
}

/// Messages understood by the writer thread
#[derive(Debug, Clone)]
pub enum ArchiveMessage {
    Line(String),
    Archive,
    Clear,
    Shutdown,
}

/// Single writer for the core log file
pub struct ArchiveWriter {
    sender: mpsc::Sender<ArchiveMessage>,
    handle: Option<JoinHandle<()>>,
}

impl ArchiveWriter {
    /// Start the writer thread, which takes ownership of `archive`
    pub fn spawn(archive: LogArchive) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("core-log-writer".to_string())
            .spawn(move || {
                for message in rx {
                    match message {
                        ArchiveMessage::Line(line) => {
                            archive.append(&line);
                        }
                        ArchiveMessage::Archive => {
                            archive.archive();
                        }
                        ArchiveMessage::Clear => {
                            archive.clear();
                        }
                        ArchiveMessage::Shutdown => break,
                    }
                }
                debug!("Core log writer stopped");
            })?;
        Ok(Self {
            sender: tx,
            handle: Some(handle),
        })
    }

    /// Queue a line; dropped silently if the writer is gone
    pub fn write(&self, line: impl Into<String>) {
        let _ = self.sender.send(ArchiveMessage::Line(line.into()));
    }

    /// Queue an archive pass after the lines already sent
    pub fn request_archive(&self) {
        let _ = self.sender.send(ArchiveMessage::Archive);
    }

    /// Queue deletion of the active file after the lines already sent
    pub fn request_clear(&self) {
        let _ = self.sender.send(ArchiveMessage::Clear);
    }

    /// Observer that forwards every entry's text to the writer
    pub fn observer(&self) -> LogObserver {
        let sender = self.sender.clone();
        Arc::new(move |entry: &LogEntry| {
            sender
                .send(ArchiveMessage::Line(entry.text.clone()))
                .map_err(|_| "core log writer has stopped".to_string())
        })
    }

    /// Flush pending lines and join the thread
    pub fn shutdown(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.sender.send(ArchiveMessage::Shutdown);
            let _ = handle.join();
        }
    }
}

impl Drop for ArchiveWriter {
    fn drop(&mut self) {
        self.finish();
    }
}
