//! Application state for the JiJiDown companion
//!
//! `CompanionApp` is the composition root: it builds and owns every service
//! and is the only surface a UI or the CLI talks to.

use std::path::PathBuf;

use log::{error, info, warn};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::core_manager::{CoreSupervisor, ObserverId};
use crate::data_structures::{
    CoreInfo, DownloadOutcome, HashVerificationResult, LogEntry, SupervisorStatus,
};
use crate::fetcher::{Fetcher, ProgressCallback};
use crate::integrity::{BackupHashTable, HashVerifier};
use crate::log_archive::LogArchive;
use crate::logging::ArchiveWriter;
use crate::settings::ConfigStore;
use crate::system_info::{DefaultPaths, PlatformProfile};

pub struct CompanionApp {
    profile: PlatformProfile,
    paths: DefaultPaths,
    config: ConfigStore,
    verifier: HashVerifier,
    fetcher: Fetcher,
    supervisor: CoreSupervisor,
    archive: LogArchive,
    writer: Option<ArchiveWriter>,
    archive_observer: Option<ObserverId>,
}

impl Default for CompanionApp {
    fn default() -> Self {
        Self::new()
    }
}

impl CompanionApp {
    /// Services for the running host with working-directory defaults
    pub fn new() -> Self {
        let profile = PlatformProfile::current();
        let paths = profile.default_paths();
        Self::with_paths(profile, paths)
    }

    pub fn with_paths(profile: PlatformProfile, paths: DefaultPaths) -> Self {
        info!(
            "Initializing companion for {:?} {} (core {})",
            profile.operating_system,
            profile.architecture,
            profile.core_filename()
        );
        Self {
            config: ConfigStore::new(paths.clone()),
            verifier: HashVerifier::new(profile.clone()),
            fetcher: Fetcher::new(profile.clone()),
            supervisor: CoreSupervisor::new(profile.clone()),
            archive: LogArchive::in_dir(&paths.logs_dir),
            writer: None,
            archive_observer: None,
            profile,
            paths,
        }
    }

    pub fn with_manifest_url(mut self, url: impl Into<String>) -> Self {
        self.verifier = self.verifier.with_manifest_url(url);
        self
    }

    pub fn with_backup_hashes(mut self, backup: BackupHashTable) -> Self {
        self.verifier = self.verifier.with_backup(backup);
        self
    }

    pub fn with_download_base_url(mut self, url: impl Into<String>) -> Self {
        self.fetcher = self.fetcher.with_base_url(url);
        self
    }

    pub fn with_log_archive(mut self, archive: LogArchive) -> Self {
        self.archive = archive;
        self
    }

    pub fn profile(&self) -> &PlatformProfile {
        &self.profile
    }

    pub fn paths(&self) -> &DefaultPaths {
        &self.paths
    }

    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut ConfigStore {
        &mut self.config
    }

    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    pub fn supervisor(&self) -> &CoreSupervisor {
        &self.supervisor
    }

    pub fn archive(&self) -> &LogArchive {
        &self.archive
    }

    pub fn config_file_path(&self) -> PathBuf {
        self.config.default_file_path()
    }

    // =========================================================================
    // CONFIG
    // =========================================================================

    /// Write defaults on first run, otherwise load the existing file
    pub fn initialize_config(&mut self) -> bool {
        self.config.ensure_config_file()
    }

    // =========================================================================
    // CORE EXECUTABLE
    // =========================================================================

    pub fn core_info(&self) -> CoreInfo {
        self.profile.core_info(&self.paths.resources_dir)
    }

    pub async fn check_core(&self) -> HashVerificationResult {
        self.verifier.verify(&self.paths.resources_dir).await
    }

    pub async fn download_core(&self, on_progress: Option<ProgressCallback<'_>>) -> DownloadOutcome {
        self.fetcher
            .download_core(&self.paths.resources_dir, on_progress)
            .await
    }

    /// Verify the core, downloading it when it is missing or fails the check.
    ///
    /// A present core whose expected hash cannot be obtained is left alone.
    pub async fn ensure_core(&self, on_progress: Option<ProgressCallback<'_>>) -> HashVerificationResult {
        let result = self.check_core().await;
        if result.valid {
            return result;
        }
        if result.exists && result.hash_source.is_none() {
            warn!("Core present but unverifiable, keeping it: {}", result.message);
            return result;
        }

        info!("Core missing or outdated, downloading a fresh copy");
        let outcome = self.download_core(on_progress).await;
        if !outcome.success {
            return HashVerificationResult {
                message: outcome.message,
                ..result
            };
        }
        self.check_core().await
    }

    // =========================================================================
    // PROCESS
    // =========================================================================

    /// Start the core with the default config file, persisting its output
    pub fn start_core(&mut self) -> bool {
        self.attach_archive();
        self.record("Starting core...");
        let started = self
            .supervisor
            .start(&self.config_file_path(), &self.paths.resources_dir);
        self.record(if started { "Core started" } else { "Core failed to start" });
        started
    }

    pub fn stop_core(&mut self) -> bool {
        let stopped = self.supervisor.stop();
        self.record(if stopped { "Core stopped" } else { "Failed to stop core" });
        stopped
    }

    pub fn core_status(&self) -> SupervisorStatus {
        self.supervisor.status()
    }

    /// Stream of classified core output for async consumers
    pub fn subscribe(&self) -> (ObserverId, UnboundedReceiver<LogEntry>) {
        self.supervisor.channel_observer()
    }

    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        self.supervisor.remove_observer(id)
    }

    // =========================================================================
    // LOGS
    // =========================================================================

    pub fn load_logs(&self) -> Vec<String> {
        self.archive.load_all()
    }

    pub fn clear_logs(&self) -> bool {
        match &self.writer {
            Some(writer) => {
                writer.request_clear();
                writer.write("Logs cleared by user");
                true
            }
            None => {
                let cleared = self.archive.clear();
                if cleared {
                    self.archive.append("Logs cleared by user");
                }
                cleared
            }
        }
    }

    pub fn archive_logs(&self) -> bool {
        match &self.writer {
            Some(writer) => {
                writer.request_archive();
                true
            }
            None => self.archive.archive(),
        }
    }

    fn attach_archive(&mut self) {
        if self.writer.is_none() {
            match ArchiveWriter::spawn(self.archive.clone()) {
                Ok(writer) => self.writer = Some(writer),
                Err(e) => {
                    error!("Core output will not be persisted: {}", e);
                    return;
                }
            }
        }
        if self.archive_observer.is_none() {
            if let Some(writer) = &self.writer {
                self.archive_observer = Some(self.supervisor.add_observer(writer.observer()));
            }
        }
    }

    fn record(&self, line: &str) {
        match &self.writer {
            Some(writer) => writer.write(line),
            None => {
                self.archive.append(line);
            }
        }
    }

    /// Stop the core if needed and flush the log writer
    pub fn shutdown(mut self) {
        if self.supervisor.is_running() {
            self.stop_core();
        }
        if let Some(id) = self.archive_observer.take() {
            self.supervisor.remove_observer(id);
        }
        if let Some(writer) = self.writer.take() {
            writer.shutdown();
        }
        info!("Companion shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app_in(dir: &std::path::Path) -> CompanionApp {
        let paths = DefaultPaths::under(dir, dir.join("cfg"));
        CompanionApp::with_paths(PlatformProfile::current(), paths)
            .with_manifest_url("http://127.0.0.1:9/JiJiDownCore-hash.txt")
    }

    #[test]
    fn test_initialize_config_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app_in(dir.path());
        assert!(!app.config_file_path().exists());
        assert!(app.initialize_config());
        assert!(app.config_file_path().exists());
    }

    #[test]
    fn test_start_without_core_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app_in(dir.path());
        app.initialize_config();
        assert!(!app.start_core());
        assert!(!app.core_status().is_running);
        let log_path = app.archive().path().to_path_buf();
        app.shutdown();

        let lines = LogArchive::new(log_path).load_all();
        assert!(lines.iter().any(|l| l.ends_with("Starting core...")));
        assert!(lines.iter().any(|l| l.ends_with("Core failed to start")));
    }

    #[test]
    fn test_clear_logs_without_writer() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_in(dir.path());
        app.archive().append("old line");
        assert!(app.clear_logs());
        let lines = app.load_logs();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with("Logs cleared by user"));
    }

    #[tokio::test]
    async fn test_check_core_missing() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_in(dir.path());
        let result = app.check_core().await;
        assert!(!result.exists);
        assert!(!result.valid);
        assert!(!app.core_info().exists);
    }
}
