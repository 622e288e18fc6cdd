//! Streaming downloads of the core executable
//!
//! Each download is tracked as a [`DownloadTask`] that stays inspectable after
//! it finishes. Progress callbacks are throttled; the terminal callback always
//! fires and is always the last one.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use log::{debug, error, info, warn};
use tokio::io::AsyncWriteExt;

use crate::config::{
    CORE_DOWNLOAD_BASE_URL, DOWNLOAD_CHUNK_SIZE, DOWNLOAD_CONNECT_TIMEOUT, DOWNLOAD_READ_TIMEOUT,
    PARTIAL_SUFFIX, PROGRESS_THROTTLE,
};
use crate::data_structures::{DownloadOutcome, DownloadStatus, DownloadTask};
use crate::error::{CompanionError, Result};
use crate::helper_functions::Utils;
use crate::system_info::PlatformProfile;

/// Synchronous progress observer; must return quickly
pub type ProgressCallback<'a> = &'a mut (dyn FnMut(&DownloadTask) + Send);

/// Reduce a requested name to its last path component.
///
/// Both `/` and `\` count as separators, so `../../evil` becomes `evil`.
pub fn sanitize_filename(filename: &str) -> Result<String> {
    let base = filename
        .split(['/', '\\'])
        .filter(|part| !part.is_empty())
        .last()
        .unwrap_or("");
    if base.trim().is_empty() || base == "." || base == ".." {
        return Err(CompanionError::InvalidFilename(filename.to_string()));
    }
    Ok(base.to_string())
}

pub struct Fetcher {
    client: reqwest::Client,
    base_url: String,
    chunk_size: usize,
    throttle: Duration,
    profile: PlatformProfile,
    tasks: Arc<Mutex<HashMap<String, DownloadTask>>>,
}

impl Fetcher {
    pub fn new(profile: PlatformProfile) -> Self {
        Self {
            client: build_client(DOWNLOAD_CONNECT_TIMEOUT, DOWNLOAD_READ_TIMEOUT),
            base_url: CORE_DOWNLOAD_BASE_URL.to_string(),
            chunk_size: DOWNLOAD_CHUNK_SIZE,
            throttle: PROGRESS_THROTTLE,
            profile,
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Base URL the core filename is appended to
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Replace the connect and per-read timeouts
    pub fn with_timeouts(mut self, connect: Duration, read: Duration) -> Self {
        self.client = build_client(connect, read);
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_throttle(mut self, throttle: Duration) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn task_info(&self, task_id: &str) -> Option<DownloadTask> {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(task_id)
            .cloned()
    }

    pub fn all_tasks(&self) -> HashMap<String, DownloadTask> {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn store(&self, task: &DownloadTask) {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(task.id.clone(), task.clone());
    }

    /// Fetch the core build for this host into `resources_dir`
    pub async fn download_core(
        &self,
        resources_dir: &Path,
        on_progress: Option<ProgressCallback<'_>>,
    ) -> DownloadOutcome {
        let filename = self.profile.core_filename().as_str();
        let url = format!("{}{}", self.base_url, filename);
        let mut outcome = self.download(&url, filename, resources_dir, on_progress).await;
        let Some(path) = outcome.file_path.clone().filter(|_| outcome.success) else {
            return outcome;
        };
        if let Err(e) = mark_executable(&path).await {
            error!("Failed to mark {} executable: {}", path.display(), e);
            outcome.success = false;
            outcome.error = Some(e.to_string());
            outcome.message = format!("Downloaded core is not executable: {}", e);
        }
        outcome
    }

    /// Stream `url` into `save_dir/<filename>`; failures come back in the outcome.
    ///
    /// Bytes land in `<filename>.part` first, so an existing target is only
    /// replaced by a complete download.
    pub async fn download(
        &self,
        url: &str,
        filename: &str,
        save_dir: &Path,
        on_progress: Option<ProgressCallback<'_>>,
    ) -> DownloadOutcome {
        let safe_name = match sanitize_filename(filename) {
            Ok(name) => name,
            Err(e) => {
                error!("Refusing download: {}", e);
                return DownloadOutcome {
                    success: false,
                    task_id: String::new(),
                    file_path: None,
                    error: Some(e.to_string()),
                    message: format!("Download failed: {}", e),
                };
            }
        };

        let mut noop = |_: &DownloadTask| {};
        let callback: &mut (dyn FnMut(&DownloadTask) + Send) = match on_progress {
            Some(callback) => callback,
            None => &mut noop,
        };

        let task_id = format!("{}_{}", safe_name, chrono::Utc::now().timestamp_millis());
        let file_path = save_dir.join(&safe_name);
        let part_path = partial_path(&file_path);
        let mut task = DownloadTask {
            id: task_id.clone(),
            filename: safe_name.clone(),
            url: url.to_string(),
            total_size: 0,
            downloaded_size: 0,
            status: DownloadStatus::Downloading,
            progress: 0.0,
            speed_bytes_per_sec: 0.0,
            eta_seconds: 0.0,
            error: None,
        };
        self.store(&task);
        info!("Downloading {} to {}", url, file_path.display());

        let streamed = match self.stream_to_file(&mut task, save_dir, &part_path, callback).await {
            Ok(()) => tokio::fs::rename(&part_path, &file_path).await.map_err(CompanionError::from),
            Err(e) => Err(e),
        };
        match streamed {
            Ok(()) => {
                task.status = DownloadStatus::Completed;
                task.progress = 100.0;
                task.eta_seconds = 0.0;
                if task.total_size == 0 {
                    task.total_size = task.downloaded_size;
                }
                self.store(&task);
                callback(&task);
                info!(
                    "Download complete: {} ({})",
                    safe_name,
                    Utils::format_file_size(task.downloaded_size)
                );
                DownloadOutcome {
                    success: true,
                    task_id,
                    file_path: Some(file_path),
                    error: None,
                    message: format!("File {} downloaded", safe_name),
                }
            }
            Err(e) => {
                error!("Download of {} failed: {}", url, e);
                task.status = DownloadStatus::Failed;
                task.error = Some(e.to_string());
                self.store(&task);
                callback(&task);
                remove_partial(&part_path).await;
                DownloadOutcome {
                    success: false,
                    task_id,
                    file_path: None,
                    error: Some(e.to_string()),
                    message: format!("Download failed: {}", e),
                }
            }
        }
    }

    async fn stream_to_file(
        &self,
        task: &mut DownloadTask,
        save_dir: &Path,
        part_path: &Path,
        callback: &mut (dyn FnMut(&DownloadTask) + Send),
    ) -> Result<()> {
        tokio::fs::create_dir_all(save_dir).await?;

        let response = self
            .client
            .get(&task.url)
            .send()
            .await?
            .error_for_status()?;
        task.total_size = response.content_length().unwrap_or(0);
        self.store(task);

        let mut file = tokio::fs::File::create(part_path).await?;
        let mut stream = response.bytes_stream();
        let started = Instant::now();
        let mut last_report: Option<Instant> = None;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            for piece in chunk.chunks(self.chunk_size) {
                file.write_all(piece).await?;
                task.downloaded_size += piece.len() as u64;
                update_rates(task, started.elapsed());
                self.store(task);

                if last_report.is_none_or(|at| at.elapsed() >= self.throttle) {
                    callback(task);
                    last_report = Some(Instant::now());
                }
                tokio::task::yield_now().await;
            }
        }

        file.flush().await?;
        debug!("Wrote {} bytes to {}", task.downloaded_size, part_path.display());
        Ok(())
    }
}

fn build_client(connect: Duration, read: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(connect)
        .read_timeout(read)
        .build()
        .unwrap_or_else(|e| {
            warn!("Failed to build download client ({}), using defaults", e);
            reqwest::Client::new()
        })
}

/// `<file>.part` next to the target
fn partial_path(file_path: &Path) -> PathBuf {
    let mut name = file_path.file_name().unwrap_or_default().to_os_string();
    name.push(PARTIAL_SUFFIX);
    file_path.with_file_name(name)
}

#[cfg(unix)]
async fn mark_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn mark_executable(_path: &Path) -> Result<()> {
    Ok(())
}

fn update_rates(task: &mut DownloadTask, elapsed: Duration) {
    let secs = elapsed.as_secs_f64();
    let downloaded = task.downloaded_size as f64;
    task.speed_bytes_per_sec = if secs > 0.0 { downloaded / secs } else { 0.0 };
    if task.total_size > 0 {
        let remaining = task.total_size.saturating_sub(task.downloaded_size) as f64;
        task.progress = (downloaded / task.total_size as f64 * 100.0).min(100.0);
        task.eta_seconds = if task.speed_bytes_per_sec > 0.0 {
            remaining / task.speed_bytes_per_sec
        } else {
            0.0
        };
    } else {
        task.progress = 0.0;
        task.eta_seconds = 0.0;
    }
}

async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Removed partial file {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove partial file {}: {}", path.display(), e),
    }
}
