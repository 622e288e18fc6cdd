//! Persistent core log file with line cap, archival and retention
//!
//! Lines are stored as `[YYYY-MM-DD HH:MM:SS] text`. The active file never
//! holds more than `max_lines` lines; archived copies sit next to it as
//! `<stem>_<YYYYMMDD_HHMMSS>_<ms>.txt` and are pruned by modification time.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::Local;
use log::{debug, error, info};

use crate::config::{CORE_LOG_FILE_NAME, LOG_RETENTION_DAYS, MAX_LOG_LINES};
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct LogArchive {
    path: PathBuf,
    max_lines: usize,
    retention: Duration,
}

impl LogArchive {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_lines: MAX_LOG_LINES,
            retention: Duration::from_secs(LOG_RETENTION_DAYS * 24 * 60 * 60),
        }
    }

    /// `<logs_dir>/core_log.txt`
    pub fn in_dir(logs_dir: &Path) -> Self {
        Self::new(logs_dir.join(CORE_LOG_FILE_NAME))
    }

    pub fn with_max_lines(mut self, max_lines: usize) -> Self {
        self.max_lines = max_lines.max(1);
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn max_lines(&self) -> usize {
        self.max_lines
    }

    /// Append one timestamped line, then enforce the line cap
    pub fn append(&self, line: &str) -> bool {
        match self.try_append(line) {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to save log line: {}", e);
                false
            }
        }
    }

    fn try_append(&self, line: &str) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "[{}] {}", timestamp, line)?;
        drop(file);
        self.truncate()
    }

    fn truncate(&self) -> Result<()> {
        let content = fs::read_to_string(&self.path)?;
        let lines: Vec<&str> = content.lines().collect();
        if lines.len() <= self.max_lines {
            return Ok(());
        }
        let mut kept = lines[lines.len() - self.max_lines..].join("\n");
        kept.push('\n');
        fs::write(&self.path, kept)?;
        Ok(())
    }

    /// The most recent lines, empty when the file is missing or unreadable
    pub fn load_all(&self) -> Vec<String> {
        if !self.path.exists() {
            return Vec::new();
        }
        match fs::read_to_string(&self.path) {
            Ok(content) => {
                let lines: Vec<&str> = content.lines().collect();
                let start = lines.len().saturating_sub(self.max_lines);
                lines[start..].iter().map(|l| l.trim_end().to_string()).collect()
            }
            Err(e) => {
                error!("Failed to load logs: {}", e);
                Vec::new()
            }
        }
    }

    /// Delete the active file
    pub fn clear(&self) -> bool {
        match fs::remove_file(&self.path) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(e) => {
                error!("Failed to clear logs: {}", e);
                false
            }
        }
    }

    /// Move the active file aside and prune expired archives
    pub fn archive(&self) -> bool {
        match self.try_archive() {
            Ok(Some(archived)) => {
                info!("Log archived to {}", archived.display());
                true
            }
            Ok(None) => true,
            Err(e) => {
                error!("Log archival failed: {}", e);
                false
            }
        }
    }

    fn try_archive(&self) -> Result<Option<PathBuf>> {
        let size = match fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No log file to archive");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        if size == 0 {
            debug!("Log file is empty, nothing to archive");
            return Ok(None);
        }

        let now = Local::now();
        let archived = self.sibling(&format!(
            "{}_{}_{:03}.txt",
            self.stem(),
            now.format("%Y%m%d_%H%M%S"),
            now.timestamp_subsec_millis() % 1000
        ));
        fs::rename(&self.path, &archived)?;
        fs::File::create(&self.path)?;

        match self.prune() {
            Ok(0) => {}
            Ok(removed) => info!("Removed {} expired log archives", removed),
            Err(e) => error!("Failed to prune log archives: {}", e),
        }
        Ok(Some(archived))
    }

    /// Archived siblings of the active file, oldest name first
    pub fn archives(&self) -> Vec<PathBuf> {
        let Some(dir) = self.dir() else {
            return Vec::new();
        };
        let Ok(entries) = fs::read_dir(dir) else {
            return Vec::new();
        };
        let prefix = format!("{}_", self.stem());
        let active = self.path.file_name();
        let mut found: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.file_name() != active)
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with(&prefix) && name.ends_with(".txt"))
            })
            .collect();
        found.sort();
        found
    }

    fn prune(&self) -> Result<usize> {
        let cutoff = SystemTime::now()
            .checked_sub(self.retention)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut removed = 0;
        for archive in self.archives() {
            if fs::metadata(&archive)?.modified()? < cutoff {
                fs::remove_file(&archive)?;
                debug!("Removed expired archive {}", archive.display());
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "core_log".to_string())
    }

    fn dir(&self) -> Option<&Path> {
        match self.path.parent() {
            Some(parent) if parent.as_os_str().is_empty() => Some(Path::new(".")),
            other => other,
        }
    }

    fn sibling(&self, name: &str) -> PathBuf {
        self.dir().map(|d| d.join(name)).unwrap_or_else(|| PathBuf::from(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_formats_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let archive = LogArchive::in_dir(&dir.path().join("logs"));
        assert!(archive.append("[INFO] ready"));

        let lines = archive.load_all();
        assert_eq!(lines.len(), 1);
        let line = &lines[0];
        // [YYYY-MM-DD HH:MM:SS] is 21 characters
        assert_eq!(&line[..1], "[");
        assert_eq!(&line[20..22], "] ");
        assert!(line.ends_with("[INFO] ready"));
    }

    #[test]
    fn test_line_cap() {
        let dir = tempfile::tempdir().unwrap();
        let archive = LogArchive::in_dir(dir.path()).with_max_lines(5);
        for i in 0..12 {
            archive.append(&format!("line {}", i));
        }
        let lines = archive.load_all();
        assert_eq!(lines.len(), 5);
        assert!(lines[0].ends_with("line 7"));
        assert!(lines[4].ends_with("line 11"));
    }

    #[test]
    fn test_load_keeps_leading_indentation() {
        let dir = tempfile::tempdir().unwrap();
        let archive = LogArchive::in_dir(dir.path());
        archive.append("panic: runtime error");
        archive.append("    at main.go:42  ");

        let lines = archive.load_all();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].ends_with("]     at main.go:42"));
    }

    #[test]
    fn test_load_and_clear_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let archive = LogArchive::in_dir(dir.path());
        assert!(archive.load_all().is_empty());
        assert!(archive.clear());
        archive.append("x");
        assert!(archive.clear());
        assert!(!archive.path().exists());
    }

    #[test]
    fn test_archive_empty_or_missing_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let archive = LogArchive::in_dir(dir.path());
        assert!(archive.archive());
        fs::File::create(archive.path()).unwrap();
        assert!(archive.archive());
        assert!(archive.archives().is_empty());
    }

    #[test]
    fn test_archive_renames_and_recreates() {
        let dir = tempfile::tempdir().unwrap();
        let archive = LogArchive::in_dir(dir.path());
        archive.append("first run");
        assert!(archive.archive());

        assert!(archive.path().exists());
        assert_eq!(fs::metadata(archive.path()).unwrap().len(), 0);
        let archived = archive.archives();
        assert_eq!(archived.len(), 1);
        let name = archived[0].file_name().unwrap().to_str().unwrap().to_string();
        // core_log_YYYYMMDD_HHMMSS_mmm.txt
        assert!(name.starts_with("core_log_"));
        assert_eq!(name.len(), "core_log_".len() + 15 + 1 + 3 + 4);
        assert!(fs::read_to_string(&archived[0]).unwrap().contains("first run"));
    }
}
