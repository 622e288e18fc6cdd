//! Core executable integrity checks
//!
//! The expected SHA-256 comes from the remote manifest first and from a
//! locally supplied backup table when the manifest is unreachable. Manifest
//! records have the form `hash|version|filename`, one per line.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};
use sha2::{Digest, Sha256};

use crate::config::{HASH_CHUNK_SIZE, HASH_MANIFEST_URL, MANIFEST_TIMEOUT};
use crate::data_structures::{HashSource, HashVerificationResult};
use crate::error::Result;
use crate::system_info::PlatformProfile;

/// Expected hashes used when the manifest cannot be fetched
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackupHashTable {
    hashes: HashMap<String, String>,
}

impl BackupHashTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, filename: impl Into<String>, hash: impl Into<String>) {
        self.hashes.insert(filename.into(), hash.into());
    }

    pub fn get(&self, filename: &str) -> Option<&str> {
        self.hashes.get(filename).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    /// Build a table from manifest-formatted text; malformed lines are skipped
    pub fn parse(content: &str) -> Self {
        let mut table = Self::new();
        for line in content.lines() {
            let parts: Vec<&str> = line.trim().split('|').collect();
            if parts.len() >= 3 && !parts[0].trim().is_empty() && !parts[2].trim().is_empty() {
                table.insert(parts[2].trim(), parts[0].trim());
            }
        }
        table
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let table = Self::parse(&content);
        info!("Loaded {} backup hashes from {}", table.len(), path.display());
        Ok(table)
    }
}

/// Find the hash recorded for `filename` in manifest text
pub fn parse_manifest(content: &str, filename: &str) -> Option<String> {
    content.lines().find_map(|line| {
        let parts: Vec<&str> = line.trim().split('|').collect();
        (parts.len() >= 3 && parts[2].trim() == filename).then(|| parts[0].trim().to_string())
    })
}

/// SHA-256 of a file as lowercase hex, read in fixed-size chunks
pub fn compute_sha256(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0_u8; HASH_CHUNK_SIZE];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Compares the local core executable against its expected hash
pub struct HashVerifier {
    client: reqwest::Client,
    manifest_url: String,
    backup: BackupHashTable,
    profile: PlatformProfile,
}

impl HashVerifier {
    pub fn new(profile: PlatformProfile) -> Self {
        let client = reqwest::Client::builder()
            .timeout(MANIFEST_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                warn!("Failed to build manifest client ({}), using defaults", e);
                reqwest::Client::new()
            });
        Self {
            client,
            manifest_url: HASH_MANIFEST_URL.to_string(),
            backup: BackupHashTable::new(),
            profile,
        }
    }

    /// Point at a mirror of the manifest
    pub fn with_manifest_url(mut self, url: impl Into<String>) -> Self {
        self.manifest_url = url.into();
        self
    }

    pub fn with_backup(mut self, backup: BackupHashTable) -> Self {
        self.backup = backup;
        self
    }

    pub fn backup_mut(&mut self) -> &mut BackupHashTable {
        &mut self.backup
    }

    pub fn manifest_url(&self) -> &str {
        &self.manifest_url
    }

    /// Expected hash from the remote manifest, `None` on any failure
    pub async fn fetch_official_hash(&self, filename: &str) -> Option<String> {
        match self.try_fetch_official_hash(filename).await {
            Ok(Some(hash)) => Some(hash),
            Ok(None) => {
                warn!("No manifest record for {}", filename);
                None
            }
            Err(e) => {
                error!("Failed to fetch official hash: {}", e);
                None
            }
        }
    }

    async fn try_fetch_official_hash(&self, filename: &str) -> Result<Option<String>> {
        let body = self
            .client
            .get(&self.manifest_url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(parse_manifest(&body, filename))
    }

    /// Hash a file off the async scheduler
    pub async fn local_hash(path: &Path) -> Option<String> {
        let owned: PathBuf = path.to_path_buf();
        match tokio::task::spawn_blocking(move || compute_sha256(&owned)).await {
            Ok(Ok(hash)) => Some(hash),
            Ok(Err(e)) => {
                error!("Failed to hash {}: {}", path.display(), e);
                None
            }
            Err(e) => {
                error!("Hash task for {} did not complete: {}", path.display(), e);
                None
            }
        }
    }

    /// Check the core executable in `resources_dir`
    pub async fn verify(&self, resources_dir: &Path) -> HashVerificationResult {
        let core = self.profile.core_info(resources_dir);
        debug!("Checking core hash: {} at {}", core.filename, core.absolute_path.display());

        if !core.exists {
            warn!("Core executable not found: {}", core.absolute_path.display());
            return HashVerificationResult::missing();
        }

        let (expected, source) = match self.fetch_official_hash(&core.filename).await {
            Some(hash) => (hash, HashSource::Official),
            None => {
                info!("Official hash unavailable, trying backup table");
                match self.backup.get(&core.filename) {
                    Some(hash) => (hash.to_string(), HashSource::Backup),
                    None => {
                        error!("No expected hash available for {}", core.filename);
                        return HashVerificationResult::failure("Could not obtain an expected hash");
                    }
                }
            }
        };

        let Some(local) = Self::local_hash(&core.absolute_path).await else {
            return HashVerificationResult::failure("Could not compute the local hash");
        };

        let valid = expected.eq_ignore_ascii_case(&local);
        if valid {
            info!("Hash check passed: {}", core.filename);
        } else {
            warn!(
                "Hash mismatch for {}: expected {}, local {}",
                core.filename, expected, local
            );
        }

        HashVerificationResult {
            exists: true,
            valid,
            official_hash: Some(expected),
            local_hash: Some(local),
            hash_source: Some(source),
            message: if valid {
                "Hash check passed".to_string()
            } else {
                "Hash mismatch: the file may be corrupted or outdated".to_string()
            },
        }
    }
}
