//! Core settings persistence and access
//!
//! This module loads, merges, validates and saves the YAML document the core
//! reads at startup. Every failure here is recovered locally: a broken or
//! missing file falls back to the defaults, and a rejected value falls back to
//! its schema default with a recorded warning.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};
use serde_yaml::{Mapping, Value};

use crate::config::CONFIG_FILE_NAME;
use crate::config_schema::{default_document, ConfigKey, Rule};
use crate::data_structures::ValidationReport;
use crate::error::{CompanionError, Result};
use crate::helper_functions::Validation;
use crate::system_info::DefaultPaths;

/// In-memory settings document plus its on-disk location
pub struct ConfigStore {
    data: Value,
    defaults: Value,
    paths: DefaultPaths,
    file_path: Option<PathBuf>,
    cache: HashMap<ConfigKey, Value>,
    warnings: Vec<String>,
}

impl ConfigStore {
    /// Start from the defaults derived from `paths`
    pub fn new(paths: DefaultPaths) -> Self {
        let defaults = default_document(&paths);
        Self {
            data: defaults.clone(),
            defaults,
            paths,
            file_path: None,
            cache: HashMap::new(),
            warnings: Vec::new(),
        }
    }

    /// `<config_dir>/config.yaml`
    pub fn default_file_path(&self) -> PathBuf {
        self.paths.config_dir.join(CONFIG_FILE_NAME)
    }

    /// File used by `save` and by `load(None)`
    pub fn config_file_path(&self) -> PathBuf {
        self.file_path
            .clone()
            .unwrap_or_else(|| self.default_file_path())
    }

    pub fn document(&self) -> &Value {
        &self.data
    }

    pub fn defaults(&self) -> &Value {
        &self.defaults
    }

    /// Warnings recorded when stored values were rejected
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    // =========================================================================
    // LOAD / SAVE
    // =========================================================================

    /// Load settings from disk, falling back to defaults if the file is missing or broken
    pub fn load(&mut self, path: Option<&Path>) -> Value {
        let config_file = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.config_file_path());
        self.file_path = Some(config_file.clone());
        self.cache.clear();

        self.data = if config_file.exists() {
            match read_document(&config_file) {
                Ok(loaded) => {
                    info!("Config loaded from {}", config_file.display());
                    self.merged_with_defaults(loaded)
                }
                Err(e) => {
                    error!("Failed to parse config file {}: {}. Using defaults.", config_file.display(), e);
                    self.defaults.clone()
                }
            }
        } else {
            info!("Config file {} not found. Using defaults.", config_file.display());
            self.defaults.clone()
        };
        self.data.clone()
    }

    /// Save the current document, or replace it with `doc` first
    pub fn save(&mut self, doc: Option<Value>) -> bool {
        if let Some(doc) = doc {
            self.data = doc;
            self.cache.clear();
        }
        let path = self.config_file_path();
        self.file_path = Some(path.clone());
        match write_document(&path, &self.data) {
            Ok(()) => {
                info!("Config saved to {}", path.display());
                true
            }
            Err(e) => {
                error!("Failed to save config to {}: {}", path.display(), e);
                false
            }
        }
    }

    /// Write the current document to an arbitrary path
    pub fn export_to(&self, path: &Path) -> bool {
        match write_document(path, &self.data) {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to export config to {}: {}", path.display(), e);
                false
            }
        }
    }

    /// Replace the current document with `path` merged over defaults
    pub fn import_from(&mut self, path: &Path) -> bool {
        if !path.exists() {
            warn!("Config import source {} does not exist", path.display());
            return false;
        }
        match read_document(path) {
            Ok(imported) => {
                self.data = self.merged_with_defaults(imported);
                self.cache.clear();
                info!("Config imported from {}", path.display());
                true
            }
            Err(e) => {
                error!("Failed to import config from {}: {}", path.display(), e);
                false
            }
        }
    }

    /// Replace everything with defaults and persist
    pub fn reset_to_default(&mut self) -> bool {
        self.data = self.defaults.clone();
        self.cache.clear();
        info!("Config reset to defaults");
        self.save(None)
    }

    /// First-run initialisation: write defaults when no config file exists yet
    pub fn ensure_config_file(&mut self) -> bool {
        let path = self.default_file_path();
        let existed = path.exists();
        self.load(Some(&path));
        if existed {
            debug!("Config file already present at {}", path.display());
            return true;
        }
        info!("Creating default config at {}", path.display());
        self.save(None)
    }

    fn merged_with_defaults(&self, loaded: Value) -> Value {
        let mut merged = self.defaults.clone();
        deep_merge(&mut merged, loaded);
        merged
    }

    // =========================================================================
    // RAW ACCESS
    // =========================================================================

    /// Look up a dotted path such as `download-task.max-task`
    pub fn get(&self, key_path: &str) -> Option<&Value> {
        let mut node = &self.data;
        for segment in key_path.split('.') {
            node = node.as_mapping()?.get(segment)?;
        }
        Some(node)
    }

    pub fn get_or(&self, key_path: &str, default: Value) -> Value {
        self.get(key_path).cloned().unwrap_or(default)
    }

    /// Assign a dotted path, creating intermediate mappings on the way
    pub fn set(&mut self, key_path: &str, value: impl Into<Value>) {
        let segments: Vec<&str> = key_path.split('.').collect();
        let Some((leaf, parents)) = segments.split_last() else {
            return;
        };
        let mut target = &mut self.data;
        for segment in parents {
            target = ensure_mapping(target)
                .entry(Value::from(*segment))
                .or_insert(Value::Null);
        }
        ensure_mapping(target).insert(Value::from(*leaf), value.into());
    }

    // =========================================================================
    // SCHEMA ACCESS
    // =========================================================================

    /// Resolve a schema key: stored value, else default, validated and normalised
    pub fn get_config(&mut self, key: ConfigKey) -> Value {
        if let Some(cached) = self.cache.get(&key) {
            return cached.clone();
        }

        let entry = key.schema();
        let mut value = match self.get(entry.path) {
            Some(stored) if !stored.is_null() => stored.clone(),
            _ => {
                let fallback = entry.default.resolve(&self.paths);
                debug!("Config {} not set, using default {}", key.as_str(), display_value(&fallback));
                fallback
            }
        };

        if let Some(rule) = entry.rule {
            if !rule.check(&value) {
                let message = format!(
                    "Config {} value {} failed validation, using default",
                    key.as_str(),
                    display_value(&value)
                );
                warn!("{}", message);
                self.warnings.push(message);
                value = entry.default.resolve(&self.paths);
            }
        }

        if let Some(normalizer) = entry.normalizer {
            value = normalizer.apply(value);
        }

        if let Some(post_processor) = entry.post_processor {
            if let Err(e) = post_processor.run(&value) {
                error!("Post-processing config {} failed: {}", key.as_str(), e);
            }
        }

        self.cache.insert(key, value.clone());
        value
    }

    pub fn set_config(&mut self, key: ConfigKey, value: impl Into<Value>) {
        let value = value.into();
        self.cache.remove(&key);
        info!("Config {} set to {}", key.as_str(), display_value(&value));
        self.set(key.schema().path, value);
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
        debug!("Config cache cleared");
    }

    pub fn log_level(&mut self) -> String {
        self.get_config(ConfigKey::LogLevel)
            .as_str()
            .unwrap_or("info")
            .to_string()
    }

    pub fn max_task(&mut self) -> i64 {
        self.get_config(ConfigKey::MaxTask).as_i64().unwrap_or(2)
    }

    pub fn download_dir(&mut self) -> PathBuf {
        self.path_setting(ConfigKey::DownloadDir)
    }

    pub fn temp_dir(&mut self) -> PathBuf {
        self.path_setting(ConfigKey::TempDir)
    }

    fn path_setting(&mut self, key: ConfigKey) -> PathBuf {
        match self.get_config(key).as_str() {
            Some(path) if !path.is_empty() => PathBuf::from(path),
            _ => PathBuf::from(
                key.schema()
                    .default
                    .resolve(&self.paths)
                    .as_str()
                    .unwrap_or_default(),
            ),
        }
    }

    // =========================================================================
    // VALIDATION
    // =========================================================================

    /// Check the stored document and report every violation
    pub fn validate(&self) -> ValidationReport {
        let mut errors = Vec::new();

        let log_level = self.stored(ConfigKey::LogLevel);
        if !Rule::OneOf(crate::config::LOG_LEVELS).check(&log_level) {
            errors.push(format!("Invalid log level: {}", display_value(&log_level)));
        }

        let max_task = self.stored(ConfigKey::MaxTask);
        if !ConfigKey::MaxTask.schema().rule.is_some_and(|rule| rule.check(&max_task)) {
            errors.push(format!("max-task must be between 1 and 5: {}", display_value(&max_task)));
        }

        let speed_limit = self.stored(ConfigKey::DownloadSpeedLimit);
        if !ConfigKey::DownloadSpeedLimit.schema().rule.is_some_and(|rule| rule.check(&speed_limit)) {
            errors.push(format!(
                "download-speed-limit must be between 0 and 1048576: {}",
                display_value(&speed_limit)
            ));
        }

        match self.stored(ConfigKey::ExternalPorts) {
            Value::Mapping(ports) => {
                for (name, port) in &ports {
                    let name = display_value(name);
                    let ok = match port.as_i64() {
                        Some(p) if name == "restful-api" => Validation::is_valid_restful_port(p),
                        Some(p) => Validation::is_valid_listener_port(p),
                        None => false,
                    };
                    if !ok && name == "restful-api" {
                        errors.push(format!("restful-api port must be 64001: {}", display_value(port)));
                    } else if !ok {
                        errors.push(format!(
                            "{} port must be 0 or between 1024 and 49151: {}",
                            name,
                            display_value(port)
                        ));
                    }
                }
            }
            other => errors.push(format!(
                "external-controller-port must be a mapping: {}",
                display_value(&other)
            )),
        }

        let proxy = self.stored(ConfigKey::ProxyAddr);
        if !Rule::ProxyAddr.check(&proxy) {
            errors.push(format!("Invalid proxy address: {}", display_value(&proxy)));
        }

        for (key, label) in [(ConfigKey::TempDir, "Temp"), (ConfigKey::DownloadDir, "Download")] {
            if let Some(dir) = self.stored(key).as_str().filter(|s| !s.is_empty()) {
                if !Validation::parent_exists(dir) {
                    let parent = Path::new(dir).parent().unwrap_or_else(|| Path::new(""));
                    errors.push(format!(
                        "{} directory parent does not exist: {}",
                        label,
                        parent.display()
                    ));
                }
            }
        }

        ValidationReport {
            valid: errors.is_empty(),
            errors,
        }
    }

    /// Stored value for `key`, or its default when absent
    fn stored(&self, key: ConfigKey) -> Value {
        let entry = key.schema();
        match self.get(entry.path) {
            Some(value) if !value.is_null() => value.clone(),
            _ => entry.default.resolve(&self.paths),
        }
    }
}

/// Recursively merge `update` into `base`, mapping by mapping
pub fn deep_merge(base: &mut Value, update: Value) {
    let Value::Mapping(update) = update else {
        *base = update;
        return;
    };
    let base_map = ensure_mapping(base);
    for (key, value) in update {
        match base_map.get_mut(&key) {
            Some(existing) if existing.is_mapping() && value.is_mapping() => deep_merge(existing, value),
            _ => {
                base_map.insert(key, value);
            }
        }
    }
}

fn ensure_mapping(value: &mut Value) -> &mut Mapping {
    if !value.is_mapping() {
        *value = Value::Mapping(Mapping::new());
    }
    match value {
        Value::Mapping(map) => map,
        _ => unreachable!("value was just replaced with a mapping"),
    }
}

fn read_document(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path)?;
    match serde_yaml::from_str::<Value>(&content)? {
        Value::Null => Ok(Value::Mapping(Mapping::new())),
        doc @ Value::Mapping(_) => Ok(doc),
        other => Err(CompanionError::InvalidDocument(format!(
            "expected a mapping at the top level, found {}",
            display_value(&other)
        ))),
    }
}

fn write_document(path: &Path, doc: &Value) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let yaml = serde_yaml::to_string(doc)?;
    std::fs::write(path, yaml)?;
    Ok(())
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_else(|_| format!("{:?}", other)),
    }
}
