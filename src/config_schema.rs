//! Settings schema for the core's `config.yaml`
//!
//! Every recognised setting is described by plain data: where it lives in the
//! document, how its default is produced, and which rule, normalizer and
//! post-processor apply. Computed defaults are named variants resolved in a
//! single `match`, so the schema never stores closures.

use std::path::Path;

use serde::Serialize;
use serde_yaml::{Mapping, Value};

use crate::config::{
    DEFAULT_GRPC_PORT, DEFAULT_GRPC_WEB_PORT, LOG_LEVELS, MAX_TASK_RANGE, RESTFUL_API_PORT,
    SPEED_LIMIT_RANGE,
};
use crate::error::Result;
use crate::helper_functions::Validation;
use crate::system_info::DefaultPaths;

/// Settings reachable through `ConfigStore::get_config`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigKey {
    DownloadDir,
    TempDir,
    FfmpegPath,
    LogLevel,
    MaxTask,
    DownloadSpeedLimit,
    UserInfo,
    ExternalPorts,
    MaxRetry,
    RetryWait,
    PartWorkers,
    ProxyAddr,
}

impl ConfigKey {
    pub const ALL: [ConfigKey; 12] = [
        ConfigKey::DownloadDir,
        ConfigKey::TempDir,
        ConfigKey::FfmpegPath,
        ConfigKey::LogLevel,
        ConfigKey::MaxTask,
        ConfigKey::DownloadSpeedLimit,
        ConfigKey::UserInfo,
        ConfigKey::ExternalPorts,
        ConfigKey::MaxRetry,
        ConfigKey::RetryWait,
        ConfigKey::PartWorkers,
        ConfigKey::ProxyAddr,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigKey::DownloadDir => "download_dir",
            ConfigKey::TempDir => "temp_dir",
            ConfigKey::FfmpegPath => "ffmpeg_path",
            ConfigKey::LogLevel => "log_level",
            ConfigKey::MaxTask => "max_task",
            ConfigKey::DownloadSpeedLimit => "download_speed_limit",
            ConfigKey::UserInfo => "user_info",
            ConfigKey::ExternalPorts => "external_ports",
            ConfigKey::MaxRetry => "max_retry",
            ConfigKey::RetryWait => "retry_wait",
            ConfigKey::PartWorkers => "part_workers",
            ConfigKey::ProxyAddr => "proxy_addr",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|key| key.as_str() == name)
    }

    /// Schema entry for this key
    pub fn schema(&self) -> SchemaEntry {
        use ComputedDefault as C;
        use DefaultStrategy::{Computed, Literal};
        use LiteralDefault as L;

        match self {
            ConfigKey::DownloadDir => SchemaEntry::new("download-task.download-dir", Computed(C::DownloadDir)),
            ConfigKey::TempDir => SchemaEntry::new("download-task.temp-dir", Computed(C::TempDir))
                .post_process(PostProcessor::EnsureDir),
            ConfigKey::FfmpegPath => SchemaEntry::new("download-task.ffmpeg-path", Computed(C::FfmpegOnPath)),
            ConfigKey::LogLevel => SchemaEntry::new("log-level", Literal(L::Str("info")))
                .rule(Rule::OneOf(LOG_LEVELS)),
            ConfigKey::MaxTask => SchemaEntry::new("download-task.max-task", Literal(L::Int(2)))
                .rule(Rule::IntRange(MAX_TASK_RANGE.0, MAX_TASK_RANGE.1))
                .normalize(Normalizer::Clamp(MAX_TASK_RANGE.0, MAX_TASK_RANGE.1)),
            ConfigKey::DownloadSpeedLimit => SchemaEntry::new("download-task.download-speed-limit", Literal(L::Int(0)))
                .rule(Rule::IntRange(SPEED_LIMIT_RANGE.0, SPEED_LIMIT_RANGE.1)),
            ConfigKey::UserInfo => SchemaEntry::new("user-info", Computed(C::EmptyMapping)),
            ConfigKey::ExternalPorts => SchemaEntry::new("external-controller-port", Computed(C::ExternalPorts))
                .rule(Rule::ListenerPorts),
            ConfigKey::MaxRetry => SchemaEntry::new("jdm-settings.max-retry", Literal(L::Int(3)))
                .rule(Rule::IntRange(1, 10)),
            ConfigKey::RetryWait => SchemaEntry::new("jdm-settings.retry-wait", Literal(L::Int(5)))
                .rule(Rule::IntRange(1, 600)),
            ConfigKey::PartWorkers => SchemaEntry::new("jdm-settings.part-workers", Literal(L::Int(4)))
                .rule(Rule::IntRange(1, 8)),
            ConfigKey::ProxyAddr => SchemaEntry::new("jdm-settings.proxy-addr", Literal(L::Str("")))
                .rule(Rule::ProxyAddr),
        }
    }
}

/// How a setting produces its default
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultStrategy {
    Literal(LiteralDefault),
    Computed(ComputedDefault),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiteralDefault {
    Str(&'static str),
    Int(i64),
}

/// Defaults that depend on the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputedDefault {
    DownloadDir,
    TempDir,
    /// `ffmpeg` found on PATH, or empty
    FfmpegOnPath,
    ExternalPorts,
    EmptyMapping,
}

impl DefaultStrategy {
    pub fn resolve(&self, paths: &DefaultPaths) -> Value {
        match self {
            DefaultStrategy::Literal(LiteralDefault::Str(s)) => Value::from(*s),
            DefaultStrategy::Literal(LiteralDefault::Int(n)) => Value::from(*n),
            DefaultStrategy::Computed(ComputedDefault::DownloadDir) => path_value(&paths.download_dir),
            DefaultStrategy::Computed(ComputedDefault::TempDir) => path_value(&paths.temp_dir),
            DefaultStrategy::Computed(ComputedDefault::FfmpegOnPath) => which::which("ffmpeg")
                .map(|path| path_value(&path))
                .unwrap_or_else(|_| Value::from("")),
            DefaultStrategy::Computed(ComputedDefault::ExternalPorts) => default_ports(),
            DefaultStrategy::Computed(ComputedDefault::EmptyMapping) => Value::Mapping(Mapping::new()),
        }
    }
}

/// Validation rules a stored value must satisfy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    OneOf(&'static [&'static str]),
    IntRange(i64, i64),
    /// grpc/grpc-web are 0 or a registered port, restful-api is fixed
    ListenerPorts,
    ProxyAddr,
}

impl Rule {
    pub fn check(&self, value: &Value) -> bool {
        match self {
            Rule::OneOf(allowed) => value.as_str().is_some_and(|s| allowed.iter().any(|a| *a == s)),
            Rule::IntRange(min, max) => value.as_i64().is_some_and(|n| (*min..=*max).contains(&n)),
            Rule::ListenerPorts => {
                let Some(ports) = value.as_mapping() else {
                    return false;
                };
                if !ports.values().all(|port| port.as_i64().is_some()) {
                    return false;
                }
                let port = |name: &str| ports.get(name).and_then(Value::as_i64).unwrap_or(0);
                Validation::is_valid_listener_port(port("grpc"))
                    && Validation::is_valid_listener_port(port("grpc-web"))
                    && Validation::is_valid_restful_port(port("restful-api"))
            }
            Rule::ProxyAddr => value.as_str().is_some_and(Validation::is_valid_proxy_addr),
        }
    }
}

/// Adjustments applied after validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Normalizer {
    Clamp(i64, i64),
}

impl Normalizer {
    pub fn apply(&self, value: Value) -> Value {
        match (self, value.as_i64()) {
            (Normalizer::Clamp(min, max), Some(n)) => Value::from(n.clamp(*min, *max)),
            _ => value,
        }
    }
}

/// Side effects run on a resolved value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostProcessor {
    EnsureDir,
}

impl PostProcessor {
    pub fn run(&self, value: &Value) -> Result<()> {
        match self {
            PostProcessor::EnsureDir => {
                if let Some(dir) = value.as_str().filter(|s| !s.is_empty()) {
                    std::fs::create_dir_all(dir)?;
                }
                Ok(())
            }
        }
    }
}

/// One row of the schema table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaEntry {
    pub path: &'static str,
    pub default: DefaultStrategy,
    pub rule: Option<Rule>,
    pub normalizer: Option<Normalizer>,
    pub post_processor: Option<PostProcessor>,
}

impl SchemaEntry {
    fn new(path: &'static str, default: DefaultStrategy) -> Self {
        Self {
            path,
            default,
            rule: None,
            normalizer: None,
            post_processor: None,
        }
    }

    fn rule(mut self, rule: Rule) -> Self {
        self.rule = Some(rule);
        self
    }

    fn normalize(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = Some(normalizer);
        self
    }

    fn post_process(mut self, post_processor: PostProcessor) -> Self {
        self.post_processor = Some(post_processor);
        self
    }
}

fn path_value(path: &Path) -> Value {
    Value::from(path.to_string_lossy().into_owned())
}

fn mapping<const N: usize>(entries: [(&str, Value); N]) -> Value {
    let mut map = Mapping::new();
    for (key, value) in entries {
        map.insert(Value::from(key), value);
    }
    Value::Mapping(map)
}

fn default_ports() -> Value {
    mapping([
        ("grpc", Value::from(DEFAULT_GRPC_PORT)),
        ("grpc-web", Value::from(DEFAULT_GRPC_WEB_PORT)),
        ("restful-api", Value::from(RESTFUL_API_PORT)),
    ])
}

/// The full default document written on first run
pub fn default_document(paths: &DefaultPaths) -> Value {
    mapping([
        ("log-level", Value::from("info")),
        ("external-controller-port", default_ports()),
        (
            "user-info",
            mapping([
                ("access-token", Value::from("")),
                ("refresh-token", Value::from("")),
                ("cookies", Value::from("")),
                ("raw-access-token", Value::from("")),
                ("raw-cookies", Value::from("")),
                ("hide-nickname", Value::from(false)),
            ]),
        ),
        (
            "download-task",
            mapping([
                ("temp-dir", path_value(&paths.temp_dir)),
                ("download-dir", path_value(&paths.download_dir)),
                ("ffmpeg-path", Value::from("")),
                ("max-task", Value::from(2)),
                ("download-speed-limit", Value::from(0)),
                ("disable-mcdn", Value::from(false)),
            ]),
        ),
        (
            "jdm-settings",
            mapping([
                ("max-retry", Value::from(3)),
                ("retry-wait", Value::from(5)),
                ("session-workers", Value::from(4)),
                ("part-workers", Value::from(4)),
                ("min-split-size", Value::from(1_048_576)),
                ("proxy-addr", Value::from("")),
                ("check-best-mirror", Value::from(true)),
                ("cache-in-ram", Value::from(false)),
                ("cache-in-ram-limit", Value::from(536_870_912)),
                ("insecure-skip-verify", Value::from(false)),
                ("custom-root-certificates", Value::from("")),
            ]),
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn paths() -> DefaultPaths {
        DefaultPaths::under(Path::new("/work"), PathBuf::from("/cfg"))
    }

    #[test]
    fn test_key_names_round_trip() {
        for key in ConfigKey::ALL {
            assert_eq!(ConfigKey::from_name(key.as_str()), Some(key));
        }
        assert_eq!(ConfigKey::from_name("nope"), None);
    }

    #[test]
    fn test_every_schema_path_exists_in_defaults() {
        let doc = default_document(&paths());
        for key in ConfigKey::ALL {
            let mut node = &doc;
            for segment in key.schema().path.split('.') {
                node = node
                    .get(segment)
                    .unwrap_or_else(|| panic!("{} missing segment {}", key.as_str(), segment));
            }
        }
    }

    #[test]
    fn test_literal_defaults_pass_their_rules() {
        for key in ConfigKey::ALL {
            let entry = key.schema();
            if let (DefaultStrategy::Literal(_), Some(rule)) = (entry.default, entry.rule) {
                assert!(rule.check(&entry.default.resolve(&paths())), "{}", key.as_str());
            }
        }
    }

    #[test]
    fn test_port_rule() {
        assert!(Rule::ListenerPorts.check(&default_ports()));
        let bad_grpc = mapping([
            ("grpc", Value::from(80)),
            ("grpc-web", Value::from(4100)),
            ("restful-api", Value::from(64001)),
        ]);
        assert!(!Rule::ListenerPorts.check(&bad_grpc));
        let moved_rest = mapping([
            ("grpc", Value::from(0)),
            ("grpc-web", Value::from(0)),
            ("restful-api", Value::from(8080)),
        ]);
        assert!(!Rule::ListenerPorts.check(&moved_rest));
        assert!(!Rule::ListenerPorts.check(&Value::from(4000)));
    }

    #[test]
    fn test_int_range_rejects_strings() {
        assert!(!Rule::IntRange(1, 5).check(&Value::from("3")));
        assert!(Rule::IntRange(1, 5).check(&Value::from(3)));
    }

    #[test]
    fn test_clamp_normalizer() {
        assert_eq!(Normalizer::Clamp(1, 5).apply(Value::from(9)), Value::from(5));
        assert_eq!(Normalizer::Clamp(1, 5).apply(Value::from("x")), Value::from("x"));
    }

    #[test]
    fn test_computed_dir_defaults() {
        let p = paths();
        assert_eq!(
            DefaultStrategy::Computed(ComputedDefault::TempDir).resolve(&p),
            Value::from("/work/TEMP")
        );
        assert_eq!(
            DefaultStrategy::Computed(ComputedDefault::EmptyMapping).resolve(&p),
            Value::Mapping(Mapping::new())
        );
    }
}
