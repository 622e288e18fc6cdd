//! JiJiDown Companion - command line front end
//!
//! Verifies, fetches and runs the JiJiDown download core, and edits its
//! settings and logs.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info};
use serde::Serialize;
use serde_yaml::Value;

use jijidown_companion::config::APP_VERSION;
use jijidown_companion::{
    apply_level, setup_logging, BackupHashTable, CompanionApp, ConfigKey, DownloadTask,
    LogEntry, Utils,
};

#[derive(Parser)]
#[command(name = "jijidown-companion")]
#[command(about = "Verify, fetch and supervise the JiJiDown download core")]
#[command(version = APP_VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Print structured JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    /// Override the configured log level
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Hash manifest mirror
    #[arg(long, global = true)]
    manifest_url: Option<String>,

    /// Base URL the core filename is appended to
    #[arg(long, global = true)]
    download_url: Option<String>,

    /// Local file of `hash|version|filename` records used when the manifest is unreachable
    #[arg(long, global = true)]
    backup_hashes: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show platform, paths and core presence
    Info,
    /// Check the core executable against its published hash
    Verify,
    /// Download the core executable
    Fetch {
        /// Download even when the current core verifies
        #[arg(long)]
        force: bool,
    },
    /// Start the core and stream its output until it exits or Ctrl-C
    Run {
        /// Keep appending to the previous session's log instead of archiving it
        #[arg(long)]
        no_archive: bool,
    },
    /// Read and edit config.yaml
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Inspect the persisted core log
    Logs {
        #[command(subcommand)]
        action: LogsAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print a schema key (e.g. max_task) or a dotted path (e.g. download-task.max-task)
    Get { key: String },
    /// Assign a value (parsed as YAML) and save
    Set { key: String, value: String },
    /// Report every invalid setting
    Validate,
    /// Write the current settings to a file
    Export { path: PathBuf },
    /// Replace the settings with a file merged over defaults, then save
    Import { path: PathBuf },
    /// Restore defaults and save
    Reset,
    /// Print the config file location
    Path,
}

#[derive(Subcommand)]
enum LogsAction {
    /// Print the persisted core log
    Show,
    /// Delete the active log file
    Clear,
    /// Archive the active log file and prune old archives
    Archive,
}

// =============================================================================
// ERROR HANDLING
// =============================================================================

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

type CliResult = Result<bool, CliError>;

// =============================================================================
// OUTPUT
// =============================================================================

fn emit<T: Serialize>(json: bool, value: &T, text: impl FnOnce() -> String) -> Result<(), CliError> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{}", text());
    }
    Ok(())
}

fn render_value(value: &Value) -> Result<String, CliError> {
    Ok(match value {
        Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)?.trim_end().to_string(),
    })
}

fn print_entry(entry: &LogEntry, json: bool) -> Result<(), CliError> {
    if json {
        println!("{}", serde_json::to_string(entry)?);
    } else {
        println!("{:>7} | {}", entry.severity.as_str().to_uppercase(), entry.text);
    }
    Ok(())
}

fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(0);
    let style = ProgressStyle::with_template("[{bar:40}] {bytes}/{total_bytes} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
    bar.set_style(style);
    bar
}

// =============================================================================
// COMMANDS
// =============================================================================

fn show_info(app: &CompanionApp, json: bool) -> CliResult {
    #[derive(Serialize)]
    struct Info<'a> {
        version: &'a str,
        platform: &'a jijidown_companion::PlatformProfile,
        core: jijidown_companion::CoreInfo,
        config_file: PathBuf,
        paths: &'a jijidown_companion::DefaultPaths,
    }

    let info = Info {
        version: APP_VERSION,
        platform: app.profile(),
        core: app.core_info(),
        config_file: app.config_file_path(),
        paths: app.paths(),
    };
    emit(json, &info, || {
        format!(
            "JiJiDown Companion {}\nPlatform:  {:?} {} ({})\nCore:      {} [{}]\nConfig:    {}\nResources: {}\nLogs:      {}",
            info.version,
            info.platform.operating_system,
            info.platform.architecture,
            if info.platform.is_64bit { "64-bit" } else { "32-bit" },
            info.core.absolute_path.display(),
            if info.core.exists { "present" } else { "missing" },
            info.config_file.display(),
            info.paths.resources_dir.display(),
            info.paths.logs_dir.display(),
        )
    })?;
    Ok(true)
}

async fn verify(app: &CompanionApp, json: bool) -> CliResult {
    let result = app.check_core().await;
    emit(json, &result, || {
        let mut text = result.message.clone();
        if let (Some(expected), Some(local)) = (&result.official_hash, &result.local_hash) {
            text.push_str(&format!("\n  expected: {}\n  local:    {}", expected, local));
        }
        if let Some(source) = result.hash_source {
            text.push_str(&format!("\n  source:   {:?}", source));
        }
        text
    })?;
    Ok(result.valid)
}

async fn fetch(app: &CompanionApp, json: bool, force: bool) -> CliResult {
    if !force {
        let current = app.check_core().await;
        if current.valid {
            emit(json, &current, || "Core is present and verified; use --force to download anyway".to_string())?;
            return Ok(true);
        }
    }

    let bar = progress_bar();
    let reporter = bar.clone();
    let mut on_progress = move |task: &DownloadTask| {
        reporter.set_length(task.total_size);
        reporter.set_position(task.downloaded_size);
        reporter.set_message(format!(
            "{} {} ETA {}",
            Utils::format_progress(task.progress),
            Utils::format_speed(task.speed_bytes_per_sec),
            Utils::format_eta(task.eta_seconds)
        ));
    };
    let outcome = if json {
        app.download_core(None).await
    } else {
        app.download_core(Some(&mut on_progress)).await
    };
    bar.finish_and_clear();

    emit(json, &outcome, || match &outcome.file_path {
        Some(path) => format!("{} -> {}", outcome.message, path.display()),
        None => outcome.message.clone(),
    })?;
    Ok(outcome.success)
}

async fn run(app: &mut CompanionApp, json: bool, no_archive: bool) -> CliResult {
    if !no_archive {
        app.archive_logs();
    }

    let (_id, mut lines) = app.subscribe();
    if !app.start_core() {
        let status = app.core_status();
        emit(json, &status, || "Core failed to start, see the log for details".to_string())?;
        return Ok(false);
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut ticker = tokio::time::interval(Duration::from_millis(500));

    loop {
        tokio::select! {
            entry = lines.recv() => match entry {
                Some(entry) => print_entry(&entry, json)?,
                None => break,
            },
            _ = &mut ctrl_c => {
                info!("Interrupt received, stopping core");
                break;
            }
            _ = ticker.tick() => {
                if !app.supervisor().is_running() {
                    while let Ok(entry) = lines.try_recv() {
                        print_entry(&entry, json)?;
                    }
                    break;
                }
            }
        }
    }

    let stopped = if app.supervisor().is_running() {
        tokio::task::block_in_place(|| app.stop_core())
    } else {
        error!("Core exited on its own");
        false
    };
    Ok(stopped)
}

fn config_command(app: &mut CompanionApp, json: bool, action: ConfigAction) -> CliResult {
    app.initialize_config();
    let config = app.config_mut();

    match action {
        ConfigAction::Get { key } => {
            let value = match ConfigKey::from_name(&key) {
                Some(schema_key) => Some(config.get_config(schema_key)),
                None => config.get(&key).cloned(),
            };
            match value {
                Some(value) => {
                    let text = render_value(&value)?;
                    emit(json, &value, || text)?;
                    Ok(true)
                }
                None => {
                    error!("No setting at {}", key);
                    Ok(false)
                }
            }
        }
        ConfigAction::Set { key, value } => {
            let parsed: Value = serde_yaml::from_str(&value)?;
            match ConfigKey::from_name(&key) {
                Some(schema_key) => config.set_config(schema_key, parsed),
                None => config.set(&key, parsed),
            }
            Ok(config.save(None))
        }
        ConfigAction::Validate => {
            let report = config.validate();
            emit(json, &report, || {
                if report.valid {
                    "Configuration is valid".to_string()
                } else {
                    report.errors.iter().map(|e| format!("- {}", e)).collect::<Vec<_>>().join("\n")
                }
            })?;
            Ok(report.valid)
        }
        ConfigAction::Export { path } => Ok(config.export_to(&path)),
        ConfigAction::Import { path } => Ok(config.import_from(&path) && config.save(None)),
        ConfigAction::Reset => Ok(config.reset_to_default()),
        ConfigAction::Path => {
            let path = config.config_file_path();
            emit(json, &path, || path.display().to_string())?;
            Ok(true)
        }
    }
}

fn logs_command(app: &CompanionApp, json: bool, action: LogsAction) -> CliResult {
    match action {
        LogsAction::Show => {
            let lines = app.load_logs();
            emit(json, &lines, || lines.join("\n"))?;
            Ok(true)
        }
        LogsAction::Clear => Ok(app.clear_logs()),
        LogsAction::Archive => {
            let archived = app.archive_logs();
            let archives = app.archive().archives();
            emit(json, &archives, || {
                archives
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join("\n")
            })?;
            Ok(archived)
        }
    }
}

fn build_app(cli: &Cli) -> CompanionApp {
    let mut app = CompanionApp::new();
    if let Some(url) = &cli.manifest_url {
        app = app.with_manifest_url(url.clone());
    }
    if let Some(url) = &cli.download_url {
        app = app.with_download_base_url(url.clone());
    }
    if let Some(path) = &cli.backup_hashes {
        match BackupHashTable::load_from_file(path) {
            Ok(table) => app = app.with_backup_hashes(table),
            Err(e) => error!("Ignoring backup hashes from {}: {}", path.display(), e),
        }
    }
    app
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    setup_logging(cli.log_level.as_deref().unwrap_or("info"));
    info!("Starting JiJiDown Companion {}", APP_VERSION);

    let mut app = build_app(&cli);
    if cli.log_level.is_none() {
        app.config_mut().load(None);
        let level = app.config_mut().log_level();
        apply_level(&level);
    }

    let json = cli.json;
    let result = match cli.command {
        Commands::Info => show_info(&app, json),
        Commands::Verify => verify(&app, json).await,
        Commands::Fetch { force } => fetch(&app, json, force).await,
        Commands::Run { no_archive } => {
            app.initialize_config();
            run(&mut app, json, no_archive).await
        }
        Commands::Config { action } => config_command(&mut app, json, action),
        Commands::Logs { action } => logs_command(&app, json, action),
    };

    app.shutdown();

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
