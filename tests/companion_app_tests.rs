mod common;

use jijidown_companion::{CompanionApp, DefaultPaths, HashSource, PlatformProfile, SupervisorState};

use common::{manifest_line, sha256_hex, write_file, Route, TestServer, UNREACHABLE};

const CORE_BYTES: &[u8] = b"freshly released core";

fn app_in(dir: &std::path::Path) -> CompanionApp {
    let paths = DefaultPaths::under(dir, dir.join("config"));
    CompanionApp::with_paths(PlatformProfile::current(), paths)
}

#[tokio::test]
async fn test_ensure_core_downloads_missing_core() {
    let filename = PlatformProfile::current().core_filename().as_str();
    let core_route = format!("/core/{}", filename);
    let server = TestServer::start(vec![
        ("/hash.txt", Route::ok(manifest_line(&sha256_hex(CORE_BYTES), filename))),
        (core_route.as_str(), Route::ok(CORE_BYTES)),
    ]);
    let dir = tempfile::tempdir().unwrap();
    let app = app_in(dir.path())
        .with_manifest_url(server.url("/hash.txt"))
        .with_download_base_url(server.url("/core/"));

    assert!(!app.core_info().exists);
    let result = app.ensure_core(None).await;

    assert!(result.valid, "{}", result.message);
    assert_eq!(result.hash_source, Some(HashSource::Official));
    assert!(app.core_info().exists);
    assert_eq!(
        std::fs::read(dir.path().join("resources").join(filename)).unwrap(),
        CORE_BYTES
    );
}

#[tokio::test]
async fn test_ensure_core_keeps_unverifiable_core() {
    let dir = tempfile::tempdir().unwrap();
    let filename = PlatformProfile::current().core_filename().as_str();
    let core = dir.path().join("resources").join(filename);
    write_file(&core, b"local build");
    let app = app_in(dir.path())
        .with_manifest_url(UNREACHABLE)
        .with_download_base_url("http://127.0.0.1:9/");

    let result = app.ensure_core(None).await;
    assert!(result.exists);
    assert!(!result.valid);
    assert!(result.hash_source.is_none());
    assert_eq!(std::fs::read(&core).unwrap(), b"local build");
}

#[test]
fn test_first_run_and_log_handling() {
    let dir = tempfile::tempdir().unwrap();
    let mut app = app_in(dir.path());
    assert!(app.initialize_config());
    assert!(app.config_file_path().exists());
    assert!(app.config().validate().valid);

    // no core installed, so the start is refused and recorded
    assert!(!app.start_core());
    assert_eq!(app.core_status().state, SupervisorState::Failed);
    app.shutdown();

    let app = app_in(dir.path());
    let lines = app.load_logs();
    assert!(lines.iter().any(|l| l.ends_with("Starting core...")));
    assert!(lines.iter().any(|l| l.ends_with("Core failed to start")));

    assert!(app.clear_logs());
    let lines = app.load_logs();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].ends_with("Logs cleared by user"));

    assert!(app.archive_logs());
    assert!(app.load_logs().is_empty());
    assert_eq!(app.archive().archives().len(), 1);
}
