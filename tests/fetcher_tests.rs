mod common;

use std::time::Duration;

use jijidown_companion::{DownloadStatus, DownloadTask, Fetcher, PlatformProfile};

use common::{Route, TestServer, UNREACHABLE};

fn payload(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}

#[tokio::test]
async fn test_download_fires_single_terminal_callback() {
    let data = payload(50_000);
    let server = TestServer::start(vec![("/file.bin", Route::ok(data.clone()))]);
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Fetcher::new(PlatformProfile::current()).with_throttle(Duration::ZERO);

    let mut seen: Vec<DownloadTask> = Vec::new();
    let mut on_progress = |task: &DownloadTask| seen.push(task.clone());
    let outcome = fetcher
        .download(&server.url("/file.bin"), "file.bin", dir.path(), Some(&mut on_progress))
        .await;

    assert!(outcome.success, "{:?}", outcome.error);
    let path = outcome.file_path.clone().unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), data);

    let terminal: Vec<&DownloadTask> = seen.iter().filter(|t| t.status.is_terminal()).collect();
    assert_eq!(terminal.len(), 1);
    let last = seen.last().unwrap();
    assert_eq!(last.status, DownloadStatus::Completed);
    assert_eq!(last.downloaded_size, data.len() as u64);
    assert_eq!(last.total_size, data.len() as u64);
    assert_eq!(last.progress, 100.0);

    assert!(seen.windows(2).all(|w| w[0].downloaded_size <= w[1].downloaded_size));
    assert!(seen.len() > 2, "zero throttle should report every chunk");

    let task = fetcher.task_info(&outcome.task_id).unwrap();
    assert_eq!(task.status, DownloadStatus::Completed);
    assert!(outcome.task_id.starts_with("file.bin_"));
}

#[tokio::test]
async fn test_throttle_limits_intermediate_callbacks() {
    let data = payload(20_000);
    let server = TestServer::start(vec![("/file.bin", Route::ok(data))]);
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Fetcher::new(PlatformProfile::current())
        .with_chunk_size(1024)
        .with_throttle(Duration::from_secs(3600));

    let mut count = 0;
    let mut on_progress = |_: &DownloadTask| count += 1;
    let outcome = fetcher
        .download(&server.url("/file.bin"), "file.bin", dir.path(), Some(&mut on_progress))
        .await;

    assert!(outcome.success);
    // the first chunk reports immediately, then only the terminal callback
    assert_eq!(count, 2);
}

#[tokio::test]
async fn test_traversal_name_stays_in_save_dir() {
    let server = TestServer::start(vec![("/evil", Route::ok("payload"))]);
    let dir = tempfile::tempdir().unwrap();
    let save_dir = dir.path().join("a").join("b");
    let fetcher = Fetcher::new(PlatformProfile::current());

    let outcome = fetcher
        .download(&server.url("/evil"), "../../evil", &save_dir, None)
        .await;

    assert!(outcome.success);
    assert_eq!(outcome.file_path.as_deref(), Some(save_dir.join("evil").as_path()));
    assert!(save_dir.join("evil").is_file());
    assert!(!dir.path().join("evil").exists());
}

#[tokio::test]
async fn test_http_error_marks_task_failed() {
    let server = TestServer::start(vec![]);
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Fetcher::new(PlatformProfile::current());

    let mut statuses = Vec::new();
    let mut on_progress = |task: &DownloadTask| statuses.push(task.status);
    let outcome = fetcher
        .download(&server.url("/missing"), "core.bin", dir.path(), Some(&mut on_progress))
        .await;

    assert!(!outcome.success);
    assert!(outcome.error.is_some());
    assert_eq!(statuses, vec![DownloadStatus::Failed]);
    assert!(!dir.path().join("core.bin").exists());
    assert!(!dir.path().join("core.bin.part").exists());

    let task = fetcher.task_info(&outcome.task_id).unwrap();
    assert_eq!(task.status, DownloadStatus::Failed);
    assert!(task.error.is_some());
}

#[tokio::test]
async fn test_connection_failure_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Fetcher::new(PlatformProfile::current());
    let outcome = fetcher.download(UNREACHABLE, "core.bin", dir.path(), None).await;
    assert!(!outcome.success);
    assert!(outcome.message.starts_with("Download failed"));
    assert_eq!(fetcher.all_tasks().len(), 1);
}

#[tokio::test]
async fn test_unknown_length_download() {
    let data = payload(9_000);
    let server = TestServer::start(vec![("/stream", Route::ok(data.clone()).without_length())]);
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Fetcher::new(PlatformProfile::current()).with_throttle(Duration::ZERO);

    let mut seen: Vec<DownloadTask> = Vec::new();
    let mut on_progress = |task: &DownloadTask| seen.push(task.clone());
    let outcome = fetcher
        .download(&server.url("/stream"), "stream.bin", dir.path(), Some(&mut on_progress))
        .await;

    assert!(outcome.success, "{:?}", outcome.error);
    for task in seen.iter().filter(|t| !t.status.is_terminal()) {
        assert_eq!(task.progress, 0.0);
        assert_eq!(task.eta_seconds, 0.0);
    }
    let last = seen.last().unwrap();
    assert_eq!(last.downloaded_size, data.len() as u64);
    assert_eq!(last.progress, 100.0);
}

#[tokio::test]
async fn test_download_core_uses_platform_filename() {
    let filename = PlatformProfile::current().core_filename().as_str();
    let route = format!("/core/{}", filename);
    let server = TestServer::start(vec![(route.as_str(), Route::ok("core-binary"))]);
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Fetcher::new(PlatformProfile::current()).with_base_url(server.url("/core/"));

    let outcome = fetcher.download_core(dir.path(), None).await;

    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(std::fs::read(dir.path().join(filename)).unwrap(), b"core-binary");
}

#[tokio::test]
async fn test_failed_download_keeps_existing_file() {
    let server = TestServer::start(vec![("/stall", Route::stalled(100, vec![1_u8; 10]))]);
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("core.bin");
    std::fs::write(&target, b"working core").unwrap();
    let fetcher = Fetcher::new(PlatformProfile::current())
        .with_timeouts(Duration::from_secs(5), Duration::from_secs(1));

    let outcome = fetcher
        .download(&server.url("/missing"), "core.bin", dir.path(), None)
        .await;
    assert!(!outcome.success);
    assert_eq!(std::fs::read(&target).unwrap(), b"working core");

    // a body cut short mid-stream leaves the target alone too
    let outcome = fetcher
        .download(&server.url("/stall"), "core.bin", dir.path(), None)
        .await;
    assert!(!outcome.success);
    assert_eq!(std::fs::read(&target).unwrap(), b"working core");
    assert!(!dir.path().join("core.bin.part").exists());
}

#[tokio::test]
async fn test_successful_download_replaces_existing_file() {
    let server = TestServer::start(vec![("/core.bin", Route::ok("new core"))]);
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("core.bin");
    std::fs::write(&target, b"old core").unwrap();
    let fetcher = Fetcher::new(PlatformProfile::current());

    let outcome = fetcher
        .download(&server.url("/core.bin"), "core.bin", dir.path(), None)
        .await;

    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(std::fs::read(&target).unwrap(), b"new core");
    assert!(!dir.path().join("core.bin.part").exists());
}

#[tokio::test]
async fn test_stalled_body_times_out() {
    let server = TestServer::start(vec![("/stall", Route::stalled(100, vec![7_u8; 10]))]);
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Fetcher::new(PlatformProfile::current())
        .with_timeouts(Duration::from_secs(5), Duration::from_secs(1));

    let mut statuses = Vec::new();
    let mut on_progress = |task: &DownloadTask| statuses.push(task.status);
    let outcome = tokio::time::timeout(
        Duration::from_secs(15),
        fetcher.download(&server.url("/stall"), "stall.bin", dir.path(), Some(&mut on_progress)),
    )
    .await
    .expect("download hung on a stalled body");

    assert!(!outcome.success);
    assert_eq!(statuses.last(), Some(&DownloadStatus::Failed));
    assert!(!dir.path().join("stall.bin").exists());
    assert!(!dir.path().join("stall.bin.part").exists());
}
