//! Exercises the toolchain fetcher's timeout-and-kill and
//! cancel-on-drop behavior against a stand-in "go" binary (a shell script
//! that sleeps, since no real Go toolchain is available in this
//! environment). Both scenarios prove the same property the sumdb/upstream
//! paths rely on: a fetch that stops being awaited never leaves a runaway
//! subprocess behind.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use goproxycache::core::path::{ModuleRequest, RequestKind};
use goproxycache::core::toolchain::ToolchainFetcher;

fn list_request() -> ModuleRequest {
    ModuleRequest {
        kind: RequestKind::List,
        module_path: "example.com/foo".to_string(),
        version: None,
        query: None,
        database_host: None,
        tail: None,
    }
}

/// Writes an executable shell script that sleeps for `sleep_secs` and then
/// touches `marker`, ignoring all arguments (a stand-in for `go`).
fn write_sleepy_fake_go(dir: &Path, marker: &Path, sleep_secs: u64) -> PathBuf {
    let script_path = dir.join("fake-go.sh");
    let marker_str = marker.to_string_lossy();
    std::fs::write(
        &script_path,
        format!("#!/bin/sh\nsleep {sleep_secs}\ntouch \"{marker_str}\"\n"),
    )
    .unwrap();
    let mut perms = std::fs::metadata(&script_path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&script_path, perms).unwrap();
    script_path
}

#[tokio::test]
async fn fetch_deadline_kills_the_subprocess_instead_of_waiting_it_out() {
    let work_dir = tempfile::tempdir().unwrap();
    let marker = work_dir.path().join("finished");
    let fake_go = write_sleepy_fake_go(work_dir.path(), &marker, 5);

    let fetcher = ToolchainFetcher::new(
        fake_go.to_string_lossy().into_owned(),
        work_dir.path().join("gomodcache"),
        work_dir.path().to_path_buf(),
        Duration::from_millis(200),
        0,
    );

    let err = fetcher.fetch(&list_request()).await.unwrap_err();
    assert!(matches!(err, goproxycache::core::errors::ProxyError::FetchTimedOut));

    // Give the killed child a moment it would need to finish the full sleep
    // and touch the marker, if it hadn't actually been killed.
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!marker.exists(), "subprocess kept running past its deadline");
}

#[tokio::test]
async fn dropping_the_fetch_future_kills_the_subprocess() {
    let work_dir = tempfile::tempdir().unwrap();
    let marker = work_dir.path().join("finished");
    let fake_go = write_sleepy_fake_go(work_dir.path(), &marker, 5);

    let fetcher = std::sync::Arc::new(ToolchainFetcher::new(
        fake_go.to_string_lossy().into_owned(),
        work_dir.path().join("gomodcache"),
        work_dir.path().to_path_buf(),
        Duration::from_secs(60),
        0,
    ));

    let handle = {
        let fetcher = fetcher.clone();
        tokio::spawn(async move { fetcher.fetch(&list_request()).await })
    };

    // Let the child actually spawn before cancelling the caller.
    tokio::time::sleep(Duration::from_millis(200)).await;
    handle.abort();
    let _ = handle.await;

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!marker.exists(), "subprocess outlived the cancelled fetch");
}
