//! Common test utilities for `nin` integration tests.
//!
//! This module provides shared functionality for integration tests.

#![allow(dead_code)]

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use nin_core::peer::{ReceiverOptions, Sender, SenderOptions};

/// Create a temporary directory for test files.
///
/// The directory will be automatically cleaned up when the returned
/// `TempDir` is dropped.
pub fn create_temp_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}

/// Create a test file with the given content.
pub fn create_test_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("Failed to create parent directories");
    }
    std::fs::write(&path, content).expect("Failed to write test file");
    path
}

/// Generate random bytes for testing.
pub fn random_bytes(size: usize) -> Vec<u8> {
    use rand::RngCore;
    let mut bytes = vec![0u8; size];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Assert that two files have identical content.
pub fn assert_files_equal(path1: &Path, path2: &Path) {
    let content1 = std::fs::read(path1).expect("Failed to read first file");
    let content2 = std::fs::read(path2).expect("Failed to read second file");
    assert_eq!(content1.len(), content2.len(), "File lengths differ");
    assert!(content1 == content2, "File contents differ");
}

/// Assert that every non-empty file under `expected` exists with identical
/// content under `actual`, and that `actual` holds nothing else.
pub fn assert_trees_equal(expected: &Path, actual: &Path) {
    let files = |root: &Path| -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = walkdir::WalkDir::new(root)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.metadata().map(|m| m.len() > 0).unwrap_or(false))
            .map(|e| e.path().strip_prefix(root).expect("prefix").to_path_buf())
            .collect();
        files.sort();
        files
    };

    let expected_files = files(expected);
    assert_eq!(expected_files, files(actual), "File sets differ");
    for relative in &expected_files {
        assert_files_equal(&expected.join(relative), &actual.join(relative));
    }
}

/// Create a test directory of six files of assorted sizes, two of them
/// nested, plus an empty file that is never transferred.
pub fn create_test_directory(base: &Path, name: &str) -> PathBuf {
    let dir = base.join(name);
    std::fs::create_dir_all(&dir).expect("Failed to create test directory");

    create_test_file(&dir, "readme.txt", b"Hello, nin!");
    create_test_file(&dir, "big.bin", &random_bytes(700 * 1024));
    create_test_file(&dir, "photos/a.jpg", &random_bytes(123_457));
    create_test_file(&dir, "photos/b.jpg", &random_bytes(64 * 1024));
    create_test_file(&dir, "photos/raw/c.raw", &random_bytes(300_001));
    create_test_file(&dir, "z_last.dat", &random_bytes(17));
    create_test_file(&dir, "empty.log", b"");

    dir
}

/// Sender options bound to loopback without advertising.
pub fn local_sender_options(path: &Path) -> SenderOptions {
    SenderOptions {
        bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
        advertise: false,
        ..SenderOptions::new(path)
    }
}

/// Receiver options pointing at `sender` and saving into `download_dir`.
pub fn receiver_options(sender: SocketAddr, download_dir: &Path) -> ReceiverOptions {
    ReceiverOptions {
        sender: Some(sender),
        download_dir: download_dir.to_path_buf(),
        connect_timeout: Duration::from_secs(5),
        handshake_timeout: Duration::from_secs(5),
        piece_timeout: Duration::from_secs(10),
        ..ReceiverOptions::default()
    }
}

/// Bind a sender and serve it in the background.
pub async fn start_sender(options: SenderOptions) -> Sender {
    let sender = Sender::bind(options).await.expect("Failed to bind sender");
    let serving = sender.clone();
    tokio::spawn(async move {
        if let Err(e) = serving.serve().await {
            panic!("sender failed: {e}");
        }
    });
    sender
}

/// Poll `condition` until it holds or `limit` passes.
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}
