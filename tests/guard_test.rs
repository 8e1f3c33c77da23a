//! Concurrent writers through one SharedFileGuard

use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

use stickyscrape::storage::guard::{resource_key, write_atomic};
use stickyscrape::storage::{GuardError, SharedFileGuard};

#[test]
fn test_concurrent_appends_keep_every_line_whole() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sessions.jsonl");
    let guard = Arc::new(SharedFileGuard::new());

    let handles: Vec<_> = (0..8)
        .map(|writer| {
            let guard = Arc::clone(&guard);
            let path = path.clone();
            thread::spawn(move || {
                for n in 0..50 {
                    let line = format!("{{\"writer\":{writer},\"n\":{n},\"pad\":\"{}\"}}", "x".repeat(200));
                    guard.append_line(&path, &line).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let content = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 400);
    for line in lines {
        let parsed: serde_json::Value = serde_json::from_str(line).unwrap();
        assert!(parsed["writer"].as_u64().unwrap() < 8);
    }
}

#[test]
fn test_read_modify_write_matches_sequential() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("counter.txt");
    write_atomic(&path, b"0").unwrap();
    let guard = Arc::new(SharedFileGuard::new());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let guard = Arc::clone(&guard);
            let path = path.clone();
            thread::spawn(move || {
                for _ in 0..25 {
                    guard
                        .with_exclusive_access(&resource_key(&path), || {
                            let current: u64 = std::fs::read_to_string(&path)?
                                .trim()
                                .parse()
                                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
                            thread::yield_now();
                            write_atomic(&path, (current + 1).to_string().as_bytes())
                        })
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let total: u64 = std::fs::read_to_string(&path).unwrap().trim().parse().unwrap();
    assert_eq!(total, 200);
}

#[test]
fn test_failure_releases_the_lock() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cookies.json");
    let guard = SharedFileGuard::new();
    let key = resource_key(&path);

    let err = guard
        .with_exclusive_access(&key, || -> std::io::Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full"))
        })
        .unwrap_err();
    assert!(matches!(err, GuardError::SharedWriteFailure { .. }));

    guard.write_file(&path, b"{}").unwrap();
    assert_eq!(guard.read_file(&path).unwrap().as_deref(), Some("{}"));
}

#[test]
fn test_nested_access_to_same_resource_is_rejected() {
    let guard = SharedFileGuard::new();

    let inner = guard
        .with_exclusive_access("cookies", || {
            Ok(guard.with_exclusive_access("cookies", || Ok(())))
        })
        .unwrap();
    assert!(matches!(inner, Err(GuardError::Reentrant(_))));

    // Different resources nest fine
    let nested = guard
        .with_exclusive_access("cookies", || {
            Ok(guard.with_exclusive_access("session_log", || Ok(7)))
        })
        .unwrap();
    assert_eq!(nested.unwrap(), 7);
}
