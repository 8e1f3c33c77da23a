//! Configuration loading from file and environment

use serial_test::serial;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use stickyscrape::config::Config;
use stickyscrape::proxy::ExhaustionPolicy;

const ENV_KEYS: &[&str] = &[
    "STICKY_PROXIES_FILE",
    "STICKY_ON_EXHAUSTED",
    "STICKY_CONCURRENCY",
    "STICKY_ITEMS_PER_SESSION",
    "STICKY_OUTPUT_DIR",
    "STICKY_LOG_FORMAT",
];

fn clear_env() {
    for key in ENV_KEYS {
        std::env::remove_var(key);
    }
}

#[test]
fn test_shipped_config_file_is_valid() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config.toml");
    let config = Config::from_file(&path).unwrap();
    config.validate().unwrap();

    assert_eq!(config.pool.on_exhausted, ExhaustionPolicy::Abort);
    assert_eq!(config.scheduler.concurrency_limit, 5);
    assert_eq!(config.session.items_per_session, 50);
    // Sources are left out of the file and fall back to the built-in list
    assert!(!config.harvest.text_sources.is_empty());
}

#[test]
fn test_partial_file_takes_defaults() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "[scheduler]\nconcurrency_limit = 3\n\n[pool]\non_exhausted = \"direct\"").unwrap();

    let config = Config::from_file(file.path()).unwrap();
    assert_eq!(config.scheduler.concurrency_limit, 3);
    assert_eq!(config.pool.on_exhausted, ExhaustionPolicy::Direct);
    assert_eq!(config.paths.output_dir, PathBuf::from("scrape_data"));
}

#[test]
#[serial]
fn test_env_overrides_file() {
    clear_env();
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "[scheduler]\nconcurrency_limit = 3").unwrap();

    std::env::set_var("STICKY_CONCURRENCY", "8");
    std::env::set_var("STICKY_ON_EXHAUSTED", "DIRECT");
    std::env::set_var("STICKY_OUTPUT_DIR", "/tmp/sticky-out");

    let config = Config::load(Some(file.path())).unwrap();
    clear_env();

    assert_eq!(config.scheduler.concurrency_limit, 8);
    assert_eq!(config.pool.on_exhausted, ExhaustionPolicy::Direct);
    assert_eq!(config.paths.output_dir, PathBuf::from("/tmp/sticky-out"));
}

#[test]
#[serial]
fn test_unparseable_env_value_is_ignored() {
    clear_env();
    std::env::set_var("STICKY_ITEMS_PER_SESSION", "lots");

    let config = Config::from_env().unwrap();
    clear_env();

    assert_eq!(config.session.items_per_session, 50);
}

#[test]
#[serial]
fn test_invalid_env_value_fails_validation() {
    clear_env();
    std::env::set_var("STICKY_CONCURRENCY", "0");
    std::env::set_var("STICKY_LOG_FORMAT", "yaml");

    let result = Config::load(None);
    clear_env();

    assert!(result.is_err());
}

#[test]
fn test_malformed_file_is_an_error() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "[scheduler\nconcurrency_limit = ").unwrap();

    let err = Config::from_file(file.path()).unwrap_err();
    assert!(err.to_string().contains("Failed to parse"));
}
