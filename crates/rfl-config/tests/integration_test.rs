//! Integration tests for rfl-config
//!
//! These tests verify config loading with real file system operations.

use std::path::PathBuf;
use tempfile::tempdir;

/// Test config loading from a real config file
#[test]
fn test_load_config_from_file() {
    let temp = tempdir().unwrap();
    let rfl_dir = temp.path().join(".rfl");
    std::fs::create_dir_all(&rfl_dir).unwrap();

    let config_content = r#"
[cache]
path = "/var/cache/rfl"
group = "hgusers"
limit = "50 GB"
validate = true
validate_log = "/var/log/rfl-validate.log"

[client]
cache_process = "rfl-memcache-client"
fallback_path = "ssh hg.example.com rfl-serve /repos/main"
repo_name = "main"
batch_size = 500

[server]
enabled = true
expiration_days = 14
"#;
    let path = rfl_dir.join("config.toml");
    std::fs::write(&path, config_content).unwrap();

    let config = rfl_config::Config::from_file(&path).unwrap();

    assert_eq!(config.cache.root(), PathBuf::from("/var/cache/rfl"));
    assert_eq!(config.cache.group.as_deref(), Some("hgusers"));
    assert_eq!(config.cache.limit_bytes().unwrap(), 50 << 30);
    assert!(config.cache.validate);
    assert_eq!(
        config.cache.validate_log,
        Some(PathBuf::from("/var/log/rfl-validate.log"))
    );
    assert_eq!(
        config.client.cache_process.as_deref(),
        Some("rfl-memcache-client")
    );
    assert_eq!(config.client.repo_name, "main");
    assert_eq!(config.client.batch_size, 500);
    assert!(config.server.enabled);
    assert_eq!(config.server.expiration_days, 14);
    // untouched keys keep their defaults
    assert_eq!(config.server.precompute_limit, 500);
    assert_eq!(config.client.skip_files, vec![".hgtags"]);
}

/// Test that a malformed file is reported, not silently defaulted
#[test]
fn test_invalid_toml_is_an_error() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("config.toml");
    std::fs::write(&path, "[client\nrepo_name = ").unwrap();

    let err = rfl_config::Config::from_file(&path).unwrap_err();
    assert!(matches!(err, rfl_config::ConfigError::Toml(_)));
}

/// Test that generated defaults parse back into the same values
#[test]
fn test_default_toml_roundtrip() {
    let toml_str = rfl_config::Config::default_toml();
    let parsed: rfl_config::Config = toml::from_str(&toml_str).unwrap();
    assert_eq!(parsed.client.batch_size, 10_000);
    assert_eq!(parsed.cache.limit, "1000 GB");
    assert_eq!(parsed.server.expiration_days, 30);
}
