//! End-to-end tests for the rfl binary.
//!
//! Every run gets its own HOME and working directory so no real
//! configuration leaks in.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::time::{Duration, SystemTime};

use filetime::{set_file_atime, FileTime};
use tempfile::TempDir;

fn rfl(home: &Path, args: &[&str], stdin: &str) -> Output {
    rfl_with_env(home, args, stdin, &[])
}

fn rfl_with_env(home: &Path, args: &[&str], stdin: &str, envs: &[(&str, &str)]) -> Output {
    let mut command = Command::new(env!("CARGO_BIN_EXE_rfl"));
    command
        .args(args)
        .current_dir(home)
        .env("HOME", home)
        .env_remove("RFL_CACHE_PATH")
        .env_remove("RFL_CACHE_PROCESS")
        .env_remove("RFL_FALLBACK_PATH")
        .env_remove("RFL_REPO_NAME");
    for (key, value) in envs {
        command.env(key, value);
    }
    let mut child = command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("Failed to execute rfl");
    child
        .stdin
        .take()
        .unwrap()
        .write_all(stdin.as_bytes())
        .unwrap();
    child.wait_with_output().unwrap()
}

fn payload(content: &[u8]) -> Vec<u8> {
    let mut out = format!("{}\0", content.len()).into_bytes();
    out.extend_from_slice(content);
    out
}

#[test]
fn test_config_show_is_valid_toml() {
    let home = TempDir::new().unwrap();
    let output = rfl(home.path(), &["config", "show"], "");
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let parsed: rfl_config::Config = toml::from_str(&stdout).unwrap();
    assert_eq!(parsed.client.batch_size, 10_000);
}

#[test]
fn test_project_config_overrides_defaults() {
    let home = TempDir::new().unwrap();
    fs::create_dir_all(home.path().join(".rfl")).unwrap();
    fs::write(
        home.path().join(".rfl/config.toml"),
        "[client]\nbatch_size = 250\n",
    )
    .unwrap();

    let output = rfl(home.path(), &["config", "show"], "");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("batch_size = 250"), "{stdout}");
}

#[test]
fn test_gc_keeps_listed_and_recent_entries() {
    let home = TempDir::new().unwrap();
    let cache = home.path().join("cache");
    let two_days_ago = FileTime::from_system_time(SystemTime::now() - Duration::from_secs(48 * 3600));

    for key in ["main/aa/x/old", "main/bb/y/kept", "main/cc/z/fresh"] {
        let path = cache.join(key);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, payload(b"data")).unwrap();
    }
    set_file_atime(cache.join("main/aa/x/old"), two_days_ago).unwrap();
    set_file_atime(cache.join("main/bb/y/kept"), two_days_ago).unwrap();
    fs::write(home.path().join("keep.txt"), "main/bb/y/kept\n").unwrap();

    let output = rfl(
        home.path(),
        &[
            "--cache-root",
            cache.to_str().unwrap(),
            "gc",
            "--keep",
            home.path().join("keep.txt").to_str().unwrap(),
        ],
        "",
    );
    assert!(output.status.success(), "{:?}", output);
    assert!(String::from_utf8_lossy(&output.stdout).contains("removed 1 of 3 files"));
    assert!(!cache.join("main/aa/x/old").exists());
    assert!(cache.join("main/bb/y/kept").exists());
    assert!(cache.join("main/cc/z/fresh").exists());
}

#[test]
fn test_validate_quarantines_corrupt_entries() {
    let home = TempDir::new().unwrap();
    let cache = home.path().join("cache");
    fs::create_dir_all(cache.join("main/aa/x")).unwrap();
    fs::write(cache.join("main/aa/x/good"), payload(b"fine")).unwrap();
    fs::write(cache.join("main/aa/x/bad"), b"no header here").unwrap();

    let output = rfl(
        home.path(),
        &["--cache-root", cache.to_str().unwrap(), "validate"],
        "",
    );
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("quarantined 1"));
    assert!(cache.join("main/aa/x/bad.corrupt").exists());
    assert!(cache.join("main/aa/x/good").exists());
}

#[test]
fn test_prefetch_without_server_fails() {
    let home = TempDir::new().unwrap();
    let cache = home.path().join("cache");
    let request = format!("{} src/lib.rs\n", "1f".repeat(20));

    let output = rfl(
        home.path(),
        &[
            "--cache-root",
            cache.to_str().unwrap(),
            "prefetch",
            "--quiet",
        ],
        &request,
    );
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("no remote file server configured"));
}

#[test]
fn test_prefetch_rejects_bad_input() {
    let home = TempDir::new().unwrap();
    let output = rfl(home.path(), &["prefetch", "--quiet"], "not-an-id path\n");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("line 1"));
}

#[test]
fn test_dead_cache_daemon_falls_back_to_server() {
    let home = TempDir::new().unwrap();
    let cache = home.path().join("cache");
    let request: String = (0..3000u32)
        .map(|i| format!("{:040x} src/file{}.rs\n", i + 1, i))
        .collect();

    let output = rfl_with_env(
        home.path(),
        &[
            "--cache-root",
            cache.to_str().unwrap(),
            "prefetch",
            "--quiet",
        ],
        &request,
        &[
            ("RFL_CACHE_PROCESS", "true"),
            ("RFL_FALLBACK_PATH", "exec >&-; cat >/dev/null"),
        ],
    );
    // the daemon vanishing is not fatal; the server answering nothing is
    assert_eq!(output.status.code(), Some(1), "{:?}", output);
    assert!(String::from_utf8_lossy(&output.stderr).contains("connection closed early"));
}
