//! CLI smoke tests: verify commands that work without network access.
//!
//! These tests run the compiled binary and verify exit codes and output.
//! Each run gets its own working directory so no stray `.env`,
//! `watchcaller.json` or `logs/` leaks between tests.

use std::path::Path;
use std::process::Command;

const ENV_KEYS: &[&str] = &[
    "WATCH_INTERVAL_SECONDS",
    "WATCH_TARGETS",
    "WATCH_FETCH_ON_START",
    "CHECK_TIMEOUT_SECONDS",
    "HEALTH_HOST",
    "HEALTH_PORT",
    "FAILURE_THRESHOLD",
    "MAX_RETRIES",
    "RETRY_BACKOFF_BASE_SECONDS",
    "RETRY_BACKOFF_MAX_SECONDS",
    "FETCH_TIMEOUT_SECONDS",
    "DOWNLOAD_PATH",
    "SHUTDOWN_GRACE_SECONDS",
    "LOG_LEVEL",
    "LOG_FORMAT",
    "LOG_FILE",
    "WATCHCALLER_CONFIG",
];

/// Helper: run watchcaller in `dir` with given args and env, return (exit_code, stdout, stderr).
fn run_cli_in(dir: &Path, args: &[&str], envs: &[(&str, &str)]) -> (i32, String, String) {
    let bin = env!("CARGO_BIN_EXE_watchcaller");
    let mut cmd = Command::new(bin);
    cmd.args(args).current_dir(dir).env("RUST_LOG", "off");
    for key in ENV_KEYS {
        cmd.env_remove(key);
    }
    for (key, value) in envs {
        cmd.env(key, value);
    }
    let output = cmd.output().expect("failed to execute watchcaller binary");
    let code = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (code, stdout, stderr)
}

fn run_cli(args: &[&str], envs: &[(&str, &str)]) -> (i32, String, String) {
    let dir = tempfile::tempdir().unwrap();
    run_cli_in(dir.path(), args, envs)
}

// ============================================================================
// Help & Version
// ============================================================================

#[test]
fn cli_no_args_shows_help() {
    let (code, stdout, _stderr) = run_cli(&[], &[]);
    assert_eq!(code, 0);
    assert!(stdout.contains("Usage:"));
    assert!(stdout.contains("watchcaller"));
}

#[test]
fn cli_help_flag() {
    let (code, stdout, _stderr) = run_cli(&["--help"], &[]);
    assert_eq!(code, 0);
    assert!(stdout.contains("Commands:"));
    assert!(stdout.contains("run"));
    assert!(stdout.contains("fetch"));
}

#[test]
fn cli_version_command() {
    let (code, stdout, _stderr) = run_cli(&["version"], &[]);
    assert_eq!(code, 0);
    assert!(stdout.contains("watchcaller"));
    assert!(stdout.contains('.'));
}

#[test]
fn cli_unknown_command_fails() {
    let (code, _stdout, stderr) = run_cli(&["frobnicate"], &[]);
    assert_ne!(code, 0);
    assert!(stderr.contains("frobnicate"));
}

// ============================================================================
// Config
// ============================================================================

#[test]
fn cli_config_check_with_targets() {
    let (code, stdout, _stderr) = run_cli(
        &["config", "check"],
        &[("WATCH_TARGETS", "https://example.com/feed.xml")],
    );
    assert_eq!(code, 0, "stdout: {}", stdout);
    assert!(stdout.contains("No config file found"));
    assert!(stdout.contains("Configuration looks good!"));
}

#[test]
fn cli_config_check_reports_missing_targets() {
    let (code, stdout, _stderr) = run_cli(&["config", "check"], &[]);
    assert_ne!(code, 0);
    assert!(stdout.contains("no watch targets configured"));
}

#[test]
fn cli_config_check_flags_unknown_field() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("watchcaller.json"),
        r#"{"watch": {"intervl_secs": 30, "targets": [{"url": "https://example.com/a"}]}}"#,
    )
    .unwrap();
    let (code, stdout, _stderr) = run_cli_in(dir.path(), &["config", "check"], &[]);
    assert_ne!(code, 0);
    assert!(stdout.contains("Unknown field 'intervl_secs'"));
    assert!(stdout.contains("did you mean 'interval_secs'?"));
}

#[test]
fn cli_config_show_applies_env() {
    let (code, stdout, _stderr) = run_cli(
        &["config", "show"],
        &[
            ("WATCH_INTERVAL_SECONDS", "15"),
            ("MAX_RETRIES", "7"),
            ("WATCH_TARGETS", "https://example.com/a, https://example.com/b"),
        ],
    );
    assert_eq!(code, 0);
    let config: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(config["watch"]["interval_secs"], 15);
    assert_eq!(config["download"]["max_retries"], 7);
    assert_eq!(config["watch"]["targets"].as_array().unwrap().len(), 2);
}

#[test]
fn cli_config_show_rejects_malformed_env() {
    let (code, _stdout, stderr) =
        run_cli(&["config", "show"], &[("WATCH_INTERVAL_SECONDS", "soon")]);
    assert_ne!(code, 0);
    assert!(stderr.contains("WATCH_INTERVAL_SECONDS"));
}

// ============================================================================
// Run
// ============================================================================

#[test]
fn cli_run_without_targets_fails() {
    let (code, _stdout, stderr) = run_cli(&["run", "--once"], &[]);
    assert_ne!(code, 0);
    assert!(stderr.contains("no watch targets configured"));
}

#[test]
fn cli_run_rejects_zero_interval() {
    let (code, _stdout, stderr) = run_cli(
        &["run"],
        &[
            ("WATCH_TARGETS", "https://example.com/feed.xml"),
            ("WATCH_INTERVAL_SECONDS", "0"),
        ],
    );
    assert_ne!(code, 0);
    assert!(stderr.contains("WATCH_INTERVAL_SECONDS"));
}

#[test]
fn cli_run_rejects_bad_interval_flag() {
    let (code, _stdout, stderr) = run_cli(
        &["run", "--interval", "0s"],
        &[("WATCH_TARGETS", "https://example.com/feed.xml")],
    );
    assert_ne!(code, 0);
    assert!(stderr.contains("Interval too small"));
}

// ============================================================================
// Fetch & Health
// ============================================================================

#[test]
fn cli_fetch_rejects_non_http_url() {
    let (code, _stdout, stderr) = run_cli(&["fetch", "ftp://example.com/file"], &[]);
    assert_ne!(code, 0);
    assert!(stderr.contains("Only http/https URLs are allowed"));
}

#[test]
fn cli_health_unreachable_fails() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    let url = format!("http://127.0.0.1:{}/health", port);
    let (code, _stdout, stderr) = run_cli(&["health", "--url", &url], &[]);
    assert_ne!(code, 0);
    assert!(stderr.contains("Failed to reach"));
}

// ============================================================================
// Service lifecycle
// ============================================================================

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Raw `GET /health`; returns the status line once the server answers.
fn health_status_line(port: u16) -> Option<String> {
    use std::io::{Read, Write};
    let mut stream = std::net::TcpStream::connect(("127.0.0.1", port)).ok()?;
    stream
        .set_read_timeout(Some(std::time::Duration::from_secs(2)))
        .ok()?;
    stream
        .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .ok()?;
    let mut response = String::new();
    stream.read_to_string(&mut response).ok()?;
    response.lines().next().map(str::to_string)
}

#[cfg(unix)]
#[test]
fn cli_run_serves_health_and_stops_on_sigterm() {
    use std::io::Read;
    use std::process::Stdio;
    use std::time::{Duration, Instant};

    let dir = tempfile::tempdir().unwrap();
    let health_port = free_port();
    let target = format!("http://127.0.0.1:{}/feed", free_port());

    let mut cmd = Command::new(env!("CARGO_BIN_EXE_watchcaller"));
    cmd.arg("run")
        .current_dir(dir.path())
        .env("RUST_LOG", "off")
        .stdout(Stdio::piped())
        .stderr(Stdio::null());
    for key in ENV_KEYS {
        cmd.env_remove(key);
    }
    cmd.env("WATCH_TARGETS", &target)
        .env("HEALTH_HOST", "127.0.0.1")
        .env("HEALTH_PORT", health_port.to_string())
        .env("WATCH_INTERVAL_SECONDS", "1")
        .env("CHECK_TIMEOUT_SECONDS", "1")
        .env("SHUTDOWN_GRACE_SECONDS", "1")
        .env("FAILURE_THRESHOLD", "1000");
    let mut child = cmd.spawn().expect("failed to start watchcaller run");

    let deadline = Instant::now() + Duration::from_secs(10);
    let status_line = loop {
        if let Some(line) = health_status_line(health_port) {
            break line;
        }
        if Instant::now() > deadline {
            let _ = child.kill();
            panic!("health endpoint never came up on port {}", health_port);
        }
        std::thread::sleep(Duration::from_millis(100));
    };
    assert!(status_line.contains("200"), "status: {}", status_line);

    // Let at least one tick run before stopping.
    std::thread::sleep(Duration::from_millis(300));
    let killed = Command::new("kill")
        .args(["-TERM", &child.id().to_string()])
        .status()
        .unwrap();
    assert!(killed.success());

    let deadline = Instant::now() + Duration::from_secs(10);
    let status = loop {
        if let Some(status) = child.try_wait().unwrap() {
            break status;
        }
        if Instant::now() > deadline {
            let _ = child.kill();
            panic!("watchcaller did not exit after SIGTERM");
        }
        std::thread::sleep(Duration::from_millis(50));
    };

    let mut stdout = String::new();
    child
        .stdout
        .take()
        .unwrap()
        .read_to_string(&mut stdout)
        .unwrap();
    assert_eq!(status.code(), Some(0), "stdout: {}", stdout);
    assert!(stdout.contains("Watching 1 target(s)"));
    assert!(stdout.contains("Stopped."));
}
