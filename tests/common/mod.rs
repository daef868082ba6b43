#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::json;

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

impl CmdResult {
    /// Parse the single JSON line a command prints in JSON mode.
    pub fn json(&self) -> serde_json::Value {
        let line = self.stdout.lines().last().unwrap_or_else(|| {
            panic!("no stdout; log: {}", self.log_path.display());
        });
        serde_json::from_str(line).unwrap_or_else(|e| {
            panic!("stdout is not JSON ({e}); log: {}", self.log_path.display());
        })
    }
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_rlv") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) { "rlv.exe" } else { "rlv" };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve rlv binary path for integration test"),
    }
}

pub fn run_cli_case(case_name: &str, args: &[&str]) -> CmdResult {
    run_cli_case_with_env(case_name, args, &[])
}

/// Run the binary with an isolated HOME so no user config leaks in.
pub fn run_cli_case_with_env(case_name: &str, args: &[&str], env: &[(&str, &str)]) -> CmdResult {
    let root = std::env::temp_dir().join("rlv-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let stamp = format!("{}-{}", sanitize(case_name), now_millis());
    let log_path = root.join(format!("{stamp}.log"));
    let home = root.join(format!("{stamp}-home"));
    fs::create_dir_all(&home).expect("create isolated home");
    let bin_path = resolve_bin_path();

    let mut command = Command::new(&bin_path);
    command
        .args(args)
        .env("HOME", &home)
        .env_remove("RLV_OUTPUT_FORMAT")
        .env("RUST_BACKTRACE", "1");
    for (name, value) in env {
        command.env(name, value);
    }
    let output = command.output().expect("execute rlv command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", bin_path.display()));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}

/// One request record as a JSONL line. `at_ms` is relative to
/// 2026-01-01T00:00:00Z.
pub fn record_line(index: u64, at_ms: i64, status: u16, endpoint: Option<&str>) -> String {
    let start: chrono::DateTime<chrono::Utc> = "2026-01-01T00:00:00Z".parse().expect("valid ts");
    let ts = (start + chrono::Duration::milliseconds(at_ms))
        .to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
    let headers = if status == 429 {
        json!({"Retry-After": "60"})
    } else {
        json!({})
    };
    let mut value = json!({
        "index": index,
        "timestamp": ts,
        "status": status,
        "headers": headers,
        "body": {"content": status == 200, "error": status >= 400},
        "latency_ms": 12.5,
    });
    if let Some(endpoint) = endpoint {
        value["endpoint"] = json!(endpoint);
    }
    value.to_string()
}

/// Records of a quota probe whose limiter admits exactly `admitted` requests.
pub fn probe_records(admitted: u64, total: u64) -> String {
    (1..=total)
        .map(|i| {
            let status = if i <= admitted { 200 } else { 429 };
            record_line(i, i as i64 * 50, status, None)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).expect("write fixture");
    path
}
