use std::process::{Command, Stdio};
use std::time::Duration;
use tempfile::tempdir;

fn bin() -> String {
    env!("CARGO_BIN_EXE_cbordiff").to_string()
}

#[test]
fn cli_config_works() {
    let out = Command::new(bin()).arg("config").output().unwrap();
    assert!(out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("SYMBOL=cbor_from_slice"));
}

#[test]
fn cli_sanity_passes_for_builtin_decoders() {
    let st = Command::new(bin()).arg("sanity").status().unwrap();
    assert_eq!(st.code(), Some(0));
    let st = Command::new(bin()).args(["sanity", "--strict"]).status().unwrap();
    assert_eq!(st.code(), Some(0));
}

#[test]
fn cli_check_agreeing_input() {
    let out = Command::new(bin())
        .args(["check", "--hex", "81182A"])
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("reference: accepted"));
    assert!(stdout.contains("verdict:   agree"));
}

#[test]
fn cli_check_reads_file() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("garbage.bin");
    std::fs::write(&input, [0xDE, 0xAD, 0xBE, 0xEF]).unwrap();
    let out = Command::new(bin()).arg("check").arg(&input).output().unwrap();
    assert_eq!(out.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&out.stdout).contains("foreign:   rejected"));
}

#[test]
fn cli_check_strict_divergence_exit_code() {
    // The reference keeps duplicate map keys; the strict profile rejects them.
    let out = Command::new(bin())
        .args(["check", "--strict", "--hex", "A2 01 02 01 03"])
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(3));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("A201020103"));
}

#[test]
fn cli_check_bad_hex_is_usage_error() {
    let st = Command::new(bin())
        .args(["check", "--hex", "ABC"])
        .status()
        .unwrap();
    assert_eq!(st.code(), Some(1));
}

#[test]
fn cli_bounded_run_with_json_summary() {
    let dir = tempdir().unwrap();
    let failures = dir.path().join("failures");
    let out = Command::new(bin())
        .args(["--json", "run", "--max-trials", "500", "--seed", "1", "--keep-going"])
        .arg("--failures")
        .arg(&failures)
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(0));
    assert!(failures.is_dir());

    let stderr = String::from_utf8_lossy(&out.stderr);
    let json_start = stderr.find('{').expect("json summary");
    let summary: serde_json::Value = serde_json::from_str(&stderr[json_start..]).unwrap();
    assert_eq!(summary["command"], "run");
    assert_eq!(summary["trials"], 500);
    assert_eq!(summary["seed"], 1);
    assert_eq!(summary["exit_code"], 0);
    assert_eq!(summary["divergences"], 0);
    assert_eq!(summary["stop"], "budget");
}

#[cfg(unix)]
#[test]
fn cli_isolated_run_uses_trial_children() {
    let dir = tempdir().unwrap();
    let st = Command::new(bin())
        .args(["-q", "run", "--isolate", "--max-trials", "20", "--seed", "3"])
        .arg("--failures")
        .arg(dir.path())
        .status()
        .unwrap();
    assert_eq!(st.code(), Some(0));
}

#[cfg(unix)]
#[test]
fn cli_interrupted_run_keeps_summary() {
    let dir = tempdir().unwrap();
    let child = Command::new(bin())
        .args(["--json", "run", "--max-time", "60s", "--seed", "4"])
        .arg("--failures")
        .arg(dir.path())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    std::thread::sleep(Duration::from_millis(1500));
    let st = Command::new("kill")
        .args(["-INT", &child.id().to_string()])
        .status()
        .unwrap();
    assert!(st.success());

    let out = child.wait_with_output().unwrap();
    assert_eq!(out.status.code(), Some(0));
    let stderr = String::from_utf8_lossy(&out.stderr);
    let json_start = stderr.find('{').expect("json summary");
    let summary: serde_json::Value = serde_json::from_str(&stderr[json_start..]).unwrap();
    assert_eq!(summary["stop"], "cancelled");
    assert_eq!(summary["exit_code"], 0);
    assert!(summary["trials"].as_u64().unwrap() > 0);
}

#[test]
fn cli_corpus_lists_seeds() {
    let dir = tempdir().unwrap();
    let out = Command::new(bin())
        .arg("corpus")
        .arg("--failures")
        .arg(dir.path().join("none"))
        .output()
        .unwrap();
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("array-one-int"));
    assert!(stdout.contains("81182A"));
}
