//! Integration tests for `packwright build --json` and `packwright resolve --json`.
//!
//! These tests verify:
//! - JSON output is a single valid object
//! - Schema version and `ok` are always present
//! - Failures carry a SCREAMING_SNAKE_CASE code and a non-zero exit status
//! - Nothing is written when the build fails

use std::path::Path;
use std::process::{Command, Output};
use tempfile::tempdir;

fn cargo_bin() -> Command {
    let mut cmd = Command::new(env!("CARGO"));
    cmd.args(["run", "-p", "packwright-cli", "--bin", "packwright", "--"]);
    cmd.env_remove("NODE_ENV");
    cmd
}

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn run_json(args: &[&str], cwd: &Path) -> (Output, serde_json::Value) {
    let output = cargo_bin()
        .args(args)
        .args(["--json", "--cwd"])
        .arg(cwd)
        .output()
        .expect("Failed to run packwright");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let json = serde_json::from_str(stdout.trim()).expect("Output should be valid JSON");
    (output, json)
}

#[test]
fn test_build_json_success() {
    let dir = tempdir().unwrap();
    write(
        dir.path(),
        "src/index.js",
        "import { greet } from './greet';\nconsole.log(greet('world'));\n",
    );
    write(
        dir.path(),
        "src/greet.js",
        "export function greet(name) {\n  return 'hello ' + name;\n}\n",
    );

    let (output, json) = run_json(&["build"], dir.path());

    assert!(output.status.success());
    assert_eq!(json["ok"], true);
    assert_eq!(json["schema_version"], 1);
    assert_eq!(json["mode"], "production");
    assert_eq!(json["modules"], 2);

    let paths: Vec<&str> = json["artifacts"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["path"].as_str().unwrap())
        .collect();
    assert!(paths.contains(&"bundle.js"), "artifacts: {paths:?}");
    assert!(dir.path().join("build/bundle.js").is_file());
}

#[test]
fn test_build_json_missing_entry() {
    let dir = tempdir().unwrap();
    write(dir.path(), "packwright.json", r#"{"entry": "src/main.js"}"#);

    let (output, json) = run_json(&["build"], dir.path());

    assert!(!output.status.success());
    assert_eq!(json["ok"], false);
    assert!(json.get("schema_version").is_some());
    assert_eq!(json["error"]["code"], "BUILD_ENTRY_NOT_FOUND");
    assert!(!dir.path().join("build").exists());
}

#[test]
fn test_build_json_error_code_is_screaming_snake_case() {
    let dir = tempdir().unwrap();
    write(dir.path(), "packwright.json", "{ not json");

    let (output, json) = run_json(&["build"], dir.path());

    assert!(!output.status.success());
    let code = json["error"]["code"].as_str().unwrap();
    assert_eq!(code, "CONFIG_PARSE_ERROR");
    assert!(code.chars().all(|c| c.is_ascii_uppercase() || c == '_'));
}

#[test]
fn test_build_json_unresolved_import_has_chain() {
    let dir = tempdir().unwrap();
    write(dir.path(), "src/index.js", "import './app';\n");
    write(dir.path(), "src/app.js", "import './missing';\n");

    let (output, json) = run_json(&["build"], dir.path());

    assert!(!output.status.success());
    assert_eq!(json["error"]["code"], "BUILD_RESOLVE_ERROR");
    let chain = json["error"]["chain"].as_array().unwrap();
    assert_eq!(chain.len(), 2);
    assert!(chain[1].as_str().unwrap().ends_with("app.js"));
}

#[test]
fn test_resolve_json() {
    let dir = tempdir().unwrap();
    write(dir.path(), "src/util/index.ts", "export const x = 1;\n");

    let (output, json) = run_json(&["resolve", "./src/util"], dir.path());
    assert!(output.status.success());
    assert_eq!(json["ok"], true);
    assert!(json["resolved"]
        .as_str()
        .unwrap()
        .replace('\\', "/")
        .ends_with("src/util/index.ts"));

    let (output, json) = run_json(&["resolve", "./nope"], dir.path());
    assert!(!output.status.success());
    assert_eq!(json["ok"], false);
    assert!(!json["tried"].as_array().unwrap().is_empty());
}

#[test]
fn test_version_output() {
    let output = cargo_bin()
        .arg("version")
        .output()
        .expect("Failed to run packwright");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("packwright "), "stdout: {stdout}");
}
