// Command-line tests: run the `nmc` binary on the demo models and check
// exit codes, stdout/stderr and the JSON emit stages.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn project_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .to_path_buf()
}

fn demo(name: &str) -> PathBuf {
    project_root().join("demos").join(name)
}

fn nmc(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_nmc"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run nmc")
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

fn stderr(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).into_owned()
}

/// Write a model to a fresh file in the system temp directory.
fn temp_model(name: &str, source: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("nmc-cli-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, source).unwrap();
    path
}

// ── Success paths ───────────────────────────────────────────────────────────

#[test]
fn emits_cpp_by_default() {
    let out = nmc(&[demo("lif.nml").to_str().unwrap()]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    let text = stdout(&out);
    assert!(text.contains("class cppNeuron_LIF {"));
    assert!(text.contains("class cppSynapse_Exc {"));
    assert!(text.contains("#include \"network.hpp\""));
    assert!(stderr(&out).is_empty());
}

#[test]
fn codegen_flags_reach_the_output() {
    let out = nmc(&[
        demo("lif.nml").to_str().unwrap(),
        "--real-type",
        "float",
        "--no-comments",
        "--runtime-header",
        "sim/net.hpp",
    ]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    let text = stdout(&out);
    assert!(text.contains("#include \"sim/net.hpp\""));
    assert!(text.contains("std::vector<float> v;"));
    assert!(!text.contains("            // v"));
}

#[test]
fn writes_output_file() {
    let path = std::env::temp_dir().join(format!("nmc-cli-out-{}.hpp", std::process::id()));
    let out = nmc(&[
        demo("izhikevich.nml").to_str().unwrap(),
        "-o",
        path.to_str().unwrap(),
    ]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert!(stdout(&out).is_empty());
    let written = std::fs::read_to_string(&path).unwrap();
    assert!(written.contains("class cppNeuron_Izhikevich {"));
    let _ = std::fs::remove_file(&path);
}

#[test]
fn emit_blocks_is_json() {
    let out = nmc(&[demo("rate.nml").to_str().unwrap(), "--emit", "blocks"]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    let json: serde_json::Value = serde_json::from_str(&stdout(&out)).unwrap();
    let analyses = json.as_array().unwrap();
    assert_eq!(analyses.len(), 2);
    assert_eq!(analyses[0]["descriptor"]["name"], "Rate");
    assert_eq!(analyses[0]["update"][0]["kind"]["kind"], "ode");
}

#[test]
fn emit_exports_by_class() {
    let out = nmc(&[demo("rate.nml").to_str().unwrap(), "--emit", "exports"]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    let json: serde_json::Value = serde_json::from_str(&stdout(&out)).unwrap();
    let rate = json["cppNeuron_Rate"].as_array().unwrap();
    assert_eq!(rate[0]["attribute"], "tau");
    assert!(json["cppSynapse_Oja"].is_array());
}

#[test]
fn emit_attributes_and_build_info() {
    let path = demo("lif.nml");
    let out = nmc(&[path.to_str().unwrap(), "--emit", "attributes"]);
    assert!(out.status.success());
    let json: serde_json::Value = serde_json::from_str(&stdout(&out)).unwrap();
    assert_eq!(json[0]["name"], "LIF");
    assert_eq!(json[1]["role"]["kind"], "synapse");

    let out = nmc(&[path.to_str().unwrap(), "--emit", "build-info"]);
    assert!(out.status.success());
    let json: serde_json::Value = serde_json::from_str(&stdout(&out)).unwrap();
    assert_eq!(json["source_hash"].as_str().unwrap().len(), 64);
    assert_eq!(json["compiler_version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(json["entities"][0]["has_spike"], true);
}

#[test]
fn emit_report() {
    let out = nmc(&[demo("izhikevich.nml").to_str().unwrap(), "--emit", "report"]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    let text = stdout(&out);
    assert!(text.starts_with("Neuron Izhikevich\n"));
    assert!(text.contains("[ode, midpoint]"));
}

#[test]
fn verbose_logs_passes_to_stderr() {
    let out = nmc(&[demo("lif.nml").to_str().unwrap(), "--verbose"]);
    assert!(out.status.success());
    let err = stderr(&out);
    assert!(err.contains("pass complete"), "stderr: {err}");
    assert!(!stdout(&out).contains("pass complete"));
}

// ── Failure paths ───────────────────────────────────────────────────────────

#[test]
fn missing_input_exits_2() {
    let out = nmc(&["/nonexistent/model.nml"]);
    assert_eq!(out.status.code(), Some(2));
    assert!(stderr(&out).contains("nmc: error: /nonexistent/model.nml"));
}

#[test]
fn syntax_error_exits_1_with_location() {
    let path = temp_model("broken.nml", "neuron N {\n    variable v = \n");
    let out = nmc(&[path.to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(1));
    let err = stderr(&out);
    assert!(err.contains("broken.nml:"), "stderr: {err}");
    assert!(err.contains("E0001"), "stderr: {err}");
    assert!(stdout(&out).is_empty());
}

#[test]
fn definition_error_exits_1() {
    let source = "neuron N {\n    variable v = 0.0\n    update { dv/dt = -v / tau }\n}\n";
    let path = temp_model("undeclared.nml", source);
    let out = nmc(&[path.to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(1));
    let err = stderr(&out);
    assert!(err.contains("undeclared.nml:3:"), "stderr: {err}");
    assert!(err.contains("E0101"), "stderr: {err}");
    assert!(err.contains("nmc: 1 error(s)"), "stderr: {err}");
}

#[test]
fn unknown_emit_stage_is_a_usage_error() {
    let out = nmc(&[demo("lif.nml").to_str().unwrap(), "--emit", "hir"]);
    assert_eq!(out.status.code(), Some(2));
}
