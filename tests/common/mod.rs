// Shared test helpers for integration tests
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use optest::core::execution::Engine;
use optest::core::models::{RunReport, UnitResult};
use optest::core::plan::{CacheMode, Plan};
use optest::core::planner::{SelectionFilters, plan_execution};
use optest::core::registry::{Registry, RunContext};
use tempfile::{TempDir, tempdir};
use tokio_util::sync::CancellationToken;

/// Copies input0 to output0: the backend under test is a perfect identity.
pub const COPY_COMMAND: &str = r#"["sh", "-c", "cat {input0} > {output0}"]"#;

/// Writes 16 zero bytes: four float32 zeros.
pub const ZEROS_COMMAND: &str = r#"["sh", "-c", "head -c 16 /dev/zero > {output0}"]"#;

pub fn setup_test_environment() -> TempDir {
    tempdir().expect("Failed to create temporary directory")
}

pub fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("Failed to create parent directory");
    }
    fs::write(&path, content).expect("Failed to write file");
    path
}

/// A one-case identity plan on `cann:910b` with `builtin.ones` inputs.
/// `backend_extra` and `case_extra` are YAML lines spliced into the backend
/// and case mappings (indented by the caller's convention: 4 spaces).
pub fn identity_plan(command: &str, backend_extra: &str, case_extra: &str) -> String {
    format!(
        r#"operator: identity
inputs: [in0.bin]
outputs: [out0.bin]
generator:
  name: builtin.ones
  seed: 7
assertion: builtin.identity
backends:
  - type: cann
    chip: "910b"
    workdir: work
    command: {command}
{backend_extra}
cases:
  - name: copy
    dtypes: [float32]
    shapes:
      - inputs: [[1, 4]]
        outputs: [[1, 4]]
{case_extra}
"#
    )
}

pub fn write_plan(dir: &Path, content: &str) -> PathBuf {
    write_file(dir, "plan.yaml", content)
}

pub fn load_plan(path: &Path) -> Plan {
    Plan::load(path, &Registry::with_builtins()).unwrap_or_else(|e| panic!("plan should load: {e}"))
}

/// Runs every unit of `plan` with default filters.
pub async fn run_plan(plan: &Plan, cache: CacheMode) -> RunReport {
    run_filtered(plan, &SelectionFilters::default(), cache).await
}

pub async fn run_filtered(plan: &Plan, filters: &SelectionFilters, cache: CacheMode) -> RunReport {
    let selection = plan_execution(plan, filters).expect("selection should succeed");
    let mut engine = Engine::new(
        RunContext::new(Registry::with_builtins(), CancellationToken::new()),
        cache,
    );
    let mut streamed: Vec<String> = Vec::new();
    let report = engine
        .run(&selection, &mut |r: &UnitResult| streamed.push(r.id.clone()))
        .await;
    let collected: Vec<String> = report.results.iter().map(|r| r.id.clone()).collect();
    assert_eq!(streamed, collected, "every result is streamed in order");
    report
}

/// Path of the input file of the default identity plan.
pub fn input_path(dir: &TempDir) -> PathBuf {
    dir.path().join("work").join("in0.bin")
}
