mod common;

use std::path::Path;
use std::time::Duration;

use common::*;
use optest::core::config::parse_document;
use optest::core::plan::{BackendKind, CacheMode, Metric, Plan};
use optest::core::registry::Registry;
use optest::core::tensor::DType;

fn load_from(content: &str) -> Result<Plan, optest::core::PlanError> {
    let doc = parse_document(content, Path::new("plan.yaml"))?;
    Plan::from_document(doc, Path::new("/plans"), &Registry::with_builtins())
}

fn violations(content: &str) -> Vec<String> {
    match load_from(content) {
        Ok(_) => panic!("plan should be rejected"),
        Err(e) => e.violations,
    }
}

const BASE: &str = r#"
operator: elementwise_add
description: adds two tensors
inputs: [a.bin, b.bin]
outputs: [c.bin]
tags: [smoke]
priority: 3
generator:
  name: builtin.uniform
  seed: 42
  params: {low: -2.0, high: 2.0}
assertion:
  name: builtin.elementwise_add
  rtol: 0.001
backends:
  - type: cann
    chip: "910b"
    workdir: /tmp/optest-work
    timeout: 30
    retries: 2
    command: "./run_add --chip {chip} --in {inputs} --out {output0}"
cases:
  - name: add_basic
    dtypes: [float32, float32]
    shapes:
      - inputs: [[2, 3], [2, 3]]
        outputs: [[2, 3]]
  - name: add_fp16
    dtypes: [fp16, float16]
    tags: [nightly]
    priority: 1
    generator:
      constants: {scale: 2.0}
    assertion:
      atol: 0.01
      metric: mean_abs
    shapes:
      - inputs: [[4], [4]]
        outputs: [[4]]
"#;

/// Plan-level defaults flow into cases that do not override them.
///
/// 计划级默认值会传递给未覆盖它们的用例。
#[test]
fn test_valid_plan_merges_defaults() {
    let plan = load_from(BASE).expect("plan should load");

    assert_eq!(plan.operator, "elementwise_add");
    assert_eq!(plan.cache, CacheMode::Reuse);
    assert_eq!(plan.backends.len(), 1);
    let backend = &plan.backends[0];
    assert_eq!(backend.kind, BackendKind::Cann);
    assert_eq!(backend.label(), "cann:910b");
    assert_eq!(backend.timeout, Some(Duration::from_secs(30)));
    assert_eq!(backend.retries, 2);
    assert_eq!(backend.command.argv.len(), 7);

    let basic = plan.case("add_basic").unwrap();
    assert_eq!(basic.dtypes, vec![DType::Float32, DType::Float32]);
    assert_eq!(basic.inputs, vec!["a.bin", "b.bin"]);
    assert_eq!(basic.generator.name, "builtin.uniform");
    assert_eq!(basic.generator.seed, Some(42));
    assert_eq!(basic.assertion.rtol, Some(0.001));
    assert_eq!(basic.tags, vec!["smoke"]);
    assert_eq!(basic.priority, 3);

    let half = plan.case("add_fp16").unwrap();
    assert_eq!(half.dtypes, vec![DType::Float16, DType::Float16]);
    assert_eq!(half.tags, vec!["nightly"]);
    assert_eq!(half.priority, 1);
    assert_eq!(half.generator.seed, Some(42));
    assert_eq!(half.generator.params.get("low"), Some(&serde_json::json!(-2.0)));
    assert_eq!(half.generator.constants.get("scale"), Some(&serde_json::json!(2.0)));
    assert_eq!(half.assertion.rtol, Some(0.001));
    assert_eq!(half.assertion.atol, Some(0.01));
    assert_eq!(half.assertion.metric, Metric::MeanAbs);
    assert_eq!(half.output_dtypes(), vec![DType::Float16]);
}

/// Every violation is reported at once, not just the first.
///
/// 一次报告所有违规，而不仅仅是第一个。
#[test]
fn test_violations_are_aggregated() {
    let content = r#"
operator: relu
inputs: [x.bin]
outputs: [y.bin]
backends:
  - type: cann
    chip: "910b"
    command: "run {input3} {bogus}"
  - type: tpu
    chip: v4
    command: run
  - type: cuda
    chip: a100
cases:
  - name: bad_dtypes
    dtypes: [float32, float32]
    shapes:
      - inputs: [[2]]
        outputs: [[2]]
  - name: bad_shape
    dtypes: [float32]
    shapes:
      - inputs: [[2], [2]]
        outputs: []
  - name: bad_shape
    dtypes: [float32]
    shapes: []
"#;
    let found = violations(content);
    let all = found.join("\n");

    assert!(all.contains("unknown token '{bogus}'"), "{all}");
    assert!(all.contains("backends[1]: unsupported backend type 'tpu'"), "{all}");
    assert!(all.contains("backends[2]: command is required"), "{all}");
    assert!(all.contains("dtypes length 2 does not match inputs 1"), "{all}");
    assert!(all.contains("shape index 0 has 2 inputs, expected 1"), "{all}");
    assert!(all.contains("shape index 0 has 0 outputs, expected 1"), "{all}");
    assert!(all.contains("duplicate case name 'bad_shape'"), "{all}");
    assert!(all.contains("shapes cannot be empty"), "{all}");
    assert!(found.len() >= 7);
}

#[test]
fn test_template_index_checked_per_case() {
    let content = r#"
operator: relu
inputs: [x.bin]
outputs: [y.bin]
backends:
  - type: cann
    chip: "910b"
    command: ["run", "{input1}"]
cases:
  - name: only_one_input
    dtypes: [float32]
    shapes:
      - inputs: [[2]]
        outputs: [[2]]
"#;
    let all = violations(content).join("\n");
    assert!(all.contains("only_one_input"), "{all}");
    assert!(all.contains("'{input1}' is out of range"), "{all}");
}

#[test]
fn test_dtype_token_requires_single_dtype() {
    let content = r#"
operator: elementwise_add
inputs: [a.bin, b.bin]
outputs: [c.bin]
backends:
  - type: cuda
    chip: a100
    command: ["run", "--dtype", "{dtype}"]
cases:
  - name: same
    dtypes: [float32, float32]
    shapes:
      - inputs: [[2], [2]]
        outputs: [[2]]
  - name: mixed
    dtypes: [float32, int32]
    shapes:
      - inputs: [[2], [2]]
        outputs: [[2]]
"#;
    let found = violations(content);
    assert_eq!(found.len(), 1, "{found:?}");
    assert!(found[0].contains("'mixed'"));
    assert!(found[0].contains("float32,int32"));
}

#[test]
fn test_skipped_cases_are_not_template_checked() {
    let content = r#"
operator: elementwise_add
inputs: [a.bin, b.bin]
outputs: [c.bin]
backends:
  - type: cuda
    chip: a100
    skip_cases: [mixed]
    command: ["run", "--dtype", "{dtype}"]
cases:
  - name: mixed
    dtypes: [float32, int32]
    shapes:
      - inputs: [[2], [2]]
        outputs: [[2]]
"#;
    assert!(load_from(content).is_ok());
}

#[test]
fn test_unknown_keys_are_rejected() {
    let content = BASE.replace("description:", "descripton:");
    let found = violations(&content);
    assert_eq!(found.len(), 1);
    assert!(found[0].contains("descripton"), "{}", found[0]);
}

#[test]
fn test_timeout_must_be_positive() {
    let content = BASE.replace("    timeout: 30\n", "    timeout: 0\n");
    let all = violations(&content).join("\n");
    assert!(all.contains("timeout must be a positive number"), "{all}");
}

#[test]
fn test_duplicate_backend_entries() {
    let content = BASE.replace(
        "cases:\n",
        "  - type: CANN\n    chip: \"910b\"\n    command: run\ncases:\n",
    );
    let all = violations(&content).join("\n");
    assert!(all.contains("duplicate backend entry for type=cann chip=910b"), "{all}");
}

#[test]
fn test_non_builtin_plugins_need_a_source() {
    let content = BASE.replace("name: builtin.elementwise_add", "name: my_checker");
    let all = violations(&content).join("\n");
    assert!(all.contains("assertion 'my_checker' is not a builtin and has no source"), "{all}");

    let with_source = BASE.replace(
        "name: builtin.elementwise_add",
        "name: my_checker\n  source: ~/checks/check.py",
    );
    let plan = load_from(&with_source).expect("a source makes any name valid");
    let source = plan.cases[0].assertion.source.clone().unwrap();
    assert!(source.ends_with("checks/check.py"));
    assert!(source.is_absolute());
}

/// A source is tied to its name: renaming the generator drops the inherited source.
///
/// 源文件与名称绑定：重命名生成器会丢弃继承的源文件。
#[test]
fn test_source_is_bound_to_name() {
    let content = BASE
        .replace("  name: builtin.uniform\n", "  name: my_gen\n  source: gens/my_gen.py\n")
        .replace("      constants: {scale: 2.0}", "      name: builtin.ones");
    let plan = load_from(&content).expect("plan should load");

    let basic = plan.case("add_basic").unwrap();
    assert_eq!(basic.generator.name, "my_gen");
    assert_eq!(
        basic.generator.source.as_deref(),
        Some(Path::new("/plans/gens/my_gen.py"))
    );
    let half = plan.case("add_fp16").unwrap();
    assert_eq!(half.generator.name, "builtin.ones");
    assert_eq!(half.generator.source, None);
}

#[test]
fn test_per_input_override_inherits_everything_but_seed() {
    let content = BASE.replace(
        "  params: {low: -2.0, high: 2.0}\n",
        "  params: {low: -2.0, high: 2.0}\n  per_input:\n    1:\n      constants: {value: 3.0}\n",
    );
    let plan = load_from(&content).expect("plan should load");

    let generator = &plan.case("add_basic").unwrap().generator;
    let override_spec = generator.per_input.get(&1).expect("override for input 1");
    assert_eq!(override_spec.name, "builtin.uniform");
    assert_eq!(override_spec.seed, None);
    assert_eq!(override_spec.params, generator.params);
    assert_eq!(override_spec.constants.get("value"), Some(&serde_json::json!(3.0)));
}

#[test]
fn test_per_input_index_out_of_range() {
    let content = BASE.replace(
        "  params: {low: -2.0, high: 2.0}\n",
        "  params: {low: -2.0, high: 2.0}\n  per_input:\n    \"5\": builtin.ones\n",
    );
    let all = violations(&content).join("\n");
    assert!(all.contains("per_input index 5 is out of range"), "{all}");
}

#[test]
fn test_case_backend_lists_cannot_overlap() {
    let content = BASE.replace(
        "    tags: [nightly]\n",
        "    tags: [nightly]\n    backends:\n      only: [cann]\n      skip: [cann]\n",
    );
    let all = violations(&content).join("\n");
    assert!(all.contains("backends listed in both only and skip"), "{all}");
}

#[test]
fn test_backend_only_and_skip_cases_cannot_overlap() {
    let content = BASE.replace(
        "    retries: 2\n",
        "    retries: 2\n    only_cases: [add_basic, add_fp16]\n    skip_cases: [add_basic]\n",
    );
    let all = violations(&content).join("\n");
    assert!(
        all.contains("cases listed in both only_cases and skip_cases: [\"add_basic\"]"),
        "{all}"
    );
}

#[test]
fn test_output_dtypes_repeat_last_case_dtype() {
    let content = r#"
operator: identity
inputs: [a.bin, b.bin]
outputs: [x.bin, y.bin, z.bin]
backends:
  - type: cuda
    chip: a100
    command: run
cases:
  - name: mixed
    dtypes: [int8, float64]
    shapes:
      - inputs: [[1], [1]]
        outputs: [[1], [1], [1]]
"#;
    let plan = load_from(content).expect("plan should load");
    assert_eq!(
        plan.cases[0].output_dtypes(),
        vec![DType::Int8, DType::Float64, DType::Float64]
    );
}

/// TOML plans load the same way, with string keys for `per_input`.
///
/// TOML 计划以相同方式加载，`per_input` 使用字符串键。
#[test]
fn test_toml_plan_loads_from_disk() {
    let dir = setup_test_environment();
    let path = write_file(
        dir.path(),
        "plan.toml",
        r#"
operator = "relu"
inputs = ["x.bin"]
outputs = ["y.bin"]
cache = "regen"

[generator]
name = "builtin.random"
seed = 1

[generator.per_input."0"]
name = "builtin.ones"

[[backends]]
type = "cuda"
chip = "h100"
workdir = "out"
command = ["./relu", "{input0}", "{output0}"]
prepare = ["make relu"]

[backends.env]
DEVICE = "{chip}"
THREADS = 4

[[cases]]
name = "relu_small"
dtypes = ["bf16"]

[[cases.shapes]]
inputs = [[8]]
outputs = [[8]]
"#,
    );

    let plan = load_plan(&path);

    assert_eq!(plan.cache, CacheMode::Regen);
    assert_eq!(plan.plan_dir, dir.path());
    let backend = &plan.backends[0];
    assert_eq!(backend.workdir, dir.path().join("out"));
    assert_eq!(backend.prepare.len(), 1);
    assert_eq!(backend.prepare[0].argv.len(), 2);
    assert_eq!(backend.env.len(), 2);
    let case = &plan.cases[0];
    assert_eq!(case.dtypes, vec![DType::BFloat16]);
    assert_eq!(case.generator.per_input[&0].name, "builtin.ones");
}

#[test]
fn test_unreadable_plan_file() {
    let dir = setup_test_environment();
    let err = Plan::load(&dir.path().join("absent.yaml"), &Registry::with_builtins()).unwrap_err();
    assert_eq!(err.violations.len(), 1);
    assert!(err.violations[0].contains("cannot read plan"));
}
