mod common;

use std::fs;
use std::time::Duration;

use common::*;
use optest::core::execution::Engine;
use optest::core::models::{NullSink, Status};
use optest::core::plan::CacheMode;
use optest::core::planner::{SelectionFilters, plan_execution};
use optest::core::registry::{Registry, RunContext};
use tokio_util::sync::CancellationToken;

/// A backend that copies its input is judged PASS by the identity assertion.
///
/// 复制输入的后端被恒等断言判定为 PASS。
#[tokio::test]
async fn test_copy_command_passes() {
    let dir = setup_test_environment();
    let plan = load_plan(&write_plan(dir.path(), &identity_plan(COPY_COMMAND, "", "")));

    let report = run_plan(&plan, CacheMode::Regen).await;

    assert_eq!(report.results.len(), 1);
    let result = &report.results[0];
    assert_eq!(result.status, Status::Pass, "details: {}", result.details);
    assert_eq!(result.id, "copy@cann:910b/shape0");
    assert_eq!(result.attempts, 1);
    assert_eq!(result.metrics.get("max_abs"), Some(&0.0));
    assert!(report.summary.is_success());
    assert!(!report.interrupted);
}

/// Writing zeros where ones are expected is a FAIL with max_abs 1.0.
///
/// 在期望为 1 的地方写入 0 会得到 FAIL，且 max_abs 为 1.0。
#[tokio::test]
async fn test_zeros_command_fails_with_metric() {
    let dir = setup_test_environment();
    let plan = load_plan(&write_plan(dir.path(), &identity_plan(ZEROS_COMMAND, "", "")));

    let report = run_plan(&plan, CacheMode::Regen).await;

    let result = &report.results[0];
    assert_eq!(result.status, Status::Fail);
    assert_eq!(result.metrics.get("max_abs"), Some(&1.0));
    assert!(result.details.contains("4 of 4 elements outside tolerance"), "{}", result.details);
    assert_eq!(report.summary.failed, 1);
    assert!(!report.summary.is_success());
}

#[tokio::test]
async fn test_mean_abs_metric_is_reported_without_changing_verdict() {
    let dir = setup_test_environment();
    let content = identity_plan(ZEROS_COMMAND, "", "")
        .replace("assertion: builtin.identity", "assertion:\n  name: builtin.identity\n  metric: mean_abs");
    let plan = load_plan(&write_plan(dir.path(), &content));

    let report = run_plan(&plan, CacheMode::Regen).await;

    let result = &report.results[0];
    assert_eq!(result.status, Status::Fail);
    assert_eq!(result.metrics.get("mean_abs"), Some(&1.0));
    assert!(!result.metrics.contains_key("max_abs"));
}

/// The first attempt fails and leaves a marker; the retry succeeds.
///
/// 第一次尝试失败并留下标记文件；重试成功。
#[tokio::test]
async fn test_retry_recovers_from_transient_failure() {
    let dir = setup_test_environment();
    let command = r#"["sh", "-c", "if [ -f marker ]; then cat {input0} > {output0}; else touch marker; exit 1; fi"]"#;
    let plan = load_plan(&write_plan(
        dir.path(),
        &identity_plan(command, "    retries: 1", ""),
    ));

    let report = run_plan(&plan, CacheMode::Regen).await;

    let result = &report.results[0];
    assert_eq!(result.status, Status::Pass, "details: {}", result.details);
    assert_eq!(result.attempts, 2);
}

#[tokio::test]
async fn test_exhausted_retries_are_an_error() {
    let dir = setup_test_environment();
    let command = r#"["sh", "-c", "echo boom >&2; exit 3"]"#;
    let plan = load_plan(&write_plan(
        dir.path(),
        &identity_plan(command, "    retries: 2", ""),
    ));

    let report = run_plan(&plan, CacheMode::Regen).await;

    let result = &report.results[0];
    assert_eq!(result.status, Status::Error);
    assert_eq!(result.attempts, 3);
    assert!(result.details.contains("after 3 attempt(s)"), "{}", result.details);
    assert!(result.details.contains("exited with code 3"), "{}", result.details);
    assert!(result.details.contains("boom"), "{}", result.details);
}

/// A hanging command is killed at the timeout and reported as ERROR.
///
/// 挂起的命令在超时后被杀死，并报告为 ERROR。
#[tokio::test]
async fn test_timeout_is_an_error_and_discards_outputs() {
    let dir = setup_test_environment();
    let command = r#"["sh", "-c", "cat {input0} > {output0}; sleep 10"]"#;
    let plan = load_plan(&write_plan(
        dir.path(),
        &identity_plan(command, "    timeout: 0.5", ""),
    ));

    let started = std::time::Instant::now();
    let report = run_plan(&plan, CacheMode::Regen).await;

    let result = &report.results[0];
    assert_eq!(result.status, Status::Error);
    assert!(result.details.contains("timed out"), "{}", result.details);
    assert!(started.elapsed() < Duration::from_secs(8));
    assert!(!dir.path().join("work").join("out0.bin").exists());
}

/// A command failure on an xfail backend is still an ERROR: nothing was compared.
///
/// 预期失败的后端上命令失败仍然是 ERROR：没有进行任何比较。
#[tokio::test]
async fn test_command_failure_on_xfail_backend_is_error() {
    let dir = setup_test_environment();
    let plan = load_plan(&write_plan(
        dir.path(),
        &identity_plan(r#"["sh", "-c", "exit 1"]"#, "", "    backends:\n      xfail: [cann]"),
    ));

    let report = run_plan(&plan, CacheMode::Regen).await;

    let result = &report.results[0];
    assert!(result.expected_failure);
    assert_eq!(result.status, Status::Error);
}

#[tokio::test]
async fn test_expected_failure_outcomes() {
    let dir = setup_test_environment();
    let xfail = "    backends:\n      xfail: [\"cann:910b\"]";

    let plan = load_plan(&write_plan(dir.path(), &identity_plan(ZEROS_COMMAND, "", xfail)));
    let report = run_plan(&plan, CacheMode::Regen).await;
    assert_eq!(report.results[0].status, Status::XFail);
    assert!(report.summary.is_success());

    let plan = load_plan(&write_plan(dir.path(), &identity_plan(COPY_COMMAND, "", xfail)));
    let report = run_plan(&plan, CacheMode::Regen).await;
    assert_eq!(report.results[0].status, Status::XPass);
    assert_eq!(report.summary.xpassed, 1);
    assert!(report.summary.is_success());
}

#[tokio::test]
async fn test_backend_xfail_list_marks_case() {
    let dir = setup_test_environment();
    let plan = load_plan(&write_plan(
        dir.path(),
        &identity_plan(ZEROS_COMMAND, "    xfail_cases: [copy]", ""),
    ));

    let report = run_plan(&plan, CacheMode::Regen).await;

    assert_eq!(report.results[0].status, Status::XFail);
}

/// A failing prepare step skips the command but cleanup still runs.
///
/// 准备步骤失败会跳过主命令，但清理步骤仍会运行。
#[tokio::test]
async fn test_prepare_failure_still_runs_cleanup() {
    let dir = setup_test_environment();
    let extra = "    prepare: [\"false\"]\n    cleanup: [\"touch cleaned\"]";
    let plan = load_plan(&write_plan(dir.path(), &identity_plan(COPY_COMMAND, extra, "")));

    let report = run_plan(&plan, CacheMode::Regen).await;

    let result = &report.results[0];
    assert_eq!(result.status, Status::Error);
    assert!(result.details.starts_with("prepare failed"), "{}", result.details);
    assert_eq!(result.attempts, 0);
    assert!(dir.path().join("work").join("cleaned").exists());
    assert!(!dir.path().join("work").join("out0.bin").exists());
}

#[tokio::test]
async fn test_env_values_are_rendered() {
    let dir = setup_test_environment();
    let command = r#"["sh", "-c", "test \"$OPTEST_CASE\" = copy-910b && cat {input0} > {output0}"]"#;
    let extra = "    env:\n      OPTEST_CASE: \"{case}-{chip}\"";
    let plan = load_plan(&write_plan(dir.path(), &identity_plan(command, extra, "")));

    let report = run_plan(&plan, CacheMode::Regen).await;

    assert_eq!(report.results[0].status, Status::Pass, "{}", report.results[0].details);
}

#[tokio::test]
async fn test_stale_outputs_are_removed_before_the_command() {
    let dir = setup_test_environment();
    // The stale file holds the right bytes; a command that writes nothing must not pass.
    let stale = dir.path().join("work").join("out0.bin");
    fs::create_dir_all(stale.parent().unwrap()).unwrap();
    fs::write(&stale, [0u8, 0, 128, 63].repeat(4)).unwrap();
    let plan = load_plan(&write_plan(dir.path(), &identity_plan(r#"["true"]"#, "", "")));

    let report = run_plan(&plan, CacheMode::Regen).await;

    let result = &report.results[0];
    assert_eq!(result.status, Status::Error);
    assert!(result.details.contains("out0.bin"), "{}", result.details);
}

/// `reuse` keeps existing inputs untouched; `regen` rewrites them.
///
/// `reuse` 保持已有输入不变；`regen` 会重写它们。
#[tokio::test]
async fn test_cache_reuse_and_regen() {
    let dir = setup_test_environment();
    let plan = load_plan(&write_plan(dir.path(), &identity_plan(COPY_COMMAND, "", "")));
    let input = input_path(&dir);

    run_plan(&plan, CacheMode::Reuse).await;
    let first_bytes = fs::read(&input).unwrap();
    let first_mtime = fs::metadata(&input).unwrap().modified().unwrap();

    tokio::time::sleep(Duration::from_millis(1100)).await;
    let report = run_plan(&plan, CacheMode::Reuse).await;
    assert_eq!(report.results[0].status, Status::Pass);
    assert_eq!(fs::read(&input).unwrap(), first_bytes);
    assert_eq!(fs::metadata(&input).unwrap().modified().unwrap(), first_mtime);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    run_plan(&plan, CacheMode::Regen).await;
    assert_ne!(fs::metadata(&input).unwrap().modified().unwrap(), first_mtime);
}

#[tokio::test]
async fn test_cache_reuse_regenerates_wrong_sized_inputs() {
    let dir = setup_test_environment();
    let plan = load_plan(&write_plan(dir.path(), &identity_plan(COPY_COMMAND, "", "")));
    let input = input_path(&dir);
    fs::create_dir_all(input.parent().unwrap()).unwrap();
    fs::write(&input, [1u8, 2, 3]).unwrap();

    let report = run_plan(&plan, CacheMode::Reuse).await;

    assert_eq!(report.results[0].status, Status::Pass);
    assert_eq!(fs::metadata(&input).unwrap().len(), 16);
}

#[tokio::test]
async fn test_seeded_random_inputs_are_reproducible() {
    let dir = setup_test_environment();
    let content = identity_plan(COPY_COMMAND, "", "").replace("builtin.ones", "builtin.random");
    let plan = load_plan(&write_plan(dir.path(), &content));
    let input = input_path(&dir);

    run_plan(&plan, CacheMode::Regen).await;
    let first = fs::read(&input).unwrap();
    run_plan(&plan, CacheMode::Regen).await;

    assert_eq!(fs::read(&input).unwrap(), first);
}

/// A missing plugin source only errors the unit that needs it.
///
/// 缺失的插件源文件只会使需要它的执行单元出错。
#[tokio::test]
async fn test_missing_assertion_source_is_unit_error() {
    let dir = setup_test_environment();
    let case_extra = "    assertion:\n      name: custom_check\n      source: missing.py";
    let content = identity_plan(COPY_COMMAND, "", case_extra).replace(
        "cases:\n",
        "cases:\n  - name: plain\n    dtypes: [float32]\n    shapes:\n      - inputs: [[2]]\n        outputs: [[2]]\n",
    );
    let plan = load_plan(&write_plan(dir.path(), &content));

    let report = run_plan(&plan, CacheMode::Regen).await;

    assert_eq!(report.results.len(), 2);
    assert_eq!(report.results[0].status, Status::Pass);
    let broken = &report.results[1];
    assert_eq!(broken.case, "copy");
    assert_eq!(broken.status, Status::Error);
    assert!(broken.details.contains("cannot resolve assertion 'custom_check'"), "{}", broken.details);
}

#[tokio::test]
async fn test_shell_worker_assertion() {
    let dir = setup_test_environment();
    write_file(
        dir.path(),
        "check.sh",
        "cat > /dev/null\necho 'progress noise'\necho '{\"ok\": false, \"details\": \"rejected by script\", \"metrics\": {\"score\": 0.5}}'\n",
    );
    let case_extra = "    assertion:\n      name: custom_check\n      source: check.sh";
    let plan = load_plan(&write_plan(dir.path(), &identity_plan(COPY_COMMAND, "", case_extra)));

    let report = run_plan(&plan, CacheMode::Regen).await;

    let result = &report.results[0];
    assert_eq!(result.status, Status::Fail);
    assert!(result.details.contains("rejected by script"), "{}", result.details);
    assert_eq!(result.metrics.get("score"), Some(&0.5));
}

#[tokio::test]
async fn test_shell_worker_pair_reply_and_missing_symbol() {
    let dir = setup_test_environment();
    write_file(
        dir.path(),
        "check.sh",
        "cat > /dev/null\nif [ \"$2\" = good ]; then echo '[true, \"fine\"]'; else echo '{\"error\": \"no such assertion\"}'; fi\n",
    );

    let plan = load_plan(&write_plan(
        dir.path(),
        &identity_plan(COPY_COMMAND, "", "    assertion:\n      name: good\n      source: check.sh"),
    ));
    let report = run_plan(&plan, CacheMode::Regen).await;
    assert_eq!(report.results[0].status, Status::Pass, "{}", report.results[0].details);

    let plan = load_plan(&write_plan(
        dir.path(),
        &identity_plan(COPY_COMMAND, "", "    assertion:\n      name: other\n      source: check.sh"),
    ));
    let report = run_plan(&plan, CacheMode::Regen).await;
    let result = &report.results[0];
    assert_eq!(result.status, Status::Error);
    assert!(result.details.contains("no such assertion"), "{}", result.details);
}

/// A shell worker generator writes four float32 ones with printf.
///
/// 由 shell 工作进程实现的生成器用 printf 写入四个 float32 的 1。
#[tokio::test]
async fn test_shell_worker_generator() {
    let dir = setup_test_environment();
    write_file(
        dir.path(),
        "gen.sh",
        "cat > /dev/null\nmkdir -p work\nprintf '\\000\\000\\200\\077\\000\\000\\200\\077\\000\\000\\200\\077\\000\\000\\200\\077' > work/in0.bin\necho '{\"ok\": true}'\n",
    );
    let content = identity_plan(COPY_COMMAND, "", "")
        .replace("  name: builtin.ones\n", "  name: fill_ones\n  source: gen.sh\n");
    let plan = load_plan(&write_plan(dir.path(), &content));

    let report = run_plan(&plan, CacheMode::Regen).await;

    assert_eq!(report.results[0].status, Status::Pass, "{}", report.results[0].details);
    assert_eq!(fs::read(input_path(&dir)).unwrap(), [0u8, 0, 128, 63].repeat(4));
}

#[tokio::test]
async fn test_units_run_in_priority_order_per_shape() {
    let dir = setup_test_environment();
    let content = format!(
        r#"operator: identity
inputs: [in0.bin]
outputs: [out0.bin]
generator: builtin.ones
backends:
  - type: cuda
    chip: a100
    workdir: work
    command: {COPY_COMMAND}
cases:
  - name: late
    priority: 5
    dtypes: [float32]
    shapes:
      - inputs: [[2]]
        outputs: [[2]]
  - name: early
    priority: 1
    dtypes: [int32]
    shapes:
      - inputs: [[3]]
        outputs: [[3]]
      - inputs: [[2, 2]]
        outputs: [[2, 2]]
"#
    );
    let plan = load_plan(&write_plan(dir.path(), &content));

    let report = run_plan(&plan, CacheMode::Regen).await;

    let ids: Vec<&str> = report.results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(
        ids,
        ["early@cuda:a100/shape0", "early@cuda:a100/shape1", "late@cuda:a100/shape0"]
    );
    assert!(report.results.iter().all(|r| r.status == Status::Pass));
}

/// A cancelled run stops before the first unit and reports no results.
///
/// 已取消的运行在第一个单元之前停止，且不报告结果。
#[tokio::test]
async fn test_cancelled_run_is_interrupted() {
    let dir = setup_test_environment();
    let plan = load_plan(&write_plan(dir.path(), &identity_plan(COPY_COMMAND, "", "")));
    let selection = plan_execution(&plan, &SelectionFilters::default()).unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let mut engine = Engine::new(RunContext::new(Registry::with_builtins(), cancel), CacheMode::Regen);

    let report = engine.run(&selection, &mut NullSink).await;

    assert!(report.interrupted);
    assert!(report.results.is_empty());
    assert_eq!(report.summary.total, 0);
}

#[tokio::test]
async fn test_cancel_during_command_kills_child() {
    let dir = setup_test_environment();
    let plan = load_plan(&write_plan(
        dir.path(),
        &identity_plan(r#"["sh", "-c", "sleep 10"]"#, "", ""),
    ));
    let selection = plan_execution(&plan, &SelectionFilters::default()).unwrap();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });
    let mut engine = Engine::new(RunContext::new(Registry::with_builtins(), cancel), CacheMode::Regen);

    let started = std::time::Instant::now();
    let report = engine.run(&selection, &mut NullSink).await;

    assert!(report.interrupted);
    assert!(report.results.is_empty());
    assert!(started.elapsed() < Duration::from_secs(8));
}
