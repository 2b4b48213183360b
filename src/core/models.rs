//! # Data Models Module / 数据模型模块
//!
//! Result types produced by the execution engine: per-unit statuses and
//! results, the run summary, and the sink results are streamed into.
//!
//! 执行引擎产生的结果类型：单元状态与结果、运行摘要，以及接收结果流的输出端。

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::infra::t;

/// Final status of one execution unit.
/// 单个执行单元的最终状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    /// Outputs matched the reference. / 输出与参考一致。
    Pass,
    /// Outputs did not match the reference. / 输出与参考不一致。
    Fail,
    /// Expected to fail, and the comparison failed. / 预期失败且比较失败。
    XFail,
    /// Expected to fail, but the comparison passed. / 预期失败但比较通过。
    XPass,
    /// No comparison happened: command, IO or plugin error. / 未进行比较：命令、IO 或插件错误。
    Error,
}

impl Status {
    /// Classifies a completed comparison. Hard errors never reach here.
    pub fn classify(assertion_ok: bool, expect_failure: bool) -> Status {
        match (assertion_ok, expect_failure) {
            (true, false) => Status::Pass,
            (true, true) => Status::XPass,
            (false, false) => Status::Fail,
            (false, true) => Status::XFail,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pass => "PASS",
            Status::Fail => "FAIL",
            Status::XFail => "XFAIL",
            Status::XPass => "XPASS",
            Status::Error => "ERROR",
        }
    }

    /// Localized label for console output.
    pub fn label(self, locale: &str) -> String {
        match self {
            Status::Pass => t!("status.pass", locale = locale),
            Status::Fail => t!("status.fail", locale = locale),
            Status::XFail => t!("status.xfail", locale = locale),
            Status::XPass => t!("status.xpass", locale = locale),
            Status::Error => t!("status.error", locale = locale),
        }
        .to_string()
    }

    /// FAIL and ERROR make the run unsuccessful.
    pub fn is_failure(self) -> bool {
        matches!(self, Status::Fail | Status::Error)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable result of one execution unit.
/// 单个执行单元的不可变结果。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitResult {
    /// `<case>@<type>:<chip>/shape<N>`
    pub id: String,
    pub case: String,
    /// Backend type. / 后端类型。
    pub backend: String,
    pub chip: String,
    pub shape_index: usize,
    pub status: Status,
    /// Mismatch description, error message and captured output. / 不匹配描述、错误信息和捕获的输出。
    pub details: String,
    pub metrics: BTreeMap<String, f64>,
    #[serde(skip)]
    pub duration: Duration,
    /// Main-command attempts made. / 主命令的尝试次数。
    pub attempts: u32,
    pub expected_failure: bool,
}

/// Counts per status for a run.
/// 一次运行中各状态的计数。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub xfailed: usize,
    pub xpassed: usize,
    pub errored: usize,
}

impl RunSummary {
    pub fn from_results(results: &[UnitResult]) -> Self {
        let mut summary = RunSummary::default();
        for result in results {
            summary.record(result.status);
        }
        summary
    }

    pub fn record(&mut self, status: Status) {
        self.total += 1;
        match status {
            Status::Pass => self.passed += 1,
            Status::Fail => self.failed += 1,
            Status::XFail => self.xfailed += 1,
            Status::XPass => self.xpassed += 1,
            Status::Error => self.errored += 1,
        }
    }

    /// No unit failed or errored. XPASS does not count as a failure.
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.errored == 0
    }
}

/// Everything the engine returns after a run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub results: Vec<UnitResult>,
    pub summary: RunSummary,
    /// The run was stopped by a signal before all units ran.
    pub interrupted: bool,
}

/// Receives results as soon as each unit finishes.
pub trait ResultSink {
    fn unit_started(&mut self, _id: &str) {}
    fn unit_finished(&mut self, result: &UnitResult);
}

impl<F> ResultSink for F
where
    F: FnMut(&UnitResult),
{
    fn unit_finished(&mut self, result: &UnitResult) {
        self(result)
    }
}

/// A sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ResultSink for NullSink {
    fn unit_finished(&mut self, _result: &UnitResult) {}
}
