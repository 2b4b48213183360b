//! # Console Reporting Module / 控制台报告模块
//!
//! Streams one colored, localized line per finished unit, with details and
//! metrics indented beneath, and prints the final summary.
//!
//! 每完成一个执行单元输出一行带颜色的本地化结果，详情和指标缩进显示在其下方，
//! 最后打印运行摘要。

use colored::*;

use crate::core::models::{ResultSink, RunSummary, Status, UnitResult};
use crate::core::planner::ExecutionPlan;
use crate::infra::t;

/// Result sink printing to stdout as units finish.
///
/// 在单元完成时打印到标准输出的结果接收端。
#[derive(Debug, Clone)]
pub struct ConsoleReporter {
    locale: String,
}

impl ConsoleReporter {
    pub fn new(locale: &str) -> Self {
        Self {
            locale: locale.to_string(),
        }
    }
}

impl ResultSink for ConsoleReporter {
    fn unit_finished(&mut self, result: &UnitResult) {
        println!("{}", format_result_line(result, &self.locale));
        for line in detail_lines(result) {
            println!("{line}");
        }
    }
}

fn colorize(status: Status, text: String) -> ColoredString {
    match status {
        Status::Pass => text.green(),
        Status::Fail => text.red(),
        Status::XFail => text.yellow(),
        Status::XPass => text.magenta(),
        Status::Error => text.red().bold(),
    }
}

/// Formats the headline of one result.
///
/// ```text
/// PASS   add_basic@cann:910b/shape0 (0.01s)
/// ```
pub fn format_result_line(result: &UnitResult, locale: &str) -> String {
    let label = format!("{:<6}", result.status.label(locale));
    let retries = if result.attempts > 1 {
        format!(
            " {}",
            t!("attempts_suffix", locale = locale, count = result.attempts)
        )
    } else {
        String::new()
    };
    format!(
        "{} {} ({:.2}s){}",
        colorize(result.status, label),
        result.id,
        result.duration.as_secs_f64(),
        retries
    )
}

/// Details and metrics, indented by four spaces. Empty for a clean pass.
pub fn detail_lines(result: &UnitResult) -> Vec<String> {
    let mut lines: Vec<String> = result
        .details
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| format!("    {line}"))
        .collect();
    if !result.metrics.is_empty() {
        let metrics = result
            .metrics
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(format!("    {}", metrics.dimmed()));
    }
    lines
}

/// Prints the run header: operator, selected backend and unit count.
pub fn print_header(plan: &ExecutionPlan<'_>, locale: &str) {
    println!(
        "{}",
        t!(
            "run_header",
            locale = locale,
            operator = plan.plan.operator.as_str(),
            backend = plan.backend.label(),
            count = plan.units.len()
        )
        .bold()
    );
}

/// List mode: one unit id per line, nothing is executed.
pub fn print_unit_list(plan: &ExecutionPlan<'_>, locale: &str) {
    for unit in &plan.units {
        let marker = if unit.expect_failure {
            format!(" {}", t!("xfail_marker", locale = locale).yellow())
        } else {
            String::new()
        };
        println!("{}{}", unit.id, marker);
    }
    println!(
        "\n{}",
        t!("units_listed", locale = locale, count = plan.units.len()).cyan()
    );
}

/// Prints the final summary line.
///
/// ```text
/// --- Summary ---
/// total 4 | passed 2 | failed 1 | xfailed 0 | xpassed 0 | errored 1
/// ```
pub fn print_summary(summary: &RunSummary, locale: &str) {
    println!("\n{}", t!("summary_banner", locale = locale).bold());
    let line = t!(
        "summary_line",
        locale = locale,
        total = summary.total,
        passed = summary.passed,
        failed = summary.failed,
        xfailed = summary.xfailed,
        xpassed = summary.xpassed,
        errored = summary.errored
    )
    .to_string();
    if summary.is_success() {
        println!("{}", line.green());
    } else {
        println!("{}", line.red());
    }
}

/// Repeats every FAIL and ERROR with full details after the summary, so they
/// are not lost in a long stream.
pub fn print_failure_details(results: &[UnitResult], locale: &str) {
    let failures: Vec<&UnitResult> = results.iter().filter(|r| r.status.is_failure()).collect();
    if failures.is_empty() {
        return;
    }

    println!("\n{}", t!("failure_banner", locale = locale).red().bold());
    println!("{}", "-".repeat(80));
    for (i, result) in failures.iter().enumerate() {
        println!(
            "[{}/{}] {} '{}'",
            i + 1,
            failures.len(),
            colorize(result.status, result.status.label(locale)),
            result.id.cyan()
        );
        for line in detail_lines(result) {
            println!("{line}");
        }
        println!("{}", "-".repeat(80));
    }
}
