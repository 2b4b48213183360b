//! # JSON Reporting Module / JSON 报告模块
//!
//! Machine-readable run report, written to a file or to stdout.
//!
//! 机器可读的运行报告，写入文件或标准输出。

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::models::{RunReport, RunSummary, Status};
use crate::core::planner::ExecutionPlan;

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Serialize)]
pub struct JsonReport<'a> {
    pub schema_version: u32,
    pub generated_at: String,
    pub operator: &'a str,
    pub backend: &'a str,
    pub chip: &'a str,
    pub interrupted: bool,
    pub summary: RunSummary,
    pub cases: Vec<JsonCase<'a>>,
}

#[derive(Debug, Serialize)]
pub struct JsonCase<'a> {
    pub id: &'a str,
    pub case: &'a str,
    pub shape_index: usize,
    pub status: Status,
    pub details: &'a str,
    pub metrics: &'a BTreeMap<String, f64>,
    pub duration_ms: u64,
    pub attempts: u32,
    pub xfail: bool,
}

impl<'a> JsonReport<'a> {
    pub fn new(plan: &'a ExecutionPlan<'_>, report: &'a RunReport) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            generated_at: chrono::Local::now().to_rfc3339(),
            operator: &plan.plan.operator,
            backend: plan.backend.kind.as_str(),
            chip: &plan.backend.chip,
            interrupted: report.interrupted,
            summary: report.summary,
            cases: report
                .results
                .iter()
                .map(|r| JsonCase {
                    id: &r.id,
                    case: &r.case,
                    shape_index: r.shape_index,
                    status: r.status,
                    details: &r.details,
                    metrics: &r.metrics,
                    duration_ms: u64::try_from(r.duration.as_millis()).unwrap_or(u64::MAX),
                    attempts: r.attempts,
                    xfail: r.expected_failure,
                })
                .collect(),
        }
    }
}

/// Serializes the report; `path = None` prints it to stdout.
pub fn write_json_report(plan: &ExecutionPlan<'_>, report: &RunReport, path: Option<&Path>) -> Result<()> {
    let document = JsonReport::new(plan, report);
    let text = serde_json::to_string_pretty(&document).context("Failed to serialize JSON report")?;
    match path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            fs::write(path, text).with_context(|| format!("Failed to write report {}", path.display()))?;
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{text}").context("Failed to write report to stdout")?;
        }
    }
    Ok(())
}
