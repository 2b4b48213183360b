// src/commands/run.rs

use anyhow::{Context, Result};
use colored::*;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use crate::{
    core::{
        execution::Engine,
        models::{NullSink, ResultSink},
        plan::{CacheMode, Plan},
        planner::{self, SelectionFilters},
        registry::{Registry, RunContext},
    },
    reporting::{console, json},
    t,
};

/// Output format of the final report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    #[default]
    Terminal,
    Json,
}

/// Everything `optest run` was asked to do.
#[derive(Debug, Clone)]
pub struct RunArgs {
    pub plan: PathBuf,
    pub filters: SelectionFilters,
    /// Overrides the plan's `cache` setting.
    pub cache: Option<CacheMode>,
    pub list: bool,
    pub report: ReportFormat,
    pub report_path: Option<PathBuf>,
}

/// How a run ended, mapped onto the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Every unit passed, xfailed or xpassed. Also list mode.
    Success,
    /// At least one FAIL or ERROR.
    UnitFailures,
    /// The filters left nothing to run.
    EmptySelection,
    /// Stopped by Ctrl-C.
    Interrupted,
}

impl RunStatus {
    pub fn exit_code(self) -> ExitCode {
        match self {
            RunStatus::Success => ExitCode::SUCCESS,
            RunStatus::UnitFailures => ExitCode::from(1),
            RunStatus::EmptySelection => ExitCode::from(2),
            RunStatus::Interrupted => ExitCode::from(130),
        }
    }
}

/// Loads the plan, selects units and runs them. Plan and selection errors are
/// returned as `Err`; unit failures only change the returned status.
pub async fn execute(args: RunArgs, locale: &str) -> Result<RunStatus> {
    let registry = Registry::with_builtins();
    let plan = Plan::load(&args.plan, &registry)
        .with_context(|| t!("plan_load_failed", locale = locale, path = args.plan.display()))?;
    let selection = planner::plan_execution(&plan, &args.filters)
        .with_context(|| t!("selection_failed", locale = locale))?;

    if args.list {
        console::print_unit_list(&selection, locale);
        return Ok(RunStatus::Success);
    }

    if selection.units.is_empty() {
        eprintln!("{}", t!("no_units_selected", locale = locale).yellow());
        return Ok(RunStatus::EmptySelection);
    }

    // JSON on stdout must not be mixed with the console stream.
    let console_output = !(args.report == ReportFormat::Json && args.report_path.is_none());
    let cache = args.cache.unwrap_or(plan.cache);
    tracing::info!(plan = %args.plan.display(), ?cache, units = selection.units.len(), "starting run");

    let cancel = setup_signal_handler(locale);
    let mut engine = Engine::new(RunContext::new(registry, cancel), cache);

    let mut console_sink = console::ConsoleReporter::new(locale);
    let mut null_sink = NullSink;
    let sink: &mut dyn ResultSink = if console_output {
        console::print_header(&selection, locale);
        &mut console_sink
    } else {
        &mut null_sink
    };
    let report = engine.run(&selection, sink).await;

    if console_output {
        console::print_summary(&report.summary, locale);
        console::print_failure_details(&report.results, locale);
    }

    if args.report == ReportFormat::Json {
        json::write_json_report(&selection, &report, args.report_path.as_deref())?;
        if let Some(path) = &args.report_path {
            println!("\n{}", t!("report_written", locale = locale, path = path.display()));
        }
    }

    if report.interrupted {
        eprintln!("{}", t!("run_interrupted", locale = locale).yellow().bold());
        return Ok(RunStatus::Interrupted);
    }
    if report.summary.is_success() {
        if console_output {
            println!("\n{}", t!("all_units_passed", locale = locale).green().bold());
        }
        Ok(RunStatus::Success)
    } else {
        Ok(RunStatus::UnitFailures)
    }
}

fn setup_signal_handler(locale: &str) -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();
    let locale = locale.to_string();

    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                eprintln!("\n{}", t!("shutdown_signal", locale = &locale).yellow());
                token_clone.cancel();
            }
            Err(e) => tracing::warn!("cannot listen for Ctrl-C: {e}"),
        }
    });

    token
}
