//! # Backend Driver Module / 后端驱动模块
//!
//! Runs one unit's command sequence on its backend: prepare steps, the main
//! command with retries, then cleanup. Each attempt is bounded by the
//! backend timeout.
//!
//! 在后端上运行单个执行单元的命令序列：准备步骤、带重试的主命令，然后是清理。
//! 每次尝试都受后端超时限制。

use std::fmt;

use tokio_util::sync::CancellationToken;

use crate::core::error::UnitError;
use crate::core::plan::CommandTemplate;
use crate::core::planner::ExecutionUnit;
use crate::core::template::{Quoting, RenderContext, render_argv};
use crate::infra::command::{self, AttemptRecord, CommandSpec};
use crate::infra::fs;

/// Which step failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Prepare,
    Command,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Prepare => f.write_str("prepare"),
            Phase::Command => f.write_str("command"),
        }
    }
}

/// Result of driving a unit's commands.
#[derive(Debug, Clone)]
pub enum CommandOutcome {
    Succeeded {
        attempts: u32,
        last: AttemptRecord,
    },
    Failed {
        phase: Phase,
        attempts: u32,
        last: AttemptRecord,
    },
}

impl CommandOutcome {
    /// Number of main-command attempts made.
    pub fn attempts(&self) -> u32 {
        match self {
            CommandOutcome::Succeeded { attempts, .. } | CommandOutcome::Failed { attempts, .. } => *attempts,
        }
    }

    pub fn last(&self) -> &AttemptRecord {
        match self {
            CommandOutcome::Succeeded { last, .. } | CommandOutcome::Failed { last, .. } => last,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CommandOutcome::Succeeded { .. })
    }
}

struct Runner<'a> {
    ctx: RenderContext<'a>,
    env: Vec<(String, String)>,
    unit: &'a ExecutionUnit<'a>,
    cancel: &'a CancellationToken,
}

impl Runner<'_> {
    async fn run(&self, command: &CommandTemplate) -> Result<AttemptRecord, UnitError> {
        let argv = render_argv(&command.argv, &self.ctx)?;
        let spec = CommandSpec {
            argv: &argv,
            cwd: &self.unit.backend.workdir,
            env: &self.env,
            timeout: self.unit.backend.timeout,
            stdin: None,
        };
        Ok(command::run_attempt(&spec, self.cancel).await)
    }

    async fn cleanup(&self) {
        for step in &self.unit.backend.cleanup {
            match self.run(step).await {
                Ok(record) if record.succeeded() => {}
                Ok(record) => tracing::warn!(unit = %self.unit.id, "cleanup failed: {}", record.describe()),
                Err(e) => tracing::warn!(unit = %self.unit.id, "cleanup could not run: {e}"),
            }
        }
    }
}

/// Drives prepare, the main command and cleanup for one unit.
///
/// Cleanup always runs once prepare has started; its failures are logged and
/// never change the outcome. Outputs of a timed-out attempt are deleted.
pub async fn execute(
    unit: &ExecutionUnit<'_>,
    cancel: &CancellationToken,
) -> Result<CommandOutcome, UnitError> {
    let ctx = unit.render_context();
    let env = unit
        .backend
        .env
        .iter()
        .map(|(key, value)| -> Result<(String, String), UnitError> {
            Ok((key.clone(), value.render(&ctx, Quoting::Literal)?))
        })
        .collect::<Result<Vec<_>, _>>()?;

    std::fs::create_dir_all(&unit.backend.workdir).map_err(|e| {
        UnitError::io(
            format!("cannot create workdir {}", unit.backend.workdir.display()),
            e,
        )
    })?;
    fs::ensure_parent_dirs(&unit.output_paths)?;
    fs::remove_files(&unit.output_paths)?;

    let runner = Runner {
        ctx,
        env,
        unit,
        cancel,
    };
    let outcome = drive(&runner).await;
    runner.cleanup().await;
    outcome
}

async fn drive(runner: &Runner<'_>) -> Result<CommandOutcome, UnitError> {
    let unit = runner.unit;
    for step in &unit.backend.prepare {
        let record = runner.run(step).await?;
        if !record.succeeded() {
            return Ok(CommandOutcome::Failed {
                phase: Phase::Prepare,
                attempts: 0,
                last: record,
            });
        }
    }

    let max_attempts = unit.backend.retries + 1;
    let mut attempt = 0;
    loop {
        attempt += 1;
        let record = runner.run(&unit.backend.command).await?;
        if record.succeeded() {
            return Ok(CommandOutcome::Succeeded {
                attempts: attempt,
                last: record,
            });
        }
        if record.timed_out() {
            fs::remove_files(&unit.output_paths)?;
        }
        if record.interrupted() || attempt >= max_attempts {
            return Ok(CommandOutcome::Failed {
                phase: Phase::Command,
                attempts: attempt,
                last: record,
            });
        }
        tracing::info!(
            unit = %unit.id,
            attempt,
            max_attempts,
            "command failed, retrying: {}",
            record.describe().lines().next().unwrap_or_default()
        );
    }
}
