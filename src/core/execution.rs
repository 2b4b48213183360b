//! # Execution Engine Module / 执行引擎模块
//!
//! Drives every unit of an execution plan strictly one after another:
//! resolve generator, materialize inputs, run the backend commands, resolve
//! the assertion, compare, classify. A failing unit never stops the run; only
//! an interrupt does.
//!
//! 严格按顺序驱动执行计划中的每个单元：解析生成器、生成输入、运行后端命令、
//! 解析断言、比较并分类。单个单元失败不会中止运行，只有中断信号会。

use std::collections::BTreeMap;
use std::time::Instant;

use crate::core::assertion::{AssertionOutcome, AssertionRequest};
use crate::core::backend::{self, CommandOutcome};
use crate::core::error::UnitError;
use crate::core::generator::{self, GeneratorRequest};
use crate::core::models::{ResultSink, RunReport, RunSummary, Status, UnitResult};
use crate::core::plan::CacheMode;
use crate::core::planner::{ExecutionPlan, ExecutionUnit};
use crate::core::registry::RunContext;
use crate::core::tensor;
use crate::infra::command;

/// Sequential plan executor.
#[derive(Debug)]
pub struct Engine {
    ctx: RunContext,
    cache: CacheMode,
}

/// What a finished unit looked like before it became a `UnitResult`.
struct Verdict {
    outcome: AssertionOutcome,
    command_output: String,
}

impl Engine {
    pub fn new(ctx: RunContext, cache: CacheMode) -> Self {
        Self { ctx, cache }
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// Runs every unit in order, streaming each result into `sink`.
    pub async fn run(&mut self, plan: &ExecutionPlan<'_>, sink: &mut dyn ResultSink) -> RunReport {
        let mut report = RunReport::default();
        for unit in &plan.units {
            if self.ctx.cancel.is_cancelled() {
                report.interrupted = true;
                break;
            }
            sink.unit_started(&unit.id);
            match self.run_unit(unit).await {
                Some(result) => {
                    sink.unit_finished(&result);
                    report.results.push(result);
                }
                None => {
                    tracing::info!(unit = %unit.id, "unit interrupted, stopping run");
                    report.interrupted = true;
                    break;
                }
            }
        }
        report.summary = RunSummary::from_results(&report.results);
        report
    }

    /// Runs one unit. `None` means the unit was interrupted and has no result.
    pub async fn run_unit(&mut self, unit: &ExecutionUnit<'_>) -> Option<UnitResult> {
        let start = Instant::now();
        let mut attempts = 0;
        let verdict = self.drive(unit, &mut attempts).await;

        let (status, details, metrics) = match verdict {
            Ok(Verdict {
                outcome,
                command_output,
            }) => {
                let status = Status::classify(outcome.ok, unit.expect_failure);
                let mut details = outcome.details;
                if !outcome.ok && !command_output.is_empty() {
                    if !details.is_empty() {
                        details.push('\n');
                    }
                    details.push_str(&command_output);
                }
                (status, details, outcome.metrics)
            }
            Err(UnitError::Interrupted) => return None,
            Err(e) => (Status::Error, e.to_string(), BTreeMap::new()),
        };

        tracing::debug!(unit = %unit.id, %status, attempts, "unit finished");
        Some(UnitResult {
            id: unit.id.clone(),
            case: unit.case.name.clone(),
            backend: unit.backend.kind.to_string(),
            chip: unit.backend.chip.clone(),
            shape_index: unit.shape_index,
            status,
            details,
            metrics,
            duration: start.elapsed(),
            attempts,
            expected_failure: unit.expect_failure,
        })
    }

    async fn drive(&mut self, unit: &ExecutionUnit<'_>, attempts: &mut u32) -> Result<Verdict, UnitError> {
        let cancel = self.ctx.cancel.clone();
        let timeout = unit.backend.timeout;

        self.materialize_inputs(unit).await?;

        let outcome = backend::execute(unit, &cancel).await?;
        *attempts = outcome.attempts();
        let last = match outcome {
            CommandOutcome::Succeeded { last, .. } => last,
            CommandOutcome::Failed { last, .. } if last.interrupted() => {
                return Err(UnitError::Interrupted);
            }
            CommandOutcome::Failed {
                phase,
                attempts,
                last,
            } => {
                let tries = if attempts > 0 {
                    format!(" after {attempts} attempt(s)")
                } else {
                    String::new()
                };
                return Err(UnitError::Command(format!(
                    "{phase} failed{tries}: {}",
                    last.describe()
                )));
            }
        };

        let assertion = self.ctx.registry.resolve_assertion(&unit.case.assertion)?;
        let output_dtypes = unit.case.output_dtypes();
        let spec = &unit.case.assertion;
        let request = AssertionRequest {
            input_paths: &unit.input_paths,
            output_paths: &unit.output_paths,
            input_shapes: &unit.shape.inputs,
            output_shapes: &unit.shape.outputs,
            dtypes: &unit.case.dtypes,
            output_dtypes: &output_dtypes,
            params: &spec.params,
            rtol: spec.rtol,
            atol: spec.atol,
            metric: spec.metric,
        };
        let outcome = assertion.invoke(&request, timeout, &cancel).await?;

        let mut command_output = String::new();
        for (label, text) in [("stderr", &last.stderr), ("stdout", &last.stdout)] {
            if !text.trim().is_empty() {
                if !command_output.is_empty() {
                    command_output.push('\n');
                }
                command_output.push_str(&format!("--- {label} ---\n{}", command::summarize_output(text)));
            }
        }
        Ok(Verdict {
            outcome,
            command_output,
        })
    }

    /// Writes the unit's input files unless `reuse` finds them all present
    /// with the expected size.
    async fn materialize_inputs(&mut self, unit: &ExecutionUnit<'_>) -> Result<(), UnitError> {
        let spec = &unit.case.generator;
        let batches = generator::input_batches(spec, unit.input_paths.len());
        let resolved = batches
            .iter()
            .map(|(batch_spec, _)| self.ctx.registry.resolve_generator(batch_spec))
            .collect::<Result<Vec<_>, _>>()?;

        let cached = self.cache == CacheMode::Reuse
            && unit
                .input_paths
                .iter()
                .zip(&unit.case.dtypes)
                .zip(&unit.shape.inputs)
                .all(|((path, dtype), shape)| tensor::matches_size(path, *dtype, shape));
        if cached {
            tracing::debug!(unit = %unit.id, "reusing cached inputs");
            return Ok(());
        }

        let mut rng = generator::unit_rng(spec.seed);
        for ((batch_spec, indices), generator_fn) in batches.iter().zip(&resolved) {
            let request = GeneratorRequest {
                indices: indices.clone(),
                input_paths: indices.iter().map(|&i| unit.input_paths[i].clone()).collect(),
                shapes: indices.iter().map(|&i| unit.shape.inputs[i].clone()).collect(),
                dtypes: indices.iter().map(|&i| unit.case.dtypes[i]).collect(),
                output_shapes: &unit.shape.outputs,
                params: &batch_spec.params,
                constants: &batch_spec.constants,
                seed: batch_spec.seed,
            };
            let is_override = !std::ptr::eq(*batch_spec, spec);
            match batch_spec.seed {
                Some(seed) if is_override => {
                    let mut own = generator::unit_rng(Some(seed));
                    generator_fn
                        .invoke(&request, &mut own, unit.backend.timeout, &self.ctx.cancel)
                        .await?
                }
                _ => {
                    generator_fn
                        .invoke(&request, &mut rng, unit.backend.timeout, &self.ctx.cancel)
                        .await?
                }
            }
        }
        Ok(())
    }
}
