//! # Assertion Module / 断言模块
//!
//! Judges the outputs a backend produced. Builtin assertions recompute the
//! expected outputs with a reference operator and compare elementwise under
//! `|actual - expected| <= atol + rtol * |expected|`. The configured metric
//! (`max_abs` or `mean_abs`) is reported for diagnostics only and never
//! changes that rule.
//!
//! 判定后端产生的输出。内置断言使用参考算子重新计算期望输出，并按
//! `|actual - expected| <= atol + rtol * |expected|` 逐元素比较。
//! 配置的指标（`max_abs` 或 `mean_abs`）仅用于诊断，不会改变该判定规则。

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::core::error::UnitError;
use crate::core::plan::{Metric, Params};
use crate::core::reference::{ReferenceOp, Tensor, Tolerance};
use crate::core::tensor::{self, DType};
use crate::infra::worker::{PluginKind, Worker, WorkerReply};

/// Everything an assertion may look at for one unit.
#[derive(Debug, Clone, Copy)]
pub struct AssertionRequest<'a> {
    pub input_paths: &'a [PathBuf],
    pub output_paths: &'a [PathBuf],
    pub input_shapes: &'a [Vec<usize>],
    pub output_shapes: &'a [Vec<usize>],
    pub dtypes: &'a [DType],
    pub output_dtypes: &'a [DType],
    pub params: &'a Params,
    pub rtol: Option<f64>,
    pub atol: Option<f64>,
    pub metric: Metric,
}

impl AssertionRequest<'_> {
    /// Reads every input tensor with its declared dtype and shape.
    pub fn read_inputs(&self) -> Result<Vec<Tensor>, UnitError> {
        read_all(self.input_paths, self.dtypes, self.input_shapes)
    }

    /// Reads every produced output. A missing or mis-sized file is an error,
    /// not a comparison failure.
    pub fn read_outputs(&self) -> Result<Vec<Tensor>, UnitError> {
        read_all(self.output_paths, self.output_dtypes, self.output_shapes)
    }

    fn tolerance(&self, default: Tolerance) -> Tolerance {
        Tolerance {
            rtol: self.rtol.unwrap_or(default.rtol),
            atol: self.atol.unwrap_or(default.atol),
        }
    }
}

fn read_all(paths: &[PathBuf], dtypes: &[DType], shapes: &[Vec<usize>]) -> Result<Vec<Tensor>, UnitError> {
    paths
        .iter()
        .zip(dtypes)
        .zip(shapes)
        .map(|((path, dtype), shape)| {
            let data = tensor::read_tensor(path, *dtype, shape)?;
            Ok(Tensor::new(shape.clone(), data))
        })
        .collect()
}

/// Verdict of an assertion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssertionOutcome {
    pub ok: bool,
    pub details: String,
    pub metrics: BTreeMap<String, f64>,
}

impl AssertionOutcome {
    pub fn pass() -> Self {
        Self {
            ok: true,
            ..Self::default()
        }
    }

    pub fn fail(details: impl Into<String>) -> Self {
        Self {
            ok: false,
            details: details.into(),
            metrics: BTreeMap::new(),
        }
    }
}

/// An in-process assertion.
pub trait Assertion: Send + Sync {
    fn check(&self, request: &AssertionRequest<'_>) -> Result<AssertionOutcome, UnitError>;
}

/// A resolved assertion ready to be invoked.
#[derive(Clone)]
pub enum AssertionFn {
    InProcess(Arc<dyn Assertion>),
    Worker { worker: Arc<Worker>, name: String },
}

impl std::fmt::Debug for AssertionFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssertionFn::InProcess(_) => f.write_str("AssertionFn::InProcess"),
            AssertionFn::Worker { worker, name } => f
                .debug_struct("AssertionFn::Worker")
                .field("source", &worker.source())
                .field("name", name)
                .finish(),
        }
    }
}

impl AssertionFn {
    pub async fn invoke(
        &self,
        request: &AssertionRequest<'_>,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<AssertionOutcome, UnitError> {
        match self {
            AssertionFn::InProcess(assertion) => assertion.check(request),
            AssertionFn::Worker { worker, name } => {
                let payload = serde_json::json!({
                    "kind": "assertion",
                    "name": name,
                    "input_paths": request.input_paths,
                    "output_paths": request.output_paths,
                    "shapes": {
                        "inputs": request.input_shapes,
                        "outputs": request.output_shapes,
                    },
                    "dtypes": request.dtypes,
                    "output_dtypes": request.output_dtypes,
                    "params": request.params,
                    "rtol": request.rtol,
                    "atol": request.atol,
                    "metric": request.metric,
                });
                let reply = worker
                    .call(PluginKind::Assertion, name, &payload, timeout, cancel)
                    .await?;
                Ok(match reply {
                    WorkerReply::Outcome { ok, details, metrics } => AssertionOutcome {
                        ok,
                        details,
                        metrics,
                    },
                    WorkerReply::Pair(ok, details) => AssertionOutcome {
                        ok,
                        details,
                        metrics: BTreeMap::new(),
                    },
                    WorkerReply::Error { error } => return Err(UnitError::Plugin(error)),
                })
            }
        }
    }
}

/// Builtin assertion backed by a reference operator.
#[derive(Debug, Clone, Copy)]
pub struct ReferenceAssertion {
    pub op: &'static ReferenceOp,
}

impl Assertion for ReferenceAssertion {
    fn check(&self, request: &AssertionRequest<'_>) -> Result<AssertionOutcome, UnitError> {
        let inputs = request.read_inputs()?;
        let outputs = request.read_outputs()?;
        let expected = self.op.compute(&inputs, request.params).map_err(UnitError::Plugin)?;
        Ok(compare(
            &outputs,
            &expected,
            request.tolerance(self.op.tolerance()),
            request.metric,
        ))
    }
}

/// Compares produced outputs against expected tensors.
///
/// Tensors are matched by element count: a reference that yields a scalar
/// matches a declared `[1]` output.
pub fn compare(actual: &[Tensor], expected: &[Tensor], tol: Tolerance, metric: Metric) -> AssertionOutcome {
    if actual.len() != expected.len() {
        return AssertionOutcome::fail(format!(
            "output count mismatch: produced {} expected {}",
            actual.len(),
            expected.len()
        ));
    }

    let mut failures = Vec::new();
    let mut max_abs: f64 = 0.0;
    let mut sum_abs = 0.0;
    let mut counted = 0usize;

    for (idx, (got, want)) in actual.iter().zip(expected).enumerate() {
        if got.len() != want.len() {
            failures.push(format!(
                "output{idx}: shape mismatch, produced {:?} ({} elements) expected {:?} ({} elements)",
                got.shape,
                got.len(),
                want.shape,
                want.len()
            ));
            continue;
        }
        let mut bad = 0usize;
        let mut first_bad: Option<(usize, f64, f64)> = None;
        for (i, (&a, &e)) in got.data.iter().zip(&want.data).enumerate() {
            // Non-finite values only match themselves; NaN never matches.
            let (diff, within) = if a == e {
                (0.0, true)
            } else if a.is_finite() && e.is_finite() {
                let diff = (a - e).abs();
                (diff, diff <= tol.atol + tol.rtol * e.abs())
            } else {
                (f64::INFINITY, false)
            };
            max_abs = max_abs.max(diff);
            sum_abs += diff;
            counted += 1;
            if !within {
                bad += 1;
                first_bad.get_or_insert((i, a, e));
            }
        }
        if let Some((i, a, e)) = first_bad {
            failures.push(format!(
                "output{idx}: {bad} of {} elements outside tolerance (rtol={}, atol={}); first at index {i}: got {a}, expected {e}",
                got.len(),
                tol.rtol,
                tol.atol
            ));
        }
    }

    let value = match metric {
        Metric::MaxAbs => max_abs,
        Metric::MeanAbs if counted > 0 => sum_abs / counted as f64,
        Metric::MeanAbs => 0.0,
    };
    let mut metrics = BTreeMap::new();
    metrics.insert(metric.as_str().to_string(), value);

    AssertionOutcome {
        ok: failures.is_empty(),
        details: failures.join("\n"),
        metrics,
    }
}
