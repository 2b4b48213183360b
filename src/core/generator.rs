//! # Generator Module / 数据生成器模块
//!
//! Produces input tensor files for an execution unit. Builtin generators run
//! in process; source-based ones are delegated to a plugin worker.
//!
//! 为执行单元生成输入张量文件。内置生成器在进程内运行；
//! 基于源文件的生成器交给插件工作进程处理。
//!
//! Seeding: a unit with a seed gets a `StdRng` seeded from it, so identical
//! shapes, dtypes, params and constants always yield identical bytes. Without
//! a seed the unit draws from OS entropy. Each unit owns its generator.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use tokio_util::sync::CancellationToken;

use crate::core::error::UnitError;
use crate::core::plan::{GeneratorSpec, Params};
use crate::core::tensor::{self, DType};
use crate::infra::worker::{PluginKind, Worker, WorkerReply};

/// One generator call: the inputs it must write and everything it may use.
#[derive(Debug, Clone)]
pub struct GeneratorRequest<'a> {
    /// Input positions covered by this call.
    pub indices: Vec<usize>,
    pub input_paths: Vec<PathBuf>,
    pub shapes: Vec<Vec<usize>>,
    pub dtypes: Vec<DType>,
    /// All output shapes of the unit, for generators that need them.
    pub output_shapes: &'a [Vec<usize>],
    pub params: &'a Params,
    pub constants: &'a Params,
    pub seed: Option<u64>,
}

/// An in-process generator. Implementations write one file per entry of
/// `request.input_paths`.
pub trait Generator: Send + Sync {
    fn generate(&self, request: &GeneratorRequest<'_>, rng: &mut StdRng) -> Result<(), UnitError>;
}

/// A resolved generator ready to be invoked.
#[derive(Clone)]
pub enum GeneratorFn {
    InProcess(Arc<dyn Generator>),
    Worker { worker: Arc<Worker>, name: String },
}

impl std::fmt::Debug for GeneratorFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GeneratorFn::InProcess(_) => f.write_str("GeneratorFn::InProcess"),
            GeneratorFn::Worker { worker, name } => f
                .debug_struct("GeneratorFn::Worker")
                .field("source", &worker.source())
                .field("name", name)
                .finish(),
        }
    }
}

impl GeneratorFn {
    pub async fn invoke(
        &self,
        request: &GeneratorRequest<'_>,
        rng: &mut StdRng,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<(), UnitError> {
        match self {
            GeneratorFn::InProcess(generator) => generator.generate(request, rng),
            GeneratorFn::Worker { worker, name } => {
                let payload = serde_json::json!({
                    "kind": "generator",
                    "name": name,
                    "input_paths": request.input_paths,
                    "shapes": {
                        "inputs": request.shapes,
                        "outputs": request.output_shapes,
                    },
                    "dtypes": request.dtypes,
                    "params": request.params,
                    "seed": request.seed,
                    "constants": request.constants,
                    "rng_seed": rng.next_u64(),
                });
                match worker
                    .call(PluginKind::Generator, name, &payload, timeout, cancel)
                    .await?
                {
                    WorkerReply::Outcome { ok: true, .. } | WorkerReply::Pair(true, _) => Ok(()),
                    WorkerReply::Outcome { details, .. } | WorkerReply::Pair(false, details) => Err(
                        UnitError::Plugin(format!("generator '{name}' reported failure: {details}")),
                    ),
                    WorkerReply::Error { error } => Err(UnitError::Plugin(error)),
                }
            }
        }
    }
}

/// Creates the random stream for one unit.
pub fn unit_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// Splits a unit's inputs into generator calls: one call for every input
/// without a `per_input` override, then one call per overridden input.
pub fn input_batches(spec: &GeneratorSpec, inputs: usize) -> Vec<(&GeneratorSpec, Vec<usize>)> {
    let shared: Vec<usize> = (0..inputs)
        .filter(|i| !spec.per_input.contains_key(i))
        .collect();
    let mut batches = Vec::new();
    if !shared.is_empty() {
        batches.push((spec, shared));
    }
    for (index, override_spec) in &spec.per_input {
        if *index < inputs {
            batches.push((override_spec, vec![*index]));
        }
    }
    batches
}

/// The three builtin generators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinGenerator {
    /// Uniform on [-1, 1).
    Random,
    /// Uniform on [`low`, `high`).
    Uniform,
    /// Constant 1.
    Ones,
}

impl BuiltinGenerator {
    pub const ALL: [(&'static str, BuiltinGenerator); 3] = [
        ("random", BuiltinGenerator::Random),
        ("uniform", BuiltinGenerator::Uniform),
        ("ones", BuiltinGenerator::Ones),
    ];

    fn range(self, params: &Params) -> Result<(f64, f64), UnitError> {
        match self {
            BuiltinGenerator::Random => Ok((-1.0, 1.0)),
            BuiltinGenerator::Ones => Ok((1.0, 1.0)),
            BuiltinGenerator::Uniform => {
                let low = number(params, "low", -1.0)?;
                let high = number(params, "high", 1.0)?;
                if low > high {
                    return Err(UnitError::Plugin(format!(
                        "uniform generator needs low <= high, got low={low} high={high}"
                    )));
                }
                Ok((low, high))
            }
        }
    }
}

fn number(map: &Params, key: &str, default: f64) -> Result<f64, UnitError> {
    match map.get(key) {
        None | Some(serde_json::Value::Null) => Ok(default),
        Some(value) => value
            .as_f64()
            .ok_or_else(|| UnitError::Plugin(format!("'{key}' must be a number, got {value}"))),
    }
}

impl Generator for BuiltinGenerator {
    fn generate(&self, request: &GeneratorRequest<'_>, rng: &mut StdRng) -> Result<(), UnitError> {
        let (low, high) = self.range(request.params)?;
        let fixed = match request.constants.get("value") {
            None | Some(serde_json::Value::Null) => None,
            Some(_) => Some(number(request.constants, "value", 0.0)?),
        };
        let scale = number(request.constants, "scale", 1.0)?;
        let shift = number(request.constants, "shift", 0.0)?;

        for ((path, shape), dtype) in request
            .input_paths
            .iter()
            .zip(&request.shapes)
            .zip(&request.dtypes)
        {
            let count = tensor::numel(shape);
            let values: Vec<f64> = (0..count)
                .map(|_| {
                    let raw = match fixed {
                        Some(value) => value,
                        None if low < high => rng.gen_range(low..high),
                        None => low,
                    };
                    raw * scale + shift
                })
                .collect();
            tensor::write_tensor(path, *dtype, &values)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_get_their_own_batches() {
        let mut spec = GeneratorSpec {
            name: "builtin.random".into(),
            ..GeneratorSpec::default()
        };
        spec.per_input.insert(
            1,
            GeneratorSpec {
                name: "builtin.ones".into(),
                ..GeneratorSpec::default()
            },
        );
        let batches = input_batches(&spec, 3);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].1, vec![0, 2]);
        assert_eq!(batches[1].0.name, "builtin.ones");
        assert_eq!(batches[1].1, vec![1]);
    }
}
