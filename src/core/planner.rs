//! # Case Selection Module / 用例选择模块
//!
//! Expands a validated plan into the ordered list of execution units for one
//! backend, applying the backend/chip choice and the case, tag and priority
//! filters.
//!
//! 将经过校验的计划展开为某个后端的有序执行单元列表，
//! 并应用后端/芯片选择以及用例、标签和优先级过滤。

use std::path::PathBuf;

use crate::core::error::SelectionError;
use crate::core::plan::{BackendKind, BackendSpec, CaseSpec, Plan, ShapeEntry};
use crate::core::template::RenderContext;
use crate::infra::fs::anchor;

/// Filters supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct SelectionFilters {
    pub backend: Option<String>,
    pub chip: Option<String>,
    /// Glob patterns; a case runs if any pattern matches its name.
    pub cases: Vec<String>,
    pub tags: Vec<String>,
    /// Wins over `tags` when a case carries both.
    pub skip_tags: Vec<String>,
    pub priority_max: Option<i64>,
}

/// One concrete (case, shape entry, backend) combination.
#[derive(Debug, Clone)]
pub struct ExecutionUnit<'a> {
    /// `<case>@<type>:<chip>/shape<N>`
    pub id: String,
    pub case: &'a CaseSpec,
    pub backend: &'a BackendSpec,
    pub shape_index: usize,
    pub shape: &'a ShapeEntry,
    pub input_paths: Vec<PathBuf>,
    pub output_paths: Vec<PathBuf>,
    pub expect_failure: bool,
}

impl ExecutionUnit<'_> {
    pub fn render_context(&self) -> RenderContext<'_> {
        RenderContext {
            chip: &self.backend.chip,
            backend: self.backend.kind.as_str(),
            case: &self.case.name,
            dtypes: &self.case.dtypes,
            input_shapes: &self.shape.inputs,
            output_shapes: &self.shape.outputs,
            inputs: &self.input_paths,
            outputs: &self.output_paths,
            workdir: &self.backend.workdir,
        }
    }
}

/// The selected backend and the units to run on it, in execution order.
#[derive(Debug)]
pub struct ExecutionPlan<'a> {
    pub plan: &'a Plan,
    pub backend: &'a BackendSpec,
    pub units: Vec<ExecutionUnit<'a>>,
}

pub fn unit_id(case: &str, backend: &BackendSpec, shape_index: usize) -> String {
    format!("{case}@{}/shape{shape_index}", backend.label())
}

/// Picks the single backend matching the filters.
pub fn select_backend<'a>(
    plan: &'a Plan,
    filters: &SelectionFilters,
) -> Result<&'a BackendSpec, SelectionError> {
    let kind = filters.backend.as_deref().map(str::trim);
    let chip = filters.chip.as_deref().map(str::trim);
    let candidates: Vec<&BackendSpec> = plan
        .backends
        .iter()
        .filter(|b| kind.is_none_or(|k| k.parse::<BackendKind>() == Ok(b.kind)))
        .filter(|b| chip.is_none_or(|c| b.chip == c))
        .collect();

    match candidates.as_slice() {
        [only] => Ok(*only),
        [] => Err(SelectionError::NoBackend {
            backend: kind.unwrap_or("*").to_string(),
            chip: chip.unwrap_or("*").to_string(),
        }),
        many => Err(SelectionError::AmbiguousBackend {
            candidates: many.iter().map(|b| b.label()).collect(),
        }),
    }
}

/// Creates the execution plan: one unit per surviving (case, shape entry),
/// ordered by ascending priority then declaration order.
pub fn plan_execution<'a>(
    plan: &'a Plan,
    filters: &SelectionFilters,
) -> Result<ExecutionPlan<'a>, SelectionError> {
    let backend = select_backend(plan, filters)?;
    let patterns = filters
        .cases
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .map(|p| {
            glob::Pattern::new(p).map_err(|e| SelectionError::InvalidPattern {
                pattern: p.to_string(),
                reason: e.to_string(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut cases: Vec<&CaseSpec> = plan
        .cases
        .iter()
        .filter(|case| patterns.is_empty() || patterns.iter().any(|p| p.matches(&case.name)))
        .filter(|case| filters.tags.is_empty() || case.tags.iter().any(|t| filters.tags.contains(t)))
        .filter(|case| !case.tags.iter().any(|t| filters.skip_tags.contains(t)))
        .filter(|case| filters.priority_max.is_none_or(|max| case.priority <= max))
        .filter(|case| backend.admits_case(&case.name) && case.backends.admits(backend))
        .collect();
    cases.sort_by_key(|case| (case.priority, case.index));

    let mut units = Vec::new();
    for case in cases {
        let expect_failure = backend.xfail_cases.iter().any(|c| c == &case.name)
            || case.backends.expects_failure_on(backend);
        let input_paths: Vec<PathBuf> = case.inputs.iter().map(|p| anchor(&backend.workdir, p)).collect();
        let output_paths: Vec<PathBuf> = case.outputs.iter().map(|p| anchor(&backend.workdir, p)).collect();
        for (shape_index, shape) in case.shapes.iter().enumerate() {
            units.push(ExecutionUnit {
                id: unit_id(&case.name, backend, shape_index),
                case,
                backend,
                shape_index,
                shape,
                input_paths: input_paths.clone(),
                output_paths: output_paths.clone(),
                expect_failure,
            });
        }
    }

    tracing::debug!(backend = %backend.label(), units = units.len(), "execution plan ready");
    Ok(ExecutionPlan {
        plan,
        backend,
        units,
    })
}
