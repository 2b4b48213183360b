//! # Error Taxonomy Module / 错误分类模块
//!
//! Typed errors for every stage of a run. Plan and selection errors abort the
//! run before any unit executes; `UnitError` is scoped to a single execution
//! unit and is turned into an `ERROR` result by the engine.
//!
//! 运行各阶段的类型化错误。计划错误和选择错误会在任何单元执行前中止运行；
//! `UnitError` 仅作用于单个执行单元，由引擎转换为 `ERROR` 结果。

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Aggregated plan validation failure. Every violation found while loading is
/// collected here instead of stopping at the first one.
///
/// 聚合的计划校验失败。加载期间发现的所有违规都会收集在这里，而不是在第一个处停止。
#[derive(Debug, Clone, Error)]
#[error("plan validation failed with {} violation(s):\n  - {}", .violations.len(), .violations.join("\n  - "))]
pub struct PlanError {
    pub violations: Vec<String>,
}

impl PlanError {
    pub fn single(message: impl Into<String>) -> Self {
        Self {
            violations: vec![message.into()],
        }
    }
}

/// Failure to turn a plan plus filters into a runnable selection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("no backend matches type={backend} chip={chip}")]
    NoBackend { backend: String, chip: String },
    #[error("backend selection is ambiguous, candidates: {}; pass --backend/--chip", .candidates.join(", "))]
    AmbiguousBackend { candidates: Vec<String> },
    #[error("invalid case pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// Problems with a template string, raised at plan load or (for unvalidated
/// templates) at render time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unknown token '{{{token}}}' in '{template}'")]
    UnknownToken { token: String, template: String },
    #[error("unterminated '{{' in '{template}'")]
    Unterminated { template: String },
    #[error("unmatched '}}' in '{template}'")]
    UnmatchedClose { template: String },
    #[error("token '{{{token}}}' is out of range, only {available} available")]
    IndexOutOfRange { token: String, available: usize },
    #[error("'{{dtype}}' needs a single dtype but the case declares {dtypes}")]
    AmbiguousDtype { dtypes: String },
    #[error("value for '{{{token}}}' cannot be shell-quoted: {reason}")]
    Unquotable { token: String, reason: String },
}

/// Tensor file problems: missing files, truncated or oversized data.
#[derive(Debug, Error)]
pub enum TensorError {
    #[error("failed to access tensor file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("tensor file {} holds {actual} bytes, expected {expected} ({dtype} x {elements})", .path.display())]
    SizeMismatch {
        path: PathBuf,
        dtype: String,
        elements: usize,
        expected: u64,
        actual: u64,
    },
}

/// Errors isolated to a single execution unit. All of them map to `ERROR`.
///
/// 仅限于单个执行单元的错误，全部映射为 `ERROR`。
#[derive(Debug, Error)]
pub enum UnitError {
    /// Generator or assertion could not be found or loaded.
    #[error("cannot resolve {kind} '{name}': {reason}")]
    Resolution {
        kind: &'static str,
        name: String,
        reason: String,
    },
    /// The backend command (or a prepare step) failed for good.
    #[error("{0}")]
    Command(String),
    #[error(transparent)]
    Tensor(#[from] TensorError),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
    /// A generator/assertion ran but produced an unusable answer.
    #[error("{0}")]
    Plugin(String),
    #[error("run interrupted")]
    Interrupted,
}

impl UnitError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}
