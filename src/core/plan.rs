//! # Plan Model Module / 计划模型模块
//!
//! The validated, immutable form of a test plan. `Plan::load` reads a plan
//! document, applies defaults, merges case-level overrides over plan-level
//! defaults and checks every structural invariant. All violations found are
//! reported together in one `PlanError`.
//!
//! 经过校验的不可变测试计划。`Plan::load` 读取计划文档、应用默认值、
//! 将用例级覆盖合并到计划级默认值之上，并检查所有结构不变量。
//! 发现的所有违规会在一个 `PlanError` 中一并报告。

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;

use crate::core::config::{
    self, AssertionFields, GeneratorFields, PlanDocument, RawBackend, RawCase, RawCommand,
    RawCommandList, Scalar,
};
use crate::core::error::PlanError;
use crate::core::registry::Registry;
use crate::core::template::Template;
use crate::core::tensor::DType;

/// Free-form parameters passed to generators and assertions.
pub type Params = BTreeMap<String, serde_json::Value>;

pub const DEFAULT_GENERATOR: &str = "builtin.random";
pub const DEFAULT_ASSERTION: &str = "builtin.identity";

/// Supported backend families. Adding a family adds a variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Cann,
    Cuda,
}

impl BackendKind {
    pub const ALL: [BackendKind; 2] = [BackendKind::Cann, BackendKind::Cuda];

    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Cann => "cann",
            BackendKind::Cuda => "cuda",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cann" => Ok(BackendKind::Cann),
            "cuda" => Ok(BackendKind::Cuda),
            other => Err(format!(
                "unsupported backend type '{other}', expected one of: cann, cuda"
            )),
        }
    }
}

/// Whether existing input files may be reused between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    #[default]
    Reuse,
    Regen,
}

impl FromStr for CacheMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "reuse" => Ok(CacheMode::Reuse),
            "regen" => Ok(CacheMode::Regen),
            other => Err(format!("cache must be 'reuse' or 'regen', got '{other}'")),
        }
    }
}

/// Diagnostic metric reported by comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    #[default]
    MaxAbs,
    MeanAbs,
}

impl Metric {
    pub fn as_str(self) -> &'static str {
        match self {
            Metric::MaxAbs => "max_abs",
            Metric::MeanAbs => "mean_abs",
        }
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "max_abs" => Ok(Metric::MaxAbs),
            "mean_abs" => Ok(Metric::MeanAbs),
            other => Err(format!("metric must be 'max_abs' or 'mean_abs', got '{other}'")),
        }
    }
}

/// A parsed argv list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    pub argv: Vec<Template>,
}

impl CommandTemplate {
    fn parse(raw: RawCommand) -> Result<Self, String> {
        let parts = raw.into_argv()?;
        let argv = parts
            .iter()
            .map(|part| Template::parse(part).map_err(|e| e.to_string()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { argv })
    }

    /// The unrendered command, for messages.
    pub fn display(&self) -> String {
        self.argv
            .iter()
            .map(|t| t.source())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn templates(&self) -> impl Iterator<Item = &Template> {
        self.argv.iter()
    }
}

/// One execution target.
#[derive(Debug, Clone)]
pub struct BackendSpec {
    pub kind: BackendKind,
    pub chip: String,
    pub workdir: PathBuf,
    pub env: Vec<(String, Template)>,
    pub timeout: Option<Duration>,
    pub retries: u32,
    pub prepare: Vec<CommandTemplate>,
    pub cleanup: Vec<CommandTemplate>,
    pub command: CommandTemplate,
    pub only_cases: Vec<String>,
    pub skip_cases: Vec<String>,
    pub xfail_cases: Vec<String>,
}

impl BackendSpec {
    /// `type:chip`, the form used in unit ids and case backend lists.
    pub fn label(&self) -> String {
        format!("{}:{}", self.kind, self.chip)
    }

    /// True when `reference` names this backend, either by type or as `type:chip`.
    pub fn is_named_by(&self, reference: &str) -> bool {
        let reference = reference.trim();
        match reference.split_once(':') {
            Some((kind, chip)) => kind.eq_ignore_ascii_case(self.kind.as_str()) && chip == self.chip,
            None => reference.eq_ignore_ascii_case(self.kind.as_str()),
        }
    }

    /// Whether the backend's own case lists let `case` run here.
    pub fn admits_case(&self, case: &str) -> bool {
        if !self.only_cases.is_empty() && !self.only_cases.iter().any(|c| c == case) {
            return false;
        }
        !self.skip_cases.iter().any(|c| c == case)
    }

    fn templates(&self) -> impl Iterator<Item = &Template> {
        self.prepare
            .iter()
            .chain(self.cleanup.iter())
            .chain(std::iter::once(&self.command))
            .flat_map(CommandTemplate::templates)
            .chain(self.env.iter().map(|(_, value)| value))
    }
}

/// Paired input and output shapes for one expansion of a case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShapeEntry {
    pub inputs: Vec<Vec<usize>>,
    pub outputs: Vec<Vec<usize>>,
}

/// A case's own backend restrictions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaseBackends {
    pub only: Vec<String>,
    pub skip: Vec<String>,
    pub xfail: Vec<String>,
}

impl CaseBackends {
    pub fn admits(&self, backend: &BackendSpec) -> bool {
        if !self.only.is_empty() && !self.only.iter().any(|r| backend.is_named_by(r)) {
            return false;
        }
        !self.skip.iter().any(|r| backend.is_named_by(r))
    }

    pub fn expects_failure_on(&self, backend: &BackendSpec) -> bool {
        self.xfail.iter().any(|r| backend.is_named_by(r))
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GeneratorSpec {
    pub name: String,
    pub source: Option<PathBuf>,
    pub seed: Option<u64>,
    pub params: Params,
    pub constants: Params,
    pub per_input: BTreeMap<usize, GeneratorSpec>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AssertionSpec {
    pub name: String,
    pub source: Option<PathBuf>,
    pub rtol: Option<f64>,
    pub atol: Option<f64>,
    pub metric: Metric,
    pub output_dtypes: Option<Vec<DType>>,
    pub params: Params,
}

/// A case with plan defaults already merged in.
#[derive(Debug, Clone)]
pub struct CaseSpec {
    pub name: String,
    /// Position in the plan document; used for stable ordering.
    pub index: usize,
    pub dtypes: Vec<DType>,
    pub shapes: Vec<ShapeEntry>,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub generator: GeneratorSpec,
    pub assertion: AssertionSpec,
    pub backends: CaseBackends,
    pub tags: Vec<String>,
    pub priority: i64,
}

impl CaseSpec {
    /// Dtypes of the produced outputs: declared ones, or the case dtypes with
    /// the last one repeated to cover every output.
    pub fn output_dtypes(&self) -> Vec<DType> {
        if let Some(declared) = &self.assertion.output_dtypes {
            return declared.clone();
        }
        let last = self.dtypes.last().copied().unwrap_or(DType::Float32);
        (0..self.outputs.len())
            .map(|i| self.dtypes.get(i).copied().unwrap_or(last))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct Plan {
    pub operator: String,
    pub description: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub generator: GeneratorSpec,
    pub assertion: AssertionSpec,
    pub backends: Vec<BackendSpec>,
    pub cases: Vec<CaseSpec>,
    pub cache: CacheMode,
    pub tags: Vec<String>,
    pub priority: i64,
    /// Directory the plan was loaded from.
    pub plan_dir: PathBuf,
}

impl Plan {
    /// Reads, merges and validates a plan file.
    pub fn load(path: &Path, registry: &Registry) -> Result<Self, PlanError> {
        let document = config::read_document(path)?;
        let absolute = std::path::absolute(path)
            .map_err(|e| PlanError::single(format!("cannot resolve {}: {e}", path.display())))?;
        let base_dir = absolute
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::from_document(document, &base_dir, registry)
    }

    /// Builds a plan from an already parsed document.
    pub fn from_document(
        document: PlanDocument,
        base_dir: &Path,
        registry: &Registry,
    ) -> Result<Self, PlanError> {
        let mut v = Violations::default();

        let operator = document.operator.trim().to_string();
        if operator.is_empty() {
            v.push("operator cannot be empty");
        }
        check_path_list(&mut v, "plan", "inputs", &document.inputs);
        check_path_list(&mut v, "plan", "outputs", &document.outputs);

        let cache = match document.cache.as_deref() {
            None => CacheMode::default(),
            Some(text) => text.parse().unwrap_or_else(|e: String| {
                v.push(e);
                CacheMode::default()
            }),
        };

        let generator = merge_generator(
            &root_generator(),
            document.generator.map(|g| g.into_fields()).unwrap_or_default(),
            base_dir,
        )
        .unwrap_or_else(|e| {
            v.push(format!("plan generator: {e}"));
            root_generator()
        });
        let assertion = merge_assertion(
            &root_assertion(),
            document.assertion.map(|a| a.into_fields()).unwrap_or_default(),
            base_dir,
        )
        .unwrap_or_else(|e| {
            v.push(format!("plan assertion: {e}"));
            root_assertion()
        });

        if document.backends.is_empty() {
            v.push("plan declares no backends");
        }
        let mut backends = Vec::new();
        let mut seen = BTreeSet::new();
        for (i, raw) in document.backends.into_iter().enumerate() {
            if let Some(backend) = build_backend(&mut v, i, raw, base_dir) {
                if !seen.insert((backend.kind, backend.chip.clone())) {
                    v.push(format!(
                        "duplicate backend entry for type={} chip={}",
                        backend.kind, backend.chip
                    ));
                }
                backends.push(backend);
            }
        }

        if document.cases.is_empty() {
            v.push("plan declares no cases");
        }
        let defaults = CaseDefaults {
            inputs: &document.inputs,
            outputs: &document.outputs,
            generator: &generator,
            assertion: &assertion,
            tags: &document.tags,
            priority: document.priority.unwrap_or(0),
        };
        let mut names = BTreeSet::new();
        let mut cases = Vec::new();
        for (index, raw) in document.cases.into_iter().enumerate() {
            if !names.insert(raw.name.trim().to_string()) {
                v.push(format!("duplicate case name '{}'", raw.name.trim()));
            }
            if let Some(case) = build_case(&mut v, index, raw, &defaults, base_dir) {
                cases.push(case);
            }
        }

        for case in &cases {
            check_case_plugins(&mut v, case, registry);
        }
        for backend in &backends {
            check_backend_templates(&mut v, backend, &cases);
            warn_unknown_case_names(backend, &names);
        }

        v.finish()?;
        Ok(Plan {
            operator,
            description: document.description,
            inputs: document.inputs,
            outputs: document.outputs,
            generator,
            assertion,
            backends,
            cases,
            cache,
            tags: document.tags,
            priority: document.priority.unwrap_or(0),
            plan_dir: base_dir.to_path_buf(),
        })
    }

    pub fn case(&self, name: &str) -> Option<&CaseSpec> {
        self.cases.iter().find(|c| c.name == name)
    }
}

#[derive(Default)]
struct Violations(Vec<String>);

impl Violations {
    fn push(&mut self, message: impl Into<String>) {
        self.0.push(message.into());
    }

    fn finish(self) -> Result<(), PlanError> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(PlanError { violations: self.0 })
        }
    }
}

struct CaseDefaults<'a> {
    inputs: &'a [String],
    outputs: &'a [String],
    generator: &'a GeneratorSpec,
    assertion: &'a AssertionSpec,
    tags: &'a [String],
    priority: i64,
}

fn root_generator() -> GeneratorSpec {
    GeneratorSpec {
        name: DEFAULT_GENERATOR.to_string(),
        ..GeneratorSpec::default()
    }
}

fn root_assertion() -> AssertionSpec {
    AssertionSpec {
        name: DEFAULT_ASSERTION.to_string(),
        ..AssertionSpec::default()
    }
}

fn check_path_list(v: &mut Violations, owner: &str, field: &str, paths: &[String]) {
    if paths.iter().any(|p| p.trim().is_empty()) {
        v.push(format!("{owner}: {field} entries cannot be empty"));
    }
}

/// Expands `~` and `$VAR`, then anchors relative paths at `base_dir`.
pub fn resolve_path(raw: &str, base_dir: &Path) -> Result<PathBuf, String> {
    let expanded = shellexpand::full(raw).map_err(|e| format!("cannot expand '{raw}': {e}"))?;
    let path = PathBuf::from(expanded.as_ref());
    Ok(if path.is_absolute() {
        path
    } else {
        base_dir.join(path)
    })
}

/// Shallow merge of generator fields over `base`. A `source` is bound to the
/// name it was declared with and is only inherited while the name is unchanged.
fn merge_generator(
    base: &GeneratorSpec,
    over: GeneratorFields,
    base_dir: &Path,
) -> Result<GeneratorSpec, String> {
    let name = over
        .name
        .map(|n| n.trim().to_string())
        .unwrap_or_else(|| base.name.clone());
    if name.is_empty() {
        return Err("generator name cannot be empty".to_string());
    }
    let source = match over.source {
        Some(raw) => Some(resolve_path(&raw, base_dir)?),
        None if name == base.name => base.source.clone(),
        None => None,
    };
    let mut merged = GeneratorSpec {
        name,
        source,
        seed: over.seed.or(base.seed),
        params: over.params.unwrap_or_else(|| base.params.clone()),
        constants: over.constants.unwrap_or_else(|| base.constants.clone()),
        per_input: base.per_input.clone(),
    };

    if let Some(per_input) = over.per_input {
        let parent = GeneratorSpec {
            seed: None,
            per_input: BTreeMap::new(),
            ..merged.clone()
        };
        for (key, raw) in per_input {
            let index = key
                .as_index()
                .ok_or_else(|| format!("per_input key '{key}' is not an input index"))?;
            let fields = raw.into_fields();
            if fields.per_input.is_some() {
                return Err(format!("per_input[{index}] cannot nest per_input"));
            }
            let spec = merge_generator(&parent, fields, base_dir)?;
            merged.per_input.insert(index, spec);
        }
    }
    Ok(merged)
}

fn merge_assertion(
    base: &AssertionSpec,
    over: AssertionFields,
    base_dir: &Path,
) -> Result<AssertionSpec, String> {
    let name = over
        .name
        .map(|n| n.trim().to_string())
        .unwrap_or_else(|| base.name.clone());
    if name.is_empty() {
        return Err("assertion name cannot be empty".to_string());
    }
    let source = match over.source {
        Some(raw) => Some(resolve_path(&raw, base_dir)?),
        None if name == base.name => base.source.clone(),
        None => None,
    };
    let metric = match over.metric {
        Some(text) => text.parse()?,
        None => base.metric,
    };
    let output_dtypes = match over.output_dtypes {
        Some(list) => Some(
            list.iter()
                .map(|d| d.parse::<DType>())
                .collect::<Result<Vec<_>, _>>()?,
        ),
        None => base.output_dtypes.clone(),
    };
    for (label, tol) in [("rtol", over.rtol), ("atol", over.atol)] {
        if let Some(value) = tol {
            if !value.is_finite() || value < 0.0 {
                return Err(format!("{label} must be a non-negative number, got {value}"));
            }
        }
    }
    Ok(AssertionSpec {
        name,
        source,
        rtol: over.rtol.or(base.rtol),
        atol: over.atol.or(base.atol),
        metric,
        output_dtypes,
        params: over.params.unwrap_or_else(|| base.params.clone()),
    })
}

fn parse_commands(list: Option<RawCommandList>) -> Result<Vec<CommandTemplate>, String> {
    list.map(RawCommandList::into_commands)
        .unwrap_or_default()
        .into_iter()
        .map(CommandTemplate::parse)
        .collect()
}

fn build_backend(
    v: &mut Violations,
    position: usize,
    raw: RawBackend,
    base_dir: &Path,
) -> Option<BackendSpec> {
    let owner = format!("backends[{position}]");
    let mut ok = true;
    let mut fail = |v: &mut Violations, msg: String| {
        ok = false;
        v.push(format!("{owner}: {msg}"));
    };

    let kind = raw.kind.parse::<BackendKind>().map_err(|e| fail(v, e)).ok();
    let chip = raw.chip.trim().to_string();
    if chip.is_empty() {
        fail(v, "chip cannot be empty".to_string());
    }
    let workdir = match raw.workdir.as_deref() {
        Some(dir) => resolve_path(dir, base_dir).map_err(|e| fail(v, e)).ok(),
        None => Some(base_dir.to_path_buf()),
    };
    let timeout = match raw.timeout {
        Some(secs) if !secs.is_finite() || secs <= 0.0 => {
            fail(v, format!("timeout must be a positive number of seconds, got {secs}"));
            None
        }
        Some(secs) => Some(Duration::from_secs_f64(secs)),
        None => None,
    };
    let command = match raw.command {
        Some(cmd) => CommandTemplate::parse(cmd)
            .map_err(|e| fail(v, format!("command: {e}")))
            .ok(),
        None => {
            fail(v, "command is required".to_string());
            None
        }
    };
    let prepare = parse_commands(raw.prepare)
        .map_err(|e| fail(v, format!("prepare: {e}")))
        .ok();
    let cleanup = parse_commands(raw.cleanup)
        .map_err(|e| fail(v, format!("cleanup: {e}")))
        .ok();
    let mut env = Vec::new();
    for (key, value) in raw.env {
        let text = match &value {
            Scalar::Text(s) => s.clone(),
            other => other.to_string(),
        };
        match Template::parse(&text) {
            Ok(template) => env.push((key, template)),
            Err(e) => fail(v, format!("env {key}: {e}")),
        }
    }
    let overlap: Vec<&String> = raw
        .only_cases
        .iter()
        .filter(|c| raw.skip_cases.contains(c))
        .collect();
    if !overlap.is_empty() {
        fail(
            v,
            format!("cases listed in both only_cases and skip_cases: {overlap:?}"),
        );
    }

    if !ok {
        return None;
    }
    Some(BackendSpec {
        kind: kind?,
        chip,
        workdir: workdir?,
        env,
        timeout,
        retries: raw.retries,
        prepare: prepare?,
        cleanup: cleanup?,
        command: command?,
        only_cases: raw.only_cases,
        skip_cases: raw.skip_cases,
        xfail_cases: raw.xfail_cases,
    })
}

fn build_case(
    v: &mut Violations,
    index: usize,
    raw: RawCase,
    defaults: &CaseDefaults<'_>,
    base_dir: &Path,
) -> Option<CaseSpec> {
    let name = raw.name.trim().to_string();
    let owner = if name.is_empty() {
        format!("cases[{index}]")
    } else {
        format!("case '{name}'")
    };
    let before = v.0.len();
    if name.is_empty() {
        v.push(format!("{owner}: name cannot be empty"));
    }

    let inputs = raw.inputs.unwrap_or_else(|| defaults.inputs.to_vec());
    let outputs = raw.outputs.unwrap_or_else(|| defaults.outputs.to_vec());
    if inputs.is_empty() {
        v.push(format!("{owner}: no inputs declared at plan or case level"));
    }
    if outputs.is_empty() {
        v.push(format!("{owner}: no outputs declared at plan or case level"));
    }
    check_path_list(v, &owner, "inputs", &inputs);
    check_path_list(v, &owner, "outputs", &outputs);

    let mut dtypes = Vec::new();
    for text in &raw.dtypes {
        match text.parse::<DType>() {
            Ok(dtype) => dtypes.push(dtype),
            Err(e) => v.push(format!("{owner}: {e}")),
        }
    }
    if raw.dtypes.len() != inputs.len() {
        v.push(format!(
            "{owner}: dtypes length {} does not match inputs {}",
            raw.dtypes.len(),
            inputs.len()
        ));
    }

    if raw.shapes.is_empty() {
        v.push(format!("{owner}: shapes cannot be empty"));
    }
    let mut shapes = Vec::new();
    for (i, shape) in raw.shapes.into_iter().enumerate() {
        if shape.inputs.len() != inputs.len() {
            v.push(format!(
                "{owner}: shape index {i} has {} inputs, expected {}",
                shape.inputs.len(),
                inputs.len()
            ));
        }
        if shape.outputs.len() != outputs.len() {
            v.push(format!(
                "{owner}: shape index {i} has {} outputs, expected {}",
                shape.outputs.len(),
                outputs.len()
            ));
        }
        if shape.inputs.iter().chain(shape.outputs.iter()).any(Vec::is_empty) {
            v.push(format!("{owner}: shape index {i} contains an empty shape"));
        }
        shapes.push(ShapeEntry {
            inputs: shape.inputs,
            outputs: shape.outputs,
        });
    }

    let generator = match raw.generator {
        Some(g) => merge_generator(defaults.generator, g.into_fields(), base_dir)
            .map_err(|e| v.push(format!("{owner}: generator: {e}")))
            .ok(),
        None => Some(defaults.generator.clone()),
    };
    if let Some(spec) = &generator {
        if let Some(bad) = spec.per_input.keys().find(|&&i| i >= inputs.len()) {
            v.push(format!(
                "{owner}: generator per_input index {bad} is out of range for {} input(s)",
                inputs.len()
            ));
        }
    }
    let assertion = match raw.assertion {
        Some(a) => merge_assertion(defaults.assertion, a.into_fields(), base_dir)
            .map_err(|e| v.push(format!("{owner}: assertion: {e}")))
            .ok(),
        None => Some(defaults.assertion.clone()),
    };
    if let Some(Some(declared)) = assertion.as_ref().map(|a| a.output_dtypes.as_ref()) {
        if declared.len() != outputs.len() {
            v.push(format!(
                "{owner}: output_dtypes length {} does not match outputs {}",
                declared.len(),
                outputs.len()
            ));
        }
    }

    let backends = CaseBackends {
        only: raw.backends.only,
        skip: raw.backends.skip,
        xfail: raw.backends.xfail,
    };
    for (left, right, label) in [
        (&backends.only, &backends.skip, "only and skip"),
        (&backends.skip, &backends.xfail, "skip and xfail"),
    ] {
        let both: BTreeSet<&String> = left.iter().filter(|b| right.contains(b)).collect();
        if !both.is_empty() {
            v.push(format!("{owner}: backends listed in both {label}: {both:?}"));
        }
    }

    if v.0.len() != before {
        return None;
    }
    Some(CaseSpec {
        name,
        index,
        dtypes,
        shapes,
        inputs,
        outputs,
        generator: generator?,
        assertion: assertion?,
        backends,
        tags: raw.tags.unwrap_or_else(|| defaults.tags.to_vec()),
        priority: raw.priority.unwrap_or(defaults.priority),
    })
}

fn check_case_plugins(v: &mut Violations, case: &CaseSpec, registry: &Registry) {
    let owner = format!("case '{}'", case.name);
    let generators = std::iter::once(&case.generator).chain(case.generator.per_input.values());
    for spec in generators {
        if spec.source.is_none() && !registry.knows_generator(&spec.name) {
            v.push(format!(
                "{owner}: generator '{}' is not a builtin and has no source",
                spec.name
            ));
        }
    }
    if case.assertion.source.is_none() && !registry.knows_assertion(&case.assertion.name) {
        v.push(format!(
            "{owner}: assertion '{}' is not a builtin and has no source",
            case.assertion.name
        ));
    }
}

fn check_backend_templates(v: &mut Violations, backend: &BackendSpec, cases: &[CaseSpec]) {
    let runnable = cases
        .iter()
        .filter(|case| backend.admits_case(&case.name) && case.backends.admits(backend));
    for case in runnable {
        for template in backend.templates() {
            if let Err(e) = template.check(case.inputs.len(), case.outputs.len(), &case.dtypes) {
                v.push(format!(
                    "backend {} with case '{}': {e}",
                    backend.label(),
                    case.name
                ));
            }
        }
    }
}

fn warn_unknown_case_names(backend: &BackendSpec, known: &BTreeSet<String>) {
    let lists = [
        ("only_cases", &backend.only_cases),
        ("skip_cases", &backend.skip_cases),
        ("xfail_cases", &backend.xfail_cases),
    ];
    for (field, names) in lists {
        for name in names.iter().filter(|n| !known.contains(n.as_str())) {
            tracing::warn!(
                backend = %backend.label(),
                field,
                case = %name,
                "backend references a case that is not declared"
            );
        }
    }
}
