//! # Registry Module / 注册表模块
//!
//! Explicit registry of generators and assertions. It starts with the
//! builtins, accepts in-process plugins registered by name, and caches one
//! worker per source file so a source is resolved once per run.
//!
//! 生成器和断言的显式注册表。初始包含内置项，接受按名称注册的进程内插件，
//! 并为每个源文件缓存一个工作进程描述，使每个源在一次运行中只解析一次。

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::core::assertion::{Assertion, AssertionFn, ReferenceAssertion};
use crate::core::error::UnitError;
use crate::core::generator::{BuiltinGenerator, Generator, GeneratorFn};
use crate::core::plan::{AssertionSpec, GeneratorSpec};
use crate::core::reference;
use crate::infra::worker::{PluginKind, Worker};

/// Strips the `builtin.` prefix and lowercases, so `builtin.Random` and
/// `random` name the same entry.
pub fn normalize_name(name: &str) -> String {
    let trimmed = name.trim();
    let bare = trimmed
        .strip_prefix("builtin.")
        .or_else(|| trimmed.strip_prefix("builtin:"))
        .unwrap_or(trimmed);
    bare.to_ascii_lowercase()
}

#[derive(Default)]
pub struct Registry {
    generators: BTreeMap<String, Arc<dyn Generator>>,
    assertions: BTreeMap<String, Arc<dyn Assertion>>,
    workers: BTreeMap<PathBuf, Arc<Worker>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("generators", &self.generators.keys().collect::<Vec<_>>())
            .field("assertions", &self.assertions.keys().collect::<Vec<_>>())
            .field("workers", &self.workers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Registry {
    /// An empty registry with no builtins.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every builtin generator and reference assertion.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for (name, generator) in BuiltinGenerator::ALL {
            registry.register_generator(name, Arc::new(generator));
        }
        for op in reference::OPERATORS {
            registry.register_assertion(op.name, Arc::new(ReferenceAssertion { op }));
        }
        registry
    }

    /// Registers (or replaces) an in-process generator.
    pub fn register_generator(&mut self, name: &str, generator: Arc<dyn Generator>) {
        self.generators.insert(normalize_name(name), generator);
    }

    /// Registers (or replaces) an in-process assertion.
    pub fn register_assertion(&mut self, name: &str, assertion: Arc<dyn Assertion>) {
        self.assertions.insert(normalize_name(name), assertion);
    }

    pub fn knows_generator(&self, name: &str) -> bool {
        self.generators.contains_key(&normalize_name(name))
    }

    pub fn knows_assertion(&self, name: &str) -> bool {
        self.assertions.contains_key(&normalize_name(name))
    }

    pub fn generator_names(&self) -> impl Iterator<Item = &str> {
        self.generators.keys().map(String::as_str)
    }

    pub fn assertion_names(&self) -> impl Iterator<Item = &str> {
        self.assertions.keys().map(String::as_str)
    }

    /// Resolves a generator spec. A `source` always wins over a registered name.
    pub fn resolve_generator(&mut self, spec: &GeneratorSpec) -> Result<GeneratorFn, UnitError> {
        if let Some(source) = &spec.source {
            let worker = self.worker(PluginKind::Generator, &spec.name, source)?;
            return Ok(GeneratorFn::Worker {
                worker,
                name: spec.name.clone(),
            });
        }
        self.generators
            .get(&normalize_name(&spec.name))
            .cloned()
            .map(GeneratorFn::InProcess)
            .ok_or_else(|| UnitError::Resolution {
                kind: "generator",
                name: spec.name.clone(),
                reason: format!(
                    "not a builtin (known: {}) and no source given",
                    self.generator_names().collect::<Vec<_>>().join(", ")
                ),
            })
    }

    /// Resolves an assertion spec. A `source` always wins over a registered name.
    pub fn resolve_assertion(&mut self, spec: &AssertionSpec) -> Result<AssertionFn, UnitError> {
        if let Some(source) = &spec.source {
            let worker = self.worker(PluginKind::Assertion, &spec.name, source)?;
            return Ok(AssertionFn::Worker {
                worker,
                name: spec.name.clone(),
            });
        }
        self.assertions
            .get(&normalize_name(&spec.name))
            .cloned()
            .map(AssertionFn::InProcess)
            .ok_or_else(|| UnitError::Resolution {
                kind: "assertion",
                name: spec.name.clone(),
                reason: "not a builtin and no source given".to_string(),
            })
    }

    fn worker(
        &mut self,
        kind: PluginKind,
        name: &str,
        source: &std::path::Path,
    ) -> Result<Arc<Worker>, UnitError> {
        if let Some(worker) = self.workers.get(source) {
            return Ok(Arc::clone(worker));
        }
        let worker = Arc::new(Worker::open(kind, name, source)?);
        self.workers.insert(source.to_path_buf(), Arc::clone(&worker));
        Ok(worker)
    }
}

/// State shared by every unit of one run.
#[derive(Debug)]
pub struct RunContext {
    pub registry: Registry,
    pub cancel: CancellationToken,
}

impl RunContext {
    pub fn new(registry: Registry, cancel: CancellationToken) -> Self {
        Self { registry, cancel }
    }
}
