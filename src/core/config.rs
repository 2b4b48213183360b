//! # Plan Document Module / 计划文档模块
//!
//! Raw, serde-facing shape of a plan file. Nothing here is validated beyond
//! what serde enforces (types and unknown keys); `core::plan` turns a
//! `PlanDocument` into a checked `Plan`.
//!
//! 计划文件的原始 serde 结构。除 serde 强制的类型和未知键检查外不做校验；
//! `core::plan` 负责把 `PlanDocument` 转换为经过检查的 `Plan`。

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::core::error::PlanError;

/// Top-level plan document.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanDocument {
    pub operator: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    pub generator: Option<RawGenerator>,
    pub assertion: Option<RawAssertion>,
    #[serde(default)]
    pub backends: Vec<RawBackend>,
    #[serde(default)]
    pub cases: Vec<RawCase>,
    pub cache: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub priority: Option<i64>,
}

/// A generator given as a bare name or a full mapping.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawGenerator {
    Name(String),
    Spec(GeneratorFields),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeneratorFields {
    pub name: Option<String>,
    pub source: Option<String>,
    pub seed: Option<u64>,
    pub params: Option<BTreeMap<String, serde_json::Value>>,
    pub constants: Option<BTreeMap<String, serde_json::Value>>,
    pub per_input: Option<BTreeMap<IndexKey, RawGenerator>>,
}

impl RawGenerator {
    pub fn into_fields(self) -> GeneratorFields {
        match self {
            RawGenerator::Name(name) => GeneratorFields {
                name: Some(name),
                ..GeneratorFields::default()
            },
            RawGenerator::Spec(fields) => fields,
        }
    }
}

/// `per_input` keys: YAML allows integer keys, TOML only strings.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(untagged)]
pub enum IndexKey {
    Index(u64),
    Text(String),
}

impl IndexKey {
    pub fn as_index(&self) -> Option<usize> {
        match self {
            IndexKey::Index(n) => usize::try_from(*n).ok(),
            IndexKey::Text(text) => text.trim().parse().ok(),
        }
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexKey::Index(n) => write!(f, "{n}"),
            IndexKey::Text(text) => f.write_str(text),
        }
    }
}

/// An assertion given as a bare name or a full mapping.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawAssertion {
    Name(String),
    Spec(AssertionFields),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssertionFields {
    pub name: Option<String>,
    pub source: Option<String>,
    pub rtol: Option<f64>,
    pub atol: Option<f64>,
    pub metric: Option<String>,
    pub output_dtypes: Option<Vec<String>>,
    pub params: Option<BTreeMap<String, serde_json::Value>>,
}

impl RawAssertion {
    pub fn into_fields(self) -> AssertionFields {
        match self {
            RawAssertion::Name(name) => AssertionFields {
                name: Some(name),
                ..AssertionFields::default()
            },
            RawAssertion::Spec(fields) => fields,
        }
    }
}

/// A scalar that may appear as an argv element or env value.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::Int(n) => write!(f, "{n}"),
            Scalar::Float(x) => write!(f, "{x}"),
            Scalar::Text(s) => f.write_str(s),
        }
    }
}

/// A command as a shell-style line, an argv list, or a binary plus args.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawCommand {
    Line(String),
    Argv(Vec<Scalar>),
    Binary(BinaryCommand),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BinaryCommand {
    #[serde(alias = "executable")]
    pub binary: String,
    #[serde(default)]
    pub args: CommandArgs,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CommandArgs {
    One(Scalar),
    Many(Vec<Scalar>),
}

impl Default for CommandArgs {
    fn default() -> Self {
        CommandArgs::Many(Vec::new())
    }
}

impl RawCommand {
    /// Splits the command into argv elements, still holding template tokens.
    pub fn into_argv(self) -> Result<Vec<String>, String> {
        let argv = match self {
            RawCommand::Line(line) => {
                shlex::split(&line).ok_or_else(|| format!("cannot split command line '{line}'"))?
            }
            RawCommand::Argv(parts) => parts.iter().map(Scalar::to_string).collect(),
            RawCommand::Binary(BinaryCommand { binary, args }) => {
                let mut argv = vec![binary];
                match args {
                    CommandArgs::One(arg) => argv.push(arg.to_string()),
                    CommandArgs::Many(args) => argv.extend(args.iter().map(Scalar::to_string)),
                }
                argv
            }
        };
        if argv.first().is_none_or(|program| program.trim().is_empty()) {
            return Err("command is empty".to_string());
        }
        Ok(argv)
    }
}

/// `prepare`/`cleanup`: one command or a list of commands. A list is always
/// a list of commands; write `[[make, build]]` for a single argv.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawCommandList {
    Many(Vec<RawCommand>),
    One(RawCommand),
}

impl RawCommandList {
    pub fn into_commands(self) -> Vec<RawCommand> {
        match self {
            RawCommandList::Many(items) => items,
            RawCommandList::One(command) => vec![command],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawBackend {
    #[serde(rename = "type")]
    pub kind: String,
    pub chip: String,
    pub workdir: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, Scalar>,
    pub timeout: Option<f64>,
    #[serde(default)]
    pub retries: u32,
    pub prepare: Option<RawCommandList>,
    pub cleanup: Option<RawCommandList>,
    pub command: Option<RawCommand>,
    #[serde(default)]
    pub only_cases: Vec<String>,
    #[serde(default)]
    pub skip_cases: Vec<String>,
    #[serde(default)]
    pub xfail_cases: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawCase {
    pub name: String,
    #[serde(default)]
    pub dtypes: Vec<String>,
    #[serde(default)]
    pub shapes: Vec<RawShape>,
    pub inputs: Option<Vec<String>>,
    pub outputs: Option<Vec<String>>,
    pub generator: Option<RawGenerator>,
    pub assertion: Option<RawAssertion>,
    #[serde(default)]
    pub backends: RawCaseBackends,
    pub tags: Option<Vec<String>>,
    pub priority: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawShape {
    #[serde(default)]
    pub inputs: Vec<Vec<usize>>,
    #[serde(default)]
    pub outputs: Vec<Vec<usize>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawCaseBackends {
    #[serde(default)]
    pub only: Vec<String>,
    #[serde(default)]
    pub skip: Vec<String>,
    #[serde(default)]
    pub xfail: Vec<String>,
}

/// Parses a plan document; `.toml` files use TOML, everything else YAML.
pub fn parse_document(text: &str, path: &Path) -> Result<PlanDocument, PlanError> {
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let parsed = if is_toml {
        toml::from_str::<PlanDocument>(text).map_err(|e| e.to_string())
    } else {
        serde_yaml::from_str::<PlanDocument>(text).map_err(|e| e.to_string())
    };
    parsed.map_err(|reason| {
        PlanError::single(format!("cannot parse plan {}: {}", path.display(), reason.trim()))
    })
}

/// Reads and parses a plan document from disk.
pub fn read_document(path: &Path) -> Result<PlanDocument, PlanError> {
    let text = fs::read_to_string(path)
        .map_err(|e| PlanError::single(format!("cannot read plan {}: {e}", path.display())))?;
    parse_document(&text, path)
}
