//! # Plugin Worker Module / 插件工作进程模块
//!
//! Source-based generators and assertions run out of process. The source file
//! is started with the arguments `[kind, name]`, receives one JSON request on
//! stdin and answers with one JSON reply on stdout.
//!
//! 基于源文件的生成器和断言在进程外运行。源文件以参数 `[kind, name]` 启动，
//! 从 stdin 接收一个 JSON 请求，并在 stdout 上返回一个 JSON 回复。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::core::error::UnitError;
use crate::infra::command::{self, AttemptStatus, CommandSpec};

/// Which contract a worker call fulfils.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginKind {
    Generator,
    Assertion,
}

impl PluginKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PluginKind::Generator => "generator",
            PluginKind::Assertion => "assertion",
        }
    }
}

/// A reply as written by the worker.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum WorkerReply {
    Error {
        error: String,
    },
    Outcome {
        ok: bool,
        #[serde(default)]
        details: String,
        #[serde(default)]
        metrics: BTreeMap<String, f64>,
    },
    Pair(bool, String),
}

/// A resolved plugin source file.
#[derive(Debug, Clone)]
pub struct Worker {
    source: PathBuf,
}

impl Worker {
    /// Checks that the source exists; the symbol is only looked up on call.
    pub fn open(kind: PluginKind, name: &str, source: &Path) -> Result<Self, UnitError> {
        if !source.is_file() {
            return Err(UnitError::Resolution {
                kind: kind.as_str(),
                name: name.to_string(),
                reason: format!("source {} does not exist", source.display()),
            });
        }
        Ok(Self {
            source: source.to_path_buf(),
        })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    fn argv(&self, kind: PluginKind, name: &str) -> Vec<String> {
        let source = self.source.display().to_string();
        let ext = self
            .source
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        let mut argv = match ext.as_deref() {
            Some("py") => vec!["python3".to_string(), source],
            Some("sh") => vec!["sh".to_string(), source],
            _ => vec![source],
        };
        argv.push(kind.as_str().to_string());
        argv.push(name.to_string());
        argv
    }

    /// Sends one request and parses the reply.
    pub async fn call(
        &self,
        kind: PluginKind,
        name: &str,
        request: &serde_json::Value,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<WorkerReply, UnitError> {
        let argv = self.argv(kind, name);
        let payload = serde_json::to_vec(request)
            .map_err(|e| UnitError::Plugin(format!("cannot encode {} request: {e}", kind.as_str())))?;
        let cwd = self
            .source
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let spec = CommandSpec {
            argv: &argv,
            cwd: &cwd,
            env: &[],
            timeout,
            stdin: Some(&payload),
        };
        tracing::debug!(kind = kind.as_str(), name, source = %self.source.display(), "invoking worker");
        let record = command::run_attempt(&spec, cancel).await;

        match record.status {
            AttemptStatus::Exited(0) => {}
            AttemptStatus::Interrupted => return Err(UnitError::Interrupted),
            _ => {
                return Err(UnitError::Plugin(format!(
                    "{} '{name}' worker failed: {}",
                    kind.as_str(),
                    record.describe()
                )));
            }
        }

        let reply_line = record
            .stdout
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .unwrap_or("");
        let reply: WorkerReply = serde_json::from_str(reply_line.trim()).map_err(|e| {
            UnitError::Plugin(format!(
                "{} '{name}' returned an unreadable reply ({e}): {}",
                kind.as_str(),
                command::summarize_output(&record.stdout)
            ))
        })?;
        if let WorkerReply::Error { error } = reply {
            return Err(UnitError::Resolution {
                kind: kind.as_str(),
                name: name.to_string(),
                reason: error,
            });
        }
        Ok(reply)
    }
}
