//! # Logging Module / 日志模块
//!
//! Diagnostic logging goes to stderr through `tracing`. User-facing progress
//! and summaries are printed separately by the reporting module.
//!
//! 诊断日志通过 `tracing` 输出到标准错误。面向用户的进度和摘要由报告模块单独打印。

use tracing_subscriber::EnvFilter;

/// Environment variable holding an env-filter directive, e.g. `optest=debug`.
pub const LOG_ENV: &str = "OPTEST_LOG";

/// Maps the `-v` count to a default filter directive.
pub fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Installs the global subscriber. `OPTEST_LOG` wins over `-v`.
/// Calling it twice is harmless; the second call is ignored.
pub fn init(verbosity: u8, color: bool) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(color)
        .with_target(false)
        .try_init();
}
