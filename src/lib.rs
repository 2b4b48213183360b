//! # optest Library / optest 库
//!
//! This library provides the core functionality for the optest tool, a
//! plan-driven test executor that runs operator implementations on a selected
//! backend and judges their outputs against reference tolerances.
//!
//! 此库为 optest 工具提供核心功能，这是一个计划驱动的测试执行器，
//! 在选定的后端上运行算子实现，并按参考容差判定其输出。
//!
//! ## Modules / 模块
//!
//! - `core` - Plan model, validation, generators, assertions and the execution engine
//! - `infra` - Infrastructure services like child processes, plugin workers and logging
//! - `reporting` - Console and JSON reporting
//! - `cli` - Command-line interface
//! - `commands` - Subcommand implementations
//!
//! - `core` - 计划模型、校验、生成器、断言和执行引擎
//! - `infra` - 基础设施服务，如子进程、插件工作进程和日志
//! - `reporting` - 控制台和 JSON 报告
//! - `cli` - 命令行接口
//! - `commands` - 子命令实现

pub mod cli;
pub mod commands;
pub mod core;
pub mod infra;
pub mod reporting;

// Re-export commonly used items
pub use core::config;
pub use core::execution;
pub use core::models;
pub use infra::t;

/// Picks the best available locale for a requested one: the full tag
/// (e.g. "zh-CN"), then the language part (e.g. "en" from "en-US"), then "en".
pub fn resolve_locale(requested: &str) -> String {
    let requested = requested.replace('_', "-");
    let available_locales = rust_i18n::available_locales!();

    if available_locales.contains(&requested.as_str()) {
        return requested;
    }
    requested
        .split('-')
        .next()
        .and_then(|lang_code| {
            available_locales
                .iter()
                .find(|l| **l == lang_code || l.split('-').next() == Some(lang_code))
        })
        .map(|l| l.to_string())
        .unwrap_or_else(|| "en".to_string())
}

/// Initializes the application's internationalization (i18n) based on the system locale.
pub fn init() {
    // Fallback to "en" if detection fails.
    let locale = sys_locale::get_locale().unwrap_or_else(|| "en".to_string());
    rust_i18n::set_locale(&resolve_locale(&locale));
}

// Initialize i18n
rust_i18n::i18n!("locales", fallback = "en");
