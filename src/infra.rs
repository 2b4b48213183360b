//! # Infrastructure Module / 基础设施模块
//!
//! This module provides infrastructure services for optest, including child
//! process execution, plugin workers, file system helpers, logging and i18n
//! support.
//!
//! 此模块为 optest 提供基础设施服务，包括子进程执行、插件工作进程、
//! 文件系统辅助、日志和国际化支持。

pub mod command;
pub mod fs;
pub mod logging;
pub mod worker;

// Re-export i18n functions for easier access
pub use rust_i18n::t;
