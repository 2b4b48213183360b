//! # Reporting Module / 报告模块
//!
//! This module presents run results: a colored, localized console stream and
//! a JSON report for machines.
//!
//! 此模块展示运行结果：带颜色的本地化控制台输出，以及供机器读取的 JSON 报告。

pub mod console;
pub mod json;

// Re-export common reporting functions
pub use console::{ConsoleReporter, print_failure_details, print_summary};
pub use json::write_json_report;
