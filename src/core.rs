//! # Core Module / 核心模块
//!
//! This module contains the core functionality of optest: the plan model and
//! its validator, token rendering, generators, assertions, case selection,
//! the backend driver and the execution engine.
//!
//! 此模块包含 optest 的核心功能：计划模型及其校验器、令牌渲染、生成器、
//! 断言、用例选择、后端驱动以及执行引擎。

pub mod assertion;
pub mod backend;
pub mod config;
pub mod error;
pub mod execution;
pub mod generator;
pub mod models;
pub mod plan;
pub mod planner;
pub mod reference;
pub mod registry;
pub mod template;
pub mod tensor;

// Re-exports
pub use error::{PlanError, SelectionError, UnitError};
pub use execution::Engine;
pub use models::{RunReport, RunSummary, Status, UnitResult};
pub use plan::Plan;
pub use planner::{ExecutionPlan, SelectionFilters, plan_execution};
pub use registry::{Registry, RunContext};
