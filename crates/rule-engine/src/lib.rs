//! 规则评估引擎
//!
//! 提供可共享的规则评估能力，支持：
//! - JSON 规则定义和公式解析
//! - 廉价的写时复制上下文派生（shallow_copy）
//! - 请求级 situation 覆盖
//! - 带缓存的递归引用求值
//!
//! 引擎在进程启动时创建一次，之后只读共享；每个请求通过
//! `shallow_copy` 派生独立上下文，在副本上设置 situation 并求值，
//! 共享引擎在任何输入下都不会被修改。

pub mod engine;
pub mod error;
pub mod models;
pub mod parser;

pub use engine::{Engine, Situation};
pub use error::{Result, RuleError};
pub use models::{CompiledRule, EvaluationReport, RuleSet, RuleSource};
pub use parser::{Expr, parse_expression};
