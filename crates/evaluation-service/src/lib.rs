//! 规则评估 API 服务
//!
//! 在共享规则引擎之上暴露无状态的评估端点。核心由两部分组成：
//! 请求隔离器（`evaluate::isolate`）为每个请求派生独立的求值
//! 上下文，批量求值器（`evaluate::evaluate_all`）逐个求值表达式
//! 并将单条失败局部化为该条目的错误记录。

pub mod dto;
pub mod error;
pub mod evaluate;
pub mod handlers;
pub mod routes;
pub mod state;
