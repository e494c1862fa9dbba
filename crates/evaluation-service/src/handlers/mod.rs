//! API 处理器模块

pub mod evaluate;
pub mod rules;
