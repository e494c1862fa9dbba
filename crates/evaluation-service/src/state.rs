//! 应用状态定义
//!
//! 包含 Axum 路由共享的应用状态

use rule_engine::Engine;
use std::sync::Arc;

/// Axum 应用共享状态
///
/// 持有进程级共享引擎，启动后只读；每个请求通过请求隔离器
/// 派生自己的求值上下文，绝不直接在共享引擎上求值。
#[derive(Clone)]
pub struct AppState {
    /// 共享规则引擎
    pub engine: Arc<Engine>,
}

impl AppState {
    /// 创建新的应用状态
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }
}
