//! 路由配置模块
//!
//! 定义所有 REST API 端点的路由映射

use axum::{
    Router,
    routing::{get, post},
};

use crate::{handlers, state::AppState};

/// 构建评估与规则查询路由
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/evaluate", post(handlers::evaluate::evaluate))
        .route("/rules", get(handlers::rules::list_rules))
        .route("/rules/{rule}", get(handlers::rules::get_rule))
}
