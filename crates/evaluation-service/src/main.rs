//! 规则评估 API 服务入口
//!
//! 进程启动时加载配置并编译规则集，之后引擎只读共享；
//! 所有请求级的可变状态都通过请求隔离器在各自的上下文副本上承载。

use std::sync::Arc;

use anyhow::Context;
use axum::{Json, Router, http::HeaderValue, routing::get};
use evaluation_service::{routes, state::AppState};
use rule_engine::Engine;
use rules_shared::{config::AppConfig, observability};
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 统一加载配置：从 config/{service_name}.toml 加载，包含可观测性配置
    let config = AppConfig::load("evaluation-service").unwrap_or_default();

    observability::init(&config.observability)?;

    info!("Starting evaluation-service on {}", config.server_addr());

    // 进程启动时加载并编译规则集；之后引擎只读，绝不按请求修改
    let doc = std::fs::read_to_string(&config.rules.path)
        .with_context(|| format!("读取规则文件失败: {}", config.rules.path))?;
    let engine = Engine::from_json(&doc)
        .with_context(|| format!("规则集编译失败: {}", config.rules.path))?;
    info!(
        rules = engine.rules().count(),
        path = %config.rules.path,
        "Rule set loaded"
    );

    let state = AppState::new(Arc::new(engine));

    // CORS 配置：通过 RULES_CORS_ORIGINS 环境变量控制允许的来源
    // 评估端点是公开只读 API，默认允许所有来源
    let allowed_origins =
        std::env::var("RULES_CORS_ORIGINS").unwrap_or_else(|_| "*".to_string());

    let cors = if allowed_origins == "*" {
        // 生产环境使用通配符 CORS 需要显式确认，默认仅提示
        if config.is_production() {
            warn!("RULES_CORS_ORIGINS=\"*\" 在生产环境中不安全，请设置为具体域名");
        }
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        info!("CORS allowed_origins: {}", allowed_origins);
        let origins: Vec<_> = allowed_origins
            .split(',')
            .filter_map(|s| s.trim().parse::<HeaderValue>().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    let app = Router::new()
        .merge(routes::api_routes())
        .route("/health", get(health_check))
        .layer(cors)
        // HTTP 请求追踪
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = TcpListener::bind(config.server_addr()).await?;
    info!("Listening on {}", config.server_addr());

    // 优雅关闭：收到 SIGTERM 或 Ctrl+C 时停止接收新连接，
    // 等待已有请求处理完毕
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");

    Ok(())
}

/// 监听关闭信号
///
/// 收到 SIGTERM（容器编排停止实例）或 Ctrl+C（本地开发）后返回，
/// 触发 axum 的优雅关闭流程。
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("注册 Ctrl+C 处理器失败");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("注册 SIGTERM 处理器失败")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}

/// 存活探针：服务进程正常即返回 ok
async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "evaluation-service"
    }))
}
