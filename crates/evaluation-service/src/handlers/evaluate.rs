//! 评估端点处理器
//!
//! 组合请求隔离器和批量求值器：先在共享引擎上派生隔离上下文，
//! 成功后逐个求值表达式。两类失败都以 200 响应体数据返回，
//! 与对外 JSON 契约保持一致。

use axum::{Json, extract::State};
use tracing::{info, warn};

use crate::dto::{EvaluateRequest, EvaluateResponse};
use crate::evaluate::{evaluate_all, isolate};
use crate::state::AppState;

/// 批量求值表达式
///
/// POST /evaluate
pub async fn evaluate(
    State(state): State<AppState>,
    Json(request): Json<EvaluateRequest>,
) -> Json<EvaluateResponse> {
    match isolate(&state.engine, request.situation.as_ref()) {
        Err(situation_error) => {
            warn!(message = %situation_error.message, "Situation rejected, request short-circuited");
            Json(EvaluateResponse::Rejected { situation_error })
        }
        Ok(mut context) => {
            let outcomes = evaluate_all(&mut context, &request.expressions);
            info!(count = outcomes.len(), "Expressions evaluated");
            Json(EvaluateResponse::Evaluated { evaluate: outcomes })
        }
    }
}
