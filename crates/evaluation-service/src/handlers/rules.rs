//! 规则查询 API 处理器
//!
//! 只读端点：列出规则集和查询单条规则的元数据。

use axum::{
    Json,
    extract::{Path, State},
};

use crate::dto::{RuleDetail, RuleSummary};
use crate::error::ApiError;
use crate::state::AppState;

/// 获取规则列表
///
/// GET /rules
pub async fn list_rules(State(state): State<AppState>) -> Json<Vec<RuleSummary>> {
    let summaries = state
        .engine
        .rules()
        .map(|(id, rule)| RuleSummary::from_rule(id, rule))
        .collect();
    Json(summaries)
}

/// 获取单条规则详情
///
/// GET /rules/{rule}
pub async fn get_rule(
    State(state): State<AppState>,
    Path(rule): Path<String>,
) -> Result<Json<RuleDetail>, ApiError> {
    let detail = state
        .engine
        .rule(&rule)
        .map(|compiled| RuleDetail::from_rule(&rule, compiled))
        .ok_or(ApiError::RuleNotFound(rule))?;
    Ok(Json(detail))
}
