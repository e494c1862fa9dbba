//! 评估核心：请求隔离与批量求值
//!
//! 两个协作组件：
//! - `isolate` 从共享引擎派生请求私有的求值上下文并应用 situation，
//!   失败时整个请求短路，共享引擎在任何输入下都不被修改；
//! - `evaluate_all` 在隔离上下文上按输入顺序逐个求值表达式，
//!   单条失败只落在对应位置，不中断其余条目，任何错误都以数据
//!   形式返回，绝不向上传播。

use rule_engine::{Engine, Situation};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

use crate::dto::Expressions;

/// 请求级错误：situation 无法应用到上下文
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SituationError {
    pub message: String,
}

/// 单个表达式的求值结局，成功与失败互斥
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EvaluationOutcome {
    Success(EvaluationSuccess),
    Failure(EvaluationFailure),
}

/// 成功记录：只保留四个契约字段，引擎报告的其余内部字段全部丢弃
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationSuccess {
    pub node_value: Value,
    pub unit: Option<String>,
    pub traversed_variables: Vec<String>,
    pub missing_variables: BTreeMap<String, u32>,
}

/// 失败记录：只保留错误消息文本
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationFailure {
    pub error: ErrorMessage,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorMessage {
    pub message: String,
}

/// 请求隔离器
///
/// 从共享引擎派生写时复制的独立上下文并应用 situation。
/// situation 应用失败时返回 `SituationError`（只携带底层消息），
/// 此时不求值任何表达式；无论成败共享引擎都保持原状。
pub fn isolate(
    engine: &Engine,
    situation: Option<&Situation>,
) -> Result<Engine, SituationError> {
    let mut context = engine.shallow_copy();

    if let Some(situation) = situation {
        context.set_situation(situation).map_err(|err| {
            debug!(error = %err, "Situation rejected");
            SituationError {
                message: err.to_string(),
            }
        })?;
    }

    Ok(context)
}

/// 批量求值器
///
/// 按输入顺序逐个求值，输出序列与输入序列等长且位置一一对应。
/// 成功条目只提取四个契约字段；失败条目记录 `{error: {message}}`
/// 并继续处理后续表达式。本层没有致命错误。
pub fn evaluate_all(context: &mut Engine, expressions: &Expressions) -> Vec<EvaluationOutcome> {
    expressions
        .as_slice()
        .iter()
        .map(|expression| match context.evaluate(expression) {
            Ok(report) => EvaluationOutcome::Success(EvaluationSuccess {
                node_value: report.node_value,
                unit: report.unit,
                traversed_variables: report.traversed_variables,
                missing_variables: report.missing_variables,
            }),
            Err(err) => {
                debug!(expression = %expression, error = %err, "Expression evaluation failed");
                EvaluationOutcome::Failure(EvaluationFailure {
                    error: ErrorMessage {
                        message: err.to_string(),
                    },
                })
            }
        })
        .collect()
}
