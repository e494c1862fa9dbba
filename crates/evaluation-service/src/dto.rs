//! 请求/响应数据传输对象
//!
//! 字段名遵循对外 JSON 契约（camelCase）。

use rule_engine::{CompiledRule, Situation};
use serde::{Deserialize, Serialize};

use crate::evaluate::{EvaluationOutcome, SituationError};

/// POST /evaluate 请求体
#[derive(Debug, Clone, Deserialize)]
pub struct EvaluateRequest {
    /// 单个表达式或表达式序列
    pub expressions: Expressions,
    #[serde(default)]
    pub situation: Option<Situation>,
}

/// 单个表达式或有序表达式序列
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Expressions {
    Single(String),
    Sequence(Vec<String>),
}

impl Expressions {
    /// 统一视为有序序列：单个表达式等价于单元素序列
    pub fn as_slice(&self) -> &[String] {
        match self {
            Expressions::Single(expression) => std::slice::from_ref(expression),
            Expressions::Sequence(expressions) => expressions,
        }
    }
}

/// POST /evaluate 响应体：`evaluate` 与 `situationError` 二者其一
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum EvaluateResponse {
    Evaluated {
        evaluate: Vec<EvaluationOutcome>,
    },
    Rejected {
        #[serde(rename = "situationError")]
        situation_error: SituationError,
    },
}

/// GET /rules 响应条目
#[derive(Debug, Clone, Serialize)]
pub struct RuleSummary {
    pub id: String,
    pub title: Option<String>,
    pub unit: Option<String>,
}

/// GET /rules/{rule} 响应体
#[derive(Debug, Clone, Serialize)]
pub struct RuleDetail {
    pub id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub formula: Option<String>,
    pub unit: Option<String>,
}

impl RuleSummary {
    pub fn from_rule(id: &str, rule: &CompiledRule) -> Self {
        Self {
            id: id.to_string(),
            title: rule.title.clone(),
            unit: rule.unit.clone(),
        }
    }
}

impl RuleDetail {
    pub fn from_rule(id: &str, rule: &CompiledRule) -> Self {
        Self {
            id: id.to_string(),
            title: rule.title.clone(),
            description: rule.description.clone(),
            formula: rule.formula_source.clone(),
            unit: rule.unit.clone(),
        }
    }
}
