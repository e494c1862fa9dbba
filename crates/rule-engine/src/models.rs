//! 规则引擎领域模型

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::parser::Expr;

/// 规则定义（JSON 规则文档中的一条规则）
///
/// 没有公式的规则是一个输入变量，其值只能由 situation 提供。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleSource {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// 公式文本，如 "brut - cotisations"
    #[serde(default)]
    pub formula: Option<String>,
    /// 声明单位，如 "€/mois"；引擎不做单位推导，仅原样报告
    #[serde(default)]
    pub unit: Option<String>,
}

/// 规则文档条目：完整对象或公式简写
///
/// `{"net": "brut - cotisations"}` 等价于
/// `{"net": {"formula": "brut - cotisations"}}`。
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RuleSourceDoc {
    Shorthand(String),
    Detailed(RuleSource),
}

impl From<RuleSourceDoc> for RuleSource {
    fn from(doc: RuleSourceDoc) -> Self {
        match doc {
            RuleSourceDoc::Shorthand(formula) => RuleSource {
                formula: Some(formula),
                ..Default::default()
            },
            RuleSourceDoc::Detailed(source) => source,
        }
    }
}

/// 规则集：规则名到规则定义的有序映射
pub type RuleSet = BTreeMap<String, RuleSource>;

/// 编译后的规则（公式已解析为表达式树）
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub title: Option<String>,
    pub description: Option<String>,
    pub unit: Option<String>,
    /// 公式原文，供规则查询接口展示
    pub formula_source: Option<String>,
    pub formula: Option<Expr>,
}

/// 单次表达式求值的完整报告
///
/// 前四个字段构成对外契约；其余为引擎内部簿记字段，
/// 上层接口在返回前会将其丢弃。
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    pub node_value: Value,
    pub unit: Option<String>,
    /// 求值过程中触达的引用，按首次触达顺序去重
    pub traversed_variables: Vec<String>,
    /// 缺失的输入变量及其出现次数
    pub missing_variables: BTreeMap<String, u32>,
    /// 内部字段：求值耗时
    pub evaluation_time_ms: i64,
    /// 内部字段：本次求值命中的缓存条目数
    pub cache_hits: u32,
}
