//! 规则评估引擎实现
//!
//! `Engine` 由两部分组成：进程级共享的编译规则集（`Arc` 结构共享）
//! 和请求级私有的 situation 与求值缓存。`shallow_copy` 只克隆私有
//! 部分，代价为 O(situation)，派生出的上下文与源引擎完全独立。

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::error::{Result, RuleError};
use crate::models::{CompiledRule, EvaluationReport, RuleSet, RuleSourceDoc};
use crate::parser::{self, BinaryOp, Expr};

/// 请求级输入：变量名到字面值或表达式字符串的映射
pub type Situation = BTreeMap<String, Value>;

/// 编译后的规则集（所有上下文间共享，构建后只读）
#[derive(Debug)]
struct CompiledRules {
    rules: BTreeMap<String, CompiledRule>,
    /// 已知名字全集：规则名 + 所有公式引用到的名字
    known: BTreeSet<String>,
}

/// 单个引用的缓存求值结果
#[derive(Debug, Clone)]
struct CachedNode {
    value: Value,
    traversed: Vec<String>,
    missing: BTreeMap<String, u32>,
}

/// 求值过程追踪器：触达引用、缺失变量、缓存命中
#[derive(Debug, Default)]
struct Tracker {
    traversed: Vec<String>,
    seen: BTreeSet<String>,
    missing: BTreeMap<String, u32>,
    cache_hits: u32,
}

impl Tracker {
    fn visit(&mut self, name: &str) {
        if self.seen.insert(name.to_string()) {
            self.traversed.push(name.to_string());
        }
    }

    fn merge(&mut self, other: Tracker) {
        for name in other.traversed {
            if self.seen.insert(name.clone()) {
                self.traversed.push(name);
            }
        }
        for (name, count) in other.missing {
            *self.missing.entry(name).or_default() += count;
        }
        self.cache_hits += other.cache_hits;
    }
}

/// 规则评估引擎
#[derive(Debug)]
pub struct Engine {
    rules: Arc<CompiledRules>,
    situation: BTreeMap<String, Expr>,
    cache: HashMap<String, CachedNode>,
}

impl Engine {
    /// 从规则集构建引擎，解析并校验所有公式
    pub fn new(sources: RuleSet) -> Result<Self> {
        let mut rules = BTreeMap::new();
        let mut known = BTreeSet::new();

        for (name, source) in sources {
            let formula = match &source.formula {
                Some(text) => {
                    let expr = parser::parse_expression(text).map_err(|e| {
                        RuleError::ParseError(format!("规则 '{}' 的公式无效: {}", name, e))
                    })?;
                    let mut refs = Vec::new();
                    expr.collect_references(&mut refs);
                    known.extend(refs);
                    Some(expr)
                }
                None => None,
            };

            known.insert(name.clone());
            rules.insert(
                name,
                CompiledRule {
                    title: source.title,
                    description: source.description,
                    unit: source.unit,
                    formula_source: source.formula,
                    formula,
                },
            );
        }

        debug!(rules = rules.len(), known = known.len(), "规则集编译完成");

        Ok(Self {
            rules: Arc::new(CompiledRules { rules, known }),
            situation: BTreeMap::new(),
            cache: HashMap::new(),
        })
    }

    /// 从 JSON 规则文档构建引擎
    pub fn from_json(doc: &str) -> Result<Self> {
        let docs: BTreeMap<String, RuleSourceDoc> = serde_json::from_str(doc)?;
        let sources = docs.into_iter().map(|(k, v)| (k, v.into())).collect();
        Self::new(sources)
    }

    /// 派生独立的求值上下文
    ///
    /// 规则集通过 `Arc` 结构共享，situation 和缓存为副本私有，
    /// 对副本的任何操作都不会影响源引擎。
    pub fn shallow_copy(&self) -> Engine {
        Engine {
            rules: Arc::clone(&self.rules),
            situation: self.situation.clone(),
            cache: HashMap::new(),
        }
    }

    /// 整体替换 situation 并清空求值缓存
    ///
    /// 先校验全部条目再提交：任一条目非法时返回错误，
    /// 引擎的 situation 保持原状。
    pub fn set_situation(&mut self, situation: &Situation) -> Result<()> {
        let mut parsed = BTreeMap::new();

        for (name, value) in situation {
            if !self.rules.known.contains(name) {
                return Err(RuleError::UnknownReference(name.clone()));
            }

            let expr = match value {
                Value::Number(n) => {
                    let number = n.as_f64().ok_or_else(|| RuleError::InvalidSituationValue {
                        name: name.clone(),
                    })?;
                    Expr::Number(number)
                }
                Value::Bool(b) => Expr::Boolean(*b),
                Value::String(text) => {
                    let expr = parser::parse_expression(text)?;
                    let mut refs = Vec::new();
                    expr.collect_references(&mut refs);
                    for reference in refs {
                        if !self.rules.known.contains(&reference) {
                            return Err(RuleError::UnknownReference(reference));
                        }
                    }
                    expr
                }
                _ => {
                    return Err(RuleError::InvalidSituationValue { name: name.clone() });
                }
            };

            parsed.insert(name.clone(), expr);
        }

        debug!(entries = parsed.len(), "situation 已替换，求值缓存清空");
        self.situation = parsed;
        self.cache.clear();
        Ok(())
    }

    /// 求值单个表达式
    ///
    /// 引用解析优先级：situation > 规则公式；已知但两者皆无的名字
    /// 记为缺失变量（值为 null 并沿算术运算传播）；完全未知的名字
    /// 是错误。同一上下文内按引用名缓存中间结果。
    pub fn evaluate(&mut self, expression: &str) -> Result<EvaluationReport> {
        let start = Instant::now();
        let expr = parser::parse_expression(expression)?;

        let rules = Arc::clone(&self.rules);
        let mut tracker = Tracker::default();
        let mut stack = Vec::new();

        let node_value = eval_expr(
            &expr,
            &rules,
            &self.situation,
            &mut self.cache,
            &mut tracker,
            &mut stack,
        )?;

        // 只有裸引用才报告单位；跨运算的单位推导不在范围内
        let unit = match &expr {
            Expr::Reference(name) => rules.rules.get(name).and_then(|r| r.unit.clone()),
            _ => None,
        };

        Ok(EvaluationReport {
            node_value,
            unit,
            traversed_variables: tracker.traversed,
            missing_variables: tracker.missing,
            evaluation_time_ms: start.elapsed().as_millis() as i64,
            cache_hits: tracker.cache_hits,
        })
    }

    /// 遍历所有规则（名字升序）
    pub fn rules(&self) -> impl Iterator<Item = (&str, &CompiledRule)> {
        self.rules.rules.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// 按名字查询规则
    pub fn rule(&self, name: &str) -> Option<&CompiledRule> {
        self.rules.rules.get(name)
    }

    /// 名字是否已知（规则名或被某条公式引用）
    pub fn is_known(&self, name: &str) -> bool {
        self.rules.known.contains(name)
    }
}

fn eval_expr(
    expr: &Expr,
    rules: &CompiledRules,
    situation: &BTreeMap<String, Expr>,
    cache: &mut HashMap<String, CachedNode>,
    tracker: &mut Tracker,
    stack: &mut Vec<String>,
) -> Result<Value> {
    match expr {
        Expr::Number(n) => Ok(number_value(*n)),
        Expr::Boolean(b) => Ok(Value::Bool(*b)),
        Expr::Reference(name) => eval_reference(name, rules, situation, cache, tracker, stack),
        Expr::Neg(inner) => {
            let value = eval_expr(inner, rules, situation, cache, tracker, stack)?;
            match as_number(&value)? {
                Some(n) => Ok(number_value(-n)),
                None => Ok(Value::Null),
            }
        }
        Expr::Binary(op, lhs, rhs) => {
            let left = eval_expr(lhs, rules, situation, cache, tracker, stack)?;
            let right = eval_expr(rhs, rules, situation, cache, tracker, stack)?;
            apply_binary(*op, &left, &right)
        }
    }
}

fn eval_reference(
    name: &str,
    rules: &CompiledRules,
    situation: &BTreeMap<String, Expr>,
    cache: &mut HashMap<String, CachedNode>,
    tracker: &mut Tracker,
    stack: &mut Vec<String>,
) -> Result<Value> {
    tracker.visit(name);

    if stack.iter().any(|n| n == name) {
        let mut chain = stack.clone();
        chain.push(name.to_string());
        return Err(RuleError::CyclicDependency(chain.join(" -> ")));
    }

    if let Some(cached) = cache.get(name) {
        let node = cached.clone();
        tracker.cache_hits += 1;
        for traversed in &node.traversed {
            tracker.visit(traversed);
        }
        for (missing, count) in &node.missing {
            *tracker.missing.entry(missing.clone()).or_default() += count;
        }
        return Ok(node.value);
    }

    let definition = situation
        .get(name)
        .or_else(|| rules.rules.get(name).and_then(|r| r.formula.as_ref()));

    let Some(definition) = definition else {
        if rules.known.contains(name) {
            // 已知但既无 situation 值也无公式：缺失的输入变量
            *tracker.missing.entry(name.to_string()).or_default() += 1;
            return Ok(Value::Null);
        }
        return Err(RuleError::UnknownReference(name.to_string()));
    };

    let mut sub = Tracker::default();
    stack.push(name.to_string());
    let result = eval_expr(definition, rules, situation, cache, &mut sub, stack);
    stack.pop();
    let value = result?;

    cache.insert(
        name.to_string(),
        CachedNode {
            value: value.clone(),
            traversed: sub.traversed.clone(),
            missing: sub.missing.clone(),
        },
    );
    tracker.merge(sub);

    Ok(value)
}

fn apply_binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value> {
    match op {
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
            let (Some(l), Some(r)) = (as_number(left)?, as_number(right)?) else {
                // 缺失值沿算术运算传播
                return Ok(Value::Null);
            };
            let result = match op {
                BinaryOp::Add => l + r,
                BinaryOp::Sub => l - r,
                BinaryOp::Mul => l * r,
                BinaryOp::Div => {
                    if r == 0.0 {
                        return Err(RuleError::DivisionByZero);
                    }
                    l / r
                }
                _ => unreachable!(),
            };
            Ok(number_value(result))
        }
        BinaryOp::Eq | BinaryOp::Ne => {
            if left.is_null() || right.is_null() {
                return Ok(Value::Null);
            }
            // 数值统一转为 f64 再比较，整数与浮点表示的同一个值相等
            let equal = match (left.as_f64(), right.as_f64()) {
                (Some(l), Some(r)) => l == r,
                _ => left == right,
            };
            Ok(Value::Bool(if op == BinaryOp::Eq { equal } else { !equal }))
        }
        BinaryOp::Gt | BinaryOp::Ge | BinaryOp::Lt | BinaryOp::Le => {
            let (Some(l), Some(r)) = (as_number(left)?, as_number(right)?) else {
                return Ok(Value::Null);
            };
            let result = match op {
                BinaryOp::Gt => l > r,
                BinaryOp::Ge => l >= r,
                BinaryOp::Lt => l < r,
                BinaryOp::Le => l <= r,
                _ => unreachable!(),
            };
            Ok(Value::Bool(result))
        }
    }
}

/// 将值转换为数字：null 表示缺失（Ok(None)），非数字类型是错误
fn as_number(value: &Value) -> Result<Option<f64>> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => Ok(Some(n.as_f64().unwrap_or(f64::NAN))),
        other => Err(RuleError::TypeMismatch {
            expected: "number".to_string(),
            actual: type_name(other).to_string(),
        }),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// 整数结果用整数表示，保证 JSON 序列化输出 3 而不是 3.0
fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        Value::from(n as i64)
    } else {
        Value::from(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_engine() -> Engine {
        Engine::from_json(
            r#"
            {
                "a": "b + 1",
                "b": {"title": "Entrée b"},
                "brut": {"title": "Salaire brut", "unit": "€/mois"},
                "cotisations": {"formula": "brut * 0.23", "unit": "€/mois"},
                "net": {"formula": "brut - cotisations", "unit": "€/mois"}
            }
            "#,
        )
        .unwrap()
    }

    fn situation(pairs: &[(&str, Value)]) -> Situation {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_evaluate_with_situation() {
        let mut engine = test_engine();
        engine.set_situation(&situation(&[("b", json!("2"))])).unwrap();

        let report = engine.evaluate("a").unwrap();
        assert_eq!(report.node_value, json!(3));
        assert_eq!(report.unit, None);
        assert_eq!(report.traversed_variables, vec!["a", "b"]);
        assert!(report.missing_variables.is_empty());
    }

    #[test]
    fn test_evaluate_missing_variable() {
        let mut engine = test_engine();

        let report = engine.evaluate("a").unwrap();
        assert_eq!(report.node_value, Value::Null);
        assert_eq!(report.missing_variables.get("b"), Some(&1));
        assert_eq!(report.traversed_variables, vec!["a", "b"]);
    }

    #[test]
    fn test_evaluate_reports_declared_unit() {
        let mut engine = test_engine();
        engine
            .set_situation(&situation(&[("brut", json!(2500))]))
            .unwrap();

        let report = engine.evaluate("net").unwrap();
        assert_eq!(report.node_value, json!(1925));
        assert_eq!(report.unit.as_deref(), Some("€/mois"));
        assert_eq!(
            report.traversed_variables,
            vec!["net", "brut", "cotisations"]
        );
    }

    #[test]
    fn test_evaluate_formula_expression_has_no_unit() {
        let mut engine = test_engine();
        engine
            .set_situation(&situation(&[("brut", json!(1000))]))
            .unwrap();

        let report = engine.evaluate("net / 2").unwrap();
        assert_eq!(report.node_value, json!(385));
        assert_eq!(report.unit, None);
    }

    #[test]
    fn test_evaluate_unknown_reference_is_error() {
        let mut engine = test_engine();
        let err = engine.evaluate("undefinedRule").unwrap_err();
        assert!(matches!(err, RuleError::UnknownReference(_)));
        assert!(err.to_string().contains("undefinedRule"));
    }

    #[test]
    fn test_evaluate_comparison() {
        let mut engine = test_engine();
        engine
            .set_situation(&situation(&[("brut", json!(2500))]))
            .unwrap();

        assert_eq!(engine.evaluate("net >= 1000").unwrap().node_value, json!(true));
        assert_eq!(engine.evaluate("net = 1925").unwrap().node_value, json!(true));
        assert_eq!(engine.evaluate("net != 1925").unwrap().node_value, json!(false));
    }

    /// 相等比较是严格的 IEEE 754 相等，不做容差近似
    #[test]
    fn test_equality_is_exact() {
        let mut engine = test_engine();

        // 0.1 + 0.2 的 f64 结果并不等于 0.3
        assert_eq!(
            engine.evaluate("0.1 + 0.2 = 0.3").unwrap().node_value,
            json!(false)
        );
        assert_eq!(
            engine.evaluate("1 / 4 = 0.25").unwrap().node_value,
            json!(true)
        );
        // 接近但不同的小数值不得被判为相等
        assert_eq!(
            engine.evaluate("1 / 1000000 = 2 / 1000000").unwrap().node_value,
            json!(false)
        );
    }

    #[test]
    fn test_evaluate_division_by_zero() {
        let mut engine = test_engine();
        let err = engine.evaluate("1 / 0").unwrap_err();
        assert!(matches!(err, RuleError::DivisionByZero));
    }

    #[test]
    fn test_evaluate_type_mismatch() {
        let mut engine = test_engine();
        engine
            .set_situation(&situation(&[("b", json!(true))]))
            .unwrap();

        // a = b + 1，b 为布尔值无法参与算术运算
        let err = engine.evaluate("a").unwrap_err();
        assert!(matches!(err, RuleError::TypeMismatch { .. }));
    }

    #[test]
    fn test_set_situation_unknown_key() {
        let mut engine = test_engine();
        let err = engine
            .set_situation(&situation(&[("inconnu", json!(1))]))
            .unwrap_err();
        assert!(matches!(err, RuleError::UnknownReference(_)));
    }

    #[test]
    fn test_set_situation_malformed_value() {
        let mut engine = test_engine();
        // "not-a-number" 解析为 not - a - number，引用均未知
        let err = engine
            .set_situation(&situation(&[("b", json!("not-a-number"))]))
            .unwrap_err();
        assert!(matches!(err, RuleError::UnknownReference(_)));
    }

    #[test]
    fn test_set_situation_rejects_structured_value() {
        let mut engine = test_engine();
        let err = engine
            .set_situation(&situation(&[("b", json!([1, 2]))]))
            .unwrap_err();
        assert!(matches!(err, RuleError::InvalidSituationValue { .. }));
    }

    /// 校验失败时 situation 必须保持原状（先校验再提交）
    #[test]
    fn test_set_situation_is_atomic() {
        let mut engine = test_engine();
        engine.set_situation(&situation(&[("b", json!(2))])).unwrap();

        let result = engine.set_situation(&situation(&[
            ("b", json!(5)),
            ("inconnu", json!(1)),
        ]));
        assert!(result.is_err());

        // 旧 situation 仍然生效
        assert_eq!(engine.evaluate("a").unwrap().node_value, json!(3));
    }

    #[test]
    fn test_situation_expression_referencing_rule() {
        let mut engine = test_engine();
        engine
            .set_situation(&situation(&[("brut", json!(1000)), ("b", json!("net"))]))
            .unwrap();

        // b = net = 1000 - 230 = 770，a = 771
        assert_eq!(engine.evaluate("a").unwrap().node_value, json!(771));
    }

    #[test]
    fn test_shallow_copy_isolates_situation() {
        let mut shared = test_engine();
        shared
            .set_situation(&situation(&[("b", json!(10))]))
            .unwrap();

        let mut derived = shared.shallow_copy();
        derived
            .set_situation(&situation(&[("b", json!(100))]))
            .unwrap();

        assert_eq!(derived.evaluate("a").unwrap().node_value, json!(101));
        // 源引擎不受副本影响
        assert_eq!(shared.evaluate("a").unwrap().node_value, json!(11));
    }

    #[test]
    fn test_cycle_detection() {
        let mut engine = Engine::from_json(r#"{"x": "y + 1", "y": "x + 1"}"#).unwrap();
        let err = engine.evaluate("x").unwrap_err();
        assert!(matches!(err, RuleError::CyclicDependency(_)));
        assert!(err.to_string().contains("x"));
    }

    #[test]
    fn test_cache_hit_on_repeated_reference() {
        let mut engine = Engine::from_json(
            r#"{"double": "net + net", "net": "brut - 100", "brut": {}}"#,
        )
        .unwrap();
        engine
            .set_situation(&situation(&[("brut", json!(500))]))
            .unwrap();

        let report = engine.evaluate("double").unwrap();
        assert_eq!(report.node_value, json!(800));
        // net 第二次出现命中缓存
        assert!(report.cache_hits >= 1);
        // 去重后的触达列表
        assert_eq!(report.traversed_variables, vec!["double", "net", "brut"]);
    }

    #[test]
    fn test_missing_variable_counted_per_occurrence() {
        let mut engine =
            Engine::from_json(r#"{"total": "x + x", "somme": "x + 1"}"#).unwrap();

        let report = engine.evaluate("somme").unwrap();
        assert_eq!(report.missing_variables.get("x"), Some(&1));

        // total 内出现两次，somme 内一次，共三次
        let report = engine.evaluate("total + somme").unwrap();
        assert_eq!(report.missing_variables.get("x"), Some(&3));
    }

    #[test]
    fn test_invalid_rule_formula_fails_construction() {
        let err = Engine::from_json(r#"{"bad": "1 +"}"#).unwrap_err();
        assert!(matches!(err, RuleError::ParseError(_)));
        assert!(err.to_string().contains("bad"));
    }
}
