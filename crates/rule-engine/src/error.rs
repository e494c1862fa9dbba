//! 规则引擎错误类型

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("公式解析失败: {0}")]
    ParseError(String),

    #[error("未知引用: {0}")]
    UnknownReference(String),

    #[error("检测到循环依赖: {0}")]
    CyclicDependency(String),

    #[error("类型不匹配: 期望 {expected}, 实际 {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("除数为零")]
    DivisionByZero,

    #[error("situation 值类型不支持: {name} 只能为数字、布尔或表达式字符串")]
    InvalidSituationValue { name: String },

    #[error("JSON 解析错误: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RuleError>;

#[cfg(test)]
mod tests {
    use super::*;

    /// 错误消息会原样透出到 API 响应的 message 字段，
    /// 必须携带关键上下文（引用名、类型名）。
    #[test]
    fn test_display_contains_context() {
        assert!(
            RuleError::UnknownReference("undefinedRule".into())
                .to_string()
                .contains("undefinedRule")
        );
        assert!(
            RuleError::CyclicDependency("a -> b -> a".into())
                .to_string()
                .contains("a -> b -> a")
        );
        assert!(
            RuleError::TypeMismatch {
                expected: "number".into(),
                actual: "boolean".into(),
            }
            .to_string()
            .contains("boolean")
        );
        assert!(
            RuleError::InvalidSituationValue { name: "b".into() }
                .to_string()
                .contains('b')
        );
    }
}
