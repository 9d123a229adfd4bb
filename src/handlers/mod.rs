//! 处理器库
//!
//! 列类型的校验、格式化和数据生成规则及其分发。规则由模块清单声明，
//! 可能来自不受信任的第三方模块，因此所有处理器都不会 panic，
//! 也不会把单元格级别的问题作为错误抛出。

pub mod format;
pub mod generate;
mod phone;
pub mod regex_cache;
pub mod rules;
pub mod validate;

use serde_json::Value;

pub use format::format;
pub use generate::generate;
pub use regex_cache::{RegexCache, RegexCacheStats};
pub use rules::{CompositeMode, FormatRule, GenerationRule, ValidationOutcome, ValidationRule};
pub use validate::{
    normalize_multi, validate, validate_dataset, validate_multi, validate_value, DatasetColumn,
    DatasetValidationReport, ValidationWarning,
};

/// 值的展示字符串：字符串原样，null 为空串，其它为 JSON 文本
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// 空值：null、空白字符串、空数组
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_to_string() {
        assert_eq!(value_to_string(&Value::Null), "");
        assert_eq!(value_to_string(&json!("a")), "a");
        assert_eq!(value_to_string(&json!(1.5)), "1.5");
        assert_eq!(value_to_string(&json!(true)), "true");
    }

    #[test]
    fn test_is_empty_value() {
        assert!(is_empty_value(&json!(" ")));
        assert!(is_empty_value(&json!([])));
        assert!(!is_empty_value(&json!({})));
        assert!(!is_empty_value(&json!(0)));
    }
}
