//! 校验处理器
//!
//! 所有入口都返回 [`ValidationOutcome`]，不会返回错误或 panic。
//! 除 `required` 外，空值（null、空字符串、空数组）一律视为通过。

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::LazyLock;

use super::phone::{self, E164_MAX_DIGITS, E164_MIN_DIGITS};
use super::regex_cache::RegexCache;
use super::rules::{CompositeMode, ValidationOutcome, ValidationRule};
use super::{is_empty_value, value_to_string};

static EMAIL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("Invalid email regex"));

/// 按规则校验单个值
pub fn validate(rule: &ValidationRule, value: &Value) -> ValidationOutcome {
    if let ValidationRule::Required { message } = rule {
        return if is_empty_value(value) {
            ValidationOutcome::fail(message.as_deref().unwrap_or("此字段为必填项"))
        } else {
            ValidationOutcome::ok()
        };
    }

    if let ValidationRule::Composite { rules, mode } = rule {
        return validate_composite(rules, *mode, value);
    }

    if is_empty_value(value) {
        return ValidationOutcome::ok();
    }

    match rule {
        ValidationRule::Regex {
            pattern,
            flags,
            message,
        } => validate_regex(pattern, flags.as_deref(), message.as_deref(), value),
        ValidationRule::Phone {
            country,
            allow_extension,
        } => validate_phone(country.as_deref(), *allow_extension, value),
        ValidationRule::Email => {
            if EMAIL_REGEX.is_match(value_to_string(value).trim()) {
                ValidationOutcome::ok()
            } else {
                ValidationOutcome::fail("请输入有效的电子邮件地址")
            }
        }
        ValidationRule::Url { protocols } => validate_url(protocols, value),
        ValidationRule::Range { min, max } => validate_range(*min, *max, value),
        ValidationRule::Length { min, max } => validate_length(*min, *max, value),
        ValidationRule::Enum {
            values,
            case_sensitive,
        } => validate_enum(values, *case_sensitive, value),
        ValidationRule::JsonSchema { schema } => validate_json_schema(schema, value),
        ValidationRule::Required { .. } | ValidationRule::Composite { .. } => {
            ValidationOutcome::ok()
        }
    }
}

/// 校验列值，多值列会逐项校验
pub fn validate_value(rule: &ValidationRule, value: &Value, multi_value: bool) -> ValidationOutcome {
    if multi_value {
        validate_multi(rule, value)
    } else {
        validate(rule, value)
    }
}

/// 多值校验
///
/// 值先经过 [`normalize_multi`]；空列表按空值处理，否则逐项校验，
/// 第一个失败项的错误带上 `第 N 项` 前缀返回。
pub fn validate_multi(rule: &ValidationRule, value: &Value) -> ValidationOutcome {
    let items = normalize_multi(value);
    if items.is_empty() {
        return validate(rule, &Value::Null);
    }

    for (index, item) in items.iter().enumerate() {
        let outcome = validate(rule, item);
        if !outcome.valid {
            return outcome.with_prefix(&format!("第 {} 项", index + 1));
        }
    }
    ValidationOutcome::ok()
}

/// 多值归一化
///
/// 数组原样展开；内容为 JSON 数组的字符串会被解析；null 与空字符串为空列表；
/// 其它标量视为单元素列表。
pub fn normalize_multi(value: &Value) -> Vec<Value> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items.clone(),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Vec::new();
            }
            if trimmed.starts_with('[') {
                if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(trimmed) {
                    return items;
                }
            }
            vec![value.clone()]
        }
        other => vec![other.clone()],
    }
}

fn validate_composite(rules: &[ValidationRule], mode: CompositeMode, value: &Value) -> ValidationOutcome {
    match mode {
        CompositeMode::All => {
            for rule in rules {
                let outcome = validate(rule, value);
                if !outcome.valid {
                    return outcome;
                }
            }
            ValidationOutcome::ok()
        }
        CompositeMode::Any => {
            let mut first_failure = None;
            for rule in rules {
                let outcome = validate(rule, value);
                if outcome.valid {
                    return outcome;
                }
                first_failure.get_or_insert(outcome);
            }
            first_failure.unwrap_or_else(ValidationOutcome::ok)
        }
    }
}

fn validate_regex(
    pattern: &str,
    flags: Option<&str>,
    message: Option<&str>,
    value: &Value,
) -> ValidationOutcome {
    let regex = match RegexCache::global().get_or_compile(pattern, flags.unwrap_or("")) {
        Ok(regex) => regex,
        Err(e) => return ValidationOutcome::fail(format!("正则表达式无效: {}", e)),
    };

    if regex.is_match(&value_to_string(value)) {
        ValidationOutcome::ok()
    } else {
        ValidationOutcome::fail(message.unwrap_or("格式不正确"))
    }
}

fn validate_phone(country: Option<&str>, allow_extension: bool, value: &Value) -> ValidationOutcome {
    let text = value_to_string(value);
    let (number, extension) = phone::split_extension(text.trim());

    if extension.is_some() && !allow_extension {
        return ValidationOutcome::fail("电话号码不允许包含分机号");
    }
    if !phone::has_valid_chars(number) {
        return ValidationOutcome::fail("电话号码包含无效字符");
    }

    let digits = phone::digits_of(number);
    let has_plus = number.trim_start().starts_with('+');

    match country.and_then(phone::lookup_country) {
        Some(rule) => {
            let national = rule.national(&digits, has_plus);
            if (rule.min_digits..=rule.max_digits).contains(&national.len()) {
                ValidationOutcome::ok()
            } else if rule.min_digits == rule.max_digits {
                ValidationOutcome::fail(format!(
                    "{} 电话号码应为 {} 位数字",
                    rule.code, rule.min_digits
                ))
            } else {
                ValidationOutcome::fail(format!(
                    "{} 电话号码应为 {}-{} 位数字",
                    rule.code, rule.min_digits, rule.max_digits
                ))
            }
        }
        None => {
            if (E164_MIN_DIGITS..=E164_MAX_DIGITS).contains(&digits.len()) {
                ValidationOutcome::ok()
            } else {
                ValidationOutcome::fail(format!(
                    "电话号码应为 {}-{} 位数字",
                    E164_MIN_DIGITS, E164_MAX_DIGITS
                ))
            }
        }
    }
}

fn validate_url(protocols: &[String], value: &Value) -> ValidationOutcome {
    let text = value_to_string(value);
    let parsed = match url::Url::parse(text.trim()) {
        Ok(parsed) => parsed,
        Err(_) => return ValidationOutcome::fail("请输入有效的 URL"),
    };

    let allowed = protocols
        .iter()
        .any(|p| p.trim_end_matches(':').eq_ignore_ascii_case(parsed.scheme()));
    if !allowed {
        return ValidationOutcome::fail(format!("URL 协议必须是: {}", protocols.join(", ")));
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return ValidationOutcome::fail("URL 缺少主机名");
    }
    ValidationOutcome::ok()
}

/// 把值解释为数字，数字字符串也被接受
pub(crate) fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

fn validate_range(min: Option<f64>, max: Option<f64>, value: &Value) -> ValidationOutcome {
    let Some(number) = as_number(value) else {
        return ValidationOutcome::fail("必须是数字");
    };
    if let Some(min) = min {
        if number < min {
            return ValidationOutcome::fail(format!("不能小于 {}", min));
        }
    }
    if let Some(max) = max {
        if number > max {
            return ValidationOutcome::fail(format!("不能大于 {}", max));
        }
    }
    ValidationOutcome::ok()
}

fn validate_length(min: Option<usize>, max: Option<usize>, value: &Value) -> ValidationOutcome {
    let length = value_to_string(value).chars().count();
    if let Some(min) = min {
        if length < min {
            return ValidationOutcome::fail(format!("长度不能少于 {} 个字符", min));
        }
    }
    if let Some(max) = max {
        if length > max {
            return ValidationOutcome::fail(format!("长度不能超过 {} 个字符", max));
        }
    }
    ValidationOutcome::ok()
}

fn validate_enum(values: &[Value], case_sensitive: bool, value: &Value) -> ValidationOutcome {
    let candidate = value_to_string(value);
    let found = values.iter().map(value_to_string).any(|allowed| {
        if case_sensitive {
            allowed == candidate
        } else {
            allowed.to_lowercase() == candidate.to_lowercase()
        }
    });

    if found {
        ValidationOutcome::ok()
    } else {
        let allowed: Vec<String> = values.iter().map(value_to_string).collect();
        ValidationOutcome::fail(format!("必须是以下值之一: {}", allowed.join(", ")))
    }
}

fn validate_json_schema(schema: &Value, value: &Value) -> ValidationOutcome {
    // 期望对象或数组时，接受 JSON 文本
    let expects_structured = matches!(
        schema.get("type").and_then(Value::as_str),
        Some("object") | Some("array")
    );
    let parsed;
    let target = match value {
        Value::String(s) if expects_structured => match serde_json::from_str::<Value>(s) {
            Ok(v) => {
                parsed = v;
                &parsed
            }
            Err(_) => return ValidationOutcome::fail("不是有效的 JSON"),
        },
        other => other,
    };

    match check_schema(schema, target, "$") {
        Some(message) => ValidationOutcome::fail(message),
        None => ValidationOutcome::ok(),
    }
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value
            .as_f64()
            .is_some_and(|n| n.fract() == 0.0),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        // 未知类型不做限制
        _ => true,
    }
}

/// JSON Schema 的常用子集：type enum minLength maxLength pattern minimum maximum
/// required properties items minItems maxItems。其它关键字被忽略。
fn check_schema(schema: &Value, value: &Value, path: &str) -> Option<String> {
    let schema = schema.as_object()?;

    if let Some(expected) = schema.get("type") {
        let ok = match expected {
            Value::String(t) => type_matches(t, value),
            Value::Array(types) => types
                .iter()
                .filter_map(Value::as_str)
                .any(|t| type_matches(t, value)),
            _ => true,
        };
        if !ok {
            return Some(format!("{}: 类型应为 {}", path, value_to_string(expected)));
        }
    }

    if let Some(Value::Array(allowed)) = schema.get("enum") {
        if !allowed.contains(value) {
            return Some(format!("{}: 不在允许的取值范围内", path));
        }
    }

    if let Value::String(s) = value {
        let length = s.chars().count() as u64;
        if let Some(min) = schema.get("minLength").and_then(Value::as_u64) {
            if length < min {
                return Some(format!("{}: 长度不能少于 {}", path, min));
            }
        }
        if let Some(max) = schema.get("maxLength").and_then(Value::as_u64) {
            if length > max {
                return Some(format!("{}: 长度不能超过 {}", path, max));
            }
        }
        if let Some(pattern) = schema.get("pattern").and_then(Value::as_str) {
            match RegexCache::global().get_or_compile(pattern, "") {
                Ok(regex) if !regex.is_match(s) => {
                    return Some(format!("{}: 格式不正确", path));
                }
                _ => {}
            }
        }
    }

    if let Some(n) = value.as_f64() {
        if let Some(min) = schema.get("minimum").and_then(Value::as_f64) {
            if n < min {
                return Some(format!("{}: 不能小于 {}", path, min));
            }
        }
        if let Some(max) = schema.get("maximum").and_then(Value::as_f64) {
            if n > max {
                return Some(format!("{}: 不能大于 {}", path, max));
            }
        }
    }

    if let Value::Object(map) = value {
        if let Some(Value::Array(required)) = schema.get("required") {
            for key in required.iter().filter_map(Value::as_str) {
                if !map.contains_key(key) {
                    return Some(format!("{}: 缺少必填属性 '{}'", path, key));
                }
            }
        }
        if let Some(Value::Object(properties)) = schema.get("properties") {
            for (key, sub_schema) in properties {
                if let Some(sub_value) = map.get(key) {
                    let sub_path = format!("{}.{}", path, key);
                    if let Some(message) = check_schema(sub_schema, sub_value, &sub_path) {
                        return Some(message);
                    }
                }
            }
        }
    }

    if let Value::Array(items) = value {
        let count = items.len() as u64;
        if let Some(min) = schema.get("minItems").and_then(Value::as_u64) {
            if count < min {
                return Some(format!("{}: 至少需要 {} 项", path, min));
            }
        }
        if let Some(max) = schema.get("maxItems").and_then(Value::as_u64) {
            if count > max {
                return Some(format!("{}: 最多允许 {} 项", path, max));
            }
        }
        if let Some(item_schema) = schema.get("items") {
            for (index, item) in items.iter().enumerate() {
                let sub_path = format!("{}[{}]", path, index);
                if let Some(message) = check_schema(item_schema, item, &sub_path) {
                    return Some(message);
                }
            }
        }
    }

    None
}

// ============================================================================
// 数据集校验
// ============================================================================

/// 参与数据集校验的列
#[derive(Debug, Clone)]
pub struct DatasetColumn {
    /// 行对象中的字段名
    pub key: String,
    /// 校验规则
    pub rule: ValidationRule,
    /// 是否为多值列
    pub multi_value: bool,
}

/// 单元格警告
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationWarning {
    /// 行下标（从 0 开始）
    pub row: usize,
    /// 列字段名
    pub column: String,
    /// 原始值
    pub value: Value,
    /// 错误消息
    pub message: String,
}

/// 数据集校验报告
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetValidationReport {
    /// 检查的行数
    pub rows_checked: usize,
    /// 警告列表
    pub warnings: Vec<ValidationWarning>,
}

impl DatasetValidationReport {
    /// 是否没有任何警告
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// 整表校验：逐行逐列检查，问题作为警告收集，不阻断写入
pub fn validate_dataset(rows: &[Value], columns: &[DatasetColumn]) -> DatasetValidationReport {
    let mut report = DatasetValidationReport {
        rows_checked: rows.len(),
        warnings: Vec::new(),
    };

    for (index, row) in rows.iter().enumerate() {
        let Some(fields) = row.as_object() else {
            report.warnings.push(ValidationWarning {
                row: index,
                column: String::new(),
                value: row.clone(),
                message: "行数据不是对象".to_string(),
            });
            continue;
        };

        for column in columns {
            let value = fields.get(&column.key).unwrap_or(&Value::Null);
            let outcome = validate_value(&column.rule, value, column.multi_value);
            if let Some(message) = outcome.error {
                report.warnings.push(ValidationWarning {
                    row: index,
                    column: column.key.clone(),
                    value: value.clone(),
                    message,
                });
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rule(value: Value) -> ValidationRule {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_required() {
        let required = rule(json!({"handler": "required"}));
        assert!(!validate(&required, &Value::Null).valid);
        assert!(!validate(&required, &json!("  ")).valid);
        assert!(!validate(&required, &json!([])).valid);
        assert!(validate(&required, &json!(0)).valid);
        assert!(validate(&required, &json!(false)).valid);
    }

    #[test]
    fn test_non_required_passes_on_empty() {
        let email = rule(json!({"handler": "email"}));
        assert!(validate(&email, &Value::Null).valid);
        assert!(validate(&email, &json!("")).valid);
    }

    #[test]
    fn test_phone_extension() {
        let strict = rule(json!({"handler": "phone", "allowExtension": false}));
        assert!(!validate(&strict, &json!("+1 555 1234 x99")).valid);
        assert!(validate(&strict, &json!("+1 555 1234")).valid);

        let lenient = rule(json!({"handler": "phone"}));
        assert!(validate(&lenient, &json!("+1 555 1234 x99")).valid);
    }

    #[test]
    fn test_phone_country() {
        let us = rule(json!({"handler": "phone", "country": "US"}));
        assert!(validate(&us, &json!("(555) 123-4567")).valid);
        assert!(validate(&us, &json!("+1 555 123 4567")).valid);
        assert!(!validate(&us, &json!("555-1234")).valid);

        let cn = rule(json!({"handler": "phone", "country": "CN"}));
        assert!(validate(&cn, &json!("+86 138 0013 8000")).valid);
        assert!(!validate(&cn, &json!("138 0013 800")).valid);

        assert!(!validate(&us, &json!("call me")).valid);
    }

    #[test]
    fn test_email_and_url() {
        let email = rule(json!({"handler": "email"}));
        assert!(validate(&email, &json!("a@b.io")).valid);
        assert!(!validate(&email, &json!("a@b")).valid);

        let url = rule(json!({"handler": "url"}));
        assert!(validate(&url, &json!("https://example.com/x")).valid);
        assert!(!validate(&url, &json!("ftp://example.com")).valid);
        assert!(!validate(&url, &json!("not a url")).valid);

        let ftp = rule(json!({"handler": "url", "protocols": ["ftp:"]}));
        assert!(validate(&ftp, &json!("ftp://example.com")).valid);
    }

    #[test]
    fn test_range_and_length() {
        let range = rule(json!({"handler": "range", "min": 1, "max": 10}));
        assert!(validate(&range, &json!(5)).valid);
        assert!(validate(&range, &json!("7.5")).valid);
        assert_eq!(
            validate(&range, &json!(11)).error.as_deref(),
            Some("不能大于 10")
        );
        assert!(!validate(&range, &json!("abc")).valid);

        let length = rule(json!({"handler": "length", "max": 3}));
        assert!(validate(&length, &json!("汉字啊")).valid);
        assert!(!validate(&length, &json!("abcd")).valid);
    }

    #[test]
    fn test_regex_rule() {
        let code = rule(json!({"handler": "regex", "pattern": "^[A-Z]{3}$", "message": "需要三位大写字母"}));
        assert!(validate(&code, &json!("ABC")).valid);
        assert_eq!(
            validate(&code, &json!("abc")).error.as_deref(),
            Some("需要三位大写字母")
        );

        let insensitive = rule(json!({"handler": "regex", "pattern": "^[A-Z]{3}$", "flags": "i"}));
        assert!(validate(&insensitive, &json!("abc")).valid);

        let broken = rule(json!({"handler": "regex", "pattern": "("}));
        assert!(!validate(&broken, &json!("x")).valid);
    }

    #[test]
    fn test_enum_rule() {
        let status = rule(json!({"handler": "enum", "values": ["open", "closed"]}));
        assert!(validate(&status, &json!("open")).valid);
        assert!(!validate(&status, &json!("OPEN")).valid);

        let loose = rule(json!({"handler": "enum", "values": ["open"], "caseSensitive": false}));
        assert!(validate(&loose, &json!("OPEN")).valid);
    }

    #[test]
    fn test_composite_all_first_failure_wins() {
        let composite = rule(json!({
            "handler": "composite",
            "mode": "all",
            "rules": [
                {"handler": "length", "min": 5},
                {"handler": "email"}
            ]
        }));
        assert_eq!(
            validate(&composite, &json!("a@b")).error.as_deref(),
            Some("长度不能少于 5 个字符")
        );
        assert!(validate(&composite, &json!("ab@cd.io")).valid);
    }

    #[test]
    fn test_composite_any() {
        let composite = rule(json!({
            "handler": "composite",
            "mode": "any",
            "rules": [
                {"handler": "email"},
                {"handler": "url"}
            ]
        }));
        assert!(validate(&composite, &json!("https://example.com")).valid);
        assert!(validate(&composite, &json!("a@b.io")).valid);
        // 全部失败时返回第一个子规则的错误
        assert_eq!(
            validate(&composite, &json!("nothing")).error.as_deref(),
            Some("请输入有效的电子邮件地址")
        );

        let empty_any = rule(json!({"handler": "composite", "mode": "any", "rules": []}));
        assert!(validate(&empty_any, &json!("x")).valid);
    }

    #[test]
    fn test_multi_value_json_string_matches_array() {
        let status = rule(json!({"handler": "enum", "values": ["a", "b", "c"]}));

        let from_array = validate_multi(&status, &json!(["a", "b"]));
        let from_string = validate_multi(&status, &json!(r#"["a","b"]"#));
        assert!(from_array.valid);
        assert_eq!(from_array, from_string);

        let bad_array = validate_multi(&status, &json!(["a", "z"]));
        let bad_string = validate_multi(&status, &json!(r#"["a","z"]"#));
        assert!(!bad_array.valid);
        assert_eq!(bad_array, bad_string);
        assert!(bad_array.error.unwrap().starts_with("第 2 项"));
    }

    #[test]
    fn test_multi_value_normalisation() {
        assert!(normalize_multi(&Value::Null).is_empty());
        assert!(normalize_multi(&json!("")).is_empty());
        assert_eq!(normalize_multi(&json!("solo")), vec![json!("solo")]);
        assert_eq!(normalize_multi(&json!("[broken")), vec![json!("[broken")]);
        assert_eq!(normalize_multi(&json!(3)), vec![json!(3)]);

        let required = rule(json!({"handler": "required"}));
        assert!(!validate_multi(&required, &json!("[]")).valid);
    }

    #[test]
    fn test_json_schema_subset() {
        let schema = rule(json!({
            "handler": "json-schema",
            "schema": {
                "type": "object",
                "required": ["lat", "lng"],
                "properties": {
                    "lat": {"type": "number", "minimum": -90, "maximum": 90},
                    "lng": {"type": "number"}
                }
            }
        }));

        assert!(validate(&schema, &json!({"lat": 10, "lng": 20})).valid);
        assert!(validate(&schema, &json!(r#"{"lat": 10, "lng": 20}"#)).valid);
        assert!(!validate(&schema, &json!({"lat": 10})).valid);
        assert!(!validate(&schema, &json!({"lat": 100, "lng": 0})).valid);
        assert!(!validate(&schema, &json!("{not json")).valid);
    }

    #[test]
    fn test_validate_dataset_collects_warnings() {
        let columns = vec![
            DatasetColumn {
                key: "email".to_string(),
                rule: rule(json!({"handler": "email"})),
                multi_value: false,
            },
            DatasetColumn {
                key: "tags".to_string(),
                rule: rule(json!({"handler": "enum", "values": ["x", "y"]})),
                multi_value: true,
            },
        ];
        let rows = vec![
            json!({"email": "ok@example.com", "tags": ["x"]}),
            json!({"email": "broken", "tags": "[\"y\", \"q\"]"}),
            json!("not a row"),
        ];

        let report = validate_dataset(&rows, &columns);
        assert_eq!(report.rows_checked, 3);
        assert!(!report.is_clean());
        assert_eq!(report.warnings.len(), 3);
        assert_eq!(report.warnings[0].row, 1);
        assert_eq!(report.warnings[0].column, "email");
        assert_eq!(report.warnings[1].column, "tags");
        assert_eq!(report.warnings[2].row, 2);
    }
}
