//! 规则定义
//!
//! 校验、格式化和生成规则都是封闭枚举，以 `handler` 字段区分种类：
//!
//! ```json
//! {"handler": "phone", "country": "US", "allowExtension": false}
//! {"handler": "composite", "mode": "any", "rules": [{"handler": "email"}, {"handler": "url"}]}
//! ```
//!
//! 组合规则直接持有子规则，构造上不存在环。

use serde::{Deserialize, Serialize};
use serde_json::Value;

fn default_true() -> bool {
    true
}

fn default_protocols() -> Vec<String> {
    vec!["http".to_string(), "https".to_string()]
}

/// 组合规则的求值方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompositeMode {
    /// 全部通过；第一个失败的子规则决定错误
    #[default]
    All,
    /// 任一通过；全部失败时返回第一个子规则的错误
    Any,
}

/// 校验规则
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "handler", rename_all = "kebab-case")]
pub enum ValidationRule {
    /// 非空
    Required {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// 正则匹配，`flags` 支持 `i` `m` `s` `x`
    Regex {
        pattern: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        flags: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// 电话号码，按国家位数表检查
    #[serde(rename_all = "camelCase")]
    Phone {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        country: Option<String>,
        #[serde(default = "default_true")]
        allow_extension: bool,
    },
    /// 电子邮件
    Email,
    /// URL，协议限定在 `protocols` 内
    Url {
        #[serde(default = "default_protocols")]
        protocols: Vec<String>,
    },
    /// 数值范围（闭区间）
    Range {
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
    /// 字符串长度（按字符计）
    Length {
        #[serde(default)]
        min: Option<usize>,
        #[serde(default)]
        max: Option<usize>,
    },
    /// 枚举成员
    #[serde(rename_all = "camelCase")]
    Enum {
        values: Vec<Value>,
        #[serde(default = "default_true")]
        case_sensitive: bool,
    },
    /// JSON Schema 的常用子集
    JsonSchema { schema: Value },
    /// 组合规则
    Composite {
        rules: Vec<ValidationRule>,
        #[serde(default)]
        mode: CompositeMode,
    },
}

impl ValidationRule {
    /// 规则名（即 `handler` 字段的值）
    pub fn handler_name(&self) -> &'static str {
        match self {
            ValidationRule::Required { .. } => "required",
            ValidationRule::Regex { .. } => "regex",
            ValidationRule::Phone { .. } => "phone",
            ValidationRule::Email => "email",
            ValidationRule::Url { .. } => "url",
            ValidationRule::Range { .. } => "range",
            ValidationRule::Length { .. } => "length",
            ValidationRule::Enum { .. } => "enum",
            ValidationRule::JsonSchema { .. } => "json-schema",
            ValidationRule::Composite { .. } => "composite",
        }
    }

    /// 规则（含子规则）是否要求非空
    pub fn is_required(&self) -> bool {
        match self {
            ValidationRule::Required { .. } => true,
            ValidationRule::Composite {
                rules,
                mode: CompositeMode::All,
            } => rules.iter().any(ValidationRule::is_required),
            ValidationRule::Composite {
                rules,
                mode: CompositeMode::Any,
            } => !rules.is_empty() && rules.iter().all(ValidationRule::is_required),
            _ => false,
        }
    }
}

/// 格式化规则
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "handler", rename_all = "kebab-case")]
pub enum FormatRule {
    /// 电话号码模板
    Phone {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        country: Option<String>,
    },
    /// 货币
    #[serde(rename_all = "camelCase")]
    Currency {
        #[serde(default = "default_currency_symbol")]
        symbol: String,
        #[serde(default = "default_currency_decimals")]
        decimals: u32,
        #[serde(default = "default_thousands_separator")]
        thousands_separator: String,
        #[serde(default)]
        symbol_after: bool,
    },
    /// 百分比，`multiply` 为 true 时先乘以 100
    Percentage {
        #[serde(default)]
        decimals: u32,
        #[serde(default)]
        multiply: bool,
    },
    /// 数字分组
    #[serde(rename_all = "camelCase")]
    Number {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        decimals: Option<u32>,
        #[serde(default = "default_thousands_separator")]
        thousands_separator: String,
    },
    /// 日期，格式使用 `YYYY YY MM DD HH mm ss` 记号
    Date {
        #[serde(default = "default_date_format")]
        format: String,
    },
    /// 转大写
    Uppercase,
    /// 转小写
    Lowercase,
    /// 首字母大写
    Capitalize,
    /// 模板，`{value}` 替换为原值
    Template { template: String },
    /// 截断
    Truncate {
        length: usize,
        #[serde(default = "default_truncate_suffix")]
        suffix: String,
    },
    /// 依次应用子规则
    Composite { rules: Vec<FormatRule> },
}

fn default_currency_symbol() -> String {
    "$".to_string()
}

fn default_currency_decimals() -> u32 {
    2
}

fn default_thousands_separator() -> String {
    ",".to_string()
}

pub(crate) fn default_date_format() -> String {
    "YYYY-MM-DD".to_string()
}

fn default_truncate_suffix() -> String {
    "...".to_string()
}

/// 生成规则
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "handler", rename_all = "kebab-case")]
pub enum GenerationRule {
    /// UUID v4
    Uuid,
    /// 递增序列，值为 `prefix + 补零后的 (start + 行号)`
    Sequence {
        #[serde(default)]
        prefix: String,
        #[serde(default = "default_sequence_start")]
        start: u64,
        #[serde(default)]
        padding: usize,
    },
    /// 模式：`#` 数字，`?` 大写字母，`*` 字母或数字，其它字符原样输出
    Pattern { pattern: String },
    /// 数值区间
    Number {
        #[serde(default)]
        min: f64,
        #[serde(default = "default_number_max")]
        max: f64,
        #[serde(default)]
        decimals: u32,
    },
    /// 从列表中随机选择
    Pick { values: Vec<Value> },
    /// 布尔值，`probability` 为 true 的概率
    Boolean {
        #[serde(default = "default_probability")]
        probability: f64,
    },
    /// 日期区间（`YYYY-MM-DD`）
    Date {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<String>,
        #[serde(default = "default_date_format")]
        format: String,
    },
    /// 电话号码
    Phone {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        country: Option<String>,
    },
    /// 电子邮件
    Email {
        #[serde(default = "default_email_domains")]
        domains: Vec<String>,
    },
    /// 占位文本
    Lorem {
        #[serde(default = "default_lorem_words")]
        words: usize,
    },
    /// 组合，子规则结果以 `separator` 连接
    Composite {
        rules: Vec<GenerationRule>,
        #[serde(default = "default_separator")]
        separator: String,
    },
}

fn default_sequence_start() -> u64 {
    1
}

fn default_number_max() -> f64 {
    100.0
}

fn default_probability() -> f64 {
    0.5
}

fn default_email_domains() -> Vec<String> {
    vec!["example.com".to_string()]
}

fn default_lorem_words() -> usize {
    5
}

fn default_separator() -> String {
    " ".to_string()
}

/// 单个值的校验结果
///
/// 校验从不失败，问题以 `valid == false` 和错误消息表示。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    /// 是否通过
    pub valid: bool,
    /// 错误消息
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ValidationOutcome {
    /// 通过
    pub fn ok() -> Self {
        Self {
            valid: true,
            error: None,
        }
    }

    /// 失败
    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            error: Some(message.into()),
        }
    }

    /// 为错误消息添加前缀
    pub fn with_prefix(self, prefix: &str) -> Self {
        match self.error {
            Some(message) => Self::fail(format!("{}: {}", prefix, message)),
            None => self,
        }
    }
}
