//! 能力注册表
//!
//! 基于已激活模块的只读投影：列类型、数据生成器、表生成器和 API 路由。
//! 模块贡献的类型以 `<moduleId>:<typeId>` 暴露，内置类型使用裸 ID。

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use super::contract::{
    parse_list_input, ColumnOptions, ColumnType, DataGenerator, Module, TableGenerator,
};
use super::manifest::{ColumnTypeDefinition, DataSourceDefinition};
use crate::handlers::validate::as_number;
use crate::handlers::{
    self, value_to_string, CompositeMode, DatasetColumn, DatasetValidationReport,
    FormatRule, GenerationRule, ValidationOutcome, ValidationRule,
};
use crate::utils::{ModuleError, Result};

/// 内置列类型 ID
pub const BUILTIN_TYPES: [&str; 11] = [
    "text",
    "number",
    "email",
    "phone",
    "url",
    "date",
    "boolean",
    "select",
    "multi_select",
    "currency",
    "percentage",
];

/// 拼出模块列类型的完整 ID
pub fn qualified_id(module_id: &str, type_id: &str) -> String {
    format!("{}:{}", module_id, type_id)
}

/// 拆分完整 ID，内置类型返回 `(None, id)`
pub fn split_type_id(id: &str) -> (Option<&str>, &str) {
    match id.split_once(':') {
        Some((module_id, type_id)) => (Some(module_id), type_id),
        None => (None, id),
    }
}

/// 内置列类型的默认生成规则
pub fn builtin_generation(type_id: &str) -> Option<GenerationRule> {
    let rule = match type_id {
        "text" => GenerationRule::Lorem { words: 3 },
        "number" => GenerationRule::Number {
            min: 0.0,
            max: 1000.0,
            decimals: 0,
        },
        "email" => GenerationRule::Email {
            domains: vec!["example.com".to_string()],
        },
        "phone" => GenerationRule::Phone { country: None },
        "url" => GenerationRule::Pattern {
            pattern: "https://example.com/******".to_string(),
        },
        "date" => GenerationRule::Date {
            from: None,
            to: None,
            format: "YYYY-MM-DD".to_string(),
        },
        "boolean" => GenerationRule::Boolean { probability: 0.5 },
        "currency" => GenerationRule::Number {
            min: 0.0,
            max: 10000.0,
            decimals: 2,
        },
        "percentage" => GenerationRule::Number {
            min: 0.0,
            max: 1.0,
            decimals: 2,
        },
        _ => return None,
    };
    Some(rule)
}

// ============================================================================
// 内置列类型
// ============================================================================

/// 内置列类型，规则由列选项参数化
#[derive(Debug, Clone)]
pub struct BuiltinColumnType {
    definition: ColumnTypeDefinition,
}

fn opt_str<'a>(options: &'a ColumnOptions, key: &str) -> Option<&'a str> {
    options.get(key).and_then(Value::as_str)
}

fn opt_f64(options: &ColumnOptions, key: &str) -> Option<f64> {
    options.get(key).and_then(Value::as_f64)
}

fn opt_u32(options: &ColumnOptions, key: &str) -> Option<u32> {
    options
        .get(key)
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok())
}

/// `choices` 选项：值列表或 `{value, label}` 对象列表
fn choices(options: &ColumnOptions) -> Vec<Value> {
    options
        .get("choices")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|item| item.get("value").cloned().unwrap_or_else(|| item.clone()))
                .collect()
        })
        .unwrap_or_default()
}

impl BuiltinColumnType {
    /// 创建内置类型，ID 不在 [`BUILTIN_TYPES`] 中时返回 `None`
    pub fn new(type_id: &str) -> Option<Self> {
        let (name, category) = match type_id {
            "text" => ("Text", "basic"),
            "number" => ("Number", "basic"),
            "email" => ("Email", "contact"),
            "phone" => ("Phone", "contact"),
            "url" => ("URL", "contact"),
            "date" => ("Date", "basic"),
            "boolean" => ("Checkbox", "basic"),
            "select" => ("Select", "choice"),
            "multi_select" => ("Multi Select", "choice"),
            "currency" => ("Currency", "number"),
            "percentage" => ("Percentage", "number"),
            _ => return None,
        };
        let mut definition = ColumnTypeDefinition::new(type_id, name);
        definition.category = category.to_string();
        definition.multi_value = type_id == "multi_select";
        definition.generation = builtin_generation(type_id);
        Some(Self { definition })
    }

    fn type_rule(&self, options: &ColumnOptions) -> Option<ValidationRule> {
        let rule = match self.definition.id.as_str() {
            "text" => {
                let max = options
                    .get("maxLength")
                    .and_then(Value::as_u64)
                    .map(|n| n as usize);
                max.map(|max| ValidationRule::Length { min: None, max: Some(max) })?
            }
            "number" | "currency" | "percentage" => ValidationRule::Range {
                min: opt_f64(options, "min"),
                max: opt_f64(options, "max"),
            },
            "email" => ValidationRule::Email,
            "phone" => ValidationRule::Phone {
                country: opt_str(options, "country").map(str::to_string),
                allow_extension: options
                    .get("allowExtension")
                    .and_then(Value::as_bool)
                    .unwrap_or(true),
            },
            "url" => ValidationRule::Url {
                protocols: vec!["http".to_string(), "https".to_string()],
            },
            "date" => ValidationRule::Regex {
                pattern: r"^\d{4}-\d{2}-\d{2}([T ]\d{2}:\d{2}(:\d{2})?.*)?$".to_string(),
                flags: None,
                message: Some("请输入有效的日期".to_string()),
            },
            "boolean" => ValidationRule::Enum {
                values: vec![Value::from("true"), Value::from("false")],
                case_sensitive: false,
            },
            "select" | "multi_select" => {
                let values = choices(options);
                if values.is_empty() {
                    return None;
                }
                ValidationRule::Enum {
                    values,
                    case_sensitive: true,
                }
            }
            _ => return None,
        };
        Some(rule)
    }

    fn format_rule(&self, options: &ColumnOptions) -> Option<FormatRule> {
        match self.definition.id.as_str() {
            "number" => Some(FormatRule::Number {
                decimals: opt_u32(options, "decimals"),
                thousands_separator: ",".to_string(),
            }),
            "currency" => Some(FormatRule::Currency {
                symbol: opt_str(options, "symbol").unwrap_or("$").to_string(),
                decimals: opt_u32(options, "decimals").unwrap_or(2),
                thousands_separator: ",".to_string(),
                symbol_after: options
                    .get("symbolAfter")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            }),
            "percentage" => Some(FormatRule::Percentage {
                decimals: opt_u32(options, "decimals").unwrap_or(0),
                multiply: options.get("multiply").and_then(Value::as_bool).unwrap_or(true),
            }),
            "phone" => Some(FormatRule::Phone {
                country: opt_str(options, "country").map(str::to_string),
            }),
            "date" => Some(FormatRule::Date {
                format: opt_str(options, "format").unwrap_or("YYYY-MM-DD").to_string(),
            }),
            _ => None,
        }
    }
}

impl ColumnType for BuiltinColumnType {
    fn definition(&self) -> &ColumnTypeDefinition {
        &self.definition
    }

    fn validate(&self, value: &Value, options: &ColumnOptions) -> ValidationOutcome {
        match self.validation_rule(options) {
            Some(rule) => handlers::validate_value(&rule, value, self.definition.multi_value),
            None => ValidationOutcome::ok(),
        }
    }

    fn format(&self, value: &Value, options: &ColumnOptions) -> String {
        let rule = self.format_rule(options);
        let format_one = |v: &Value| match rule {
            Some(ref rule) => handlers::format(rule, v),
            None => value_to_string(v),
        };
        if self.definition.multi_value {
            handlers::normalize_multi(value)
                .iter()
                .map(format_one)
                .collect::<Vec<_>>()
                .join(", ")
        } else {
            format_one(value)
        }
    }

    fn parse(&self, input: &str, _options: &ColumnOptions) -> Value {
        let trimmed = input.trim();
        if self.definition.multi_value {
            return parse_list_input(trimmed);
        }
        if trimmed.is_empty() {
            return Value::Null;
        }
        match self.definition.id.as_str() {
            "number" | "currency" | "percentage" => {
                let cleaned: String = trimmed
                    .chars()
                    .filter(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | 'e' | 'E'))
                    .collect();
                let scale = if self.definition.id == "percentage" && trimmed.ends_with('%') {
                    100.0
                } else {
                    1.0
                };
                as_number(&Value::String(cleaned))
                    .and_then(|n| serde_json::Number::from_f64(n / scale))
                    .map_or_else(|| Value::String(trimmed.to_string()), Value::Number)
            }
            "boolean" => match trimmed.to_ascii_lowercase().as_str() {
                "true" | "yes" | "y" | "1" => Value::Bool(true),
                "false" | "no" | "n" | "0" => Value::Bool(false),
                _ => Value::String(trimmed.to_string()),
            },
            _ => Value::String(trimmed.to_string()),
        }
    }

    fn default_value(&self, options: &ColumnOptions) -> Value {
        match options.get("default") {
            Some(value) => value.clone(),
            None if self.definition.id == "boolean" => Value::Bool(false),
            None if self.definition.multi_value => Value::Array(Vec::new()),
            None => Value::Null,
        }
    }

    fn validation_rule(&self, options: &ColumnOptions) -> Option<ValidationRule> {
        let required = options.get("required").and_then(Value::as_bool).unwrap_or(false);
        let rule = self.type_rule(options);
        if !required {
            return rule;
        }
        let required_rule = ValidationRule::Required { message: None };
        Some(match rule {
            Some(rule) => ValidationRule::Composite {
                rules: vec![required_rule, rule],
                mode: CompositeMode::All,
            },
            None => required_rule,
        })
    }
}

// ============================================================================
// 注册表
// ============================================================================

/// 列类型摘要
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnTypeInfo {
    /// 完整 ID
    pub id: String,
    /// 所属模块，内置类型为空
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_id: Option<String>,
    /// 定义
    pub definition: ColumnTypeDefinition,
}

/// 模块路由
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteEntry {
    /// 所属模块
    pub module_id: String,
    /// 方法（大写）
    pub method: String,
    /// 路径
    pub path: String,
    /// 描述
    pub description: String,
}

/// 整表校验时的列配置
#[derive(Debug, Clone)]
pub struct ColumnSpec {
    /// 行对象中的字段名
    pub key: String,
    /// 列类型 ID
    pub type_id: String,
    /// 列选项
    pub options: ColumnOptions,
}

struct ColumnEntry {
    module_id: Option<String>,
    column_type: Arc<dyn ColumnType>,
}

/// 能力注册表
#[derive(Default)]
pub struct CapabilityRegistry {
    column_types: BTreeMap<String, ColumnEntry>,
    data_generators: BTreeMap<String, Arc<dyn DataGenerator>>,
    table_generators: BTreeMap<String, Arc<dyn TableGenerator>>,
    routes: Vec<RouteEntry>,
}

impl CapabilityRegistry {
    /// 只包含内置列类型
    pub fn builtin() -> Self {
        let mut registry = Self::default();
        for type_id in BUILTIN_TYPES {
            if let Some(column_type) = BuiltinColumnType::new(type_id) {
                registry.column_types.insert(
                    type_id.to_string(),
                    ColumnEntry {
                        module_id: None,
                        column_type: Arc::new(column_type),
                    },
                );
            }
        }
        registry
    }

    /// 内置类型加上各模块贡献的能力
    pub fn from_modules<'a, I>(modules: I) -> Self
    where
        I: IntoIterator<Item = &'a Arc<dyn Module>>,
    {
        let mut registry = Self::builtin();
        for module in modules {
            registry.add_module(module.as_ref());
        }
        registry
    }

    fn add_module(&mut self, module: &dyn Module) {
        let module_id = module.manifest().id.clone();

        for column_type in module.column_types() {
            let id = qualified_id(&module_id, &column_type.definition().id);
            self.column_types.insert(
                id,
                ColumnEntry {
                    module_id: Some(module_id.clone()),
                    column_type,
                },
            );
        }
        for generator in module.data_generators() {
            let id = qualified_id(&module_id, &generator.definition().id);
            self.data_generators.insert(id, generator);
        }
        for generator in module.table_generators() {
            let id = qualified_id(&module_id, &generator.definition().id);
            self.table_generators.insert(id, generator);
        }
        for route in &module.manifest().api_routes {
            self.routes.push(RouteEntry {
                module_id: module_id.clone(),
                method: route.method.to_ascii_uppercase(),
                path: route.path.clone(),
                description: route.description.clone(),
            });
        }
    }

    /// 查找列类型
    pub fn column_type(&self, id: &str) -> Option<Arc<dyn ColumnType>> {
        self.column_types.get(id).map(|e| e.column_type.clone())
    }

    /// 列类型是否存在
    pub fn has_column_type(&self, id: &str) -> bool {
        self.column_types.contains_key(id)
    }

    /// 全部列类型 ID（排序）
    pub fn column_type_ids(&self) -> Vec<String> {
        self.column_types.keys().cloned().collect()
    }

    /// 全部列类型摘要
    pub fn column_types(&self) -> Vec<ColumnTypeInfo> {
        self.column_types
            .iter()
            .map(|(id, entry)| ColumnTypeInfo {
                id: id.clone(),
                module_id: entry.module_id.clone(),
                definition: entry.column_type.definition().clone(),
            })
            .collect()
    }

    /// 列类型的数据源
    pub fn data_source(&self, id: &str) -> Option<DataSourceDefinition> {
        self.column_types
            .get(id)
            .and_then(|e| e.column_type.definition().data_source.clone())
    }

    fn require(&self, id: &str) -> Result<Arc<dyn ColumnType>> {
        self.column_type(id)
            .ok_or_else(|| ModuleError::ColumnTypeNotFound(id.to_string()))
    }

    /// 校验单元格值
    pub fn validate(&self, id: &str, value: &Value, options: &ColumnOptions) -> Result<ValidationOutcome> {
        Ok(self.require(id)?.validate(value, options))
    }

    /// 格式化单元格值
    pub fn format(&self, id: &str, value: &Value, options: &ColumnOptions) -> Result<String> {
        Ok(self.require(id)?.format(value, options))
    }

    /// 解析用户输入
    pub fn parse(&self, id: &str, input: &str, options: &ColumnOptions) -> Result<Value> {
        Ok(self.require(id)?.parse(input, options))
    }

    /// 查找数据生成器
    pub fn generator(&self, id: &str) -> Option<Arc<dyn DataGenerator>> {
        self.data_generators.get(id).cloned()
    }

    /// 全部数据生成器 ID
    pub fn generator_ids(&self) -> Vec<String> {
        self.data_generators.keys().cloned().collect()
    }

    /// 查找表生成器
    pub fn table_generator(&self, id: &str) -> Option<Arc<dyn TableGenerator>> {
        self.table_generators.get(id).cloned()
    }

    /// 全部表生成器 ID
    pub fn table_generator_ids(&self) -> Vec<String> {
        self.table_generators.keys().cloned().collect()
    }

    /// 全部模块路由
    pub fn routes(&self) -> &[RouteEntry] {
        &self.routes
    }

    /// 查找模块路由
    pub fn find_route(&self, module_id: &str, method: &str, path: &str) -> Option<&RouteEntry> {
        self.routes.iter().find(|r| {
            r.module_id == module_id && r.method.eq_ignore_ascii_case(method) && r.path == path
        })
    }

    /// 把列配置转换为整表校验使用的列，没有校验规则的列被跳过
    pub fn dataset_columns(&self, columns: &[ColumnSpec]) -> Result<Vec<DatasetColumn>> {
        let mut dataset = Vec::with_capacity(columns.len());
        for column in columns {
            let column_type = self.require(&column.type_id)?;
            if let Some(rule) = column_type.validation_rule(&column.options) {
                dataset.push(DatasetColumn {
                    key: column.key.clone(),
                    rule,
                    multi_value: column_type.definition().multi_value,
                });
            }
        }
        Ok(dataset)
    }

    /// 整表校验（只产生警告）
    pub fn validate_rows(&self, rows: &[Value], columns: &[ColumnSpec]) -> Result<DatasetValidationReport> {
        let dataset = self.dataset_columns(columns)?;
        Ok(handlers::validate_dataset(rows, &dataset))
    }
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("column_types", &self.column_types.keys().collect::<Vec<_>>())
            .field("data_generators", &self.data_generators.keys().collect::<Vec<_>>())
            .field("table_generators", &self.table_generators.keys().collect::<Vec<_>>())
            .field("routes", &self.routes)
            .finish()
    }
}
