//! 模块契约
//!
//! 编译进宿主的模块实现 [`Module`] 并通过加载器注册工厂；只有清单、
//! 没有代码的模块包由 [`ManifestModule`] 执行，它的列类型通过处理器库
//! 求值清单中声明的规则。

use std::sync::Arc;

use async_trait::async_trait;
use rand::RngCore;
use serde_json::{Map, Value};

use super::context::ModuleContext;
use super::manifest::{
    ColumnTypeDefinition, DataGeneratorDefinition, ModuleManifest, TableGeneratorDefinition,
};
use crate::handlers::{
    self, normalize_multi, value_to_string, GenerationRule, ValidationOutcome, ValidationRule,
};
use crate::utils::{ModuleError, Result};

/// 列选项（列级配置，如 `required`、`default`）
pub type ColumnOptions = Map<String, Value>;

/// 模块
///
/// 生命周期钩子都是可选的，默认什么都不做。钩子在监督下运行：
/// 超时会被中止，panic 会被转换为错误。
#[async_trait]
pub trait Module: Send + Sync {
    /// 模块清单
    fn manifest(&self) -> &ModuleManifest;

    /// 激活
    async fn on_activate(&self, _ctx: &ModuleContext) -> Result<()> {
        Ok(())
    }

    /// 停用
    async fn on_deactivate(&self, _ctx: &ModuleContext) -> Result<()> {
        Ok(())
    }

    /// 升级，在新版本的 `on_activate` 之前调用
    async fn on_upgrade(&self, _ctx: &ModuleContext, _from_version: &str) -> Result<()> {
        Ok(())
    }

    /// 卸载
    async fn on_uninstall(&self, _ctx: &ModuleContext) -> Result<()> {
        Ok(())
    }

    /// 贡献的列类型，默认由清单声明生成
    fn column_types(&self) -> Vec<Arc<dyn ColumnType>> {
        declarative_column_types(self.manifest())
    }

    /// 贡献的数据生成器，默认由清单声明生成
    fn data_generators(&self) -> Vec<Arc<dyn DataGenerator>> {
        self.manifest()
            .data_generators
            .iter()
            .cloned()
            .map(|d| Arc::new(DeclarativeDataGenerator::new(d)) as Arc<dyn DataGenerator>)
            .collect()
    }

    /// 贡献的表生成器，默认由清单声明生成
    fn table_generators(&self) -> Vec<Arc<dyn TableGenerator>> {
        self.manifest()
            .table_generators
            .iter()
            .cloned()
            .map(|d| Arc::new(DeclarativeTableGenerator::new(d)) as Arc<dyn TableGenerator>)
            .collect()
    }

    /// 处理模块贡献的 API 路由
    async fn handle_route(
        &self,
        _ctx: &ModuleContext,
        method: &str,
        path: &str,
        _body: Value,
    ) -> Result<Value> {
        Err(ModuleError::RouteNotFound {
            method: method.to_string(),
            path: path.to_string(),
        })
    }
}

/// 列类型
pub trait ColumnType: Send + Sync {
    /// 定义
    fn definition(&self) -> &ColumnTypeDefinition;

    /// 校验单元格值
    fn validate(&self, value: &Value, options: &ColumnOptions) -> ValidationOutcome;

    /// 格式化为展示文本
    fn format(&self, value: &Value, options: &ColumnOptions) -> String;

    /// 把用户输入解析为存储值
    fn parse(&self, input: &str, options: &ColumnOptions) -> Value;

    /// 新单元格的默认值
    fn default_value(&self, options: &ColumnOptions) -> Value {
        options.get("default").cloned().unwrap_or(Value::Null)
    }

    /// 实际生效的校验规则，用于整表校验
    fn validation_rule(&self, _options: &ColumnOptions) -> Option<ValidationRule> {
        None
    }
}

/// 数据生成器
pub trait DataGenerator: Send + Sync {
    /// 定义
    fn definition(&self) -> &DataGeneratorDefinition;

    /// 生成第 `index` 个值
    fn generate(&self, rng: &mut dyn RngCore, index: u64) -> Value;
}

/// 表生成器
pub trait TableGenerator: Send + Sync {
    /// 定义
    fn definition(&self) -> &TableGeneratorDefinition;

    /// 生成 `rows` 行，每行是以列字段名为键的对象
    fn generate(&self, rows: usize, rng: &mut dyn RngCore) -> Vec<Value>;
}

// ============================================================================
// 声明式实现
// ============================================================================

/// 清单中声明的列类型
#[derive(Debug, Clone)]
pub struct DeclarativeColumnType {
    definition: ColumnTypeDefinition,
}

impl DeclarativeColumnType {
    /// 由定义创建
    pub fn new(definition: ColumnTypeDefinition) -> Self {
        Self { definition }
    }

    fn is_required(&self, options: &ColumnOptions) -> bool {
        options.get("required").and_then(Value::as_bool).unwrap_or(false)
    }
}

impl ColumnType for DeclarativeColumnType {
    fn definition(&self) -> &ColumnTypeDefinition {
        &self.definition
    }

    fn validate(&self, value: &Value, options: &ColumnOptions) -> ValidationOutcome {
        match self.validation_rule(options) {
            Some(rule) => handlers::validate_value(&rule, value, self.definition.multi_value),
            None => ValidationOutcome::ok(),
        }
    }

    fn format(&self, value: &Value, _options: &ColumnOptions) -> String {
        let format_one = |v: &Value| match self.definition.format {
            Some(ref rule) => handlers::format(rule, v),
            None => value_to_string(v),
        };

        if self.definition.multi_value {
            normalize_multi(value)
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
        if !self.definition.multi_value {
            return if trimmed.is_empty() {
                Value::Null
            } else {
                Value::String(trimmed.to_string())
            };
        }

        parse_list_input(trimmed)
    }

    fn default_value(&self, options: &ColumnOptions) -> Value {
        if let Some(value) = options.get("default") {
            return value.clone();
        }
        let declared = self
            .definition
            .options
            .iter()
            .find(|o| o.key == "default")
            .and_then(|o| o.default.clone());
        match declared {
            Some(value) => value,
            None if self.definition.multi_value => Value::Array(Vec::new()),
            None => Value::Null,
        }
    }

    fn validation_rule(&self, options: &ColumnOptions) -> Option<ValidationRule> {
        let declared = self.definition.validation.clone();
        if !self.is_required(options) || declared.as_ref().is_some_and(ValidationRule::is_required) {
            return declared;
        }
        let required = ValidationRule::Required { message: None };
        Some(match declared {
            Some(rule) => ValidationRule::Composite {
                rules: vec![required, rule],
                mode: handlers::CompositeMode::All,
            },
            None => required,
        })
    }
}

/// 清单中声明的数据生成器
#[derive(Debug, Clone)]
pub struct DeclarativeDataGenerator {
    definition: DataGeneratorDefinition,
}

impl DeclarativeDataGenerator {
    /// 由定义创建
    pub fn new(definition: DataGeneratorDefinition) -> Self {
        Self { definition }
    }
}

impl DataGenerator for DeclarativeDataGenerator {
    fn definition(&self) -> &DataGeneratorDefinition {
        &self.definition
    }

    fn generate(&self, rng: &mut dyn RngCore, index: u64) -> Value {
        handlers::generate(&self.definition.generation, rng, index)
    }
}

/// 清单中声明的表生成器
///
/// 列没有生成规则时按内置列类型的默认规则生成，都没有时为 null。
#[derive(Debug, Clone)]
pub struct DeclarativeTableGenerator {
    definition: TableGeneratorDefinition,
}

impl DeclarativeTableGenerator {
    /// 由定义创建
    pub fn new(definition: TableGeneratorDefinition) -> Self {
        Self { definition }
    }
}

impl TableGenerator for DeclarativeTableGenerator {
    fn definition(&self) -> &TableGeneratorDefinition {
        &self.definition
    }

    fn generate(&self, rows: usize, rng: &mut dyn RngCore) -> Vec<Value> {
        let rules: Vec<Option<GenerationRule>> = self
            .definition
            .columns
            .iter()
            .map(|c| {
                c.generation
                    .clone()
                    .or_else(|| super::capabilities::builtin_generation(&c.column_type))
            })
            .collect();

        (0..rows as u64)
            .map(|index| {
                let row: Map<String, Value> = self
                    .definition
                    .columns
                    .iter()
                    .zip(&rules)
                    .map(|(column, rule)| {
                        let value = rule
                            .as_ref()
                            .map_or(Value::Null, |r| handlers::generate(r, rng, index));
                        (column.key.clone(), value)
                    })
                    .collect();
                Value::Object(row)
            })
            .collect()
    }
}

/// 多值输入：JSON 数组文本按数组解析，否则按逗号拆分
pub(crate) fn parse_list_input(input: &str) -> Value {
    let trimmed = input.trim();
    if trimmed.starts_with('[') {
        let items = normalize_multi(&Value::String(trimmed.to_string()));
        if !matches!(items.as_slice(), [Value::String(s)] if s == trimmed) {
            return Value::Array(items);
        }
    }
    Value::Array(
        trimmed
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| Value::String(s.to_string()))
            .collect(),
    )
}

/// 由清单声明创建列类型
pub fn declarative_column_types(manifest: &ModuleManifest) -> Vec<Arc<dyn ColumnType>> {
    manifest
        .column_types
        .iter()
        .cloned()
        .map(|d| Arc::new(DeclarativeColumnType::new(d)) as Arc<dyn ColumnType>)
        .collect()
}

/// 只有清单的模块
#[derive(Debug, Clone)]
pub struct ManifestModule {
    manifest: ModuleManifest,
}

impl ManifestModule {
    /// 由清单创建
    pub fn new(manifest: ModuleManifest) -> Self {
        Self { manifest }
    }
}

#[async_trait]
impl Module for ManifestModule {
    fn manifest(&self) -> &ModuleManifest {
        &self.manifest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::manifest::TableColumnTemplate;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::json;

    fn options(value: Value) -> ColumnOptions {
        value.as_object().cloned().unwrap_or_default()
    }

    fn tags_type() -> DeclarativeColumnType {
        let mut definition = ColumnTypeDefinition::new("tags", "Tags");
        definition.multi_value = true;
        definition.validation = Some(ValidationRule::Length {
            min: Some(2),
            max: Some(10),
        });
        definition.format = Some(crate::handlers::FormatRule::Uppercase);
        DeclarativeColumnType::new(definition)
    }

    #[test]
    fn test_multi_value_column() {
        let column = tags_type();
        let none = ColumnOptions::new();

        assert!(column.validate(&json!(["ab", "cd"]), &none).valid);
        assert!(column.validate(&json!(r#"["ab","cd"]"#), &none).valid);
        let outcome = column.validate(&json!(["ab", "c"]), &none);
        assert!(outcome.error.unwrap().starts_with("第 2 项"));

        assert_eq!(column.format(&json!(["ab", "cd"]), &none), "AB, CD");
        assert_eq!(column.parse("ab, cd ,", &none), json!(["ab", "cd"]));
        assert_eq!(column.parse(r#"["x","y"]"#, &none), json!(["x", "y"]));
        assert_eq!(column.default_value(&none), json!([]));
    }

    #[test]
    fn test_required_option_adds_rule() {
        let column = DeclarativeColumnType::new(ColumnTypeDefinition::new("note", "Note"));
        let required = options(json!({"required": true}));

        assert!(column.validate(&Value::Null, &ColumnOptions::new()).valid);
        assert!(!column.validate(&Value::Null, &required).valid);
        assert_eq!(
            column.validation_rule(&required),
            Some(ValidationRule::Required { message: None })
        );
        assert_eq!(column.parse("  ", &required), Value::Null);
        assert_eq!(
            column.default_value(&options(json!({"default": "n/a"}))),
            json!("n/a")
        );
    }

    #[test]
    fn test_table_generator_falls_back_to_builtin_rules() {
        let generator = DeclarativeTableGenerator::new(TableGeneratorDefinition {
            id: "contacts".to_string(),
            display_name: "Contacts".to_string(),
            description: String::new(),
            columns: vec![
                TableColumnTemplate {
                    key: "code".to_string(),
                    label: "Code".to_string(),
                    column_type: "text".to_string(),
                    generation: Some(GenerationRule::Sequence {
                        prefix: "C".to_string(),
                        start: 1,
                        padding: 3,
                    }),
                },
                TableColumnTemplate {
                    key: "email".to_string(),
                    label: "Email".to_string(),
                    column_type: "email".to_string(),
                    generation: None,
                },
                TableColumnTemplate {
                    key: "custom".to_string(),
                    label: "Custom".to_string(),
                    column_type: "@vendor/x:code".to_string(),
                    generation: None,
                },
            ],
            default_rows: 10,
        });

        let rows = generator.generate(3, &mut StdRng::seed_from_u64(7));
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2]["code"], json!("C003"));
        assert!(rows[0]["email"].as_str().unwrap().contains('@'));
        assert_eq!(rows[0]["custom"], Value::Null);
    }

    #[tokio::test]
    async fn test_manifest_module_defaults() {
        let mut manifest = ModuleManifest::new("@vendor/x", "X", "1.0.0");
        manifest.column_types.push(ColumnTypeDefinition::new("code", "Code"));
        manifest.data_generators.push(DataGeneratorDefinition {
            id: "sku".to_string(),
            display_name: "SKU".to_string(),
            description: String::new(),
            generation: GenerationRule::Pattern {
                pattern: "SKU-###".to_string(),
            },
        });
        let module = ManifestModule::new(manifest);

        assert_eq!(module.column_types().len(), 1);
        let generators = module.data_generators();
        let value = generators[0].generate(&mut StdRng::seed_from_u64(1), 0);
        assert!(value.as_str().unwrap().starts_with("SKU-"));
        assert!(module.table_generators().is_empty());
    }
}
