//! 模块清单
//!
//! 定义模块包描述文件（module.yaml / module.json / manifest.json）中的数据结构，
//! 以及清单校验和版本比较。某个版本的清单获取后即不可变，更新时重新获取。

use regex::Regex;
use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use crate::handlers::{FormatRule, GenerationRule, ValidationRule};
use crate::utils::{ModuleError, Result};

/// 模块 ID 格式：允许 npm 风格的 `@scope/name`，`@` 之后必须跟字母或数字
static MODULE_ID_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@?[A-Za-z0-9][A-Za-z0-9@/._-]*$").expect("Invalid module id regex")
});

/// 模块设置
pub type Settings = serde_json::Map<String, Value>;

/// 模块清单
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleManifest {
    /// 模块唯一标识
    pub id: String,

    /// 显示名称
    pub name: String,

    /// 版本（major.minor.patch）
    pub version: String,

    /// 作者
    #[serde(default)]
    pub author: String,

    /// 描述
    #[serde(default)]
    pub description: String,

    /// 贡献的列类型
    #[serde(default)]
    pub column_types: Vec<ColumnTypeDefinition>,

    /// 贡献的数据生成器
    #[serde(default)]
    pub data_generators: Vec<DataGeneratorDefinition>,

    /// 贡献的表生成器
    #[serde(default)]
    pub table_generators: Vec<TableGeneratorDefinition>,

    /// 设置项定义
    #[serde(default)]
    pub settings_schema: Vec<SettingDefinition>,

    /// 贡献的 API 路由
    #[serde(default)]
    pub api_routes: Vec<ApiRouteDefinition>,

    /// 安装时需要下载的资源文件（相对路径）
    #[serde(default)]
    pub assets: Vec<String>,

    /// 主页
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,

    /// 许可证
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,

    /// 要求的平台版本（semver 范围）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_platform_version: Option<String>,
}

/// 列类型定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnTypeDefinition {
    /// 模块内唯一的类型 ID（不含模块前缀）
    pub id: String,

    /// 显示名称
    pub display_name: String,

    /// 分类
    #[serde(default = "default_category")]
    pub category: String,

    /// 描述
    #[serde(default)]
    pub description: String,

    /// 图标
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,

    /// 列选项定义
    #[serde(default)]
    pub options: Vec<ColumnOptionDefinition>,

    /// 校验规则
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationRule>,

    /// 格式化规则
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<FormatRule>,

    /// 生成规则
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<GenerationRule>,

    /// 可选值数据源
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_source: Option<DataSourceDefinition>,

    /// 是否为多值列
    #[serde(default)]
    pub multi_value: bool,
}

fn default_category() -> String {
    "custom".to_string()
}

impl ColumnTypeDefinition {
    /// 创建最简定义
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            category: default_category(),
            description: String::new(),
            icon: None,
            options: Vec::new(),
            validation: None,
            format: None,
            generation: None,
            data_source: None,
            multi_value: false,
        }
    }
}

/// 列选项定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnOptionDefinition {
    /// 选项键
    pub key: String,

    /// 显示名称
    pub label: String,

    /// 选项值类型
    #[serde(rename = "type", default = "default_option_type")]
    pub kind: String,

    /// 默认值
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    /// 是否必填
    #[serde(default)]
    pub required: bool,
}

fn default_option_type() -> String {
    "string".to_string()
}

/// 数据生成器定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataGeneratorDefinition {
    /// 模块内唯一 ID
    pub id: String,

    /// 显示名称
    pub display_name: String,

    /// 描述
    #[serde(default)]
    pub description: String,

    /// 生成规则
    pub generation: GenerationRule,
}

/// 表生成器中的列
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableColumnTemplate {
    /// 字段名
    pub key: String,

    /// 显示名称
    pub label: String,

    /// 列类型 ID（内置类型或 `moduleId:typeId`）
    pub column_type: String,

    /// 生成规则
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<GenerationRule>,
}

/// 表生成器定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableGeneratorDefinition {
    /// 模块内唯一 ID
    pub id: String,

    /// 显示名称
    pub display_name: String,

    /// 描述
    #[serde(default)]
    pub description: String,

    /// 列模板
    #[serde(default)]
    pub columns: Vec<TableColumnTemplate>,

    /// 默认行数
    #[serde(default = "default_row_count")]
    pub default_rows: usize,
}

fn default_row_count() -> usize {
    10
}

/// 设置项类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingKind {
    /// 字符串
    #[default]
    String,
    /// 数字
    Number,
    /// 布尔
    Boolean,
    /// 密钥（展示时隐藏）
    Secret,
    /// 单选
    Select,
}

/// 设置项定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingDefinition {
    /// 设置键
    pub key: String,

    /// 显示名称
    pub label: String,

    /// 类型
    #[serde(rename = "type", default)]
    pub kind: SettingKind,

    /// 默认值
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    /// 是否必填
    #[serde(default)]
    pub required: bool,

    /// 描述
    #[serde(default)]
    pub description: String,

    /// 可选值（select 类型）
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<Value>,
}

/// API 路由定义
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiRouteDefinition {
    /// HTTP 方法
    pub method: String,

    /// 路径（相对于模块路由前缀，以 `/` 开头）
    pub path: String,

    /// 描述
    #[serde(default)]
    pub description: String,
}

// ============================================================================
// 数据源定义
// ============================================================================

/// 数据源种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSourceKind {
    /// 清单内的静态列表
    Static,
    /// 远程 API
    Api,
}

/// 认证方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthKind {
    /// `Authorization: Bearer <token>`
    Bearer,
    /// `Authorization: Basic base64(username:password)`
    Basic,
    /// 自定义请求头
    Header,
}

/// 数据源认证配置，字符串值可以是 `$settings.<key>` 引用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceAuth {
    /// 认证方式
    #[serde(rename = "type")]
    pub kind: AuthKind,

    /// 令牌（bearer / header）或密码（basic）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// 自定义请求头名（header）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_name: Option<String>,

    /// 用户名（basic）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// 密码（basic），缺省时使用 `token`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// 缓存设置：`true` 表示默认 TTL，字符串为 TTL（如 `"5m"`）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CacheSetting {
    /// 开关
    Enabled(bool),
    /// TTL
    Ttl(String),
}

/// 响应结构
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseSchema {
    /// 点分路径，数字段表示数组下标
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_path: Option<String>,
}

/// 数据源定义（只读）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceDefinition {
    /// 种类
    #[serde(rename = "type")]
    pub kind: DataSourceKind,

    /// 静态值
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<Value>>,

    /// API 地址
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// HTTP 方法（默认 GET）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    /// 请求头
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    /// 认证
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<DataSourceAuth>,

    /// 缓存
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheSetting>,

    /// 响应结构
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<ResponseSchema>,

    /// 值字段
    #[serde(default = "default_value_field")]
    pub value_field: String,

    /// 标签字段
    #[serde(default = "default_label_field")]
    pub label_field: String,
}

fn default_value_field() -> String {
    "value".to_string()
}

fn default_label_field() -> String {
    "label".to_string()
}

impl DataSourceDefinition {
    /// 静态数据源
    pub fn static_values(values: Vec<Value>) -> Self {
        Self {
            kind: DataSourceKind::Static,
            values: Some(values),
            endpoint: None,
            method: None,
            headers: BTreeMap::new(),
            auth: None,
            cache: None,
            response_schema: None,
            value_field: default_value_field(),
            label_field: default_label_field(),
        }
    }

    /// API 数据源
    pub fn api(endpoint: impl Into<String>) -> Self {
        Self {
            kind: DataSourceKind::Api,
            endpoint: Some(endpoint.into()),
            values: None,
            ..Self::static_values(Vec::new())
        }
    }
}

// ============================================================================
// 模块来源
// ============================================================================

/// 模块包来源
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ModuleSource {
    /// 编译进宿主、由加载器注册的模块
    Bundled { id: String },
    /// 本地目录（包含 module.yaml 或 module.json）
    Local { path: PathBuf },
    /// 远程仓库中的包
    Remote {
        package: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        registry: Option<String>,
    },
}

impl std::fmt::Display for ModuleSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModuleSource::Bundled { id } => write!(f, "bundled:{}", id),
            ModuleSource::Local { path } => write!(f, "local:{}", path.display()),
            ModuleSource::Remote { package, registry } => match registry {
                Some(registry) => write!(f, "remote:{}@{}", package, registry),
                None => write!(f, "remote:{}", package),
            },
        }
    }
}

// ============================================================================
// 解析与校验
// ============================================================================

impl ModuleManifest {
    /// 创建最简清单
    pub fn new(id: impl Into<String>, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: version.into(),
            author: String::new(),
            description: String::new(),
            column_types: Vec::new(),
            data_generators: Vec::new(),
            table_generators: Vec::new(),
            settings_schema: Vec::new(),
            api_routes: Vec::new(),
            assets: Vec::new(),
            homepage: None,
            license: None,
            min_platform_version: None,
        }
    }

    /// 从 YAML 字符串解析并校验
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let manifest: ModuleManifest = serde_yaml::from_str(content)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// 从 JSON 字符串解析并校验
    pub fn from_json_str(content: &str) -> Result<Self> {
        let manifest: ModuleManifest = serde_json::from_str(content)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// 从文件解析，`.json` 按 JSON 处理，其它按 YAML 处理
    pub async fn from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        if path.extension().is_some_and(|e| e == "json") {
            Self::from_json_str(&content)
        } else {
            Self::from_yaml_str(&content)
        }
    }

    /// 查找列类型定义
    pub fn column_type(&self, type_id: &str) -> Option<&ColumnTypeDefinition> {
        self.column_types.iter().find(|t| t.id == type_id)
    }

    /// 由设置项默认值组成的初始设置
    pub fn default_settings(&self) -> Settings {
        self.settings_schema
            .iter()
            .filter_map(|s| s.default.clone().map(|v| (s.key.clone(), v)))
            .collect()
    }

    /// 检查平台版本是否满足 `minPlatformVersion`
    pub fn check_platform(&self, platform_version: &str) -> Result<()> {
        let Some(ref requirement) = self.min_platform_version else {
            return Ok(());
        };
        let req = VersionReq::parse(requirement)?;
        let platform = Version::parse(platform_version)?;
        if req.matches(&platform) {
            Ok(())
        } else {
            Err(ModuleError::InvalidManifest(format!(
                "模块 '{}' 要求平台版本 {}，当前为 {}",
                self.id, requirement, platform_version
            )))
        }
    }

    /// 校验清单，所有问题合并为一个 `InvalidManifest` 错误
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if self.id.is_empty() {
            errors.push("模块 ID 不能为空".to_string());
        } else if !MODULE_ID_REGEX.is_match(&self.id) {
            errors.push(format!("模块 ID '{}' 格式无效", self.id));
        }

        if self.name.trim().is_empty() {
            errors.push("模块名称不能为空".to_string());
        }

        if Version::parse(&self.version).is_err() {
            errors.push(format!(
                "无效的版本号格式 '{}'，请使用 major.minor.patch",
                self.version
            ));
        }

        if let Some(ref requirement) = self.min_platform_version {
            if VersionReq::parse(requirement).is_err() {
                errors.push(format!("minPlatformVersion 格式无效: '{}'", requirement));
            }
        }

        check_unique(
            "列类型",
            self.column_types.iter().map(|t| t.id.as_str()),
            &mut errors,
        );
        check_unique(
            "数据生成器",
            self.data_generators.iter().map(|g| g.id.as_str()),
            &mut errors,
        );
        check_unique(
            "表生成器",
            self.table_generators.iter().map(|g| g.id.as_str()),
            &mut errors,
        );
        check_unique(
            "设置项",
            self.settings_schema.iter().map(|s| s.key.as_str()),
            &mut errors,
        );

        for column_type in &self.column_types {
            if column_type.id.contains(':') {
                errors.push(format!("列类型 ID '{}' 不能包含 ':'", column_type.id));
            }
            if let Some(ref source) = column_type.data_source {
                match source.kind {
                    DataSourceKind::Api if source.endpoint.as_deref().map_or(true, str::is_empty) => {
                        errors.push(format!("列类型 '{}' 的 API 数据源缺少 endpoint", column_type.id));
                    }
                    DataSourceKind::Static if source.values.is_none() => {
                        errors.push(format!("列类型 '{}' 的静态数据源缺少 values", column_type.id));
                    }
                    _ => {}
                }
            }
        }

        for route in &self.api_routes {
            let method = route.method.to_ascii_uppercase();
            if !matches!(method.as_str(), "GET" | "POST" | "PUT" | "PATCH" | "DELETE") {
                errors.push(format!("不支持的路由方法: '{}'", route.method));
            }
            if !route.path.starts_with('/') {
                errors.push(format!("路由路径必须以 '/' 开头: '{}'", route.path));
            }
        }

        for asset in &self.assets {
            if !is_safe_relative_path(asset) {
                errors.push(format!("资源路径无效: '{}'", asset));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ModuleError::InvalidManifest(errors.join("; ")))
        }
    }
}

fn check_unique<'a>(kind: &str, ids: impl Iterator<Item = &'a str>, errors: &mut Vec<String>) {
    let mut seen = HashSet::new();
    for id in ids {
        if id.is_empty() {
            errors.push(format!("{} ID 不能为空", kind));
        } else if !seen.insert(id) {
            errors.push(format!("{} ID '{}' 重复", kind, id));
        }
    }
}

/// 只允许不含 `..` 的相对路径
pub(crate) fn is_safe_relative_path(path: &str) -> bool {
    let path = Path::new(path);
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// 逐段按数字比较版本号（`1.10.0 > 1.9.0`），预发布后缀被忽略
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    fn components(v: &str) -> Vec<u64> {
        let core = v.trim().trim_start_matches('v');
        let core = core.split(['-', '+']).next().unwrap_or("");
        core.split('.')
            .map(|part| part.parse::<u64>().unwrap_or(0))
            .collect()
    }

    let (a, b) = (components(a), components(b));
    let len = a.len().max(b.len());
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const MANIFEST_YAML: &str = r#"
id: "@vendor/x"
name: Vendor X
version: 1.2.0
author: Vendor
columnTypes:
  - id: code
    displayName: Code
    validation:
      handler: regex
      pattern: "^[A-Z]{3}$"
    format:
      handler: uppercase
  - id: country
    displayName: Country
    multiValue: true
    dataSource:
      type: api
      endpoint: "https://api.example.com/countries?key=$settings.apiKey"
      cache: 5m
      responseSchema:
        dataPath: data.items
      valueField: code
      labelField: name
settingsSchema:
  - key: apiKey
    label: API Key
    type: secret
    required: true
  - key: region
    label: Region
    default: eu
"#;

    #[test]
    fn test_parse_yaml_manifest() {
        let manifest = ModuleManifest::from_yaml_str(MANIFEST_YAML).unwrap();

        assert_eq!(manifest.id, "@vendor/x");
        assert_eq!(manifest.column_types.len(), 2);

        let country = manifest.column_type("country").unwrap();
        assert!(country.multi_value);
        let source = country.data_source.as_ref().unwrap();
        assert_eq!(source.kind, DataSourceKind::Api);
        assert_eq!(source.cache, Some(CacheSetting::Ttl("5m".to_string())));
        assert_eq!(source.value_field, "code");
        assert_eq!(
            source.response_schema.as_ref().unwrap().data_path.as_deref(),
            Some("data.items")
        );

        let defaults = manifest.default_settings();
        assert_eq!(defaults.get("region"), Some(&json!("eu")));
        assert!(!defaults.contains_key("apiKey"));
    }

    #[test]
    fn test_cache_setting_bool() {
        let source: DataSourceDefinition = serde_json::from_value(json!({
            "type": "static",
            "values": ["a"],
            "cache": true
        }))
        .unwrap();
        assert_eq!(source.cache, Some(CacheSetting::Enabled(true)));
        assert_eq!(source.value_field, "value");
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let mut manifest = ModuleManifest::new("", "", "1.0");
        manifest.column_types.push(ColumnTypeDefinition::new("dup", "A"));
        manifest.column_types.push(ColumnTypeDefinition::new("dup", "B"));
        let mut api = ColumnTypeDefinition::new("remote", "Remote");
        api.data_source = Some(DataSourceDefinition::api(""));
        manifest.column_types.push(api);
        manifest.assets.push("../etc/passwd".to_string());

        let err = manifest.validate().unwrap_err();
        let message = err.to_string();
        assert!(matches!(err, ModuleError::InvalidManifest(_)));
        assert!(message.contains("模块 ID 不能为空"));
        assert!(message.contains("模块名称不能为空"));
        assert!(message.contains("1.0"));
        assert!(message.contains("'dup' 重复"));
        assert!(message.contains("endpoint"));
        assert!(message.contains("../etc/passwd"));
    }

    #[test]
    fn test_module_id_format() {
        for id in ["crm", "@vendor/x", "geo.tools", "a_b-c"] {
            assert!(ModuleManifest::new(id, "N", "1.0.0").validate().is_ok(), "{}", id);
        }
        for id in ["-bad", "has space", "/root", "@", "@/", "@@x"] {
            assert!(ModuleManifest::new(id, "N", "1.0.0").validate().is_err(), "{}", id);
        }
    }

    #[test]
    fn test_check_platform() {
        let mut manifest = ModuleManifest::new("m", "M", "1.0.0");
        assert!(manifest.check_platform("0.1.0").is_ok());

        manifest.min_platform_version = Some(">=2.0.0".to_string());
        assert!(manifest.check_platform("2.3.1").is_ok());
        assert!(matches!(
            manifest.check_platform("1.9.9"),
            Err(ModuleError::InvalidManifest(_))
        ));
    }

    #[test]
    fn test_compare_versions_numeric() {
        assert_eq!(compare_versions("1.10.0", "1.9.0"), Ordering::Greater);
        assert_eq!(compare_versions("2.0", "2.0.0"), Ordering::Equal);
        assert_eq!(compare_versions("v1.2.3", "1.2.4"), Ordering::Less);
        assert_eq!(compare_versions("1.2.3-beta", "1.2.3"), Ordering::Equal);
    }

    #[test]
    fn test_module_source_serde() {
        let source: ModuleSource =
            serde_json::from_value(json!({"type": "remote", "package": "@vendor/x"})).unwrap();
        assert_eq!(
            source,
            ModuleSource::Remote {
                package: "@vendor/x".to_string(),
                registry: None
            }
        );
        assert_eq!(source.to_string(), "remote:@vendor/x");

        let local = ModuleSource::Local {
            path: PathBuf::from("/opt/mods/x"),
        };
        assert_eq!(local.to_string(), "local:/opt/mods/x");
    }

    #[test]
    fn test_safe_relative_path() {
        assert!(is_safe_relative_path("icons/logo.svg"));
        assert!(is_safe_relative_path("./readme.md"));
        assert!(!is_safe_relative_path("/etc/passwd"));
        assert!(!is_safe_relative_path("a/../../b"));
        assert!(!is_safe_relative_path(""));
    }
}
