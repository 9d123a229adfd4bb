//! 平台配置
//!
//! 定义模块平台的配置结构和加载逻辑。配置文件可以是 YAML 或 JSON（按扩展名判断）。

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::utils::{ModuleError, Result};

/// 运行环境
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// 开发环境
    Development,
    /// 生产环境
    #[default]
    Production,
    /// 测试环境
    Test,
}

impl Environment {
    /// 是否为开发环境
    pub fn is_development(&self) -> bool {
        matches!(self, Environment::Development)
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: String,

    /// 是否输出到文件
    #[serde(default)]
    pub file_output: bool,

    /// 日志文件目录
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// 是否输出 JSON 格式
    #[serde(default)]
    pub json_format: bool,

    /// 日志轮转策略
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: false,
            log_dir: None,
            json_format: false,
            rotation: default_rotation(),
        }
    }
}

/// 模块系统配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModulesConfig {
    /// 模块包安装目录（资源文件按模块 ID 存放在其下）
    #[serde(default = "default_install_dir")]
    pub install_dir: PathBuf,

    /// 注册表持久化文件（CLI 使用）
    #[serde(default = "default_registry_file")]
    pub registry_file: PathBuf,

    /// 生命周期钩子超时（毫秒）
    #[serde(default = "default_timeout_ms")]
    pub hook_timeout_ms: u64,

    /// 数据源出站请求超时（毫秒）
    #[serde(default = "default_timeout_ms")]
    pub http_timeout_ms: u64,

    /// 远程模块包的默认仓库地址
    #[serde(default = "default_registry_url")]
    pub default_registry_url: String,
}

fn default_install_dir() -> PathBuf {
    PathBuf::from("./data/modules")
}

fn default_registry_file() -> PathBuf {
    PathBuf::from("./data/registry.json")
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_registry_url() -> String {
    "https://modules.example.com".to_string()
}

impl Default for ModulesConfig {
    fn default() -> Self {
        Self {
            install_dir: default_install_dir(),
            registry_file: default_registry_file(),
            hook_timeout_ms: default_timeout_ms(),
            http_timeout_ms: default_timeout_ms(),
            default_registry_url: default_registry_url(),
        }
    }
}

impl ModulesConfig {
    /// 钩子超时
    pub fn hook_timeout(&self) -> Duration {
        Duration::from_millis(self.hook_timeout_ms)
    }

    /// 出站请求超时
    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }
}

fn default_platform_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// 平台配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// 配置文件路径
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    /// 日志配置
    #[serde(default)]
    pub logging: LogConfig,

    /// 模块系统配置
    #[serde(default)]
    pub modules: ModulesConfig,

    /// 运行环境
    #[serde(default)]
    pub environment: Environment,

    /// 平台版本（用于检查模块的 minPlatformVersion）
    #[serde(default = "default_platform_version")]
    pub platform_version: String,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            config_path: None,
            logging: LogConfig::default(),
            modules: ModulesConfig::default(),
            environment: Environment::default(),
            platform_version: default_platform_version(),
        }
    }
}

impl PlatformConfig {
    /// 创建配置构建器
    pub fn builder() -> PlatformConfigBuilder {
        PlatformConfigBuilder::default()
    }

    /// 从文件加载配置
    pub async fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            ModuleError::ConfigLoadFailed(format!("{}: {}", path.display(), e))
        })?;

        let mut config: PlatformConfig = if path.extension().is_some_and(|e| e == "json") {
            serde_json::from_str(&content)?
        } else {
            serde_yaml::from_str(&content)?
        };

        config.validate()?;
        config.config_path = Some(path);
        Ok(config)
    }

    /// 检查配置取值
    pub fn validate(&self) -> Result<()> {
        if self.modules.hook_timeout_ms == 0 || self.modules.http_timeout_ms == 0 {
            return Err(ModuleError::ConfigLoadFailed(
                "超时时间必须大于 0".to_string(),
            ));
        }
        semver::Version::parse(&self.platform_version).map_err(|e| {
            ModuleError::ConfigLoadFailed(format!(
                "platform_version '{}' 无效: {}",
                self.platform_version, e
            ))
        })?;
        Ok(())
    }

    /// 合并另一个配置（只覆盖非默认值）
    pub fn merge(&mut self, other: PlatformConfig) {
        if other.logging.level != default_log_level() {
            self.logging.level = other.logging.level;
        }
        if other.logging.file_output {
            self.logging.file_output = true;
            self.logging.log_dir = other.logging.log_dir;
        }
        if other.logging.json_format {
            self.logging.json_format = true;
        }
        if other.modules.install_dir != default_install_dir() {
            self.modules.install_dir = other.modules.install_dir;
        }
        if other.modules.registry_file != default_registry_file() {
            self.modules.registry_file = other.modules.registry_file;
        }
        if other.modules.hook_timeout_ms != default_timeout_ms() {
            self.modules.hook_timeout_ms = other.modules.hook_timeout_ms;
        }
        if other.modules.http_timeout_ms != default_timeout_ms() {
            self.modules.http_timeout_ms = other.modules.http_timeout_ms;
        }
        if other.modules.default_registry_url != default_registry_url() {
            self.modules.default_registry_url = other.modules.default_registry_url;
        }
        if other.environment != Environment::default() {
            self.environment = other.environment;
        }
        if other.platform_version != default_platform_version() {
            self.platform_version = other.platform_version;
        }
    }
}

/// 配置构建器
#[derive(Debug, Default)]
pub struct PlatformConfigBuilder {
    config: PlatformConfig,
}

impl PlatformConfigBuilder {
    /// 设置日志级别
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    /// 启用文件日志
    pub fn file_logging(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.config.logging.file_output = true;
        self.config.logging.log_dir = Some(log_dir.into());
        self
    }

    /// 启用 JSON 格式日志
    pub fn json_logging(mut self) -> Self {
        self.config.logging.json_format = true;
        self
    }

    /// 设置模块安装目录
    pub fn install_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.modules.install_dir = dir.into();
        self
    }

    /// 设置注册表文件
    pub fn registry_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.modules.registry_file = path.into();
        self
    }

    /// 设置钩子超时（毫秒）
    pub fn hook_timeout_ms(mut self, ms: u64) -> Self {
        self.config.modules.hook_timeout_ms = ms;
        self
    }

    /// 设置出站请求超时（毫秒）
    pub fn http_timeout_ms(mut self, ms: u64) -> Self {
        self.config.modules.http_timeout_ms = ms;
        self
    }

    /// 设置默认模块仓库
    pub fn default_registry_url(mut self, url: impl Into<String>) -> Self {
        self.config.modules.default_registry_url = url.into();
        self
    }

    /// 设置运行环境
    pub fn environment(mut self, environment: Environment) -> Self {
        self.config.environment = environment;
        self
    }

    /// 设置平台版本
    pub fn platform_version(mut self, version: impl Into<String>) -> Self {
        self.config.platform_version = version.into();
        self
    }

    /// 构建配置
    pub fn build(self) -> PlatformConfig {
        self.config
    }
}
