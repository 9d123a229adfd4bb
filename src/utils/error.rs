//! 模块系统错误类型定义
//!
//! 本模块定义了模块插件系统中使用的所有错误类型。
//!
//! 生命周期错误在 `ModuleManager` 边界被捕获、持久化到注册表并返回给调用方；
//! 单元格级别的校验、格式化和数据源问题不会以错误形式抛出，而是作为结果值返回。

use thiserror::Error;

use crate::module::state::ModuleStatus;

/// 模块系统核心错误类型
#[derive(Error, Debug)]
pub enum ModuleError {
    // ==================== 生命周期错误 ====================

    /// 模块已安装
    #[error("模块已安装: '{0}'")]
    AlreadyInstalled(String),

    /// 模块未安装
    #[error("模块未安装: '{0}'")]
    NotInstalled(String),

    /// 状态转换不合法
    #[error("模块 '{module_id}' 不允许从 {from} 转换到 {to}")]
    InvalidTransition {
        module_id: String,
        from: ModuleStatus,
        to: ModuleStatus,
    },

    /// 清单获取失败
    #[error("模块清单获取失败: '{source_ref}' - {reason}")]
    ManifestFetch {
        source_ref: String,
        reason: String,
    },

    /// 无效的模块清单
    #[error("无效的模块清单: {0}")]
    InvalidManifest(String),

    /// 模块加载失败
    #[error("模块加载失败: '{module_id}' - {reason}")]
    ModuleLoad {
        module_id: String,
        reason: String,
    },

    /// 生命周期钩子执行失败
    #[error("模块 '{module_id}' 的 {hook} 钩子执行失败: {reason}")]
    ActivationHook {
        module_id: String,
        hook: String,
        reason: String,
    },

    /// 生命周期钩子超时
    #[error("模块 '{module_id}' 的 {hook} 钩子超时 ({timeout_ms}ms)")]
    HookTimeout {
        module_id: String,
        hook: String,
        timeout_ms: u64,
    },

    // ==================== 能力错误 ====================

    /// 列类型未找到
    #[error("列类型未找到: '{0}'")]
    ColumnTypeNotFound(String),

    /// 模块路由未找到
    #[error("模块路由未找到: {method} {path}")]
    RouteNotFound {
        method: String,
        path: String,
    },

    // ==================== 数据源错误 ====================

    /// 设置引用无法解析
    #[error("无法解析设置引用: '$settings.{0}'")]
    SettingResolution(String),

    /// 数据源认证失败
    #[error("数据源认证失败: {0}")]
    DataSourceAuth(String),

    /// 数据源网络错误
    #[error("数据源网络错误: {0}")]
    DataSourceNetwork(String),

    /// 数据源响应结构无效
    #[error("数据源响应结构无效: {0}")]
    InvalidResponseShape(String),

    // ==================== 存储与配置错误 ====================

    /// 存储操作失败
    #[error("存储操作失败: {0}")]
    Storage(String),

    /// 配置加载失败
    #[error("配置加载失败: {0}")]
    ConfigLoadFailed(String),

    /// 初始化失败
    #[error("初始化失败: {0}")]
    InitFailed(String),

    /// 操作超时
    #[error("操作超时: {0}")]
    Timeout(String),

    // ==================== IO 和序列化错误 ====================

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// JSON 序列化/反序列化错误
    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML 序列化/反序列化错误
    #[error("YAML 错误: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// 版本解析错误
    #[error("版本解析错误: {0}")]
    VersionParse(#[from] semver::Error),

    /// 其他错误
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// 模块系统操作结果类型别名
pub type Result<T> = std::result::Result<T, ModuleError>;

/// 状态码常量
pub mod status_code {
    /// 成功
    pub const OK: u16 = 200;

    /// 请求格式错误
    pub const BAD_REQUEST: u16 = 400;

    /// 未授权
    pub const UNAUTHORIZED: u16 = 401;

    /// 未找到
    pub const NOT_FOUND: u16 = 404;

    /// 请求超时
    pub const TIMEOUT: u16 = 408;

    /// 冲突
    pub const CONFLICT: u16 = 409;

    /// 无法处理的实体
    pub const UNPROCESSABLE: u16 = 422;

    /// 内部错误
    pub const INTERNAL_ERROR: u16 = 500;

    /// 上游错误
    pub const BAD_GATEWAY: u16 = 502;
}

/// 错误码常量
pub mod error_code {
    // 模块错误 (MODULE-xxx)
    pub const MODULE_ALREADY_INSTALLED: &str = "MODULE-001";
    pub const MODULE_NOT_INSTALLED: &str = "MODULE-002";
    pub const MODULE_INVALID_TRANSITION: &str = "MODULE-003";
    pub const MODULE_MANIFEST_FETCH: &str = "MODULE-004";
    pub const MODULE_INVALID_MANIFEST: &str = "MODULE-005";
    pub const MODULE_LOAD_FAILED: &str = "MODULE-006";
    pub const MODULE_HOOK_FAILED: &str = "MODULE-007";
    pub const MODULE_HOOK_TIMEOUT: &str = "MODULE-008";
    pub const MODULE_COLUMN_TYPE_NOT_FOUND: &str = "MODULE-009";
    pub const MODULE_ROUTE_NOT_FOUND: &str = "MODULE-010";

    // 数据源错误 (DATASOURCE-xxx)
    pub const DATASOURCE_SETTING_UNRESOLVED: &str = "DATASOURCE-001";
    pub const DATASOURCE_AUTH: &str = "DATASOURCE-002";
    pub const DATASOURCE_NETWORK: &str = "DATASOURCE-003";
    pub const DATASOURCE_RESPONSE_SHAPE: &str = "DATASOURCE-004";

    // 存储错误 (STORAGE-xxx)
    pub const STORAGE_FAILED: &str = "STORAGE-001";

    // 配置错误 (CONFIG-xxx)
    pub const CONFIG_LOAD_FAILED: &str = "CONFIG-001";

    // 超时错误 (TIMEOUT-xxx)
    pub const TIMEOUT: &str = "TIMEOUT-001";
}

impl ModuleError {
    /// 获取错误码
    pub fn error_code(&self) -> &'static str {
        match self {
            ModuleError::AlreadyInstalled(_) => error_code::MODULE_ALREADY_INSTALLED,
            ModuleError::NotInstalled(_) => error_code::MODULE_NOT_INSTALLED,
            ModuleError::InvalidTransition { .. } => error_code::MODULE_INVALID_TRANSITION,
            ModuleError::ManifestFetch { .. } => error_code::MODULE_MANIFEST_FETCH,
            ModuleError::InvalidManifest(_) => error_code::MODULE_INVALID_MANIFEST,
            ModuleError::ModuleLoad { .. } => error_code::MODULE_LOAD_FAILED,
            ModuleError::ActivationHook { .. } => error_code::MODULE_HOOK_FAILED,
            ModuleError::HookTimeout { .. } => error_code::MODULE_HOOK_TIMEOUT,
            ModuleError::ColumnTypeNotFound(_) => error_code::MODULE_COLUMN_TYPE_NOT_FOUND,
            ModuleError::RouteNotFound { .. } => error_code::MODULE_ROUTE_NOT_FOUND,
            ModuleError::SettingResolution(_) => error_code::DATASOURCE_SETTING_UNRESOLVED,
            ModuleError::DataSourceAuth(_) => error_code::DATASOURCE_AUTH,
            ModuleError::DataSourceNetwork(_) => error_code::DATASOURCE_NETWORK,
            ModuleError::InvalidResponseShape(_) => error_code::DATASOURCE_RESPONSE_SHAPE,
            ModuleError::Storage(_) => error_code::STORAGE_FAILED,
            ModuleError::ConfigLoadFailed(_) => error_code::CONFIG_LOAD_FAILED,
            ModuleError::Timeout(_) => error_code::TIMEOUT,
            _ => "UNKNOWN",
        }
    }

    /// 获取 HTTP 状态码
    pub fn status_code(&self) -> u16 {
        match self {
            ModuleError::AlreadyInstalled(_) => status_code::CONFLICT,
            ModuleError::InvalidTransition { .. } => status_code::CONFLICT,
            ModuleError::NotInstalled(_)
            | ModuleError::ColumnTypeNotFound(_)
            | ModuleError::RouteNotFound { .. } => status_code::NOT_FOUND,
            ModuleError::InvalidManifest(_) | ModuleError::SettingResolution(_) => {
                status_code::UNPROCESSABLE
            }
            ModuleError::DataSourceAuth(_) => status_code::UNAUTHORIZED,
            ModuleError::DataSourceNetwork(_)
            | ModuleError::InvalidResponseShape(_)
            | ModuleError::ManifestFetch { .. } => status_code::BAD_GATEWAY,
            ModuleError::Timeout(_) | ModuleError::HookTimeout { .. } => status_code::TIMEOUT,
            _ => status_code::INTERNAL_ERROR,
        }
    }

    /// 是否为生命周期错误（需要持久化到注册表）
    pub fn is_lifecycle_error(&self) -> bool {
        matches!(
            self,
            ModuleError::ManifestFetch { .. }
                | ModuleError::InvalidManifest(_)
                | ModuleError::ModuleLoad { .. }
                | ModuleError::ActivationHook { .. }
                | ModuleError::HookTimeout { .. }
                | ModuleError::Storage(_)
                | ModuleError::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ModuleError::AlreadyInstalled("@vendor/x".to_string());
        assert!(err.to_string().contains("@vendor/x"));
    }

    #[test]
    fn test_transition_error_display() {
        let err = ModuleError::InvalidTransition {
            module_id: "m".to_string(),
            from: ModuleStatus::Installing,
            to: ModuleStatus::Active,
        };
        let message = err.to_string();
        assert!(message.contains("installing"));
        assert!(message.contains("active"));
    }

    #[test]
    fn test_error_code() {
        let err = ModuleError::SettingResolution("apiKey".to_string());
        assert_eq!(err.error_code(), error_code::DATASOURCE_SETTING_UNRESOLVED);
        assert!(err.to_string().contains("$settings.apiKey"));
    }

    #[test]
    fn test_status_code() {
        let err = ModuleError::NotInstalled("m".to_string());
        assert_eq!(err.status_code(), status_code::NOT_FOUND);

        let err = ModuleError::AlreadyInstalled("m".to_string());
        assert_eq!(err.status_code(), status_code::CONFLICT);
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ModuleError = io_err.into();
        assert!(matches!(err, ModuleError::Io(_)));
        assert!(err.is_lifecycle_error());
    }
}
