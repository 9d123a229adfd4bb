//! # Table Modules - 数据表模块插件系统
//!
//! 多租户数据表引擎的模块插件系统。第三方模块包可以贡献自定义列类型、
//! 测试数据生成器和额外的 API 路由，核心功能：
//!
//! - **生命周期状态机**: 安装、激活、停用、重载、更新、卸载，所有转换由固定的转换表约束
//! - **进程级实例缓存**: 同一进程的多个请求共享已激活实例，三态标志保证只有一个请求执行初始化
//! - **处理器库**: 校验、格式化与生成规则，可安全地由不受信任的模块声明
//! - **数据源解析**: 静态列表或远程 API，支持设置引用、认证和缓存
//! - **执行上下文**: 按模块命名空间隔离的数据库、缓存、存储、HTTP、日志、事件和分析
//!
//! ## 快速开始
//!
//! ```rust,no_run
//! use table_modules::{ModulePlatform, ModuleSource, PlatformConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let platform = ModulePlatform::new(PlatformConfig::default()).await?;
//!
//!     // 每个请求一个管理器
//!     let manager = platform.request_scope();
//!     manager.initialize().await;
//!
//!     let caps = manager.capabilities().await;
//!     for column_type in caps.column_types() {
//!         println!("{}", column_type.id);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## 模块结构
//!
//! - `module` - 模块清单、状态机、注册表、加载器、上下文和管理器
//! - `handlers` - 校验、格式化与生成规则
//! - `datasource` - 列类型数据源解析
//! - `core` - 平台配置
//! - `api` - 平台入口
//! - `utils` - 错误类型、ID 生成和日志

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod api;
pub mod core;
pub mod datasource;
pub mod handlers;
pub mod module;
pub mod utils;

// 重导出常用类型，方便使用
pub use api::{ModulePlatform, ModulePlatformBuilder, OptionsResponse};

pub use module::{
    CapabilityRegistry, ColumnType, InstallResult, InstalledModule, Module, ModuleContext,
    ModuleFactory, ModuleManager, ModuleManifest, ModuleRegistry, ModuleSource, ModuleStatus,
    UpdateResult,
};

pub use handlers::{FormatRule, GenerationRule, ValidationOutcome, ValidationRule};
pub use datasource::{DataSourceResolver, OptionItem, ResolvedOptions};

pub use utils::{error_code, generate_uuid, status_code, ModuleError, Result};
pub use utils::logger::{LogGuard, Logger, LoggerConfig, LoggerConfigBuilder, RotationStrategy};

pub use core::config::{Environment, LogConfig, ModulesConfig, PlatformConfig, PlatformConfigBuilder};

/// 库版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
