//! 模块平台
//!
//! 持有跨请求共享的组件（注册表、加载器、包来源、实例缓存、上下文工厂、
//! 数据源解析器、事件总线和配置），并为每个请求创建新的 [`ModuleManager`]。
//!
//! # 示例
//!
//! ```rust,no_run
//! use table_modules::{ModulePlatform, ModuleSource, PlatformConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PlatformConfig::builder()
//!         .install_dir("./modules")
//!         .registry_file("./modules/registry.json")
//!         .build();
//!     let platform = ModulePlatform::new(config).await?;
//!
//!     let manager = platform.request_scope();
//!     manager.initialize().await;
//!     let result = manager
//!         .install(ModuleSource::Local { path: "./geo-tools".into() })
//!         .await;
//!     if let Some(id) = result.module_id {
//!         manager.activate(&id).await?;
//!     }
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::core::config::PlatformConfig;
use crate::datasource::{DataSourceResolver, OptionItem};
use crate::module::context::{ContextFactory, ModuleEnv};
use crate::module::events::EventBus;
use crate::module::instance_cache::InstanceCache;
use crate::module::loader::{ModuleFactory, ModuleLoader, PackageSource, PackageStore};
use crate::module::manager::{ManagerServices, ModuleManager};
use crate::module::platform::{HttpClient, PlatformServices, ReqwestHttpClient};
use crate::module::registry::{LocalRegistry, ModuleRegistry};
use crate::module::supervisor::HookSupervisor;
use crate::utils::Result;

/// 列类型可选值接口的响应
///
/// 数据源失败不会让接口失败，而是返回空列表和错误信息。
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionsResponse {
    /// 选项
    pub options: Vec<OptionItem>,
    /// 列类型是否多值
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multi_value: Option<bool>,
    /// 是否来自缓存
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached: Option<bool>,
    /// 错误信息
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 模块平台
pub struct ModulePlatform {
    config: PlatformConfig,
    services: ManagerServices,
    platform_services: PlatformServices,
    events: EventBus,
}

impl ModulePlatform {
    /// 按配置创建平台：JSON 文件注册表、reqwest 客户端、内存平台能力
    ///
    /// # Errors
    ///
    /// 注册表文件无法读取或 HTTP 客户端无法创建时返回错误
    pub async fn new(config: PlatformConfig) -> Result<Self> {
        let registry = LocalRegistry::json_file(&config.modules.registry_file).await?;
        Self::builder(config).registry(Arc::new(registry)).build()
    }

    /// 创建构建器
    pub fn builder(config: PlatformConfig) -> ModulePlatformBuilder {
        ModulePlatformBuilder {
            config,
            registry: None,
            packages: None,
            http: None,
            platform_services: None,
            loader: None,
        }
    }

    /// 为一个请求创建管理器
    ///
    /// 所有管理器共享同一个进程级实例缓存，各自持有本地实例表。
    pub fn request_scope(&self) -> ModuleManager {
        ModuleManager::new(self.services.clone())
    }

    /// 注册内置模块工厂，返回模块 ID
    pub async fn register_bundled(&self, factory: Arc<dyn ModuleFactory>) -> String {
        self.services.loader.register(factory).await
    }

    /// 平台配置
    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    /// 共享组件
    pub fn services(&self) -> &ManagerServices {
        &self.services
    }

    /// 注入给模块的平台能力
    pub fn platform_services(&self) -> &PlatformServices {
        &self.platform_services
    }

    /// 事件总线
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// 进程级实例缓存
    pub fn instance_cache(&self) -> &Arc<InstanceCache> {
        &self.services.cache
    }

    /// 列类型可选值接口
    ///
    /// 对应 `GET /.../modules/{moduleId}/column-types/{columnTypeId}/options`。
    pub async fn column_type_options(&self, module_id: &str, type_id: &str) -> OptionsResponse {
        let manager = self.request_scope();
        manager.initialize().await;

        match manager.column_type_options(module_id, type_id).await {
            Ok(resolved) => OptionsResponse {
                options: resolved.options,
                multi_value: Some(resolved.multi_value),
                cached: Some(resolved.cached),
                error: None,
            },
            Err(e) => {
                warn!(module_id = %module_id, type_id = %type_id, error = %e, "获取列类型选项失败");
                OptionsResponse {
                    options: Vec::new(),
                    multi_value: None,
                    cached: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

impl std::fmt::Debug for ModulePlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModulePlatform")
            .field("config", &self.config)
            .field("services", &self.services)
            .finish_non_exhaustive()
    }
}

/// 平台构建器
///
/// 未提供的组件使用默认实现：内存注册表、配置目录下的包存储、
/// reqwest 客户端和内存平台能力。
pub struct ModulePlatformBuilder {
    config: PlatformConfig,
    registry: Option<Arc<dyn ModuleRegistry>>,
    packages: Option<Arc<dyn PackageSource>>,
    http: Option<Arc<dyn HttpClient>>,
    platform_services: Option<PlatformServices>,
    loader: Option<Arc<ModuleLoader>>,
}

impl ModulePlatformBuilder {
    /// 设置注册表
    pub fn registry(mut self, registry: Arc<dyn ModuleRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// 设置包来源
    pub fn packages(mut self, packages: Arc<dyn PackageSource>) -> Self {
        self.packages = Some(packages);
        self
    }

    /// 设置出站 HTTP 客户端
    pub fn http(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = Some(http);
        self
    }

    /// 设置注入给模块的平台能力
    pub fn platform_services(mut self, services: PlatformServices) -> Self {
        self.platform_services = Some(services);
        self
    }

    /// 设置加载器（包来源需要与平台共用同一个加载器）
    pub fn loader(mut self, loader: Arc<ModuleLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// 构建平台
    ///
    /// # Errors
    ///
    /// 需要默认 HTTP 客户端但无法创建时返回错误
    pub fn build(self) -> Result<ModulePlatform> {
        let config = self.config;
        let modules = &config.modules;

        let http: Arc<dyn HttpClient> = match (self.http, &self.platform_services) {
            (Some(http), _) => http,
            (None, Some(services)) => services.http.clone(),
            (None, None) => Arc::new(ReqwestHttpClient::new(modules.http_timeout())?),
        };
        let platform_services = self
            .platform_services
            .unwrap_or_else(|| PlatformServices::in_memory(http.clone()));
        let loader = self.loader.unwrap_or_default();
        let packages = self.packages.unwrap_or_else(|| {
            Arc::new(PackageStore::new(
                modules.install_dir.clone(),
                modules.default_registry_url.clone(),
                http.clone(),
                loader.clone(),
            ))
        });
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(LocalRegistry::in_memory()));

        let events = EventBus::new();
        let contexts = ContextFactory::new(
            platform_services.clone(),
            events.clone(),
            ModuleEnv::new(config.environment, config.platform_version.clone()),
        );
        let resolver = DataSourceResolver::new(
            http,
            platform_services.cache.clone(),
            modules.http_timeout(),
        );

        let services = ManagerServices {
            registry,
            packages,
            loader,
            contexts: Arc::new(contexts),
            cache: Arc::new(InstanceCache::new()),
            resolver: Arc::new(resolver),
            supervisor: HookSupervisor::new(modules.hook_timeout()),
            platform_version: config.platform_version.clone(),
        };

        info!(
            environment = ?config.environment,
            platform_version = %config.platform_version,
            "模块平台已创建"
        );
        Ok(ModulePlatform {
            config,
            services,
            platform_services,
            events,
        })
    }
}
