//! # 并发初始化集成测试
//!
//! 多个请求共享同一个进程级实例缓存，验证三态标志：
//! - 初始化进行中时，其他请求直接返回而不做任何 I/O
//! - 初始化完成后，新请求从缓存复制实例
//! - 初始化失败时标志回到 Pending，下一个请求重新初始化
//! - 全部重载清空缓存，下一次初始化只加载当前已激活的模块

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Notify;

use table_modules::module::instance_cache::InitState;
use table_modules::module::manifest::Settings;
use table_modules::module::platform::{HttpClient, HttpRequest, HttpResponse};
use table_modules::module::registry::{LocalRegistry, ModuleStats, RegistryEvent};
use table_modules::module::ManifestModule;
use table_modules::{
    InstalledModule, Module, ModuleError, ModuleFactory, ModuleManager, ModuleManifest,
    ModulePlatform, ModuleRegistry, ModuleSource, ModuleStatus, PlatformConfig, Result,
};

// ============================================================================
// 测试辅助结构
// ============================================================================

/// 包装本地注册表：统计 `list_by_status` 调用，可在调用中阻塞或注入一次失败
#[derive(Default)]
struct GatedRegistry {
    inner: LocalRegistry,
    list_calls: AtomicUsize,
    armed: AtomicBool,
    fail_next: AtomicBool,
    entered: Notify,
    release: Notify,
}

impl GatedRegistry {
    fn new() -> Self {
        Self {
            inner: LocalRegistry::in_memory(),
            ..Default::default()
        }
    }

    fn calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModuleRegistry for GatedRegistry {
    async fn get(&self, module_id: &str) -> Result<Option<InstalledModule>> {
        self.inner.get(module_id).await
    }

    async fn list(&self) -> Result<Vec<InstalledModule>> {
        self.inner.list().await
    }

    async fn list_by_status(&self, status: ModuleStatus) -> Result<Vec<InstalledModule>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.armed.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(ModuleError::Storage("注册表不可用".to_string()));
        }
        self.inner.list_by_status(status).await
    }

    async fn insert(&self, record: InstalledModule) -> Result<()> {
        self.inner.insert(record).await
    }

    async fn transition(&self, module_id: &str, to: ModuleStatus) -> Result<InstalledModule> {
        self.inner.transition(module_id, to).await
    }

    async fn set_error(&self, module_id: &str, message: &str) -> Result<InstalledModule> {
        self.inner.set_error(module_id, message).await
    }

    async fn update_manifest(&self, module_id: &str, manifest: ModuleManifest) -> Result<()> {
        self.inner.update_manifest(module_id, manifest).await
    }

    async fn update_settings(&self, module_id: &str, settings: Settings) -> Result<()> {
        self.inner.update_settings(module_id, settings).await
    }

    async fn delete(&self, module_id: &str) -> Result<()> {
        self.inner.delete(module_id).await
    }

    async fn record_event(&self, event: RegistryEvent) -> Result<()> {
        self.inner.record_event(event).await
    }

    async fn history(&self, module_id: &str) -> Result<Vec<RegistryEvent>> {
        self.inner.history(module_id).await
    }

    async fn record_activation(&self, module_id: &str, duration_ms: u64) -> Result<()> {
        self.inner.record_activation(module_id, duration_ms).await
    }

    async fn increment_usage(&self, module_id: &str, counter: &str, by: u64) -> Result<u64> {
        self.inner.increment_usage(module_id, counter, by).await
    }
}

struct NoHttp;

#[async_trait]
impl HttpClient for NoHttp {
    async fn send(&self, _request: HttpRequest) -> Result<HttpResponse> {
        Ok(HttpResponse::text_body(404, ""))
    }
}

struct PlainFactory {
    id: &'static str,
}

impl ModuleFactory for PlainFactory {
    fn manifest(&self) -> ModuleManifest {
        ModuleManifest::new(self.id, self.id, "1.0.0")
    }

    fn create(&self, manifest: &ModuleManifest) -> Result<Arc<dyn Module>> {
        Ok(Arc::new(ManifestModule::new(manifest.clone())))
    }
}

/// 开关打开时拒绝创建实例
struct FlakyFactory {
    id: &'static str,
    broken: Arc<AtomicBool>,
}

impl ModuleFactory for FlakyFactory {
    fn manifest(&self) -> ModuleManifest {
        ModuleManifest::new(self.id, self.id, "1.0.0")
    }

    fn create(&self, manifest: &ModuleManifest) -> Result<Arc<dyn Module>> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(ModuleError::InitFailed("工厂不可用".to_string()));
        }
        Ok(Arc::new(ManifestModule::new(manifest.clone())))
    }
}

/// 创建平台，并安装 `ids` 中的内置模块、激活其中的 `active`
async fn setup(ids: &[&'static str], active: &[&str]) -> (ModulePlatform, Arc<GatedRegistry>) {
    let registry = Arc::new(GatedRegistry::new());
    let config = PlatformConfig::builder()
        .install_dir(std::env::temp_dir().join("table-modules-concurrent"))
        .build();
    let platform = ModulePlatform::builder(config)
        .registry(registry.clone())
        .http(Arc::new(NoHttp))
        .build()
        .unwrap();

    let manager = platform.request_scope();
    for id in ids {
        platform.register_bundled(Arc::new(PlainFactory { id: *id })).await;
        let result = manager
            .install(ModuleSource::Bundled { id: id.to_string() })
            .await;
        assert!(result.success, "{:?}", result.error);
    }
    for id in active {
        manager.activate(id).await.unwrap();
    }
    (platform, registry)
}

// ============================================================================
// 测试
// ============================================================================

#[tokio::test]
async fn test_second_request_skips_while_first_is_running() {
    let (platform, registry) = setup(&["alpha", "beta"], &["alpha"]).await;
    let cache = platform.instance_cache().clone();
    // 激活发生在初始化之前，缓存不会被填充
    assert_eq!(cache.state(), InitState::Pending);
    assert!(cache.is_empty().await);

    let calls_before = registry.calls();
    registry.armed.store(true, Ordering::SeqCst);

    let services = platform.services().clone();
    let first = tokio::spawn(async move {
        let manager = ModuleManager::new(services);
        let count = manager.initialize().await;
        (count, manager.loaded_modules().await)
    });

    registry.entered.notified().await;
    assert_eq!(cache.state(), InitState::Running);

    // 第二个请求看到 Running，不访问注册表
    let second = platform.request_scope();
    assert_eq!(second.initialize().await, 0);
    assert!(second.loaded_modules().await.is_empty());
    assert_eq!(registry.calls(), calls_before + 1);

    registry.release.notify_one();
    let (count, loaded) = first.await.unwrap();
    assert_eq!(count, 1);
    assert_eq!(loaded, vec!["alpha"]);
    assert_eq!(cache.state(), InitState::Done);
    assert!(cache.contains("alpha").await);

    // 第三个请求从缓存复制，同样不访问注册表
    let third = platform.request_scope();
    assert_eq!(third.initialize().await, 1);
    assert_eq!(third.loaded_modules().await, vec!["alpha"]);
    assert_eq!(registry.calls(), calls_before + 1);

    // 第三个请求拿到的是缓存中的同一个实例
    let cached = cache.get("alpha").await.unwrap();
    let caps = third.capabilities().await;
    assert!(caps.column_type_ids().iter().any(|id| id == "text"));
    assert_eq!(cached.context.module_id, "alpha");
}

#[tokio::test]
async fn test_failed_initialization_resets_flag() {
    let (platform, registry) = setup(&["alpha"], &["alpha"]).await;
    let cache = platform.instance_cache().clone();

    registry.fail_next.store(true, Ordering::SeqCst);
    let failed = platform.request_scope();
    assert_eq!(failed.initialize().await, 0);
    assert_eq!(cache.state(), InitState::Pending);
    assert!(cache.is_empty().await);

    // 失败的请求仍然可以处理不依赖模块的工作
    let record = failed.get_module("alpha").await.unwrap();
    assert_eq!(record.status, ModuleStatus::Active);

    let retry = platform.request_scope();
    assert_eq!(retry.initialize().await, 1);
    assert_eq!(cache.state(), InitState::Done);
}

#[tokio::test]
async fn test_partial_load_failure_leaves_request_empty() {
    let (platform, _registry) = setup(&["alpha"], &["alpha"]).await;
    let cache = platform.instance_cache().clone();

    let broken = Arc::new(AtomicBool::new(false));
    platform
        .register_bundled(Arc::new(FlakyFactory {
            id: "zeta",
            broken: broken.clone(),
        }))
        .await;
    let manager = platform.request_scope();
    let installed = manager
        .install(ModuleSource::Bundled {
            id: "zeta".to_string(),
        })
        .await;
    assert!(installed.success, "{:?}", installed.error);
    manager.activate("zeta").await.unwrap();

    // 丢弃已加载实例，下一次初始化必须重新创建 zeta
    platform.services().loader.purge_all().await;
    broken.store(true, Ordering::SeqCst);

    let failed = platform.request_scope();
    assert_eq!(failed.initialize().await, 0);
    assert!(failed.loaded_modules().await.is_empty());
    assert_eq!(cache.state(), InitState::Pending);

    broken.store(false, Ordering::SeqCst);
    let retry = platform.request_scope();
    assert_eq!(retry.initialize().await, 2);
    assert_eq!(retry.loaded_modules().await, vec!["alpha", "zeta"]);
    assert_eq!(cache.state(), InitState::Done);
}

#[tokio::test]
async fn test_reload_all_repopulates_active_set() {
    let (platform, registry) = setup(&["alpha", "beta", "gamma"], &["alpha", "gamma"]).await;
    let cache = platform.instance_cache().clone();

    let manager = platform.request_scope();
    assert_eq!(manager.initialize().await, 2);
    assert_eq!(cache.len().await, 2);

    // 初始化完成后激活的模块直接进入缓存
    manager.activate("beta").await.unwrap();
    assert!(cache.contains("beta").await);

    // 停用的模块从缓存移除
    manager.deactivate("gamma").await.unwrap();
    assert!(!cache.contains("gamma").await);

    let reloaded = manager.reload_all().await.unwrap();
    assert_eq!(reloaded, vec!["alpha", "beta"]);
    assert_eq!(cache.state(), InitState::Pending);
    assert!(cache.is_empty().await);

    let calls_before = registry.calls();
    let next = platform.request_scope();
    assert_eq!(next.initialize().await, 2);
    assert_eq!(next.loaded_modules().await, vec!["alpha", "beta"]);
    assert_eq!(registry.calls(), calls_before + 1);

    let stats: ModuleStats = next.get_module("alpha").await.unwrap().stats;
    assert!(stats.activation_count >= 2);
}
