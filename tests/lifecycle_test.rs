//! # 模块生命周期集成测试
//!
//! 通过 `ModulePlatform` 测试完整的模块生命周期：
//! - 本地包安装 → 激活 → 能力注册 → 路由分发
//! - 设置修改 → 上下文重建
//! - 更新 → 卸载
//! - 内置模块的钩子与事件通知

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::{json, Value};

use table_modules::module::events::{names, Event};
use table_modules::module::manifest::{ApiRouteDefinition, Settings};
use table_modules::module::platform::{Database, HttpClient, HttpRequest, HttpResponse, KvStore};
use table_modules::{
    Module, ModuleContext, ModuleError, ModuleFactory, ModuleManifest, ModulePlatform,
    ModuleSource, ModuleStatus, PlatformConfig, Result,
};

// ============================================================================
// 测试辅助结构
// ============================================================================

struct OfflineHttp;

#[async_trait]
impl HttpClient for OfflineHttp {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        Err(ModuleError::DataSourceNetwork(format!("离线: {}", request.url)))
    }
}

const PACKAGE_YAML: &str = r#"
id: "@vendor/x"
name: Vendor X
version: 1.0.0
assets:
  - icons/code.svg
columnTypes:
  - id: code
    displayName: Code
    validation:
      handler: regex
      pattern: "^[A-Z]{3}$"
    format:
      handler: uppercase
dataGenerators:
  - id: codes
    displayName: Codes
    generation:
      handler: pattern
      pattern: "???"
tableGenerators:
  - id: contacts
    displayName: Contacts
    defaultRows: 3
    columns:
      - key: code
        label: Code
        columnType: "@vendor/x:code"
        generation:
          handler: sequence
          prefix: C
          padding: 3
      - key: email
        label: Email
        columnType: email
settingsSchema:
  - key: region
    label: Region
    default: eu
"#;

async fn write_package(dir: &Path, version: &str) {
    tokio::fs::create_dir_all(dir.join("icons")).await.unwrap();
    tokio::fs::write(dir.join("icons/code.svg"), "<svg/>").await.unwrap();
    let manifest = PACKAGE_YAML.replace("version: 1.0.0", &format!("version: {}", version));
    tokio::fs::write(dir.join("module.yaml"), manifest).await.unwrap();
}

fn platform(install_dir: &Path) -> ModulePlatform {
    let config = PlatformConfig::builder().install_dir(install_dir).build();
    ModulePlatform::builder(config)
        .http(Arc::new(OfflineHttp))
        .build()
        .unwrap()
}

/// 内置模块：记录钩子调用并处理一个路由
struct Inventory {
    manifest: ModuleManifest,
    activations: Arc<AtomicUsize>,
}

#[async_trait]
impl Module for Inventory {
    fn manifest(&self) -> &ModuleManifest {
        &self.manifest
    }

    async fn on_activate(&self, ctx: &ModuleContext) -> Result<()> {
        self.activations.fetch_add(1, Ordering::SeqCst);
        ctx.db.insert("audit", json!({"event": "activated"})).await?;
        ctx.cache.put("warm", json!(true), None).await
    }

    async fn handle_route(
        &self,
        ctx: &ModuleContext,
        method: &str,
        path: &str,
        body: Value,
    ) -> Result<Value> {
        match (method, path) {
            ("POST", "/echo") => Ok(json!({
                "region": ctx.setting_str("region"),
                "body": body,
            })),
            _ => Err(ModuleError::RouteNotFound {
                method: method.to_string(),
                path: path.to_string(),
            }),
        }
    }
}

struct InventoryFactory {
    activations: Arc<AtomicUsize>,
}

impl ModuleFactory for InventoryFactory {
    fn manifest(&self) -> ModuleManifest {
        let mut manifest = ModuleManifest::new("inventory", "Inventory", "2.0.0");
        manifest.api_routes.push(ApiRouteDefinition {
            method: "POST".to_string(),
            path: "/echo".to_string(),
            description: "回显".to_string(),
        });
        manifest
    }

    fn create(&self, manifest: &ModuleManifest) -> Result<Arc<dyn Module>> {
        Ok(Arc::new(Inventory {
            manifest: manifest.clone(),
            activations: self.activations.clone(),
        }))
    }
}

// ============================================================================
// 本地包
// ============================================================================

#[tokio::test]
async fn test_local_package_lifecycle() {
    let work = tempfile::tempdir().unwrap();
    let package_dir = work.path().join("package");
    let install_dir = work.path().join("installed");
    write_package(&package_dir, "1.0.0").await;

    let platform = platform(&install_dir);
    let manager = platform.request_scope();

    // 安装
    let result = manager
        .install(ModuleSource::Local {
            path: package_dir.clone(),
        })
        .await;
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.module_id.as_deref(), Some("@vendor/x"));
    assert!(install_dir.join("_40vendor_2fx/icons/code.svg").exists());

    let record = manager.get_module("@vendor/x").await.unwrap();
    assert_eq!(record.status, ModuleStatus::Installed);
    assert_eq!(record.settings.get("region"), Some(&json!("eu")));

    // 激活后能力可见，类型以模块 ID 为前缀
    manager.activate("@vendor/x").await.unwrap();
    let caps = manager.capabilities().await;
    assert!(caps.has_column_type("@vendor/x:code"));
    assert!(caps.has_column_type("email"));
    assert!(caps.generator("@vendor/x:codes").is_some());

    let none = Settings::new();
    assert!(caps.validate("@vendor/x:code", &json!("ABC"), &none).unwrap().valid);
    assert!(!caps.validate("@vendor/x:code", &json!("abcd"), &none).unwrap().valid);
    assert_eq!(caps.format("@vendor/x:code", &json!("abc"), &none).unwrap(), "ABC");

    let table = caps.table_generator("@vendor/x:contacts").unwrap();
    let mut rng = StdRng::seed_from_u64(7);
    let rows = table.generate(3, &mut rng);
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[2]["code"], json!("C003"));
    assert!(rows[0]["email"].as_str().unwrap().contains('@'));

    // 更新到新版本
    write_package(&package_dir, "1.1.0").await;
    let update = manager.update("@vendor/x", None).await.unwrap();
    assert!(update.updated);
    let record = manager.get_module("@vendor/x").await.unwrap();
    assert_eq!(record.version, "1.1.0");
    assert_eq!(record.status, ModuleStatus::Active);

    // 卸载删除资源和记录
    manager.uninstall("@vendor/x").await.unwrap();
    assert!(!install_dir.join("_40vendor_2fx").exists());
    assert!(manager.list_modules().await.unwrap().is_empty());
    assert!(manager.capabilities().await.column_type("@vendor/x:code").is_none());
}

#[tokio::test]
async fn test_install_failures_are_reported() {
    let work = tempfile::tempdir().unwrap();
    let platform = platform(work.path());
    let manager = platform.request_scope();

    let missing = manager
        .install(ModuleSource::Local {
            path: work.path().join("nothing-here"),
        })
        .await;
    assert!(!missing.success);
    assert!(missing.module_id.is_none());
    assert!(missing.error.is_some());

    let remote = manager
        .install(ModuleSource::Remote {
            package: "@vendor/y".to_string(),
            registry: None,
        })
        .await;
    assert!(!remote.success);
    assert!(remote.error.unwrap().contains("离线"));
}

#[tokio::test]
async fn test_missing_asset_sets_error() {
    let work = tempfile::tempdir().unwrap();
    let package_dir = work.path().join("package");
    write_package(&package_dir, "1.0.0").await;
    tokio::fs::remove_file(package_dir.join("icons/code.svg"))
        .await
        .unwrap();

    let platform = platform(&work.path().join("installed"));
    let manager = platform.request_scope();
    let result = manager
        .install(ModuleSource::Local { path: package_dir })
        .await;
    assert!(!result.success);
    assert_eq!(result.module_id.as_deref(), Some("@vendor/x"));

    let record = manager.get_module("@vendor/x").await.unwrap();
    assert_eq!(record.status, ModuleStatus::Error);
    assert!(record.error.is_some());
    assert!(record.error_at.is_some());

    // error 状态只能激活、更新或卸载
    assert!(matches!(
        manager.deactivate("@vendor/x").await,
        Ok(ref r) if r.status == ModuleStatus::Error
    ));
    manager.uninstall("@vendor/x").await.unwrap();
}

// ============================================================================
// 内置模块
// ============================================================================

#[tokio::test]
async fn test_bundled_module_hooks_routes_and_events() {
    let work = tempfile::tempdir().unwrap();
    let platform = platform(work.path());
    let activations = Arc::new(AtomicUsize::new(0));
    let id = platform
        .register_bundled(Arc::new(InventoryFactory {
            activations: activations.clone(),
        }))
        .await;
    assert_eq!(id, "inventory");

    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    platform
        .events()
        .subscribe(
            "test",
            "module.*",
            Arc::new(move |event: Event| {
                if let Ok(mut seen) = sink.lock() {
                    seen.push(event.event_type);
                }
            }),
        )
        .await;

    let manager = platform.request_scope();
    assert!(manager.install(ModuleSource::Bundled { id: id.clone() }).await.success);
    manager.activate(&id).await.unwrap();
    assert_eq!(activations.load(Ordering::SeqCst), 1);

    // on_activate 写入了命名空间内的表和缓存
    let services = platform.platform_services();
    assert_eq!(services.db.tables().await.unwrap(), vec!["mod_inventory__audit"]);
    assert_eq!(
        services.cache.get("module:inventory:warm").await.unwrap(),
        Some(json!(true))
    );

    // 路由分发与设置热更新
    let mut patch = Settings::new();
    patch.insert("region".to_string(), json!("us"));
    manager.set_settings(&id, patch).await.unwrap();

    let response = manager
        .dispatch_route(&id, "post", "/echo", json!({"n": 1}))
        .await
        .unwrap();
    assert_eq!(response, json!({"region": "us", "body": {"n": 1}}));
    assert!(matches!(
        manager.dispatch_route(&id, "GET", "/echo", Value::Null).await,
        Err(ModuleError::RouteNotFound { .. })
    ));

    let record = manager.get_module(&id).await.unwrap();
    assert_eq!(record.stats.usage.get("route:POST /echo"), Some(&1));

    // 重载不会改变状态，钩子再次执行
    let record = manager.reload(&id).await.unwrap();
    assert_eq!(record.status, ModuleStatus::Active);
    assert_eq!(activations.load(Ordering::SeqCst), 2);

    // 卸载保留数据库表，清除缓存命名空间
    manager.uninstall(&id).await.unwrap();
    assert_eq!(services.db.tables().await.unwrap(), vec!["mod_inventory__audit"]);
    assert_eq!(services.cache.get("module:inventory:warm").await.unwrap(), None);

    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen.first().map(String::as_str), Some(names::INSTALLED));
    assert!(seen.iter().any(|e| e == names::SETTINGS_CHANGED));
    assert_eq!(seen.last().map(String::as_str), Some(names::UNINSTALLED));
}
