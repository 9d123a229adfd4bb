//! # 数据源集成测试
//!
//! 通过平台的列类型可选值接口访问 httpmock 模拟的远程 API：
//! - 首次请求访问 API，之后命中缓存
//! - `$settings` 引用在设置修改后立即生效，缓存的选项随之失效
//! - 上游错误降级为空列表加错误信息

use std::sync::Arc;

use httpmock::prelude::*;
use serde_json::json;

use table_modules::module::manifest::{
    AuthKind, CacheSetting, ColumnTypeDefinition, DataSourceAuth, DataSourceDefinition,
    ResponseSchema, SettingDefinition, SettingKind, Settings,
};
use table_modules::module::ManifestModule;
use table_modules::{
    Module, ModuleFactory, ModuleManifest, ModulePlatform, ModuleSource, PlatformConfig, Result,
};

// ============================================================================
// 测试辅助结构
// ============================================================================

struct GeoFactory {
    base_url: String,
}

impl ModuleFactory for GeoFactory {
    fn manifest(&self) -> ModuleManifest {
        let mut manifest = ModuleManifest::new("@vendor/geo", "Geo", "1.0.0");
        manifest.settings_schema.push(SettingDefinition {
            key: "apiKey".to_string(),
            label: "API Key".to_string(),
            kind: SettingKind::Secret,
            default: Some(json!("k1")),
            required: true,
            description: String::new(),
            options: Vec::new(),
        });

        // 带缓存的国家列表
        let mut countries = DataSourceDefinition::api(format!("{}/countries", self.base_url));
        countries.auth = Some(DataSourceAuth {
            kind: AuthKind::Bearer,
            token: Some("$settings.apiKey".to_string()),
            header_name: None,
            username: None,
            password: None,
        });
        countries.cache = Some(CacheSetting::Ttl("5m".to_string()));
        countries.response_schema = Some(ResponseSchema {
            data_path: Some("data.items".to_string()),
        });
        countries.value_field = "code".to_string();
        countries.label_field = "name".to_string();
        let mut country = ColumnTypeDefinition::new("country", "Country");
        country.data_source = Some(countries);
        manifest.column_types.push(country);

        // 不缓存、按设置选择地区
        let regions = DataSourceDefinition::api(format!(
            "{}/regions?key=$settings.apiKey",
            self.base_url
        ));
        let mut region = ColumnTypeDefinition::new("region", "Region");
        region.data_source = Some(regions);
        region.multi_value = true;
        manifest.column_types.push(region);

        manifest
    }

    fn create(&self, manifest: &ModuleManifest) -> Result<Arc<dyn Module>> {
        Ok(Arc::new(ManifestModule::new(manifest.clone())))
    }
}

async fn active_platform(server: &MockServer) -> ModulePlatform {
    let dir = tempfile::tempdir().unwrap();
    let config = PlatformConfig::builder()
        .install_dir(dir.path())
        .http_timeout_ms(5000)
        .build();
    let platform = ModulePlatform::builder(config).build().unwrap();
    let id = platform
        .register_bundled(Arc::new(GeoFactory {
            base_url: server.base_url(),
        }))
        .await;

    let manager = platform.request_scope();
    manager.initialize().await;
    assert!(manager.install(ModuleSource::Bundled { id: id.clone() }).await.success);
    manager.activate(&id).await.unwrap();
    platform
}

// ============================================================================
// 测试
// ============================================================================

#[tokio::test]
async fn test_options_are_cached_after_first_fetch() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/countries")
                .header("authorization", "Bearer k1");
            then.status(200).json_body(json!({
                "data": {
                    "items": [
                        {"code": "DE", "name": "Germany"},
                        {"code": "FR", "name": "France"}
                    ]
                }
            }));
        })
        .await;

    let platform = active_platform(&server).await;

    let first = platform.column_type_options("@vendor/geo", "country").await;
    assert_eq!(first.error, None);
    assert_eq!(first.cached, Some(false));
    assert_eq!(first.multi_value, Some(false));
    let values: Vec<_> = first.options.iter().map(|o| o.value.clone()).collect();
    assert_eq!(values, vec![json!("DE"), json!("FR")]);
    assert_eq!(first.options[1].label, "France");
    assert_eq!(first.options[0].raw, Some(json!({"code": "DE", "name": "Germany"})));

    let second = platform.column_type_options("@vendor/geo", "country").await;
    assert_eq!(second.cached, Some(true));
    assert_eq!(second.options, first.options);

    mock.assert_hits_async(1).await;

    // 响应以 camelCase 序列化
    let body = serde_json::to_value(&second).unwrap();
    assert_eq!(body["multiValue"], json!(false));
    assert!(body.get("error").is_none());
}

#[tokio::test]
async fn test_settings_reference_follows_settings_change() {
    let server = MockServer::start_async().await;
    let old_key = server
        .mock_async(|when, then| {
            when.method(GET).path("/regions").query_param("key", "k1");
            then.status(200).json_body(json!([{"value": "north", "label": "North"}]));
        })
        .await;
    let new_key = server
        .mock_async(|when, then| {
            when.method(GET).path("/regions").query_param("key", "k2");
            then.status(200).json_body(json!([
                {"value": "north", "label": "North"},
                {"value": "south", "label": "South"}
            ]));
        })
        .await;

    let platform = active_platform(&server).await;

    let before = platform.column_type_options("@vendor/geo", "region").await;
    assert_eq!(before.error, None);
    assert_eq!(before.multi_value, Some(true));
    assert_eq!(before.options.len(), 1);

    let manager = platform.request_scope();
    manager.initialize().await;
    let mut patch = Settings::new();
    patch.insert("apiKey".to_string(), json!("k2"));
    manager.set_settings("@vendor/geo", patch).await.unwrap();

    let after = platform.column_type_options("@vendor/geo", "region").await;
    assert_eq!(after.cached, Some(false));
    assert_eq!(after.options.len(), 2);

    old_key.assert_hits_async(1).await;
    new_key.assert_hits_async(1).await;

    // 删除设置后引用无法解析
    let mut patch = Settings::new();
    patch.insert("apiKey".to_string(), serde_json::Value::Null);
    manager.set_settings("@vendor/geo", patch).await.unwrap();
    let broken = platform.column_type_options("@vendor/geo", "region").await;
    assert!(broken.options.is_empty());
    assert!(broken.error.unwrap().contains("apiKey"));
}

#[tokio::test]
async fn test_settings_change_invalidates_cached_options() {
    let server = MockServer::start_async().await;
    let old_key = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/countries")
                .header("authorization", "Bearer k1");
            then.status(200)
                .json_body(json!({"data": {"items": [{"code": "DE", "name": "Germany"}]}}));
        })
        .await;
    let new_key = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/countries")
                .header("authorization", "Bearer k2");
            then.status(200)
                .json_body(json!({"data": {"items": [{"code": "US", "name": "United States"}]}}));
        })
        .await;

    let platform = active_platform(&server).await;
    let first = platform.column_type_options("@vendor/geo", "country").await;
    assert_eq!(first.options[0].value, json!("DE"));
    let cached = platform.column_type_options("@vendor/geo", "country").await;
    assert_eq!(cached.cached, Some(true));

    let manager = platform.request_scope();
    manager.initialize().await;
    let mut patch = Settings::new();
    patch.insert("apiKey".to_string(), json!("k2"));
    manager.set_settings("@vendor/geo", patch).await.unwrap();

    let after = platform.column_type_options("@vendor/geo", "country").await;
    assert_eq!(after.error, None);
    assert_eq!(after.cached, Some(false));
    assert_eq!(after.options[0].value, json!("US"));
    let again = platform.column_type_options("@vendor/geo", "country").await;
    assert_eq!(again.cached, Some(true));

    old_key.assert_hits_async(1).await;
    new_key.assert_hits_async(1).await;
}

#[tokio::test]
async fn test_upstream_failure_degrades_to_empty_list() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.path("/countries");
            then.status(401);
        })
        .await;

    let platform = active_platform(&server).await;
    let response = platform.column_type_options("@vendor/geo", "country").await;
    assert!(response.options.is_empty());
    assert!(response.error.is_some());
    assert_eq!(response.cached, None);

    // 失败的结果不会被缓存
    let again = platform.column_type_options("@vendor/geo", "country").await;
    assert!(again.error.is_some());

    let unknown = platform.column_type_options("@vendor/geo", "nope").await;
    assert!(unknown.error.unwrap().contains("@vendor/geo:nope"));
}
