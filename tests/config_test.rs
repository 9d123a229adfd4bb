//! 配置与持久化集成测试
//!
//! 测试配置文件加载、合并、日志配置转换，以及 JSON 文件注册表在多个平台实例之间的持久化

use serde_json::json;
use tempfile::TempDir;

use table_modules::{
    Environment, Logger, LoggerConfig, ModulePlatform, ModuleSource, ModuleStatus, PlatformConfig,
    RotationStrategy,
};

/// 测试完整的 YAML 配置加载流程
#[tokio::test]
async fn test_full_yaml_config_loading() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("modules.yaml");
    tokio::fs::write(
        &path,
        r#"
logging:
  level: debug
  json_format: true
  rotation: hourly
modules:
  install_dir: /var/lib/tables/modules
  registry_file: /var/lib/tables/registry.json
  hook_timeout_ms: 2500
  default_registry_url: https://registry.internal
environment: development
platform_version: 2.3.0
"#,
    )
    .await
    .unwrap();

    let config = PlatformConfig::from_file(&path).await.unwrap();
    assert_eq!(config.config_path.as_deref(), Some(path.as_path()));
    assert_eq!(config.logging.level, "debug");
    assert!(config.logging.json_format);
    assert_eq!(config.modules.hook_timeout_ms, 2500);
    // 未配置的字段使用默认值
    assert_eq!(config.modules.http_timeout_ms, 10_000);
    assert_eq!(config.modules.default_registry_url, "https://registry.internal");
    assert_eq!(config.environment, Environment::Development);
    assert_eq!(config.platform_version, "2.3.0");

    let logger = LoggerConfig::from_log_config(&config.logging);
    assert_eq!(logger.level, "debug");
    assert!(logger.json_format);
    assert_eq!(logger.rotation, RotationStrategy::Hourly);
    // file_output 未开启时忽略 log_dir
    assert!(logger.file_output.is_none());
}

/// 测试 JSON 配置和错误配置
#[tokio::test]
async fn test_json_config_and_invalid_values() {
    let temp_dir = TempDir::new().unwrap();

    let json_path = temp_dir.path().join("modules.json");
    tokio::fs::write(
        &json_path,
        serde_json::to_string(&json!({
            "modules": { "http_timeout_ms": 1500 },
            "environment": "test"
        }))
        .unwrap(),
    )
    .await
    .unwrap();
    let config = PlatformConfig::from_file(&json_path).await.unwrap();
    assert_eq!(config.modules.http_timeout().as_millis(), 1500);
    assert_eq!(config.environment, Environment::Test);

    let zero_timeout = temp_dir.path().join("zero.yaml");
    tokio::fs::write(&zero_timeout, "modules:\n  hook_timeout_ms: 0\n")
        .await
        .unwrap();
    assert!(PlatformConfig::from_file(&zero_timeout).await.is_err());

    let bad_version = temp_dir.path().join("version.yaml");
    tokio::fs::write(&bad_version, "platform_version: latest\n")
        .await
        .unwrap();
    let err = PlatformConfig::from_file(&bad_version).await.unwrap_err();
    assert!(err.to_string().contains("latest"));

    let broken = temp_dir.path().join("broken.yaml");
    tokio::fs::write(&broken, "modules: [unclosed").await.unwrap();
    assert!(PlatformConfig::from_file(&broken).await.is_err());
}

/// 测试配置合并：系统配置被用户配置覆盖
#[tokio::test]
async fn test_layered_config_merge() {
    let temp_dir = TempDir::new().unwrap();
    let system_path = temp_dir.path().join("system.yaml");
    let user_path = temp_dir.path().join("user.yaml");
    tokio::fs::write(
        &system_path,
        "modules:\n  install_dir: /opt/modules\n  hook_timeout_ms: 3000\n",
    )
    .await
    .unwrap();
    tokio::fs::write(&user_path, "logging:\n  level: warn\nmodules:\n  hook_timeout_ms: 4000\n")
        .await
        .unwrap();

    let mut config = PlatformConfig::from_file(&system_path).await.unwrap();
    config.merge(PlatformConfig::from_file(&user_path).await.unwrap());

    assert_eq!(config.logging.level, "warn");
    assert_eq!(config.modules.install_dir.to_str(), Some("/opt/modules"));
    assert_eq!(config.modules.hook_timeout_ms, 4000);
    assert_eq!(config.environment, Environment::Production);
}

/// 测试注册表文件在平台实例之间持久化
#[tokio::test]
async fn test_registry_file_persists_between_platforms() {
    let temp_dir = TempDir::new().unwrap();
    let package = temp_dir.path().join("package");
    tokio::fs::create_dir_all(&package).await.unwrap();
    tokio::fs::write(
        package.join("module.json"),
        serde_json::to_string(&json!({
            "id": "@vendor/notes",
            "name": "Notes",
            "version": "0.1.0",
            "settingsSchema": [{ "key": "limit", "label": "Limit", "type": "number", "default": 10 }]
        }))
        .unwrap(),
    )
    .await
    .unwrap();

    let config = PlatformConfig::builder()
        .install_dir(temp_dir.path().join("installed"))
        .registry_file(temp_dir.path().join("state/registry.json"))
        .build();

    {
        let platform = ModulePlatform::new(config.clone()).await.unwrap();
        let manager = platform.request_scope();
        let result = manager
            .install(ModuleSource::Local {
                path: package.clone(),
            })
            .await;
        assert!(result.success, "{:?}", result.error);
        manager.activate("@vendor/notes").await.unwrap();
    }
    assert!(temp_dir.path().join("state/registry.json").exists());

    // 新进程读取同一个文件，初始化时重新加载已激活模块
    let platform = ModulePlatform::new(config).await.unwrap();
    let manager = platform.request_scope();
    assert_eq!(manager.initialize().await, 1);

    let record = manager.get_module("@vendor/notes").await.unwrap();
    assert_eq!(record.status, ModuleStatus::Active);
    assert_eq!(record.settings.get("limit"), Some(&json!(10)));
    assert_eq!(record.stats.activation_count, 1);

    let kinds: Vec<String> = manager
        .module_history("@vendor/notes")
        .await
        .unwrap()
        .iter()
        .map(|e| format!("{:?}", e.kind))
        .collect();
    assert_eq!(kinds, vec!["Installed", "Activated"]);
}

/// 测试日志系统只能初始化一次
#[test]
fn test_logger_initializes_once() {
    let config = LoggerConfig::builder()
        .level("debug")
        .console_output(true)
        .ansi_colors(false)
        .build();

    let guard = Logger::init(config.clone()).unwrap();
    assert_eq!(guard.writer_count(), 1);
    tracing::info!(module_id = "@vendor/notes", "日志系统已就绪");

    assert!(Logger::init(config.clone()).is_err());
    assert_eq!(Logger::try_init(config).writer_count(), 0);
}
