//! 模块执行上下文
//!
//! 模块激活或设置变更时创建，停用时丢弃。上下文中的数据库、缓存和存储
//! 都按模块做了命名空间隔离，`<ns>` 为 [`module_namespace`] 对模块 ID 的编码：
//!
//! - 数据库表名前缀 `mod_<ns>__`
//! - 缓存键前缀 `module:<ns>:`
//! - 存储键前缀 `modules/<ns>/`

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use super::events::{Event, EventBus, EventCallback};
use super::manifest::Settings;
use super::platform::{
    AnalyticsEvent, AnalyticsSink, BlobStore, Database, HttpClient, KvStore, PlatformServices,
};
use crate::core::config::Environment;
use crate::utils::{module_namespace, Result};

/// 运行环境信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleEnv {
    /// 开发环境
    pub is_development: bool,
    /// 生产环境
    pub is_production: bool,
    /// 平台版本
    pub platform_version: String,
}

impl ModuleEnv {
    /// 由部署环境与平台版本构造
    pub fn new(environment: Environment, platform_version: impl Into<String>) -> Self {
        Self {
            is_development: environment.is_development(),
            is_production: environment.is_production(),
            platform_version: platform_version.into(),
        }
    }
}

/// 模块数据库（表名自动加前缀）
#[derive(Clone)]
pub struct ModuleDb {
    inner: Arc<dyn Database>,
    prefix: String,
}

impl ModuleDb {
    /// 物理表名
    pub fn table_name(&self, table: &str) -> String {
        format!("{}{}", self.prefix, table)
    }

    /// 插入一行
    pub async fn insert(&self, table: &str, row: Value) -> Result<()> {
        self.inner.insert(&self.table_name(table), row).await
    }

    /// 查询
    pub async fn query(&self, table: &str, filter: &Map<String, Value>) -> Result<Vec<Value>> {
        self.inner.query(&self.table_name(table), filter).await
    }

    /// 删除
    pub async fn delete(&self, table: &str, filter: &Map<String, Value>) -> Result<u64> {
        self.inner.delete(&self.table_name(table), filter).await
    }

    /// 删除整张表
    pub async fn drop_table(&self, table: &str) -> Result<()> {
        self.inner.drop_table(&self.table_name(table)).await
    }

    /// 本模块的表（不含前缀）
    pub async fn tables(&self) -> Result<Vec<String>> {
        Ok(self
            .inner
            .tables()
            .await?
            .into_iter()
            .filter_map(|name| name.strip_prefix(&self.prefix).map(str::to_string))
            .collect())
    }
}

/// 模块缓存（键自动加前缀）
#[derive(Clone)]
pub struct ModuleCache {
    inner: Arc<dyn KvStore>,
    prefix: String,
}

impl ModuleCache {
    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// 读取
    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.inner.get(&self.key(key)).await
    }

    /// 写入
    pub async fn put(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        self.inner.put(&self.key(key), value, ttl).await
    }

    /// 删除
    pub async fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(&self.key(key)).await
    }

    /// 清空本模块的全部缓存
    pub async fn clear(&self) -> Result<u64> {
        self.inner.delete_prefix(&self.prefix).await
    }
}

/// 模块对象存储（键自动加前缀）
#[derive(Clone)]
pub struct ModuleStorage {
    inner: Arc<dyn BlobStore>,
    prefix: String,
}

impl ModuleStorage {
    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key.trim_start_matches('/'))
    }

    /// 写入
    pub async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        self.inner.put(&self.key(key), bytes).await
    }

    /// 读取
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.inner.get(&self.key(key)).await
    }

    /// 删除
    pub async fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(&self.key(key)).await
    }

    /// 列出键（不含前缀）
    pub async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .inner
            .list(&self.key(prefix))
            .await?
            .into_iter()
            .filter_map(|key| key.strip_prefix(&self.prefix).map(str::to_string))
            .collect())
    }

    /// 删除本模块的全部对象，返回删除数量
    pub async fn clear(&self) -> Result<u64> {
        let keys = self.inner.list(&self.prefix).await?;
        for key in &keys {
            self.inner.delete(key).await?;
        }
        Ok(keys.len() as u64)
    }
}

/// 模块日志，所有记录都带上模块 ID 与版本
#[derive(Debug, Clone)]
pub struct ModuleLogger {
    module_id: String,
    version: String,
}

impl ModuleLogger {
    /// 调试
    pub fn debug(&self, message: &str) {
        debug!(module_id = %self.module_id, module_version = %self.version, "{}", message);
    }

    /// 信息
    pub fn info(&self, message: &str) {
        info!(module_id = %self.module_id, module_version = %self.version, "{}", message);
    }

    /// 警告
    pub fn warn(&self, message: &str) {
        warn!(module_id = %self.module_id, module_version = %self.version, "{}", message);
    }

    /// 错误
    pub fn error(&self, message: &str) {
        error!(module_id = %self.module_id, module_version = %self.version, "{}", message);
    }
}

/// 模块事件，发送方固定为本模块
#[derive(Clone)]
pub struct ModuleEvents {
    bus: EventBus,
    module_id: String,
}

impl ModuleEvents {
    /// 发布事件
    pub async fn emit(&self, event_type: &str, data: Value) {
        self.bus
            .publish(Event::new(event_type, self.module_id.clone(), data))
            .await;
    }

    /// 订阅事件，模块停用时自动取消
    pub async fn subscribe(&self, pattern: &str, callback: EventCallback) -> String {
        self.bus.subscribe(self.module_id.clone(), pattern, callback).await
    }
}

/// 模块分析上报
#[derive(Clone)]
pub struct ModuleAnalytics {
    sink: Arc<dyn AnalyticsSink>,
    module_id: String,
}

impl ModuleAnalytics {
    /// 上报事件
    pub async fn track(&self, name: &str, properties: Value) -> Result<()> {
        self.sink
            .track(AnalyticsEvent {
                module_id: self.module_id.clone(),
                name: name.to_string(),
                properties,
                at: Utc::now(),
            })
            .await
    }
}

/// 模块执行上下文
#[derive(Clone)]
pub struct ModuleContext {
    /// 模块 ID
    pub module_id: String,
    /// 模块版本
    pub version: String,
    /// 当前设置
    pub settings: Settings,
    /// 数据库
    pub db: ModuleDb,
    /// 缓存
    pub cache: ModuleCache,
    /// 对象存储
    pub storage: ModuleStorage,
    /// 出站 HTTP
    pub http: Arc<dyn HttpClient>,
    /// 日志
    pub logger: ModuleLogger,
    /// 事件
    pub events: ModuleEvents,
    /// 分析上报
    pub analytics: ModuleAnalytics,
    /// 运行环境
    pub env: ModuleEnv,
}

impl ModuleContext {
    /// 读取设置项
    pub fn setting(&self, key: &str) -> Option<&Value> {
        self.settings.get(key)
    }

    /// 读取字符串设置项
    pub fn setting_str(&self, key: &str) -> Option<&str> {
        self.settings.get(key).and_then(Value::as_str)
    }
}

impl std::fmt::Debug for ModuleContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleContext")
            .field("module_id", &self.module_id)
            .field("version", &self.version)
            .field("settings", &self.settings.keys().collect::<Vec<_>>())
            .field("env", &self.env)
            .finish_non_exhaustive()
    }
}

/// 上下文工厂
#[derive(Debug, Clone)]
pub struct ContextFactory {
    services: PlatformServices,
    events: EventBus,
    env: ModuleEnv,
}

impl ContextFactory {
    /// 创建工厂
    pub fn new(services: PlatformServices, events: EventBus, env: ModuleEnv) -> Self {
        Self {
            services,
            events,
            env,
        }
    }

    /// 注入的平台能力
    pub fn services(&self) -> &PlatformServices {
        &self.services
    }

    /// 事件总线
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// 运行环境
    pub fn env(&self) -> &ModuleEnv {
        &self.env
    }

    /// 为模块构建上下文
    pub fn build(&self, module_id: &str, version: &str, settings: Settings) -> Arc<ModuleContext> {
        Arc::new(ModuleContext {
            module_id: module_id.to_string(),
            version: version.to_string(),
            settings,
            db: ModuleDb {
                inner: self.services.db.clone(),
                prefix: format!("mod_{}__", module_namespace(module_id)),
            },
            cache: self.cache_for(module_id),
            storage: self.storage_for(module_id),
            http: self.services.http.clone(),
            logger: ModuleLogger {
                module_id: module_id.to_string(),
                version: version.to_string(),
            },
            events: ModuleEvents {
                bus: self.events.clone(),
                module_id: module_id.to_string(),
            },
            analytics: ModuleAnalytics {
                sink: self.services.analytics.clone(),
                module_id: module_id.to_string(),
            },
            env: self.env.clone(),
        })
    }

    fn cache_for(&self, module_id: &str) -> ModuleCache {
        ModuleCache {
            inner: self.services.cache.clone(),
            prefix: format!("module:{}:", module_namespace(module_id)),
        }
    }

    fn storage_for(&self, module_id: &str) -> ModuleStorage {
        ModuleStorage {
            inner: self.services.storage.clone(),
            prefix: format!("modules/{}/", module_namespace(module_id)),
        }
    }

    /// 清除模块的缓存与存储命名空间（数据库表保留）
    pub async fn purge_namespace(&self, module_id: &str) -> Result<()> {
        let cache = self.cache_for(module_id).clear().await?;
        let objects = self.storage_for(module_id).clear().await?;
        debug!(module_id = %module_id, cache, objects, "已清除模块命名空间");
        Ok(())
    }
}
