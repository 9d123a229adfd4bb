//! 平台能力
//!
//! 数据库、键值缓存、对象存储、出站 HTTP 和分析上报都由宿主注入。
//! 这里定义它们的接口，并提供测试与 CLI 使用的内存实现，
//! 以及基于 reqwest 的 HTTP 客户端。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::utils::{ModuleError, Result};

// ============================================================================
// 数据库
// ============================================================================

/// 表级文档数据库
///
/// 行是 JSON 对象，查询条件是字段等值匹配（空条件匹配全部行）。
#[async_trait]
pub trait Database: Send + Sync {
    /// 插入一行
    async fn insert(&self, table: &str, row: Value) -> Result<()>;

    /// 查询匹配的行
    async fn query(&self, table: &str, filter: &Map<String, Value>) -> Result<Vec<Value>>;

    /// 删除匹配的行，返回删除数量
    async fn delete(&self, table: &str, filter: &Map<String, Value>) -> Result<u64>;

    /// 删除整张表
    async fn drop_table(&self, table: &str) -> Result<()>;

    /// 所有表名
    async fn tables(&self) -> Result<Vec<String>>;
}

/// 内存数据库
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    tables: Arc<RwLock<HashMap<String, Vec<Value>>>>,
}

impl MemoryDatabase {
    /// 创建空数据库
    pub fn new() -> Self {
        Self::default()
    }
}

fn row_matches(row: &Value, filter: &Map<String, Value>) -> bool {
    filter
        .iter()
        .all(|(key, expected)| row.get(key) == Some(expected))
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn insert(&self, table: &str, row: Value) -> Result<()> {
        if !row.is_object() {
            return Err(ModuleError::Storage(format!(
                "表 '{}' 的行必须是 JSON 对象",
                table
            )));
        }
        self.tables
            .write()
            .await
            .entry(table.to_string())
            .or_default()
            .push(row);
        Ok(())
    }

    async fn query(&self, table: &str, filter: &Map<String, Value>) -> Result<Vec<Value>> {
        let tables = self.tables.read().await;
        Ok(tables
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| row_matches(row, filter))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete(&self, table: &str, filter: &Map<String, Value>) -> Result<u64> {
        let mut tables = self.tables.write().await;
        let Some(rows) = tables.get_mut(table) else {
            return Ok(0);
        };
        let before = rows.len();
        rows.retain(|row| !row_matches(row, filter));
        Ok((before - rows.len()) as u64)
    }

    async fn drop_table(&self, table: &str) -> Result<()> {
        self.tables.write().await.remove(table);
        Ok(())
    }

    async fn tables(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.tables.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

// ============================================================================
// 键值缓存
// ============================================================================

/// 带 TTL 的键值缓存
#[async_trait]
pub trait KvStore: Send + Sync {
    /// 读取，过期视为不存在
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// 写入，`ttl` 为 `None` 时永不过期
    async fn put(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()>;

    /// 删除
    async fn delete(&self, key: &str) -> Result<()>;

    /// 删除指定前缀的所有键，返回删除数量
    async fn delete_prefix(&self, prefix: &str) -> Result<u64>;
}

#[derive(Debug, Clone)]
struct KvEntry {
    value: Value,
    expires_at: Option<Instant>,
}

impl KvEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// 内存键值缓存
///
/// 过期时间基于 `tokio::time::Instant`，测试中可以用暂停的时钟推进。
#[derive(Debug, Clone, Default)]
pub struct MemoryKvStore {
    entries: Arc<RwLock<HashMap<String, KvEntry>>>,
}

impl MemoryKvStore {
    /// 创建空缓存
    pub fn new() -> Self {
        Self::default()
    }

    /// 未过期的条目数
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|entry| !entry.is_expired(now))
            .count()
    }

    /// 是否为空
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
                Some(_) => {}
            }
        }
        // 过期条目惰性清理
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn put(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries
            .write()
            .await
            .insert(key.to_string(), KvEntry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        Ok((before - entries.len()) as u64)
    }
}

// ============================================================================
// 对象存储
// ============================================================================

/// 对象存储
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// 写入对象
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()>;

    /// 读取对象
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// 删除对象
    async fn delete(&self, key: &str) -> Result<()>;

    /// 列出指定前缀的键（排序）
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// 内存对象存储
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    objects: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryBlobStore {
    /// 创建空存储
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        self.objects.write().await.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.objects.read().await.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects.write().await.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .objects
            .read()
            .await
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}

// ============================================================================
// 出站 HTTP
// ============================================================================

/// 出站 HTTP 请求
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    /// 方法（大写）
    pub method: String,
    /// 完整 URL
    pub url: String,
    /// 请求头
    pub headers: BTreeMap<String, String>,
    /// JSON 请求体
    pub body: Option<Value>,
    /// 单次请求超时，`None` 时使用客户端默认值
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    /// GET 请求
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
            timeout: None,
        }
    }

    /// 添加请求头
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// 设置超时
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// 出站 HTTP 响应
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    /// 状态码
    pub status: u16,
    /// 响应体
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// 由文本响应体创建
    pub fn text_body(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into().into_bytes(),
        }
    }

    /// 是否 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 响应体文本
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// 按 JSON 解析响应体
    pub fn json(&self) -> Result<Value> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// 出站 HTTP 客户端
///
/// 传输层失败返回错误；非 2xx 响应照常返回，由调用方判断。
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// 发送请求
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// 基于 reqwest 的 HTTP 客户端
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
    default_timeout: Duration,
}

impl ReqwestHttpClient {
    /// 创建客户端
    pub fn new(default_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(default_timeout)
            .user_agent(concat!("table-modules/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ModuleError::InitFailed(format!("HTTP 客户端创建失败: {}", e)))?;
        Ok(Self {
            client,
            default_timeout,
        })
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let method = reqwest::Method::from_bytes(request.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| ModuleError::DataSourceNetwork(format!("无效的 HTTP 方法: {}", request.method)))?;
        let url = url::Url::parse(&request.url)
            .map_err(|e| ModuleError::DataSourceNetwork(format!("无效的 URL '{}': {}", request.url, e)))?;

        let mut builder = self
            .client
            .request(method, url)
            .timeout(request.timeout.unwrap_or(self.default_timeout));
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        debug!(method = %request.method, url = %request.url, "发送出站请求");
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ModuleError::Timeout(format!("请求 {} 超时", request.url))
            } else {
                ModuleError::DataSourceNetwork(format!("请求 {} 失败: {}", request.url, e))
            }
        })?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| ModuleError::DataSourceNetwork(format!("读取响应失败: {}", e)))?;
        Ok(HttpResponse {
            status,
            body: body.to_vec(),
        })
    }
}

// ============================================================================
// 分析上报
// ============================================================================

/// 分析事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsEvent {
    /// 来源模块
    pub module_id: String,
    /// 事件名
    pub name: String,
    /// 属性
    #[serde(default)]
    pub properties: Value,
    /// 时间
    pub at: DateTime<Utc>,
}

/// 分析上报接收端
#[async_trait]
pub trait AnalyticsSink: Send + Sync {
    /// 上报事件
    async fn track(&self, event: AnalyticsEvent) -> Result<()>;
}

/// 内存分析接收端，保留最近的事件
#[derive(Debug, Clone)]
pub struct MemoryAnalytics {
    events: Arc<RwLock<Vec<AnalyticsEvent>>>,
    capacity: usize,
}

impl MemoryAnalytics {
    /// 创建接收端
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
            capacity: capacity.max(1),
        }
    }

    /// 已记录的事件
    pub async fn events(&self) -> Vec<AnalyticsEvent> {
        self.events.read().await.clone()
    }
}

impl Default for MemoryAnalytics {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl AnalyticsSink for MemoryAnalytics {
    async fn track(&self, event: AnalyticsEvent) -> Result<()> {
        let mut events = self.events.write().await;
        if events.len() >= self.capacity {
            warn!(capacity = self.capacity, "分析事件缓冲已满，丢弃最早的事件");
            events.remove(0);
        }
        events.push(event);
        Ok(())
    }
}

/// 注入给模块的全部平台能力
#[derive(Clone)]
pub struct PlatformServices {
    /// 数据库
    pub db: Arc<dyn Database>,
    /// 键值缓存
    pub cache: Arc<dyn KvStore>,
    /// 对象存储
    pub storage: Arc<dyn BlobStore>,
    /// 出站 HTTP
    pub http: Arc<dyn HttpClient>,
    /// 分析上报
    pub analytics: Arc<dyn AnalyticsSink>,
}

impl PlatformServices {
    /// 内存实现加上给定的 HTTP 客户端
    pub fn in_memory(http: Arc<dyn HttpClient>) -> Self {
        Self {
            db: Arc::new(MemoryDatabase::new()),
            cache: Arc::new(MemoryKvStore::new()),
            storage: Arc::new(MemoryBlobStore::new()),
            http,
            analytics: Arc::new(MemoryAnalytics::default()),
        }
    }
}

impl std::fmt::Debug for PlatformServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformServices").finish_non_exhaustive()
    }
}
