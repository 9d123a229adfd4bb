//! 列类型数据源解析
//!
//! 静态数据源直接返回清单中的值；API 数据源替换 `$settings.<key>` 引用、
//! 注入认证头、发起请求、按 `dataPath` 提取数组并映射为选项，
//! 可选地按模块和列类型缓存结果。

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::handlers::value_to_string;
use crate::module::manifest::{
    AuthKind, CacheSetting, DataSourceDefinition, DataSourceKind, Settings,
};
use crate::module::platform::{HttpClient, HttpRequest, KvStore};
use crate::utils::{module_namespace, ModuleError, Result};

static SETTINGS_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$settings\.([A-Za-z0-9_\-]+)").expect("Invalid settings reference regex")
});

static TTL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d+)\s*([smhd])\s*$").expect("Invalid ttl regex"));

/// 缓存默认 TTL
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

const DEFAULT_AUTH_HEADER: &str = "X-API-Key";

/// 单个选项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionItem {
    /// 值
    pub value: Value,
    /// 展示文本
    pub label: String,
    /// API 返回的原始条目
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
}

/// 解析结果
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedOptions {
    /// 选项
    pub options: Vec<OptionItem>,
    /// 是否来自缓存
    pub cached: bool,
}

/// 解析 TTL 字符串：`30s` `5m` `1h` `7d`
pub fn parse_ttl(text: &str) -> Option<Duration> {
    let caps = TTL.captures(text)?;
    let amount: u64 = caps[1].parse().ok()?;
    let unit = match &caps[2] {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        _ => 86_400,
    };
    Some(Duration::from_secs(amount.saturating_mul(unit)))
}

/// 数据源的缓存 TTL，`None` 表示不缓存
///
/// 无法解析的 TTL 字符串按默认值处理。
pub fn cache_ttl(setting: Option<&CacheSetting>) -> Option<Duration> {
    match setting? {
        CacheSetting::Enabled(true) => Some(DEFAULT_CACHE_TTL),
        CacheSetting::Enabled(false) => None,
        CacheSetting::Ttl(text) => Some(parse_ttl(text).unwrap_or_else(|| {
            warn!(ttl = %text, "无法解析的缓存 TTL，使用默认值");
            DEFAULT_CACHE_TTL
        })),
    }
}

/// 模块全部数据源缓存键的公共前缀
pub fn cache_prefix(module_id: &str) -> String {
    format!("datasource:{}:", module_namespace(module_id))
}

/// 缓存键
pub fn cache_key(module_id: &str, type_id: &str) -> String {
    format!("{}{}", cache_prefix(module_id), type_id)
}

/// 替换字符串中的 `$settings.<key>` 引用
///
/// # Errors
///
/// 设置不存在或为 null 时返回 `SettingResolution`
pub fn substitute_settings(text: &str, settings: &Settings) -> Result<String> {
    let mut output = String::with_capacity(text.len());
    let mut last = 0;
    for caps in SETTINGS_REF.captures_iter(text) {
        let (Some(whole), Some(key)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let value = match settings.get(key.as_str()) {
            None | Some(Value::Null) => {
                return Err(ModuleError::SettingResolution(key.as_str().to_string()))
            }
            Some(value) => value_to_string(value),
        };
        output.push_str(&text[last..whole.start()]);
        output.push_str(&value);
        last = whole.end();
    }
    output.push_str(&text[last..]);
    Ok(output)
}

/// 按点分路径取值，数字段作为数组下标
pub fn extract_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(value, |current, segment| match current {
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            Value::Object(map) => map.get(segment),
            _ => None,
        })
}

fn to_option(item: &Value, value_field: &str, label_field: &str, keep_raw: bool) -> OptionItem {
    match item {
        Value::Object(map) => {
            let value = map.get(value_field).cloned().unwrap_or(Value::Null);
            let label = map
                .get(label_field)
                .map(value_to_string)
                .unwrap_or_else(|| value_to_string(&value));
            OptionItem {
                value,
                label,
                raw: keep_raw.then(|| item.clone()),
            }
        }
        scalar => OptionItem {
            value: scalar.clone(),
            label: value_to_string(scalar),
            raw: None,
        },
    }
}

/// 数据源解析器
pub struct DataSourceResolver {
    http: Arc<dyn HttpClient>,
    cache: Arc<dyn KvStore>,
    timeout: Duration,
}

impl DataSourceResolver {
    /// 创建解析器
    ///
    /// # Arguments
    ///
    /// * `http` - 出站 HTTP 客户端
    /// * `cache` - 选项缓存
    /// * `timeout` - 单次请求超时
    pub fn new(http: Arc<dyn HttpClient>, cache: Arc<dyn KvStore>, timeout: Duration) -> Self {
        Self {
            http,
            cache,
            timeout,
        }
    }

    /// 解析列类型的数据源
    ///
    /// # Errors
    ///
    /// - 设置引用无法解析时返回 `SettingResolution`
    /// - 401/403 返回 `DataSourceAuth`，其它非 2xx 或传输失败返回 `DataSourceNetwork`
    /// - 响应中找不到数组时返回 `InvalidResponseShape`
    pub async fn resolve(
        &self,
        module_id: &str,
        type_id: &str,
        source: &DataSourceDefinition,
        settings: &Settings,
    ) -> Result<ResolvedOptions> {
        if source.kind == DataSourceKind::Static {
            let options = source
                .values
                .iter()
                .flatten()
                .map(|item| to_option(item, &source.value_field, &source.label_field, false))
                .collect();
            return Ok(ResolvedOptions {
                options,
                cached: false,
            });
        }

        let ttl = cache_ttl(source.cache.as_ref());
        let key = cache_key(module_id, type_id);

        if ttl.is_some() {
            if let Some(hit) = self.cache.get(&key).await? {
                match serde_json::from_value::<Vec<OptionItem>>(hit) {
                    Ok(options) => {
                        debug!(module_id = %module_id, type_id = %type_id, "数据源命中缓存");
                        return Ok(ResolvedOptions {
                            options,
                            cached: true,
                        });
                    }
                    Err(e) => warn!(key = %key, error = %e, "缓存内容无效，重新获取"),
                }
            }
        }

        let options = self.fetch(source, settings).await?;

        if let Some(ttl) = ttl {
            self.cache
                .put(&key, serde_json::to_value(&options)?, Some(ttl))
                .await?;
        }

        Ok(ResolvedOptions {
            options,
            cached: false,
        })
    }

    /// 丢弃模块的全部缓存选项
    ///
    /// 设置或清单变化后，请求地址和认证信息可能已经不同，旧选项不能继续使用。
    pub async fn invalidate(&self, module_id: &str) -> Result<u64> {
        let removed = self.cache.delete_prefix(&cache_prefix(module_id)).await?;
        if removed > 0 {
            debug!(module_id = %module_id, removed, "数据源缓存已失效");
        }
        Ok(removed)
    }

    fn build_request(&self, source: &DataSourceDefinition, settings: &Settings) -> Result<HttpRequest> {
        let endpoint = source
            .endpoint
            .as_deref()
            .ok_or_else(|| ModuleError::InvalidResponseShape("API 数据源缺少 endpoint".to_string()))?;

        let mut request = HttpRequest::get(substitute_settings(endpoint, settings)?)
            .with_timeout(self.timeout);
        if let Some(method) = &source.method {
            request.method = method.to_ascii_uppercase();
        }
        for (name, value) in &source.headers {
            request = request.header(name.clone(), substitute_settings(value, settings)?);
        }

        if let Some(auth) = &source.auth {
            let token = auth
                .token
                .as_deref()
                .map(|t| substitute_settings(t, settings))
                .transpose()?
                .filter(|t| !t.is_empty());
            let missing_token =
                || ModuleError::DataSourceAuth(format!("{:?} 认证缺少 token", auth.kind));
            request = match auth.kind {
                AuthKind::Bearer => {
                    let token = token.ok_or_else(missing_token)?;
                    request.header("Authorization", format!("Bearer {}", token))
                }
                AuthKind::Basic => {
                    let username = auth
                        .username
                        .as_deref()
                        .map(|u| substitute_settings(u, settings))
                        .transpose()?
                        .unwrap_or_default();
                    let password = match auth.password.as_deref() {
                        Some(p) => substitute_settings(p, settings)?,
                        None => token.unwrap_or_default(),
                    };
                    if username.is_empty() && password.is_empty() {
                        return Err(ModuleError::DataSourceAuth(
                            "Basic 认证缺少用户名和密码".to_string(),
                        ));
                    }
                    let encoded = BASE64.encode(format!("{}:{}", username, password));
                    request.header("Authorization", format!("Basic {}", encoded))
                }
                AuthKind::Header => {
                    let token = token.ok_or_else(missing_token)?;
                    request.header(
                        auth.header_name.as_deref().unwrap_or(DEFAULT_AUTH_HEADER),
                        token,
                    )
                }
            };
        }
        Ok(request)
    }

    async fn fetch(&self, source: &DataSourceDefinition, settings: &Settings) -> Result<Vec<OptionItem>> {
        let request = self.build_request(source, settings)?;
        let url = request.url.clone();

        let response = timeout(self.timeout, self.http.send(request))
            .await
            .map_err(|_| {
                ModuleError::DataSourceNetwork(format!(
                    "请求超时 ({}ms): {}",
                    self.timeout.as_millis(),
                    url
                ))
            })??;

        match response.status {
            401 | 403 => {
                return Err(ModuleError::DataSourceAuth(format!(
                    "HTTP {}: {}",
                    response.status, url
                )))
            }
            status if !response.is_success() => {
                return Err(ModuleError::DataSourceNetwork(format!("HTTP {}: {}", status, url)))
            }
            _ => {}
        }

        let body = response
            .json()
            .map_err(|e| ModuleError::InvalidResponseShape(format!("响应不是 JSON: {}", e)))?;

        let data_path = source
            .response_schema
            .as_ref()
            .and_then(|schema| schema.data_path.as_deref());
        let data = match data_path {
            Some(path) => extract_path(&body, path).ok_or_else(|| {
                ModuleError::InvalidResponseShape(format!("路径 '{}' 不存在", path))
            })?,
            None => &body,
        };
        let Value::Array(items) = data else {
            return Err(ModuleError::InvalidResponseShape(
                "响应数据不是数组".to_string(),
            ));
        };

        debug!(url = %url, count = items.len(), "数据源请求完成");
        Ok(items
            .iter()
            .map(|item| to_option(item, &source.value_field, &source.label_field, true))
            .collect())
    }
}

impl std::fmt::Debug for DataSourceResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSourceResolver")
            .field("timeout", &self.timeout)
            .finish()
    }
}
