//! 事件总线
//!
//! 平台发布模块生命周期事件，模块通过执行上下文订阅和发布自己的事件。
//! 订阅者回调在独立线程中执行，单个回调 panic 或超时不影响其他订阅者。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::utils::generate_uuid;

/// 生命周期事件名
pub mod names {
    /// 模块已安装
    pub const INSTALLED: &str = "module.installed";
    /// 模块已激活
    pub const ACTIVATED: &str = "module.activated";
    /// 模块已停用
    pub const DEACTIVATED: &str = "module.deactivated";
    /// 模块已更新
    pub const UPDATED: &str = "module.updated";
    /// 模块已卸载
    pub const UNINSTALLED: &str = "module.uninstalled";
    /// 模块设置已修改
    pub const SETTINGS_CHANGED: &str = "module.settings_changed";
    /// 模块出错
    pub const ERROR: &str = "module.error";
}

/// 平台自身作为发送方时使用的 ID
pub const PLATFORM_SENDER: &str = "platform";

const DEFAULT_HANDLER_TIMEOUT_SECS: u64 = 5;

/// 事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// 事件唯一标识
    pub event_id: String,
    /// 事件类型（如 `module.activated`）
    pub event_type: String,
    /// 发送方
    pub sender: String,
    /// 数据
    #[serde(default)]
    pub data: Value,
    /// 时间
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// 创建事件
    pub fn new(event_type: impl Into<String>, sender: impl Into<String>, data: Value) -> Self {
        Self {
            event_id: generate_uuid(),
            event_type: event_type.into(),
            sender: sender.into(),
            data,
            timestamp: Utc::now(),
        }
    }
}

/// 事件回调
pub type EventCallback = Arc<dyn Fn(Event) + Send + Sync>;

#[derive(Clone)]
struct Subscription {
    id: String,
    subscriber_id: String,
    pattern: String,
    callback: EventCallback,
}

impl Subscription {
    /// 匹配模式：`*` 全部，`prefix.*` 前缀，其它精确匹配
    fn matches(&self, event_type: &str) -> bool {
        if self.pattern == "*" {
            return true;
        }
        if let Some(prefix) = self.pattern.strip_suffix(".*") {
            return event_type.len() > prefix.len() + 1
                && event_type.starts_with(prefix)
                && event_type.as_bytes()[prefix.len()] == b'.';
        }
        self.pattern == event_type
    }
}

/// 一次发布的分发结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// 成功
    pub delivered: usize,
    /// 回调 panic
    pub failed: usize,
    /// 回调超时
    pub timed_out: usize,
}

enum DispatchResult {
    Delivered,
    Failed,
    TimedOut,
}

/// 事件总线
#[derive(Clone)]
pub struct EventBus {
    subscriptions: Arc<RwLock<HashMap<String, Subscription>>>,
    handler_timeout: Duration,
}

impl EventBus {
    /// 使用默认回调超时创建
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(DEFAULT_HANDLER_TIMEOUT_SECS))
    }

    /// 指定回调超时
    pub fn with_timeout(handler_timeout: Duration) -> Self {
        Self {
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
            handler_timeout,
        }
    }

    /// 订阅事件，返回订阅 ID
    ///
    /// # Arguments
    ///
    /// * `subscriber_id` - 订阅方（模块 ID 或 `platform`）
    /// * `pattern` - 事件类型，支持 `*` 和 `prefix.*`
    /// * `callback` - 回调
    pub async fn subscribe(
        &self,
        subscriber_id: impl Into<String>,
        pattern: impl Into<String>,
        callback: EventCallback,
    ) -> String {
        let subscription = Subscription {
            id: generate_uuid(),
            subscriber_id: subscriber_id.into(),
            pattern: pattern.into(),
            callback,
        };
        let id = subscription.id.clone();
        debug!(
            subscriber = %subscription.subscriber_id,
            pattern = %subscription.pattern,
            "新增事件订阅"
        );
        self.subscriptions.write().await.insert(id.clone(), subscription);
        id
    }

    /// 取消订阅
    pub async fn unsubscribe(&self, subscription_id: &str) -> bool {
        self.subscriptions.write().await.remove(subscription_id).is_some()
    }

    /// 取消某个订阅方的全部订阅，返回取消数量
    pub async fn unsubscribe_all(&self, subscriber_id: &str) -> usize {
        let mut subscriptions = self.subscriptions.write().await;
        let before = subscriptions.len();
        subscriptions.retain(|_, s| s.subscriber_id != subscriber_id);
        before - subscriptions.len()
    }

    /// 订阅总数
    pub async fn subscription_count(&self) -> usize {
        self.subscriptions.read().await.len()
    }

    /// 发布事件，等待所有匹配的回调结束或超时
    pub async fn publish(&self, event: Event) -> DispatchSummary {
        let callbacks: Vec<EventCallback> = self
            .subscriptions
            .read()
            .await
            .values()
            .filter(|s| s.matches(&event.event_type))
            .map(|s| s.callback.clone())
            .collect();

        trace!(
            event_type = %event.event_type,
            subscribers = callbacks.len(),
            "发布事件"
        );

        let dispatches = callbacks.into_iter().map(|callback| {
            Self::invoke_with_timeout(callback, event.clone(), self.handler_timeout)
        });

        let mut summary = DispatchSummary::default();
        for result in futures::future::join_all(dispatches).await {
            match result {
                DispatchResult::Delivered => summary.delivered += 1,
                DispatchResult::Failed => summary.failed += 1,
                DispatchResult::TimedOut => summary.timed_out += 1,
            }
        }

        if summary.failed > 0 || summary.timed_out > 0 {
            warn!(
                event_type = %event.event_type,
                failed = summary.failed,
                timed_out = summary.timed_out,
                "部分事件订阅者处理失败"
            );
        }
        summary
    }

    /// 回调是同步函数，放到阻塞线程池执行并捕获 panic。
    /// 超时后不再等待，回调可能仍在运行。
    async fn invoke_with_timeout(
        callback: EventCallback,
        event: Event,
        handler_timeout: Duration,
    ) -> DispatchResult {
        let result = timeout(handler_timeout, async move {
            tokio::task::spawn_blocking(move || {
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || callback(event)))
            })
            .await
        })
        .await;

        match result {
            Ok(Ok(Ok(()))) => DispatchResult::Delivered,
            Ok(Ok(Err(_))) | Ok(Err(_)) => DispatchResult::Failed,
            Err(_) => DispatchResult::TimedOut,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("handler_timeout", &self.handler_timeout)
            .finish_non_exhaustive()
    }
}
