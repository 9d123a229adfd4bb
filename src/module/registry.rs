//! 模块注册表
//!
//! 已安装模块的持久化记录，每个模块 ID 一行。记录只通过 `ModuleManager`
//! 的操作修改；状态变化统一经过 [`ModuleRegistry::transition`]，
//! 在存储的写锁内按转换表检查。

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, trace};

use super::manifest::{ModuleManifest, ModuleSource, Settings};
use super::state::ModuleStatus;
use crate::utils::{ModuleError, Result};

/// 每个模块保留的历史事件数
pub const HISTORY_LIMIT: usize = 200;

/// 模块统计
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleStats {
    /// 激活次数
    pub activation_count: u64,
    /// 最近一次激活耗时
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activation_ms: Option<u64>,
    /// 累计激活耗时
    pub total_activation_ms: u64,
    /// 错误次数
    pub error_count: u64,
    /// 使用计数
    #[serde(default)]
    pub usage: BTreeMap<String, u64>,
}

/// 已安装模块记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledModule {
    /// 模块 ID
    pub id: String,
    /// 已安装版本
    pub version: String,
    /// 当前状态
    pub status: ModuleStatus,
    /// 安装来源
    pub source: ModuleSource,
    /// 模块设置
    #[serde(default)]
    pub settings: Settings,
    /// 安装时间
    pub installed_at: DateTime<Utc>,
    /// 最近激活时间
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activated_at: Option<DateTime<Utc>>,
    /// 最近更新时间
    pub updated_at: DateTime<Utc>,
    /// 最近错误
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// 最近错误时间
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_at: Option<DateTime<Utc>>,
    /// 当前版本的清单
    pub manifest: ModuleManifest,
    /// 统计
    #[serde(default)]
    pub stats: ModuleStats,
}

impl InstalledModule {
    /// 新记录，状态为 `installing`，设置取清单中的默认值
    pub fn new(manifest: ModuleManifest, source: ModuleSource) -> Self {
        let now = Utc::now();
        Self {
            id: manifest.id.clone(),
            version: manifest.version.clone(),
            status: ModuleStatus::Installing,
            source,
            settings: manifest.default_settings(),
            installed_at: now,
            activated_at: None,
            updated_at: now,
            error: None,
            error_at: None,
            manifest,
            stats: ModuleStats::default(),
        }
    }
}

/// 注册表事件种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RegistryEventKind {
    /// 已安装
    Installed,
    /// 已激活
    Activated,
    /// 已停用
    Deactivated,
    /// 已更新
    Updated,
    /// 已卸载
    Uninstalled,
    /// 设置已修改
    SettingsChanged,
    /// 出错
    Error,
}

/// 注册表事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEvent {
    /// 模块 ID
    pub module_id: String,
    /// 种类
    pub kind: RegistryEventKind,
    /// 描述
    pub message: String,
    /// 时间
    pub at: DateTime<Utc>,
}

impl RegistryEvent {
    /// 创建当前时间的事件
    pub fn new(module_id: impl Into<String>, kind: RegistryEventKind, message: impl Into<String>) -> Self {
        Self {
            module_id: module_id.into(),
            kind,
            message: message.into(),
            at: Utc::now(),
        }
    }
}

/// 模块注册表接口
#[async_trait]
pub trait ModuleRegistry: Send + Sync {
    /// 获取模块记录
    async fn get(&self, module_id: &str) -> Result<Option<InstalledModule>>;

    /// 所有模块记录（按 ID 排序）
    async fn list(&self) -> Result<Vec<InstalledModule>>;

    /// 指定状态的模块记录
    async fn list_by_status(&self, status: ModuleStatus) -> Result<Vec<InstalledModule>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|m| m.status == status)
            .collect())
    }

    /// 插入新记录，ID 已存在时返回 `AlreadyInstalled`
    async fn insert(&self, record: InstalledModule) -> Result<()>;

    /// 按转换表修改状态，返回修改后的记录
    ///
    /// # Errors
    ///
    /// - 模块不存在时返回 `NotInstalled`
    /// - 转换不在表中时返回 `InvalidTransition`，记录保持不变
    async fn transition(&self, module_id: &str, to: ModuleStatus) -> Result<InstalledModule>;

    /// 进入 `error` 状态并记录消息与时间，错误计数加一
    ///
    /// 由 [`ModuleStatus::can_fail`] 把关而不是 `transition` 的转换表：
    /// 已处于 `error` 的模块再次失败时保持 `error`，刷新消息与时间。
    async fn set_error(&self, module_id: &str, message: &str) -> Result<InstalledModule>;

    /// 替换清单与版本
    async fn update_manifest(&self, module_id: &str, manifest: ModuleManifest) -> Result<()>;

    /// 替换设置
    async fn update_settings(&self, module_id: &str, settings: Settings) -> Result<()>;

    /// 删除记录（历史事件保留）
    async fn delete(&self, module_id: &str) -> Result<()>;

    /// 追加历史事件
    async fn record_event(&self, event: RegistryEvent) -> Result<()>;

    /// 历史事件（旧到新）
    async fn history(&self, module_id: &str) -> Result<Vec<RegistryEvent>>;

    /// 记录一次成功激活的耗时
    async fn record_activation(&self, module_id: &str, duration_ms: u64) -> Result<()>;

    /// 增加使用计数，返回新值
    async fn increment_usage(&self, module_id: &str, counter: &str, by: u64) -> Result<u64>;
}

// ============================================================================
// 本地实现
// ============================================================================

/// 注册表内容
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RegistryState {
    #[serde(default)]
    modules: HashMap<String, InstalledModule>,
    #[serde(default)]
    history: HashMap<String, VecDeque<RegistryEvent>>,
}

impl RegistryState {
    fn record_mut(&mut self, module_id: &str) -> Result<&mut InstalledModule> {
        self.modules
            .get_mut(module_id)
            .ok_or_else(|| ModuleError::NotInstalled(module_id.to_string()))
    }
}

/// 本地注册表
///
/// 内存存储，可选地在每次修改后整体写入一个 JSON 文件（CLI 使用）。
/// 文件写入先写临时文件再重命名，失败时内存中的记录不变。
#[derive(Debug, Clone)]
pub struct LocalRegistry {
    state: Arc<RwLock<RegistryState>>,
    persist_path: Option<PathBuf>,
}

impl LocalRegistry {
    /// 纯内存注册表
    pub fn in_memory() -> Self {
        Self {
            state: Arc::new(RwLock::new(RegistryState::default())),
            persist_path: None,
        }
    }

    /// 打开 JSON 文件注册表，文件不存在时创建空注册表
    pub async fn json_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => RegistryState::default(),
            Err(e) => return Err(e.into()),
        };

        debug!(path = %path.display(), "打开注册表文件");
        Ok(Self {
            state: Arc::new(RwLock::new(state)),
            persist_path: Some(path),
        })
    }

    /// 持久化文件路径
    pub fn persist_path(&self) -> Option<&Path> {
        self.persist_path.as_deref()
    }

    async fn read<T>(&self, f: impl FnOnce(&RegistryState) -> T) -> T {
        let state = self.state.read().await;
        f(&state)
    }

    async fn mutate<T>(&self, f: impl FnOnce(&mut RegistryState) -> Result<T>) -> Result<T> {
        let mut state = self.state.write().await;
        match self.persist_path {
            None => f(&mut state),
            Some(ref path) => {
                let mut next = state.clone();
                let result = f(&mut next)?;
                persist(path, &next).await?;
                *state = next;
                Ok(result)
            }
        }
    }
}

impl Default for LocalRegistry {
    fn default() -> Self {
        Self::in_memory()
    }
}

async fn persist(path: &Path, state: &RegistryState) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let bytes = serde_json::to_vec_pretty(state)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| ModuleError::Storage(format!("写入 {} 失败: {}", tmp.display(), e)))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| ModuleError::Storage(format!("替换 {} 失败: {}", path.display(), e)))?;
    Ok(())
}

#[async_trait]
impl ModuleRegistry for LocalRegistry {
    async fn get(&self, module_id: &str) -> Result<Option<InstalledModule>> {
        Ok(self.read(|s| s.modules.get(module_id).cloned()).await)
    }

    async fn list(&self) -> Result<Vec<InstalledModule>> {
        let mut modules = self
            .read(|s| s.modules.values().cloned().collect::<Vec<_>>())
            .await;
        modules.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(modules)
    }

    async fn insert(&self, record: InstalledModule) -> Result<()> {
        self.mutate(|s| {
            if s.modules.contains_key(&record.id) {
                return Err(ModuleError::AlreadyInstalled(record.id.clone()));
            }
            s.modules.insert(record.id.clone(), record);
            Ok(())
        })
        .await
    }

    async fn transition(&self, module_id: &str, to: ModuleStatus) -> Result<InstalledModule> {
        self.mutate(|s| {
            let record = s.record_mut(module_id)?;
            let from = record.status;
            if !from.can_transition_to(to) {
                return Err(ModuleError::InvalidTransition {
                    module_id: module_id.to_string(),
                    from,
                    to,
                });
            }

            let now = Utc::now();
            record.status = to;
            record.updated_at = now;
            match to {
                ModuleStatus::Active => {
                    record.activated_at = Some(now);
                    record.error = None;
                    record.error_at = None;
                }
                ModuleStatus::Installed | ModuleStatus::Disabled => {
                    record.error = None;
                    record.error_at = None;
                }
                _ => {}
            }

            trace!(module_id = %module_id, from = %from, to = %to, "模块状态转换");
            Ok(record.clone())
        })
        .await
    }

    async fn set_error(&self, module_id: &str, message: &str) -> Result<InstalledModule> {
        self.mutate(|s| {
            let record = s.record_mut(module_id)?;
            if !record.status.can_fail() {
                return Err(ModuleError::InvalidTransition {
                    module_id: module_id.to_string(),
                    from: record.status,
                    to: ModuleStatus::Error,
                });
            }
            let now = Utc::now();
            record.status = ModuleStatus::Error;
            record.error = Some(message.to_string());
            record.error_at = Some(now);
            record.updated_at = now;
            record.stats.error_count += 1;
            Ok(record.clone())
        })
        .await
    }

    async fn update_manifest(&self, module_id: &str, manifest: ModuleManifest) -> Result<()> {
        self.mutate(|s| {
            let record = s.record_mut(module_id)?;
            record.version = manifest.version.clone();
            record.manifest = manifest;
            record.updated_at = Utc::now();
            Ok(())
        })
        .await
    }

    async fn update_settings(&self, module_id: &str, settings: Settings) -> Result<()> {
        self.mutate(|s| {
            let record = s.record_mut(module_id)?;
            record.settings = settings;
            record.updated_at = Utc::now();
            Ok(())
        })
        .await
    }

    async fn delete(&self, module_id: &str) -> Result<()> {
        self.mutate(|s| {
            s.modules
                .remove(module_id)
                .map(|_| ())
                .ok_or_else(|| ModuleError::NotInstalled(module_id.to_string()))
        })
        .await
    }

    async fn record_event(&self, event: RegistryEvent) -> Result<()> {
        self.mutate(|s| {
            let events = s.history.entry(event.module_id.clone()).or_default();
            events.push_back(event);
            while events.len() > HISTORY_LIMIT {
                events.pop_front();
            }
            Ok(())
        })
        .await
    }

    async fn history(&self, module_id: &str) -> Result<Vec<RegistryEvent>> {
        Ok(self
            .read(|s| {
                s.history
                    .get(module_id)
                    .map(|events| events.iter().cloned().collect())
                    .unwrap_or_default()
            })
            .await)
    }

    async fn record_activation(&self, module_id: &str, duration_ms: u64) -> Result<()> {
        self.mutate(|s| {
            let stats = &mut s.record_mut(module_id)?.stats;
            stats.activation_count += 1;
            stats.last_activation_ms = Some(duration_ms);
            stats.total_activation_ms = stats.total_activation_ms.saturating_add(duration_ms);
            Ok(())
        })
        .await
    }

    async fn increment_usage(&self, module_id: &str, counter: &str, by: u64) -> Result<u64> {
        self.mutate(|s| {
            let stats = &mut s.record_mut(module_id)?.stats;
            let value = stats.usage.entry(counter.to_string()).or_insert(0);
            *value = value.saturating_add(by);
            Ok(*value)
        })
        .await
    }
}
