//! 进程级实例缓存
//!
//! 同一进程会被多个请求复用，每个请求有自己的 `ModuleManager`，
//! 它们共享这里的已激活实例和初始化标志。标志是三态的：
//!
//! - `Pending`: 尚未初始化或初始化失败
//! - `Running`: 某个请求正在初始化
//! - `Done`: 缓存已包含全部已激活模块
//!
//! `Pending -> Running` 是一次原子比较交换，发生在任何 `.await` 之前，
//! 两个并发请求不可能同时开始 I/O。缓存是尽力而为的，丢失时重新初始化即可。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, trace};

use super::context::ModuleContext;
use super::loader::{LoadedInstance, ModuleLoader};

/// 初始化标志
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InitState {
    /// 未初始化
    Pending = 0,
    /// 初始化中
    Running = 1,
    /// 已完成
    Done = 2,
}

impl InitState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => InitState::Running,
            2 => InitState::Done,
            _ => InitState::Pending,
        }
    }
}

/// [`InstanceCache::begin`] 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeginOutcome {
    /// 本次调用取得了初始化权
    Started,
    /// 其他请求正在初始化
    AlreadyRunning,
    /// 已经初始化完成
    AlreadyDone,
}

/// 已激活的模块：实例加上它的执行上下文
#[derive(Debug, Clone)]
pub struct ActiveModule {
    /// 加载的实例
    pub loaded: LoadedInstance,
    /// 执行上下文
    pub context: Arc<ModuleContext>,
}

/// 进程级实例缓存
#[derive(Debug)]
pub struct InstanceCache {
    state: AtomicU8,
    entries: RwLock<HashMap<String, ActiveModule>>,
}

impl InstanceCache {
    /// 创建空缓存，标志为 `Pending`
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(InitState::Pending as u8),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// 当前标志
    pub fn state(&self) -> InitState {
        InitState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// 尝试取得初始化权（`Pending -> Running`）
    pub fn begin(&self) -> BeginOutcome {
        match self.state.compare_exchange(
            InitState::Pending as u8,
            InitState::Running as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                trace!("取得初始化权");
                BeginOutcome::Started
            }
            Err(current) => match InitState::from_u8(current) {
                InitState::Done => BeginOutcome::AlreadyDone,
                _ => BeginOutcome::AlreadyRunning,
            },
        }
    }

    /// 初始化完成（`Running -> Done`）
    pub fn finish(&self) {
        self.state.store(InitState::Done as u8, Ordering::Release);
    }

    /// 回到 `Pending`，下一个请求会重新初始化
    pub fn reset(&self) {
        self.state.store(InitState::Pending as u8, Ordering::Release);
    }

    /// 写入条目
    pub async fn insert(&self, module_id: impl Into<String>, active: ActiveModule) {
        self.entries.write().await.insert(module_id.into(), active);
    }

    /// 移除条目
    pub async fn remove(&self, module_id: &str) -> Option<ActiveModule> {
        self.entries.write().await.remove(module_id)
    }

    /// 读取条目
    pub async fn get(&self, module_id: &str) -> Option<ActiveModule> {
        self.entries.read().await.get(module_id).cloned()
    }

    /// 是否包含条目
    pub async fn contains(&self, module_id: &str) -> bool {
        self.entries.read().await.contains_key(module_id)
    }

    /// 条目数
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// 是否为空
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// 当前条目的副本，跳过加载后被卸载过的过期条目
    pub async fn snapshot(&self, loader: &ModuleLoader) -> Vec<(String, ActiveModule)> {
        let entries: Vec<(String, ActiveModule)> = self
            .entries
            .read()
            .await
            .iter()
            .map(|(id, active)| (id.clone(), active.clone()))
            .collect();

        let mut current = Vec::with_capacity(entries.len());
        for (module_id, active) in entries {
            if loader.is_current(&module_id, active.loaded.generation).await {
                current.push((module_id, active));
            } else {
                debug!(
                    module_id = %module_id,
                    generation = active.loaded.generation,
                    "跳过过期的缓存实例"
                );
            }
        }
        current
    }

    /// 清空条目并回到 `Pending`
    pub async fn clear(&self) {
        self.entries.write().await.clear();
        self.reset();
    }
}

impl Default for InstanceCache {
    fn default() -> Self {
        Self::new()
    }
}
