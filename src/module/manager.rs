//! 模块管理器
//!
//! 编排模块的整个生命周期：安装、激活、停用、重载、更新、卸载和设置修改。
//! 每个请求创建自己的 `ModuleManager`，持有本地实例表；
//! 跨请求共享的只有 [`ManagerServices`] 中的组件，包括进程级实例缓存。
//!
//! 所有状态变化都通过 [`ModuleRegistry::transition`] 完成，
//! 生命周期错误在这里被捕获、持久化为 `error` 状态、记录到历史并返回。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};

use super::capabilities::{qualified_id, CapabilityRegistry};
use super::context::ContextFactory;
use super::events::{names, Event, PLATFORM_SENDER};
use super::instance_cache::{ActiveModule, BeginOutcome, InitState, InstanceCache};
use super::loader::{ModuleLoader, PackageSource};
use super::manifest::{compare_versions, ModuleSource, Settings};
use super::registry::{InstalledModule, ModuleRegistry, RegistryEvent, RegistryEventKind};
use super::state::ModuleStatus;
use super::supervisor::{Hook, HookSupervisor};
use crate::datasource::{DataSourceResolver, OptionItem};
use crate::utils::{ModuleError, Result};

/// 跨请求共享的组件
#[derive(Clone)]
pub struct ManagerServices {
    /// 模块注册表
    pub registry: Arc<dyn ModuleRegistry>,
    /// 包来源
    pub packages: Arc<dyn PackageSource>,
    /// 加载器
    pub loader: Arc<ModuleLoader>,
    /// 上下文工厂
    pub contexts: Arc<ContextFactory>,
    /// 进程级实例缓存
    pub cache: Arc<InstanceCache>,
    /// 数据源解析器
    pub resolver: Arc<DataSourceResolver>,
    /// 钩子监督器
    pub supervisor: HookSupervisor,
    /// 平台版本
    pub platform_version: String,
}

impl std::fmt::Debug for ManagerServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagerServices")
            .field("supervisor", &self.supervisor)
            .field("platform_version", &self.platform_version)
            .finish_non_exhaustive()
    }
}

/// 安装结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallResult {
    /// 是否成功
    pub success: bool,
    /// 模块 ID（清单获取失败时为空）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_id: Option<String>,
    /// 安装的版本
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// 失败原因
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl InstallResult {
    fn failed(module_id: Option<String>, err: &ModuleError) -> Self {
        Self {
            success: false,
            module_id,
            version: None,
            error: Some(err.to_string()),
        }
    }
}

/// 更新结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResult {
    /// 模块 ID
    pub module_id: String,
    /// 更新前的版本
    pub from_version: String,
    /// 更新后的版本
    pub to_version: String,
    /// 是否发生了更新
    pub updated: bool,
}

/// 列类型的可选值
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnTypeOptions {
    /// 选项
    pub options: Vec<OptionItem>,
    /// 列类型是否多值
    pub multi_value: bool,
    /// 是否来自缓存
    pub cached: bool,
}

/// 单个模块的使用统计
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleUsage {
    /// 模块 ID
    pub module_id: String,
    /// 当前状态
    pub status: ModuleStatus,
    /// 激活次数
    pub activation_count: u64,
    /// 平均激活耗时
    pub average_activation_ms: Option<u64>,
    /// 错误次数
    pub error_count: u64,
    /// 历史事件数
    pub event_count: usize,
    /// 使用计数
    pub usage: BTreeMap<String, u64>,
}

/// 模块管理器（请求级）
pub struct ModuleManager {
    services: ManagerServices,
    local: RwLock<HashMap<String, ActiveModule>>,
}

impl ModuleManager {
    /// 创建请求级管理器，本地实例表为空
    pub fn new(services: ManagerServices) -> Self {
        Self {
            services,
            local: RwLock::new(HashMap::new()),
        }
    }

    /// 共享组件
    pub fn services(&self) -> &ManagerServices {
        &self.services
    }

    // ==================== 初始化 ====================

    /// 把已激活模块装入本地实例表
    ///
    /// 进程级缓存已完成初始化时只复制缓存；其它请求正在初始化时直接返回；
    /// 否则由本次调用加载。失败时标志回到 `Pending`，本请求在没有模块的情况下继续。
    /// 返回本地实例数。
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> usize {
        let cache = &self.services.cache;
        match cache.begin() {
            BeginOutcome::AlreadyDone => {
                let snapshot = cache.snapshot(&self.services.loader).await;
                let mut local = self.local.write().await;
                local.extend(snapshot);
                debug!(count = local.len(), "从进程缓存复制实例");
                local.len()
            }
            BeginOutcome::AlreadyRunning => {
                debug!("其他请求正在初始化，跳过");
                self.local.read().await.len()
            }
            BeginOutcome::Started => match self.populate().await {
                Ok(count) => {
                    cache.finish();
                    info!(count, "模块初始化完成");
                    count
                }
                Err(e) => {
                    cache.reset();
                    warn!(error = %e, "模块初始化失败，本次请求不加载模块");
                    0
                }
            },
        }
    }

    async fn populate(&self) -> Result<usize> {
        let records = self
            .services
            .registry
            .list_by_status(ModuleStatus::Active)
            .await?;

        // 全部加载成功后才写入本地实例表
        let mut loaded = HashMap::with_capacity(records.len());
        for record in records {
            let active = match self.services.cache.get(&record.id).await {
                Some(active)
                    if self
                        .services
                        .loader
                        .is_current(&record.id, active.loaded.generation)
                        .await =>
                {
                    active
                }
                _ => {
                    let active = self.build_active(&record).await?;
                    self.services
                        .cache
                        .insert(record.id.clone(), active.clone())
                        .await;
                    active
                }
            };
            loaded.insert(record.id.clone(), active);
        }

        let mut local = self.local.write().await;
        local.extend(loaded);
        Ok(local.len())
    }

    /// 本地实例表中的模块 ID（排序）
    pub async fn loaded_modules(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.local.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    // ==================== 安装 ====================

    /// 安装模块
    ///
    /// 失败不会以错误返回，而是体现在 [`InstallResult`] 中；
    /// 记录已写入注册表之后的失败会把模块置为 `error`。
    #[instrument(skip(self, source), fields(source = %source))]
    pub async fn install(&self, source: ModuleSource) -> InstallResult {
        let manifest = match self.resolve_install_manifest(&source).await {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!(error = %e, "模块安装失败");
                return InstallResult::failed(None, &e);
            }
        };
        let module_id = manifest.id.clone();
        let version = manifest.version.clone();

        let record = InstalledModule::new(manifest.clone(), source.clone());
        if let Err(e) = self.services.registry.insert(record).await {
            warn!(module_id = %module_id, error = %e, "模块安装失败");
            return InstallResult::failed(Some(module_id), &e);
        }

        let outcome = async {
            self.services
                .packages
                .install_assets(&source, &manifest)
                .await?;
            self.services
                .registry
                .transition(&module_id, ModuleStatus::Installed)
                .await
        }
        .await;

        if let Err(e) = outcome {
            let e = self.fail(&module_id, e).await;
            return InstallResult::failed(Some(module_id), &e);
        }

        let message = format!("已安装 {}", version);
        self.announce(
            &module_id,
            RegistryEventKind::Installed,
            names::INSTALLED,
            &message,
            json!({ "moduleId": module_id, "version": version }),
        )
        .await;
        info!(module_id = %module_id, version = %version, "模块已安装");

        InstallResult {
            success: true,
            module_id: Some(module_id),
            version: Some(version),
            error: None,
        }
    }

    async fn resolve_install_manifest(
        &self,
        source: &ModuleSource,
    ) -> Result<super::manifest::ModuleManifest> {
        let manifest = self.services.packages.fetch_manifest(source, None).await?;
        manifest.validate()?;
        manifest.check_platform(&self.services.platform_version)?;
        if self.services.registry.get(&manifest.id).await?.is_some() {
            return Err(ModuleError::AlreadyInstalled(manifest.id));
        }
        Ok(manifest)
    }

    // ==================== 激活 / 停用 ====================

    /// 激活模块，已激活时为空操作
    ///
    /// # Errors
    ///
    /// - 模块未安装返回 `NotInstalled`
    /// - 当前状态不允许激活返回 `InvalidTransition`（记录不变）
    /// - 加载或 `on_activate` 失败时模块进入 `error`，错误被返回
    #[instrument(skip(self), fields(module_id = %module_id))]
    pub async fn activate(&self, module_id: &str) -> Result<InstalledModule> {
        let record = self.require(module_id).await?;
        if record.status == ModuleStatus::Active {
            debug!("模块已激活");
            return Ok(record);
        }

        self.services
            .registry
            .transition(module_id, ModuleStatus::Activating)
            .await?;

        match self.start(&record, None).await {
            Ok(record) => Ok(record),
            Err(e) => {
                self.services.loader.unload(module_id).await;
                Err(self.fail(module_id, e).await)
            }
        }
    }

    /// 加载实例、构建上下文、执行钩子，并提交 `active`
    async fn start(&self, record: &InstalledModule, upgrade_from: Option<&str>) -> Result<InstalledModule> {
        let module_id = record.id.as_str();
        let started = Instant::now();

        let active = self.build_active(record).await?;
        if let Some(from_version) = upgrade_from {
            self.run_hook(&active, Hook::Upgrade, Some(from_version.to_string()))
                .await?;
        }
        self.run_hook(&active, Hook::Activate, None).await?;

        let committed = self
            .services
            .registry
            .transition(module_id, ModuleStatus::Active)
            .await?;
        let elapsed = started.elapsed().as_millis() as u64;
        self.services
            .registry
            .record_activation(module_id, elapsed)
            .await?;

        self.local
            .write()
            .await
            .insert(module_id.to_string(), active.clone());
        if self.services.cache.state() == InitState::Done {
            self.services.cache.insert(module_id, active).await;
        }

        self.announce(
            module_id,
            RegistryEventKind::Activated,
            names::ACTIVATED,
            &format!("已激活 {} ({}ms)", committed.version, elapsed),
            json!({ "moduleId": module_id, "version": committed.version }),
        )
        .await;
        info!(module_id = %module_id, duration_ms = elapsed, "模块已激活");
        Ok(committed)
    }

    /// 停用模块，未激活时为空操作
    ///
    /// # Errors
    ///
    /// `on_deactivate` 失败时模块进入 `error`，实例仍被丢弃
    #[instrument(skip(self), fields(module_id = %module_id))]
    pub async fn deactivate(&self, module_id: &str) -> Result<InstalledModule> {
        let record = self.require(module_id).await?;
        if record.status != ModuleStatus::Active {
            debug!(status = %record.status, "模块未激活");
            return Ok(record);
        }

        self.services
            .registry
            .transition(module_id, ModuleStatus::Deactivating)
            .await?;

        let outcome = async {
            let active = self.current_active(&record).await?;
            self.run_hook(&active, Hook::Deactivate, None).await
        }
        .await;
        self.discard(module_id).await;

        if let Err(e) = outcome {
            return Err(self.fail(module_id, e).await);
        }

        let record = self
            .services
            .registry
            .transition(module_id, ModuleStatus::Disabled)
            .await?;
        self.announce(
            module_id,
            RegistryEventKind::Deactivated,
            names::DEACTIVATED,
            "已停用",
            json!({ "moduleId": module_id }),
        )
        .await;
        info!("模块已停用");
        Ok(record)
    }

    // ==================== 重载 ====================

    /// 重载模块：停用、清除缓存实例、按原状态重新激活
    #[instrument(skip(self), fields(module_id = %module_id))]
    pub async fn reload(&self, module_id: &str) -> Result<InstalledModule> {
        let record = self.require(module_id).await?;
        let was_active = record.status == ModuleStatus::Active;
        if was_active {
            self.deactivate(module_id).await?;
        }
        self.discard(module_id).await;
        if was_active {
            self.activate(module_id).await
        } else {
            self.require(module_id).await
        }
    }

    /// 重载全部已激活模块
    ///
    /// 结束时进程级缓存为空且标志为 `Pending`，下一次 [`initialize`](Self::initialize)
    /// 重新填充。返回重新激活成功的模块 ID，失败的模块已被置为 `error`。
    #[instrument(skip(self))]
    pub async fn reload_all(&self) -> Result<Vec<String>> {
        let active = self
            .services
            .registry
            .list_by_status(ModuleStatus::Active)
            .await?;

        let mut stopped = Vec::with_capacity(active.len());
        for record in &active {
            match self.deactivate(&record.id).await {
                Ok(_) => stopped.push(record.id.clone()),
                Err(e) => warn!(module_id = %record.id, error = %e, "重载时停用失败"),
            }
        }

        self.services.loader.purge_all().await;
        self.services.cache.clear().await;
        self.local.write().await.clear();

        let mut reactivated = Vec::with_capacity(stopped.len());
        for module_id in stopped {
            match self.activate(&module_id).await {
                Ok(_) => reactivated.push(module_id),
                Err(e) => warn!(module_id = %module_id, error = %e, "重载时激活失败"),
            }
        }

        self.services.cache.clear().await;
        info!(count = reactivated.len(), "全部模块已重载");
        Ok(reactivated)
    }

    // ==================== 更新 ====================

    /// 更新模块
    ///
    /// 未指定版本且获取到的版本不比当前新时不做任何事（`updated == false`）。
    /// 更新期间已激活的模块会先停用，完成后以 `on_upgrade` + `on_activate` 重新激活。
    ///
    /// # Errors
    ///
    /// 清单获取失败时模块状态不变；进入 `updating` 之后的失败会把模块置为 `error`
    #[instrument(skip(self), fields(module_id = %module_id))]
    pub async fn update(&self, module_id: &str, version: Option<&str>) -> Result<UpdateResult> {
        let record = self.require(module_id).await?;
        let manifest = self
            .services
            .packages
            .fetch_manifest(&record.source, version)
            .await?;
        if manifest.id != module_id {
            return Err(ModuleError::ManifestFetch {
                source_ref: record.source.to_string(),
                reason: format!("清单 ID 为 '{}'", manifest.id),
            });
        }

        let from_version = record.version.clone();
        let to_version = manifest.version.clone();
        if version.is_none()
            && compare_versions(&to_version, &from_version) != std::cmp::Ordering::Greater
        {
            debug!(current = %from_version, latest = %to_version, "已是最新版本");
            return Ok(UpdateResult {
                module_id: module_id.to_string(),
                from_version,
                to_version,
                updated: false,
            });
        }
        manifest.validate()?;
        manifest.check_platform(&self.services.platform_version)?;

        let was_active = record.status == ModuleStatus::Active;
        self.services
            .registry
            .transition(module_id, ModuleStatus::Updating)
            .await?;

        let outcome = async {
            if was_active {
                let active = self.current_active(&record).await;
                self.discard(module_id).await;
                self.run_hook(&active?, Hook::Deactivate, None).await?;
            } else {
                self.discard(module_id).await;
            }

            self.services
                .packages
                .install_assets(&record.source, &manifest)
                .await?;
            self.services
                .registry
                .update_manifest(module_id, manifest)
                .await?;
            self.services.resolver.invalidate(module_id).await?;

            if was_active {
                let updated = self.require(module_id).await?;
                self.start(&updated, Some(&from_version)).await.map(|_| ())
            } else {
                self.services
                    .registry
                    .transition(module_id, ModuleStatus::Installed)
                    .await
                    .map(|_| ())
            }
        }
        .await;

        if let Err(e) = outcome {
            self.services.loader.unload(module_id).await;
            return Err(self.fail(module_id, e).await);
        }

        self.announce(
            module_id,
            RegistryEventKind::Updated,
            names::UPDATED,
            &format!("{} -> {}", from_version, to_version),
            json!({ "moduleId": module_id, "fromVersion": from_version, "toVersion": to_version }),
        )
        .await;
        info!(from = %from_version, to = %to_version, "模块已更新");

        Ok(UpdateResult {
            module_id: module_id.to_string(),
            from_version,
            to_version,
            updated: true,
        })
    }

    // ==================== 卸载 ====================

    /// 卸载模块
    ///
    /// 已激活的模块先停用。`on_uninstall` 失败只记录警告，不阻止卸载。
    /// 模块的缓存与存储命名空间被清除，数据库表保留。
    #[instrument(skip(self), fields(module_id = %module_id))]
    pub async fn uninstall(&self, module_id: &str) -> Result<()> {
        let record = self.require(module_id).await?;
        if record.status == ModuleStatus::Active {
            self.deactivate(module_id).await?;
        }

        let record = self
            .services
            .registry
            .transition(module_id, ModuleStatus::Uninstalling)
            .await?;

        match self.current_active(&record).await {
            Ok(active) => {
                if let Err(e) = self.run_hook(&active, Hook::Uninstall, None).await {
                    warn!(error = %e, "on_uninstall 失败，继续卸载");
                }
            }
            Err(e) => warn!(error = %e, "无法加载模块，跳过 on_uninstall"),
        }

        let outcome = async {
            self.services.packages.remove(module_id).await?;
            self.services.resolver.invalidate(module_id).await?;
            self.services.contexts.purge_namespace(module_id).await
        }
        .await;
        self.discard(module_id).await;
        if let Err(e) = outcome {
            return Err(self.fail(module_id, e).await);
        }

        self.record(module_id, RegistryEventKind::Uninstalled, "已卸载")
            .await;
        self.services.registry.delete(module_id).await?;
        self.publish(names::UNINSTALLED, json!({ "moduleId": module_id }))
            .await;
        info!("模块已卸载");
        Ok(())
    }

    // ==================== 设置 ====================

    /// 读取模块设置
    pub async fn get_settings(&self, module_id: &str) -> Result<Settings> {
        Ok(self.require(module_id).await?.settings)
    }

    /// 合并部分设置，值为 null 的键被删除
    ///
    /// 模块已激活时就地重建其上下文，不重启模块。返回合并后的设置。
    #[instrument(skip(self, patch), fields(module_id = %module_id))]
    pub async fn set_settings(&self, module_id: &str, patch: Settings) -> Result<Settings> {
        let record = self.require(module_id).await?;
        let mut settings = record.settings.clone();
        let keys: Vec<String> = patch.keys().cloned().collect();
        for (key, value) in patch {
            if value.is_null() {
                settings.remove(&key);
            } else {
                settings.insert(key, value);
            }
        }

        self.services
            .registry
            .update_settings(module_id, settings.clone())
            .await?;
        if let Err(e) = self.services.resolver.invalidate(module_id).await {
            warn!(error = %e, "清除数据源缓存失败");
        }

        if record.status == ModuleStatus::Active {
            let context =
                self.services
                    .contexts
                    .build(module_id, &record.version, settings.clone());
            if let Some(entry) = self.local.write().await.get_mut(module_id) {
                entry.context = context.clone();
            }
            if let Some(mut entry) = self.services.cache.get(module_id).await {
                entry.context = context;
                self.services.cache.insert(module_id, entry).await;
            }
            debug!("上下文已重建");
        }

        self.announce(
            module_id,
            RegistryEventKind::SettingsChanged,
            names::SETTINGS_CHANGED,
            &format!("修改了 {}", keys.join(", ")),
            json!({ "moduleId": module_id, "keys": keys }),
        )
        .await;
        Ok(settings)
    }

    // ==================== 查询 ====================

    /// 读取模块记录
    pub async fn get_module(&self, module_id: &str) -> Result<InstalledModule> {
        self.require(module_id).await
    }

    /// 全部模块记录
    pub async fn list_modules(&self) -> Result<Vec<InstalledModule>> {
        self.services.registry.list().await
    }

    /// 模块历史事件
    pub async fn module_history(&self, module_id: &str) -> Result<Vec<RegistryEvent>> {
        self.services.registry.history(module_id).await
    }

    /// 基于本地实例表的能力注册表
    pub async fn capabilities(&self) -> CapabilityRegistry {
        let local = self.local.read().await;
        let mut ids: Vec<&String> = local.keys().collect();
        ids.sort();
        let instances: Vec<_> = ids
            .into_iter()
            .filter_map(|id| local.get(id))
            .map(|active| active.loaded.instance.clone())
            .collect();
        CapabilityRegistry::from_modules(&instances)
    }

    /// 解析模块列类型的可选值
    ///
    /// # Errors
    ///
    /// 模块未在本地激活或没有该列类型时返回 `ColumnTypeNotFound`；
    /// 数据源失败时返回对应的数据源错误
    #[instrument(skip(self), fields(module_id = %module_id, type_id = %type_id))]
    pub async fn column_type_options(&self, module_id: &str, type_id: &str) -> Result<ColumnTypeOptions> {
        let not_found = || ModuleError::ColumnTypeNotFound(qualified_id(module_id, type_id));
        let active = self.local.read().await.get(module_id).cloned().ok_or_else(not_found)?;
        let column_type = active
            .loaded
            .instance
            .column_types()
            .into_iter()
            .find(|c| c.definition().id == type_id)
            .ok_or_else(not_found)?;
        let definition = column_type.definition();

        let Some(source) = &definition.data_source else {
            return Ok(ColumnTypeOptions {
                options: Vec::new(),
                multi_value: definition.multi_value,
                cached: false,
            });
        };

        let resolved = self
            .services
            .resolver
            .resolve(module_id, type_id, source, &active.context.settings)
            .await?;
        Ok(ColumnTypeOptions {
            options: resolved.options,
            multi_value: definition.multi_value,
            cached: resolved.cached,
        })
    }

    /// 把请求分发给模块声明的 API 路由
    ///
    /// # Errors
    ///
    /// 模块未激活或没有声明该路由时返回 `RouteNotFound`
    #[instrument(skip(self, body), fields(module_id = %module_id, method = %method, path = %path))]
    pub async fn dispatch_route(
        &self,
        module_id: &str,
        method: &str,
        path: &str,
        body: Value,
    ) -> Result<Value> {
        let not_found = || ModuleError::RouteNotFound {
            method: method.to_ascii_uppercase(),
            path: path.to_string(),
        };
        let active = self.local.read().await.get(module_id).cloned().ok_or_else(not_found)?;
        let declared = active
            .loaded
            .instance
            .manifest()
            .api_routes
            .iter()
            .any(|r| r.method.eq_ignore_ascii_case(method) && r.path == path);
        if !declared {
            return Err(not_found());
        }

        let response = active
            .loaded
            .instance
            .handle_route(&active.context, &method.to_ascii_uppercase(), path, body)
            .await?;

        let counter = format!("route:{} {}", method.to_ascii_uppercase(), path);
        if let Err(e) = self
            .services
            .registry
            .increment_usage(module_id, &counter, 1)
            .await
        {
            warn!(error = %e, "无法记录路由使用次数");
        }
        Ok(response)
    }

    /// 全部模块的使用统计
    pub async fn usage_summary(&self) -> Result<Vec<ModuleUsage>> {
        let records = self.services.registry.list().await?;
        let histories = join_all(
            records
                .iter()
                .map(|record| self.services.registry.history(&record.id)),
        )
        .await;

        records
            .into_iter()
            .zip(histories)
            .map(|(record, history)| {
                let stats = record.stats;
                Ok(ModuleUsage {
                    module_id: record.id,
                    status: record.status,
                    activation_count: stats.activation_count,
                    average_activation_ms: (stats.activation_count > 0)
                        .then(|| stats.total_activation_ms / stats.activation_count),
                    error_count: stats.error_count,
                    event_count: history?.len(),
                    usage: stats.usage,
                })
            })
            .collect()
    }

    // ==================== 内部 ====================

    async fn require(&self, module_id: &str) -> Result<InstalledModule> {
        self.services
            .registry
            .get(module_id)
            .await?
            .ok_or_else(|| ModuleError::NotInstalled(module_id.to_string()))
    }

    async fn build_active(&self, record: &InstalledModule) -> Result<ActiveModule> {
        let loaded = self.services.loader.load(record).await?;
        let context = self
            .services
            .contexts
            .build(&record.id, &record.version, record.settings.clone());
        Ok(ActiveModule { loaded, context })
    }

    /// 本地表、进程缓存中的当前实例，都没有时重新加载
    async fn current_active(&self, record: &InstalledModule) -> Result<ActiveModule> {
        let loader = &self.services.loader;
        let local = self.local.read().await.get(&record.id).cloned();
        if let Some(active) = local {
            if loader.is_current(&record.id, active.loaded.generation).await {
                return Ok(active);
            }
        }
        if let Some(active) = self.services.cache.get(&record.id).await {
            if loader.is_current(&record.id, active.loaded.generation).await {
                return Ok(active);
            }
        }
        self.build_active(record).await
    }

    /// 丢弃进程内的实例与上下文
    async fn discard(&self, module_id: &str) {
        self.local.write().await.remove(module_id);
        self.services.cache.remove(module_id).await;
        self.services.loader.unload(module_id).await;
    }

    async fn run_hook(
        &self,
        active: &ActiveModule,
        hook: Hook,
        from_version: Option<String>,
    ) -> Result<Duration> {
        let instance = active.loaded.instance.clone();
        let ctx = active.context.clone();
        let module_id = ctx.module_id.clone();
        self.services
            .supervisor
            .run(&module_id, hook, async move {
                match hook {
                    Hook::Activate => instance.on_activate(&ctx).await,
                    Hook::Deactivate => instance.on_deactivate(&ctx).await,
                    Hook::Upgrade => {
                        instance
                            .on_upgrade(&ctx, from_version.as_deref().unwrap_or_default())
                            .await
                    }
                    Hook::Uninstall => instance.on_uninstall(&ctx).await,
                }
            })
            .await
    }

    /// 持久化错误状态并通知，返回原错误
    async fn fail(&self, module_id: &str, err: ModuleError) -> ModuleError {
        error!(module_id = %module_id, error = %err, "模块操作失败");
        let message = err.to_string();
        match self.services.registry.set_error(module_id, &message).await {
            Ok(_) => {
                self.announce(
                    module_id,
                    RegistryEventKind::Error,
                    names::ERROR,
                    &message,
                    json!({ "moduleId": module_id, "error": message }),
                )
                .await;
            }
            Err(e) => warn!(module_id = %module_id, error = %e, "无法记录模块错误"),
        }
        err
    }

    async fn record(&self, module_id: &str, kind: RegistryEventKind, message: &str) {
        let event = RegistryEvent::new(module_id, kind, message);
        if let Err(e) = self.services.registry.record_event(event).await {
            warn!(module_id = %module_id, error = %e, "无法记录模块历史");
        }
    }

    async fn publish(&self, event_type: &str, data: Value) {
        let summary = self
            .services
            .contexts
            .events()
            .publish(Event::new(event_type, PLATFORM_SENDER, data))
            .await;
        if summary.failed > 0 || summary.timed_out > 0 {
            warn!(
                event_type = %event_type,
                failed = summary.failed,
                timed_out = summary.timed_out,
                "部分事件订阅者处理失败"
            );
        }
    }

    async fn announce(
        &self,
        module_id: &str,
        kind: RegistryEventKind,
        event_type: &str,
        message: &str,
        data: Value,
    ) {
        self.record(module_id, kind, message).await;
        self.publish(event_type, data).await;
    }
}

impl std::fmt::Debug for ModuleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleManager")
            .field("services", &self.services)
            .finish_non_exhaustive()
    }
}
