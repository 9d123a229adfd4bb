//! 模块加载器与包来源
//!
//! [`ModuleLoader`] 持有编译进宿主的模块工厂和已加载的实例。每个模块有一个
//! 单调递增的代数，卸载会增加代数并丢弃实例，进程级缓存据此识别过期条目。
//!
//! [`PackageSource`] 负责获取清单和资源文件；[`PackageStore`] 是基于本地
//! 安装目录和远程仓库的实现。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::contract::{ManifestModule, Module};
use super::manifest::{is_safe_relative_path, ModuleManifest, ModuleSource};
use super::platform::{HttpClient, HttpRequest};
use super::registry::InstalledModule;
use crate::utils::{module_namespace, ModuleError, Result};

/// 编译进宿主的模块工厂
pub trait ModuleFactory: Send + Sync {
    /// 内置清单
    fn manifest(&self) -> ModuleManifest;

    /// 按已安装的清单创建实例
    fn create(&self, manifest: &ModuleManifest) -> Result<Arc<dyn Module>>;
}

/// 已加载的实例
#[derive(Clone)]
pub struct LoadedInstance {
    /// 实例
    pub instance: Arc<dyn Module>,
    /// 加载时的代数
    pub generation: u64,
    /// 加载时的版本
    pub version: String,
}

impl std::fmt::Debug for LoadedInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedInstance")
            .field("module_id", &self.instance.manifest().id)
            .field("generation", &self.generation)
            .field("version", &self.version)
            .finish()
    }
}

/// 模块加载器
#[derive(Default)]
pub struct ModuleLoader {
    /// 模块 ID -> 工厂
    factories: RwLock<HashMap<String, Arc<dyn ModuleFactory>>>,
    /// 模块 ID -> 已加载实例
    instances: RwLock<HashMap<String, LoadedInstance>>,
    /// 模块 ID -> 当前代数
    generations: RwLock<HashMap<String, u64>>,
}

impl ModuleLoader {
    /// 创建加载器
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册模块工厂，返回模块 ID
    pub async fn register(&self, factory: Arc<dyn ModuleFactory>) -> String {
        let module_id = factory.manifest().id;
        debug!(module_id = %module_id, "注册模块工厂");
        self.factories.write().await.insert(module_id.clone(), factory);
        module_id
    }

    /// 内置模块的清单
    pub async fn bundled_manifest(&self, module_id: &str) -> Option<ModuleManifest> {
        self.factories
            .read()
            .await
            .get(module_id)
            .map(|factory| factory.manifest())
    }

    /// 加载模块实例，已有当前代数的实例时直接返回
    ///
    /// # 加载流程
    /// 1. 检查缓存的实例是否仍属于当前代数且版本一致
    /// 2. 有工厂时用工厂创建，否则按清单创建声明式模块
    /// 3. 检查实例清单的 ID 与记录一致
    /// 4. 记录实例
    ///
    /// # Errors
    ///
    /// 内置来源缺少工厂、工厂失败或 ID 不一致时返回 `ModuleLoad`
    pub async fn load(&self, record: &InstalledModule) -> Result<LoadedInstance> {
        let module_id = record.id.as_str();
        let generation = self.generation(module_id).await;

        // 1. 缓存命中
        if let Some(loaded) = self.instances.read().await.get(module_id) {
            if loaded.generation == generation && loaded.version == record.version {
                return Ok(loaded.clone());
            }
        }

        // 2. 创建实例
        let factory = self.factories.read().await.get(module_id).cloned();
        let instance: Arc<dyn Module> = match (factory, &record.source) {
            (Some(factory), _) => factory.create(&record.manifest).map_err(|e| {
                ModuleError::ModuleLoad {
                    module_id: module_id.to_string(),
                    reason: e.to_string(),
                }
            })?,
            (None, ModuleSource::Bundled { .. }) => {
                return Err(ModuleError::ModuleLoad {
                    module_id: module_id.to_string(),
                    reason: "内置模块没有注册工厂".to_string(),
                });
            }
            (None, _) => Arc::new(ManifestModule::new(record.manifest.clone())),
        };

        // 3. 校验 ID
        if instance.manifest().id != module_id {
            return Err(ModuleError::ModuleLoad {
                module_id: module_id.to_string(),
                reason: format!("实例清单 ID 为 '{}'", instance.manifest().id),
            });
        }

        // 4. 记录实例
        let loaded = LoadedInstance {
            instance,
            generation,
            version: record.version.clone(),
        };
        self.instances
            .write()
            .await
            .insert(module_id.to_string(), loaded.clone());

        info!(module_id = %module_id, generation, version = %record.version, "模块已加载");
        Ok(loaded)
    }

    /// 卸载模块：代数加一并丢弃实例，返回新代数
    pub async fn unload(&self, module_id: &str) -> u64 {
        let generation = {
            let mut generations = self.generations.write().await;
            let entry = generations.entry(module_id.to_string()).or_insert(0);
            *entry += 1;
            *entry
        };
        self.instances.write().await.remove(module_id);
        debug!(module_id = %module_id, generation, "模块已卸载");
        generation
    }

    /// 卸载全部模块
    pub async fn purge_all(&self) {
        let ids: Vec<String> = {
            let instances = self.instances.read().await;
            let generations = self.generations.read().await;
            instances.keys().chain(generations.keys()).cloned().collect()
        };
        let mut generations = self.generations.write().await;
        for id in ids {
            *generations.entry(id).or_insert(0) += 1;
        }
        drop(generations);
        self.instances.write().await.clear();
        info!("已卸载全部模块实例");
    }

    /// 当前代数
    pub async fn generation(&self, module_id: &str) -> u64 {
        self.generations
            .read()
            .await
            .get(module_id)
            .copied()
            .unwrap_or(0)
    }

    /// 实例是否仍属于当前代数
    pub async fn is_current(&self, module_id: &str, generation: u64) -> bool {
        self.generation(module_id).await == generation
    }

    /// 已加载的模块数
    pub async fn loaded_count(&self) -> usize {
        self.instances.read().await.len()
    }
}

impl std::fmt::Debug for ModuleLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleLoader").finish_non_exhaustive()
    }
}

// ============================================================================
// 包来源
// ============================================================================

/// 模块包来源
#[async_trait]
pub trait PackageSource: Send + Sync {
    /// 获取清单，`version` 为空时取最新版本
    async fn fetch_manifest(
        &self,
        source: &ModuleSource,
        version: Option<&str>,
    ) -> Result<ModuleManifest>;

    /// 下载或复制资源文件，返回写入的路径
    async fn install_assets(
        &self,
        source: &ModuleSource,
        manifest: &ModuleManifest,
    ) -> Result<Vec<PathBuf>>;

    /// 删除模块的资源文件
    async fn remove(&self, module_id: &str) -> Result<()>;
}

const LOCAL_MANIFEST_FILES: [&str; 3] = ["module.yaml", "module.yml", "module.json"];

/// 本地安装目录 + 远程仓库
pub struct PackageStore {
    install_dir: PathBuf,
    default_registry: String,
    http: Arc<dyn HttpClient>,
    loader: Arc<ModuleLoader>,
}

impl PackageStore {
    /// 创建包存储
    ///
    /// # Arguments
    ///
    /// * `install_dir` - 资源文件安装目录
    /// * `default_registry` - 远程来源未指定仓库时使用的地址
    /// * `http` - 出站 HTTP 客户端
    /// * `loader` - 用于解析内置模块清单
    pub fn new(
        install_dir: impl Into<PathBuf>,
        default_registry: impl Into<String>,
        http: Arc<dyn HttpClient>,
        loader: Arc<ModuleLoader>,
    ) -> Self {
        Self {
            install_dir: install_dir.into(),
            default_registry: default_registry.into(),
            http,
            loader,
        }
    }

    /// 模块资源目录
    pub fn module_dir(&self, module_id: &str) -> PathBuf {
        self.install_dir.join(module_namespace(module_id))
    }

    fn package_url(&self, package: &str, registry: Option<&str>, tail: &str) -> String {
        let registry = registry.unwrap_or(&self.default_registry);
        format!("{}/{}/{}", registry.trim_end_matches('/'), package, tail)
    }

    async fn fetch_bytes(&self, url: &str, source_ref: &str) -> Result<Vec<u8>> {
        let fetch_error = |reason: String| ModuleError::ManifestFetch {
            source_ref: source_ref.to_string(),
            reason,
        };
        let response = self
            .http
            .send(HttpRequest::get(url))
            .await
            .map_err(|e| fetch_error(e.to_string()))?;
        if !response.is_success() {
            return Err(fetch_error(format!("GET {} 返回 {}", url, response.status)));
        }
        Ok(response.body)
    }

    async fn local_manifest_path(path: &Path) -> Option<PathBuf> {
        if tokio::fs::metadata(path).await.ok()?.is_file() {
            return Some(path.to_path_buf());
        }
        for name in LOCAL_MANIFEST_FILES {
            let candidate = path.join(name);
            if tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
                return Some(candidate);
            }
        }
        None
    }
}

#[async_trait]
impl PackageSource for PackageStore {
    async fn fetch_manifest(
        &self,
        source: &ModuleSource,
        version: Option<&str>,
    ) -> Result<ModuleManifest> {
        let source_ref = source.to_string();
        let manifest = match source {
            ModuleSource::Bundled { id } => {
                self.loader
                    .bundled_manifest(id)
                    .await
                    .ok_or_else(|| ModuleError::ManifestFetch {
                        source_ref: source_ref.clone(),
                        reason: "没有注册此内置模块".to_string(),
                    })?
            }
            ModuleSource::Local { path } => {
                let manifest_path = Self::local_manifest_path(path).await.ok_or_else(|| {
                    ModuleError::ManifestFetch {
                        source_ref: source_ref.clone(),
                        reason: "目录中没有 module.yaml 或 module.json".to_string(),
                    }
                })?;
                ModuleManifest::from_file(&manifest_path).await?
            }
            ModuleSource::Remote { package, registry } => {
                let url = self.package_url(
                    package,
                    registry.as_deref(),
                    &format!("{}/manifest.json", version.unwrap_or("latest")),
                );
                debug!(url = %url, "获取远程清单");
                let bytes = self.fetch_bytes(&url, &source_ref).await?;
                let content = String::from_utf8(bytes).map_err(|e| ModuleError::ManifestFetch {
                    source_ref: source_ref.clone(),
                    reason: e.to_string(),
                })?;
                ModuleManifest::from_json_str(&content)?
            }
        };

        if let Some(requested) = version {
            if manifest.version != requested {
                return Err(ModuleError::ManifestFetch {
                    source_ref,
                    reason: format!("请求版本 {}，实际为 {}", requested, manifest.version),
                });
            }
        }
        Ok(manifest)
    }

    async fn install_assets(
        &self,
        source: &ModuleSource,
        manifest: &ModuleManifest,
    ) -> Result<Vec<PathBuf>> {
        if manifest.assets.is_empty() {
            return Ok(Vec::new());
        }
        let target_dir = self.module_dir(&manifest.id);
        tokio::fs::create_dir_all(&target_dir).await?;

        let mut written = Vec::with_capacity(manifest.assets.len());
        for asset in &manifest.assets {
            if !is_safe_relative_path(asset) {
                return Err(ModuleError::InvalidManifest(format!("资源路径无效: '{}'", asset)));
            }
            let bytes = match source {
                ModuleSource::Bundled { .. } => {
                    warn!(module_id = %manifest.id, asset = %asset, "内置模块不支持资源文件，已跳过");
                    continue;
                }
                ModuleSource::Local { path } => {
                    let base = if tokio::fs::metadata(path).await?.is_file() {
                        path.parent().map(Path::to_path_buf).unwrap_or_default()
                    } else {
                        path.clone()
                    };
                    tokio::fs::read(base.join(asset)).await?
                }
                ModuleSource::Remote { package, registry } => {
                    let url = self.package_url(
                        package,
                        registry.as_deref(),
                        &format!("{}/{}", manifest.version, asset),
                    );
                    self.fetch_bytes(&url, &source.to_string()).await?
                }
            };

            let target = target_dir.join(asset);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&target, bytes).await?;
            written.push(target);
        }

        info!(module_id = %manifest.id, count = written.len(), "资源文件已安装");
        Ok(written)
    }

    async fn remove(&self, module_id: &str) -> Result<()> {
        if module_id.is_empty() {
            return Err(ModuleError::InvalidManifest("模块 ID 不能为空".to_string()));
        }
        let dir = self.module_dir(module_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                debug!(module_id = %module_id, dir = %dir.display(), "资源目录已删除");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl std::fmt::Debug for PackageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageStore")
            .field("install_dir", &self.install_dir)
            .field("default_registry", &self.default_registry)
            .finish_non_exhaustive()
    }
}
