//! 模块系统
//!
//! 包含模块插件系统的核心组件：
//! - 清单、状态机与模块契约
//! - 注册表、加载器与包来源
//! - 执行上下文、事件总线与钩子监督
//! - 进程级实例缓存、能力注册表与生命周期管理器

pub mod capabilities;
pub mod context;
pub mod contract;
pub mod events;
pub mod instance_cache;
pub mod loader;
pub mod manager;
pub mod manifest;
pub mod platform;
pub mod registry;
pub mod state;
pub mod supervisor;

// 重导出常用类型
pub use capabilities::{
    builtin_generation, qualified_id, split_type_id, BuiltinColumnType, CapabilityRegistry,
    ColumnSpec, ColumnTypeInfo, RouteEntry, BUILTIN_TYPES,
};
pub use context::{ContextFactory, ModuleContext, ModuleEnv};
pub use contract::{
    declarative_column_types, ColumnOptions, ColumnType, DataGenerator, DeclarativeColumnType,
    DeclarativeDataGenerator, DeclarativeTableGenerator, ManifestModule, Module, TableGenerator,
};
pub use events::{Event, EventBus, EventCallback};
pub use instance_cache::{ActiveModule, BeginOutcome, InitState, InstanceCache};
pub use loader::{LoadedInstance, ModuleFactory, ModuleLoader, PackageSource, PackageStore};
pub use manager::{
    ColumnTypeOptions, InstallResult, ManagerServices, ModuleManager, ModuleUsage, UpdateResult,
};
pub use manifest::{
    compare_versions, ColumnTypeDefinition, DataSourceDefinition, ModuleManifest, ModuleSource,
    Settings,
};
pub use platform::{
    AnalyticsSink, BlobStore, Database, HttpClient, HttpRequest, HttpResponse, KvStore,
    PlatformServices, ReqwestHttpClient,
};
pub use registry::{
    InstalledModule, LocalRegistry, ModuleRegistry, ModuleStats, RegistryEvent, RegistryEventKind,
};
pub use state::ModuleStatus;
pub use supervisor::{Hook, HookSupervisor};
