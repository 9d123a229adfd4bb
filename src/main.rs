//! Table Modules 命令行入口
//!
//! 管理本地安装的数据表模块：安装、激活、停用、卸载、修改设置和查看历史。
//! 状态保存在配置指定的 JSON 注册表文件中，每次调用都是一个独立的请求。
//!
//! # 命令概览
//!
//! - `version` - 显示版本信息
//! - `check-config` - 验证配置文件
//! - `validate-manifest` - 检查模块清单
//! - `install` - 从本地目录安装模块
//! - `list` - 列出已安装的模块
//! - `activate` / `deactivate` / `reload` / `update` / `uninstall` - 生命周期操作
//! - `settings` - 查看或修改模块设置
//! - `history` - 查看模块历史
//! - `column-types` - 列出可用的列类型
//! - `options` - 解析列类型的可选值
//!
//! # 使用示例
//!
//! ```bash
//! # 安装并激活模块
//! table-modules install ./geo-tools
//! table-modules activate @vendor/geo-tools
//!
//! # 修改设置（值按 JSON 解析，失败时按字符串处理；null 删除该键）
//! table-modules settings @vendor/geo-tools --set apiKey=abc --set limit=20
//!
//! # 使用自定义配置文件
//! table-modules -c modules.yaml list
//! ```

use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::info;

use table_modules::module::manifest::Settings;
use table_modules::{
    Environment, Logger, LoggerConfig, ModuleManifest, ModulePlatform, ModuleSource,
    PlatformConfig,
};

/// Table Modules - 数据表模块插件系统
#[derive(Parser)]
#[command(name = "table-modules")]
#[command(version, about = "数据表引擎的模块插件管理工具", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, default_value = "modules.yaml", global = true)]
    config: PathBuf,

    /// 日志级别 (trace, debug, info, warn, error)，覆盖配置文件
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// 开发模式（运行环境设为 development，输出更详细的日志）
    #[arg(long, global = true)]
    dev: bool,

    /// 子命令
    #[command(subcommand)]
    command: Commands,
}

/// 可用的子命令
#[derive(Subcommand)]
enum Commands {
    /// 查看版本信息
    Version,

    /// 验证配置文件
    CheckConfig {
        /// 配置文件路径（不指定则使用全局 -c 选项）
        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// 检查模块清单
    ValidateManifest {
        /// 清单文件（module.yaml / module.json）
        path: PathBuf,
    },

    /// 从本地目录安装模块
    Install {
        /// 模块目录或清单文件
        path: PathBuf,
    },

    /// 列出已安装的模块
    List,

    /// 激活模块
    Activate {
        /// 模块 ID
        id: String,
    },

    /// 停用模块
    Deactivate {
        /// 模块 ID
        id: String,
    },

    /// 重载模块
    Reload {
        /// 模块 ID
        id: String,
    },

    /// 更新模块
    Update {
        /// 模块 ID
        id: String,

        /// 目标版本（不指定则取最新版本）
        #[arg(long)]
        version: Option<String>,
    },

    /// 卸载模块
    Uninstall {
        /// 模块 ID
        id: String,
    },

    /// 查看或修改模块设置
    Settings {
        /// 模块 ID
        id: String,

        /// 修改设置，格式 key=value，可重复
        #[arg(long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,
    },

    /// 查看模块历史
    History {
        /// 模块 ID
        id: String,
    },

    /// 列出可用的列类型
    ColumnTypes,

    /// 解析列类型的可选值
    Options {
        /// 模块 ID
        module: String,

        /// 列类型 ID（不含模块前缀）
        column_type: String,
    },
}

type CliResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// 加载配置文件，文件不存在时使用默认配置
async fn load_config(path: &Path, cli: &Cli) -> CliResult<PlatformConfig> {
    let mut config = if path.exists() {
        PlatformConfig::from_file(path).await?
    } else {
        PlatformConfig::default()
    };
    if cli.dev {
        config.environment = Environment::Development;
    }
    if let Some(ref level) = cli.log_level {
        config.logging.level = level.clone();
    } else if cli.dev {
        config.logging.level = "debug".to_string();
    }
    Ok(config)
}

/// 解析 `key=value`，值按 JSON 解析，失败时按字符串处理
fn parse_assignment(raw: &str) -> CliResult<(String, Value)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("设置格式应为 key=value: '{}'", raw))?;
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.trim().to_string(), value))
}

/// 打印版本信息
fn print_version() {
    println!();
    println!("Table Modules - 数据表模块插件系统");
    println!("═══════════════════════════════════════");
    println!("  版本:             {}", table_modules::VERSION);
    println!();
    println!("构建信息:");
    println!("  目标平台:         {}", std::env::consts::ARCH);
    println!("  操作系统:         {}", std::env::consts::OS);
    println!("═══════════════════════════════════════");
    println!();
}

/// 检查配置文件
async fn check_config(path: &Path) -> CliResult {
    println!("检查配置文件: {}", path.display());
    println!();

    let config = if path.exists() {
        match PlatformConfig::from_file(path).await {
            Ok(config) => {
                println!("✅ 配置文件有效！");
                config
            }
            Err(e) => {
                println!("❌ 配置文件无效: {}", e);
                return Err(Box::new(e));
            }
        }
    } else {
        println!("⚠️  警告: 配置文件不存在，将使用默认配置");
        PlatformConfig::default()
    };

    println!();
    println!("配置内容:");
    println!("────────────────────────────────────────");
    println!("  [日志配置]");
    println!("    日志级别:       {}", config.logging.level);
    println!("    文件输出:       {}", if config.logging.file_output { "是" } else { "否" });
    println!("    JSON 格式:      {}", if config.logging.json_format { "是" } else { "否" });
    println!();
    println!("  [模块配置]");
    println!("    安装目录:       {}", config.modules.install_dir.display());
    println!("    注册表文件:     {}", config.modules.registry_file.display());
    println!("    钩子超时:       {} ms", config.modules.hook_timeout_ms);
    println!("    HTTP 超时:      {} ms", config.modules.http_timeout_ms);
    println!("    默认仓库:       {}", config.modules.default_registry_url);
    println!();
    println!("  [其他]");
    println!("    运行环境:       {:?}", config.environment);
    println!("    平台版本:       {}", config.platform_version);
    println!("────────────────────────────────────────");
    Ok(())
}

/// 检查模块清单
async fn validate_manifest(path: &Path) -> CliResult {
    match ModuleManifest::from_file(path).await {
        Ok(manifest) => {
            println!("✅ 清单有效: {} {}", manifest.id, manifest.version);
            println!("    列类型:     {}", manifest.column_types.len());
            println!("    数据生成器: {}", manifest.data_generators.len());
            println!("    表生成器:   {}", manifest.table_generators.len());
            println!("    设置项:     {}", manifest.settings_schema.len());
            println!("    API 路由:   {}", manifest.api_routes.len());
            Ok(())
        }
        Err(e) => {
            println!("❌ 清单无效: {}", e);
            Err(Box::new(e))
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> CliResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(command: Commands, config: PlatformConfig) -> CliResult {
    let platform = ModulePlatform::new(config).await?;
    let manager = platform.request_scope();
    manager.initialize().await;

    match command {
        Commands::Install { path } => {
            let path = std::fs::canonicalize(&path).unwrap_or(path);
            let result = manager.install(ModuleSource::Local { path }).await;
            print_json(&result)?;
            if let Some(error) = result.error {
                return Err(error.into());
            }
        }

        Commands::List => {
            let modules = manager.list_modules().await?;
            println!();
            println!("已安装模块");
            println!("═══════════════════════════════════════");
            if modules.is_empty() {
                println!("  (无)");
            }
            for module in modules {
                println!("  {:<32} {:<10} {}", module.id, module.version, module.status);
                if let Some(error) = module.error {
                    println!("    错误: {}", error);
                }
            }
            println!("═══════════════════════════════════════");
        }

        Commands::Activate { id } => {
            let record = manager.activate(&id).await?;
            println!("✅ {} 已激活 ({})", record.id, record.version);
        }

        Commands::Deactivate { id } => {
            let record = manager.deactivate(&id).await?;
            println!("✅ {} 当前状态: {}", record.id, record.status);
        }

        Commands::Reload { id } => {
            let record = manager.reload(&id).await?;
            println!("✅ {} 已重载，当前状态: {}", record.id, record.status);
        }

        Commands::Update { id, version } => {
            let result = manager.update(&id, version.as_deref()).await?;
            if result.updated {
                println!("✅ {} 已更新: {} -> {}", id, result.from_version, result.to_version);
            } else {
                println!("{} 已是最新版本 ({})", id, result.from_version);
            }
        }

        Commands::Uninstall { id } => {
            manager.uninstall(&id).await?;
            println!("✅ {} 已卸载", id);
        }

        Commands::Settings { id, set } => {
            let settings = if set.is_empty() {
                manager.get_settings(&id).await?
            } else {
                let mut patch = Settings::new();
                for raw in &set {
                    let (key, value) = parse_assignment(raw)?;
                    patch.insert(key, value);
                }
                manager.set_settings(&id, patch).await?
            };
            print_json(&settings)?;
        }

        Commands::History { id } => {
            for event in manager.module_history(&id).await? {
                println!(
                    "  {}  {:<16} {}",
                    event.at.format("%Y-%m-%d %H:%M:%S"),
                    format!("{:?}", event.kind),
                    event.message
                );
            }
        }

        Commands::ColumnTypes => {
            let capabilities = manager.capabilities().await;
            for info in capabilities.column_types() {
                println!(
                    "  {:<40} {:<10} {}",
                    info.id, info.definition.category, info.definition.display_name
                );
            }
        }

        Commands::Options {
            module,
            column_type,
        } => {
            let response = platform.column_type_options(&module, &column_type).await;
            print_json(&response)?;
        }

        Commands::Version | Commands::CheckConfig { .. } | Commands::ValidateManifest { .. } => {}
    }
    Ok(())
}

#[tokio::main]
async fn main() -> CliResult {
    let cli = Cli::parse();

    match cli.command {
        Commands::Version => {
            print_version();
            return Ok(());
        }
        Commands::CheckConfig { ref path } => {
            let path = path.clone().unwrap_or_else(|| cli.config.clone());
            return check_config(&path).await;
        }
        Commands::ValidateManifest { ref path } => {
            return validate_manifest(path).await;
        }
        _ => {}
    }

    let config = load_config(&cli.config, &cli).await?;
    let _guard = Logger::try_init(LoggerConfig::from_log_config(&config.logging));
    info!(config = %cli.config.display(), "已加载配置");

    run(cli.command, config).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_assignment() {
        assert_eq!(parse_assignment("limit=20").unwrap(), ("limit".to_string(), json!(20)));
        assert_eq!(parse_assignment("name=geo").unwrap(), ("name".to_string(), json!("geo")));
        assert_eq!(parse_assignment("gone=null").unwrap(), ("gone".to_string(), Value::Null));
        assert!(parse_assignment("broken").is_err());
    }

    #[test]
    fn test_cli_parses_settings() {
        let cli = Cli::parse_from(["table-modules", "settings", "m", "--set", "a=1", "--set", "b=x"]);
        match cli.command {
            Commands::Settings { id, set } => {
                assert_eq!(id, "m");
                assert_eq!(set, vec!["a=1", "b=x"]);
            }
            _ => panic!("unexpected command"),
        }
    }
}
