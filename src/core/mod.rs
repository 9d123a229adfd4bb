//! 核心模块
//!
//! 包含平台配置。

pub mod config;

pub use config::{
    Environment, LogConfig, ModulesConfig, PlatformConfig, PlatformConfigBuilder,
};
