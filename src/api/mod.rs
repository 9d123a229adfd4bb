//! API 模块
//!
//! 对外提供的平台入口。
//!
//! # 模块概览
//!
//! - `platform`: `ModulePlatform`，持有共享组件并创建请求级管理器；
//!   也提供列类型可选值接口的响应结构

pub mod platform;

// 重导出主要类型
pub use platform::{ModulePlatform, ModulePlatformBuilder, OptionsResponse};
