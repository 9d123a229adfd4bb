//! 钩子监督
//!
//! 模块的生命周期钩子来自第三方代码。每次调用都在独立任务中执行：
//! 超时后任务被中止，panic 被转换为 `ActivationHook` 错误，
//! 不会传播到调用方。

use std::future::Future;
use std::time::{Duration, Instant};

use tokio::time::timeout;
use tracing::{debug, warn};

use crate::utils::{ModuleError, Result};

/// 生命周期钩子
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    /// 激活
    Activate,
    /// 停用
    Deactivate,
    /// 升级
    Upgrade,
    /// 卸载
    Uninstall,
}

impl Hook {
    /// 钩子名
    pub fn as_str(&self) -> &'static str {
        match self {
            Hook::Activate => "on_activate",
            Hook::Deactivate => "on_deactivate",
            Hook::Upgrade => "on_upgrade",
            Hook::Uninstall => "on_uninstall",
        }
    }
}

impl std::fmt::Display for Hook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 钩子监督器
#[derive(Debug, Clone, Copy)]
pub struct HookSupervisor {
    timeout: Duration,
}

impl HookSupervisor {
    /// 创建监督器
    ///
    /// # Arguments
    ///
    /// * `timeout` - 单次钩子调用的超时时间
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// 超时时间
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// 在监督下执行一次钩子调用
    ///
    /// # Errors
    ///
    /// - 钩子返回错误或 panic 时返回 `ActivationHook`
    /// - 超过超时时间时返回 `HookTimeout`，任务被中止
    pub async fn run<F>(&self, module_id: &str, hook: Hook, future: F) -> Result<Duration>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let started = Instant::now();
        let mut handle = tokio::spawn(future);

        let outcome = match timeout(self.timeout, &mut handle).await {
            Ok(joined) => joined,
            Err(_) => {
                handle.abort();
                warn!(
                    module_id = %module_id,
                    hook = %hook,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "钩子超时，已中止"
                );
                return Err(ModuleError::HookTimeout {
                    module_id: module_id.to_string(),
                    hook: hook.to_string(),
                    timeout_ms: self.timeout.as_millis() as u64,
                });
            }
        };

        let hook_error = |reason: String| ModuleError::ActivationHook {
            module_id: module_id.to_string(),
            hook: hook.to_string(),
            reason,
        };

        match outcome {
            Ok(Ok(())) => {
                let elapsed = started.elapsed();
                debug!(
                    module_id = %module_id,
                    hook = %hook,
                    duration_ms = elapsed.as_millis() as u64,
                    "钩子执行完成"
                );
                Ok(elapsed)
            }
            Ok(Err(e)) => Err(hook_error(e.to_string())),
            Err(join_error) if join_error.is_panic() => {
                warn!(module_id = %module_id, hook = %hook, "钩子 panic");
                Err(hook_error(format!(
                    "panic: {}",
                    panic_message(join_error.into_panic())
                )))
            }
            Err(join_error) => Err(hook_error(format!("任务被取消: {}", join_error))),
        }
    }
}

impl Default for HookSupervisor {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "未知 panic".to_string()
    }
}
