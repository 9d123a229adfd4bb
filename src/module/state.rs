//! 模块状态机
//!
//! 每一次状态变化都必须出现在 [`ModuleStatus::allowed_next`] 的转换表中，
//! 注册表在写锁内按此表检查，拒绝时记录保持不变。

use serde::{Deserialize, Serialize};

/// 模块状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleStatus {
    /// 正在安装
    Installing,
    /// 已安装（未激活）
    Installed,
    /// 正在激活
    Activating,
    /// 已激活
    Active,
    /// 正在停用
    Deactivating,
    /// 已停用
    Disabled,
    /// 正在更新
    Updating,
    /// 正在卸载
    Uninstalling,
    /// 错误
    Error,
}

impl ModuleStatus {
    /// 全部状态
    pub const ALL: [ModuleStatus; 9] = [
        ModuleStatus::Installing,
        ModuleStatus::Installed,
        ModuleStatus::Activating,
        ModuleStatus::Active,
        ModuleStatus::Deactivating,
        ModuleStatus::Disabled,
        ModuleStatus::Updating,
        ModuleStatus::Uninstalling,
        ModuleStatus::Error,
    ];

    /// 转换表
    pub fn allowed_next(&self) -> &'static [ModuleStatus] {
        use ModuleStatus::*;
        match self {
            Installing => &[Installed, Error],
            Installed => &[Activating, Updating, Uninstalling, Error],
            Activating => &[Active, Error],
            Active => &[Deactivating, Updating, Error],
            Deactivating => &[Disabled, Error],
            Disabled => &[Activating, Updating, Uninstalling, Error],
            Updating => &[Installed, Active, Error],
            Uninstalling => &[Error],
            Error => &[Activating, Updating, Uninstalling],
        }
    }

    /// 是否允许转换到 `next`
    pub fn can_transition_to(&self, next: ModuleStatus) -> bool {
        self.allowed_next().contains(&next)
    }

    /// 是否允许记录一次失败
    ///
    /// 失败不是普通转换：表中每个状态都可以进入 `error`，已处于 `error` 时
    /// 只刷新错误信息。`can_transition_to(Error)` 对 `error` 自身仍为 false。
    pub fn can_fail(&self) -> bool {
        *self == ModuleStatus::Error || self.can_transition_to(ModuleStatus::Error)
    }

    /// 是否为过渡状态（操作进行中）
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ModuleStatus::Installing
                | ModuleStatus::Activating
                | ModuleStatus::Deactivating
                | ModuleStatus::Updating
                | ModuleStatus::Uninstalling
        )
    }

    /// 状态名
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleStatus::Installing => "installing",
            ModuleStatus::Installed => "installed",
            ModuleStatus::Activating => "activating",
            ModuleStatus::Active => "active",
            ModuleStatus::Deactivating => "deactivating",
            ModuleStatus::Disabled => "disabled",
            ModuleStatus::Updating => "updating",
            ModuleStatus::Uninstalling => "uninstalling",
            ModuleStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ModuleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModuleStatus::ALL
            .iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| format!("未知的模块状态: {}", s))
    }
}
