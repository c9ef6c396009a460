//! 枚举类型定义

use serde::{Deserialize, Serialize};

/// 任务状态
///
/// 合法流转：waiting|delayed → active → completed | delayed(重试) | waiting(租约回收) | failed
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum JobState {
    /// 等待执行
    #[default]
    Waiting,
    /// 已被 Worker 租用，执行中
    Active,
    /// 至少一个渠道发送成功
    Completed,
    /// 重试次数耗尽
    Failed,
    /// 延迟执行或等待重试退避
    Delayed,
}

impl JobState {
    pub const ALL: [JobState; 5] = [
        JobState::Waiting,
        JobState::Active,
        JobState::Completed,
        JobState::Failed,
        JobState::Delayed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Delayed => "delayed",
        }
    }

    /// 终态任务不会再被租用
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// 是否可被租用（还需满足 run_at 已到）
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Waiting | Self::Delayed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
