//! 分发任务实体
//!
//! 一个任务代表"向模块 X 发送消息 Y"，与模块当前有多少渠道无关，扇出在执行时解析。

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::JobState;

/// 分发任务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DispatchJob {
    /// 队列分配的单调递增 ID
    pub id: i64,
    pub module_key: String,
    pub message: String,
    /// 覆盖各渠道默认目标
    #[sqlx(default)]
    pub explicit_chat_id: Option<String>,
    /// 数值越大越先出队
    pub priority: i32,
    pub delay_ms: i64,
    /// 已开始的尝试次数（租用时递增）
    pub attempt_count: i32,
    pub max_attempts: i32,
    pub state: JobState,
    /// 最早可执行时间
    pub run_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    #[sqlx(default)]
    pub lease_token: Option<Uuid>,
    #[sqlx(default)]
    pub locked_until: Option<DateTime<Utc>>,
    #[sqlx(default)]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[sqlx(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl DispatchJob {
    /// 当前租用是否为最后一次机会
    pub fn is_final_attempt(&self) -> bool {
        self.attempt_count >= self.max_attempts
    }

    /// 当前是否可被租用
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.state.is_pending() && self.run_at <= now
    }

    /// 租约是否已过期
    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Active && self.locked_until.is_some_and(|until| until < now)
    }
}

/// 允许的最大延迟（365 天，毫秒）
pub const MAX_DELAY_MS: i64 = 365 * 24 * 60 * 60 * 1000;

/// 待入队任务
#[derive(Debug, Clone, PartialEq)]
pub struct NewDispatchJob {
    pub module_key: String,
    pub message: String,
    pub explicit_chat_id: Option<String>,
    pub priority: i32,
    pub delay_ms: i64,
    pub max_attempts: i32,
    pub state: JobState,
    pub run_at: DateTime<Utc>,
}

impl NewDispatchJob {
    /// 构造待入队任务，delay > 0 时初始状态为 delayed
    ///
    /// delay 被限制在 `[0, MAX_DELAY_MS]`，超限请求应在入口处拒绝
    pub fn new(
        module_key: impl Into<String>,
        message: impl Into<String>,
        priority: i32,
        delay_ms: i64,
        max_attempts: i32,
        now: DateTime<Utc>,
    ) -> Self {
        let delay_ms = delay_ms.clamp(0, MAX_DELAY_MS);
        let state = if delay_ms > 0 {
            JobState::Delayed
        } else {
            JobState::Waiting
        };

        Self {
            module_key: module_key.into(),
            message: message.into(),
            explicit_chat_id: None,
            priority,
            delay_ms,
            max_attempts,
            state,
            run_at: now
                .checked_add_signed(Duration::milliseconds(delay_ms))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    pub fn with_chat_id(mut self, chat_id: Option<String>) -> Self {
        self.explicit_chat_id = chat_id;
        self
    }
}

/// 队列各状态任务数快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub waiting: i64,
    pub active: i64,
    pub completed: i64,
    pub failed: i64,
    pub delayed: i64,
    pub total: i64,
}

impl QueueStats {
    /// 由分组计数构造，缺失的状态记为 0
    pub fn from_counts(counts: impl IntoIterator<Item = (JobState, i64)>) -> Self {
        let mut stats = Self::default();
        for (state, count) in counts {
            match state {
                JobState::Waiting => stats.waiting += count,
                JobState::Active => stats.active += count,
                JobState::Completed => stats.completed += count,
                JobState::Failed => stats.failed += count,
                JobState::Delayed => stats.delayed += count,
            }
            stats.total += count;
        }
        stats
    }

    pub fn count(&self, state: JobState) -> i64 {
        match state {
            JobState::Waiting => self.waiting,
            JobState::Active => self.active,
            JobState::Completed => self.completed,
            JobState::Failed => self.failed,
            JobState::Delayed => self.delayed,
        }
    }
}
