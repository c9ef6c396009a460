//! 通知投递错误类型
//!
//! 投递阶段的错误只驱动队列内部的重试状态机，不会返回给事件生产方。

use notification_dispatch::DispatchError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("通知发送失败: 渠道={channel}, 原因={reason}")]
    SendFailed { channel: String, reason: String },

    #[error("缺少投递目标: 渠道={channel}")]
    MissingDestination { channel: String },

    #[error("任务重试次数耗尽: job_id={job_id}, attempts={attempts}")]
    TerminalFailure { job_id: i64, attempts: i32 },

    #[error("发送器配置无效: {0}")]
    InvalidSenderConfig(String),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl WorkerError {
    /// 队列已关闭时 Worker 应退出循环
    pub fn is_queue_closed(&self) -> bool {
        matches!(self, Self::Dispatch(DispatchError::QueueClosed))
    }
}
