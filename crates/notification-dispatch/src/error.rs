//! 通知分发错误类型
//!
//! 面向事件生产方的错误都是同步返回且不可重试的，由调用方自行决定是否重新分发。

use thiserror::Error;

/// 分发服务错误类型
#[derive(Debug, Error)]
pub enum DispatchError {
    // === 生产方可见错误 ===
    #[error("请求参数无效: {0}")]
    InvalidRequest(String),

    #[error("模块没有启用的通知渠道: {0}")]
    NoActiveChannel(String),

    #[error("任务持久化失败: {0}")]
    QueuePersistFailure(String),

    #[error("任务队列已关闭")]
    QueueClosed,

    // === 注册表相关错误 ===
    #[error("模块不存在: {0}")]
    ModuleNotFound(String),

    #[error("模块已存在: {0}")]
    ModuleAlreadyExists(String),

    #[error("模块层级无效: {0}")]
    InvalidHierarchy(String),

    #[error("渠道配置不存在: {0}")]
    ChannelNotFound(i64),

    // === 系统错误 ===
    #[error("任务不存在: {0}")]
    JobNotFound(i64),

    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 分发服务 Result 类型别名
pub type Result<T> = std::result::Result<T, DispatchError>;

impl DispatchError {
    /// 获取错误码（用于 API 响应与指标标签）
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "InvalidRequest",
            Self::NoActiveChannel(_) => "NoActiveChannel",
            Self::QueuePersistFailure(_) => "QueuePersistFailure",
            Self::QueueClosed => "QueueClosed",
            Self::ModuleNotFound(_) => "ModuleNotFound",
            Self::ModuleAlreadyExists(_) => "ModuleAlreadyExists",
            Self::InvalidHierarchy(_) => "InvalidHierarchy",
            Self::ChannelNotFound(_) => "ChannelNotFound",
            Self::JobNotFound(_) => "JobNotFound",
            Self::Database(_) => "DatabaseError",
            Self::Internal(_) => "InternalError",
        }
    }

    /// 是否为生产方输入或配置导致的错误（非系统错误）
    pub fn is_business_error(&self) -> bool {
        !matches!(
            self,
            Self::QueuePersistFailure(_) | Self::QueueClosed | Self::Database(_) | Self::Internal(_)
        )
    }
}
