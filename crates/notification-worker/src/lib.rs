//! 通知工作者服务
//!
//! 从持久化队列租用分发任务，实时解析模块的启用渠道并并行投递。
//! 各渠道独立发送，单个渠道失败不影响其他渠道；全部失败时按退避策略重试。

pub mod consumer;
pub mod error;
pub mod pool;
pub mod sender;

pub use consumer::{DeliveryResult, JobOutcome, NotificationWorker};
pub use error::WorkerError;
pub use pool::WorkerPool;
pub use sender::{ChannelSender, HttpChannelSender, LogChannelSender, SendReceipt, build_sender};
