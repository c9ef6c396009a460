//! 领域模型
//!
//! 所有实体同时支持数据库（sqlx）与 JSON（serde）序列化

mod channel;
mod enums;
mod job;
mod module;

pub use channel::{ChannelConfig, NewChannelConfig};
pub use enums::JobState;
pub use job::{DispatchJob, MAX_DELAY_MS, NewDispatchJob, QueueStats};
pub use module::{Module, ModuleNode, NewModule};
