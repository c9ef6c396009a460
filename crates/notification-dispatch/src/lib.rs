//! 模块级通知分发
//!
//! 将业务事件通知可靠地投递到模块下配置的一个或多个外部渠道，异步执行并带重试保证。
//!
//! ## 核心功能
//!
//! - **模块注册表**：模块层级校验、模块树、渠道配置管理
//! - **分发入口**：同步校验并持久化任务，不等待投递
//! - **任务队列**：优先级、延迟、租约、指数退避重试与保留期清理
//! - **队列观测**：各状态任务数快照
//!
//! ## 模块结构
//!
//! - `models`: 领域模型定义
//! - `error`: 错误类型定义
//! - `repository`: 数据库仓储层（PostgreSQL 与内存实现）
//! - `registry`: 模块与渠道注册表
//! - `queue`: 任务队列服务
//! - `dispatch`: 分发入口

pub mod dispatch;
pub mod error;
pub mod models;
pub mod queue;
pub mod registry;
pub mod repository;

pub use dispatch::{DispatchOptions, DispatchOutcome, DispatchReceipt, Dispatcher};
pub use error::{DispatchError, Result};
pub use models::*;
pub use queue::{FailureOutcome, MaintenanceReport, QueueService, QueueSettings};
pub use registry::{ModuleRegistry, build_tree, validate_hierarchy};
pub use repository::{
    ChannelConfigRepository, ChannelConfigRepositoryTrait, JobRepository, JobRepositoryTrait,
    MemoryJobRepository, MemoryRegistry, ModuleRepository, ModuleRepositoryTrait, ReclaimSummary,
};
