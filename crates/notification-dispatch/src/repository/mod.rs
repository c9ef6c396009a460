//! 数据库仓储层
//!
//! 提供模块、渠道配置与任务队列的数据访问，以及供测试与本地开发使用的内存实现

mod channel_repo;
mod job_repo;
mod memory;
mod module_repo;
mod traits;

pub use channel_repo::ChannelConfigRepository;
pub use job_repo::JobRepository;
pub use memory::{MemoryJobRepository, MemoryRegistry};
pub use module_repo::ModuleRepository;
pub use traits::{
    ChannelConfigRepositoryTrait, JobRepositoryTrait, ModuleRepositoryTrait, ReclaimSummary,
};

#[cfg(test)]
pub use traits::{MockChannelConfigRepositoryTrait, MockJobRepositoryTrait, MockModuleRepositoryTrait};
