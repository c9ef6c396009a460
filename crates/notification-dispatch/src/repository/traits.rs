//! 仓储 Trait 定义
//!
//! 服务层只依赖这些接口，Postgres 与内存实现可互换，单元测试使用 mockall 生成的 mock

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{ChannelConfig, DispatchJob, Module, NewChannelConfig, NewDispatchJob, NewModule, QueueStats};

/// 模块仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ModuleRepositoryTrait: Send + Sync {
    async fn get_by_key(&self, module_key: &str) -> Result<Option<Module>>;
    async fn get_by_id(&self, id: i64) -> Result<Option<Module>>;
    async fn list_all(&self) -> Result<Vec<Module>>;
    async fn create(&self, module: &NewModule) -> Result<Module>;
}

/// 渠道配置仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChannelConfigRepositoryTrait: Send + Sync {
    /// 模块下启用的渠道，按创建时间倒序；无配置时返回空列表
    async fn get_active_channels(&self, module_key: &str) -> Result<Vec<ChannelConfig>>;
    /// 模块下全部渠道（含停用）
    async fn list_by_module(&self, module_key: &str) -> Result<Vec<ChannelConfig>>;
    /// 模块不存在时返回 ModuleNotFound
    async fn create(&self, config: &NewChannelConfig) -> Result<ChannelConfig>;
    async fn set_active(&self, id: i64, is_active: bool) -> Result<ChannelConfig>;
}

/// 租约回收结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReclaimSummary {
    /// 重新回到 waiting 的任务数
    pub requeued: u64,
    /// 已用完尝试次数而直接失败的任务数
    pub failed: u64,
}

/// 任务队列仓储接口
///
/// 所有带 lease_token 的写操作只在令牌匹配且任务仍为 active 时生效，返回值表示是否生效
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobRepositoryTrait: Send + Sync {
    async fn ping(&self) -> Result<()>;

    async fn enqueue(&self, job: &NewDispatchJob) -> Result<DispatchJob>;

    /// 原子地租用一个可执行任务：priority DESC, id ASC
    async fn lease_next(
        &self,
        now: DateTime<Utc>,
        lease_token: Uuid,
        locked_until: DateTime<Utc>,
    ) -> Result<Option<DispatchJob>>;

    async fn extend_lease(
        &self,
        job_id: i64,
        lease_token: Uuid,
        locked_until: DateTime<Utc>,
    ) -> Result<bool>;

    async fn complete(&self, job_id: i64, lease_token: Uuid, now: DateTime<Utc>) -> Result<bool>;

    async fn schedule_retry(
        &self,
        job_id: i64,
        lease_token: Uuid,
        run_at: DateTime<Utc>,
        error: &str,
    ) -> Result<bool>;

    async fn fail(
        &self,
        job_id: i64,
        lease_token: Uuid,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// 回收过期租约
    async fn reclaim_expired(&self, now: DateTime<Utc>) -> Result<ReclaimSummary>;

    /// 将到期的 delayed 任务提升为 waiting
    async fn promote_delayed(&self, now: DateTime<Utc>) -> Result<u64>;

    /// 清理超出保留期的终态任务
    async fn purge_finished(
        &self,
        completed_before: DateTime<Utc>,
        failed_before: DateTime<Utc>,
    ) -> Result<u64>;

    async fn stats(&self) -> Result<QueueStats>;

    async fn get(&self, job_id: i64) -> Result<Option<DispatchJob>>;
}
