//! 内存仓储
//!
//! 与 PostgreSQL 实现保持相同的排序、租约与保留期语义，适用于测试和本地开发。
//! 每个实例内部用一把锁保护全部状态，租用的选取与状态变更在同一临界区内完成。

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use super::traits::{
    ChannelConfigRepositoryTrait, JobRepositoryTrait, ModuleRepositoryTrait, ReclaimSummary,
};
use crate::error::{DispatchError, Result};
use crate::models::{
    ChannelConfig, DispatchJob, JobState, Module, NewChannelConfig, NewDispatchJob, NewModule,
    QueueStats,
};

// ============================================================================
// 任务队列
// ============================================================================

#[derive(Default)]
struct JobTable {
    next_id: i64,
    jobs: BTreeMap<i64, DispatchJob>,
}

/// 内存任务队列
#[derive(Default)]
pub struct MemoryJobRepository {
    table: Mutex<JobTable>,
    unavailable: AtomicBool,
}

impl MemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 模拟存储不可用，之后的读写均返回连接错误
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// 当前任务数
    pub fn len(&self) -> usize {
        self.table.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 所有任务快照，按 id 升序
    pub fn snapshot(&self) -> Vec<DispatchJob> {
        self.table.lock().jobs.values().cloned().collect()
    }

    /// 直接修改任务字段，用于测试中模拟时间流逝或异常状态
    pub fn update_job(&self, job_id: i64, f: impl FnOnce(&mut DispatchJob)) -> bool {
        match self.table.lock().jobs.get_mut(&job_id) {
            Some(job) => {
                f(job);
                true
            }
            None => false,
        }
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DispatchError::Database(sqlx::Error::PoolClosed));
        }
        Ok(())
    }

    /// 在持锁状态下修改持有指定租约的 active 任务
    fn with_leased_job(
        &self,
        job_id: i64,
        lease_token: Uuid,
        f: impl FnOnce(&mut DispatchJob),
    ) -> Result<bool> {
        self.check_available()?;
        let mut table = self.table.lock();
        match table.jobs.get_mut(&job_id) {
            Some(job) if job.state == JobState::Active && job.lease_token == Some(lease_token) => {
                f(job);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl JobRepositoryTrait for MemoryJobRepository {
    async fn ping(&self) -> Result<()> {
        self.check_available()
    }

    async fn enqueue(&self, job: &NewDispatchJob) -> Result<DispatchJob> {
        self.check_available()?;
        let mut table = self.table.lock();
        table.next_id += 1;
        let now = Utc::now();
        let created = DispatchJob {
            id: table.next_id,
            module_key: job.module_key.clone(),
            message: job.message.clone(),
            explicit_chat_id: job.explicit_chat_id.clone(),
            priority: job.priority,
            delay_ms: job.delay_ms,
            attempt_count: 0,
            max_attempts: job.max_attempts,
            state: job.state,
            run_at: job.run_at,
            lease_token: None,
            locked_until: None,
            last_error: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
        };
        table.jobs.insert(created.id, created.clone());
        Ok(created)
    }

    async fn lease_next(
        &self,
        now: DateTime<Utc>,
        lease_token: Uuid,
        locked_until: DateTime<Utc>,
    ) -> Result<Option<DispatchJob>> {
        self.check_available()?;
        let mut table = self.table.lock();

        // priority DESC, id ASC：BTreeMap 按 id 升序遍历，只在优先级严格更高时替换
        let mut best: Option<(i32, i64)> = None;
        for job in table.jobs.values().filter(|j| j.is_eligible(now)) {
            if best.map_or(true, |(priority, _)| job.priority > priority) {
                best = Some((job.priority, job.id));
            }
        }

        let Some((_, id)) = best else {
            return Ok(None);
        };

        let Some(job) = table.jobs.get_mut(&id) else {
            return Ok(None);
        };
        job.state = JobState::Active;
        job.attempt_count += 1;
        job.lease_token = Some(lease_token);
        job.locked_until = Some(locked_until);
        job.updated_at = now;

        Ok(Some(job.clone()))
    }

    async fn extend_lease(
        &self,
        job_id: i64,
        lease_token: Uuid,
        locked_until: DateTime<Utc>,
    ) -> Result<bool> {
        self.with_leased_job(job_id, lease_token, |job| {
            job.locked_until = Some(locked_until);
            job.updated_at = Utc::now();
        })
    }

    async fn complete(&self, job_id: i64, lease_token: Uuid, now: DateTime<Utc>) -> Result<bool> {
        self.with_leased_job(job_id, lease_token, |job| {
            job.state = JobState::Completed;
            job.lease_token = None;
            job.locked_until = None;
            job.finished_at = Some(now);
            job.updated_at = now;
        })
    }

    async fn schedule_retry(
        &self,
        job_id: i64,
        lease_token: Uuid,
        run_at: DateTime<Utc>,
        error: &str,
    ) -> Result<bool> {
        self.with_leased_job(job_id, lease_token, |job| {
            job.state = JobState::Delayed;
            job.run_at = run_at;
            job.last_error = Some(error.to_string());
            job.lease_token = None;
            job.locked_until = None;
            job.updated_at = Utc::now();
        })
    }

    async fn fail(
        &self,
        job_id: i64,
        lease_token: Uuid,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.with_leased_job(job_id, lease_token, |job| {
            job.state = JobState::Failed;
            job.last_error = Some(error.to_string());
            job.lease_token = None;
            job.locked_until = None;
            job.finished_at = Some(now);
            job.updated_at = now;
        })
    }

    async fn reclaim_expired(&self, now: DateTime<Utc>) -> Result<ReclaimSummary> {
        self.check_available()?;
        let mut table = self.table.lock();
        let mut summary = ReclaimSummary::default();

        for job in table.jobs.values_mut().filter(|j| j.lease_expired(now)) {
            job.lease_token = None;
            job.locked_until = None;
            job.updated_at = now;
            if job.is_final_attempt() {
                job.state = JobState::Failed;
                job.last_error = Some("lease expired on final attempt".to_string());
                job.finished_at = Some(now);
                summary.failed += 1;
            } else {
                job.state = JobState::Waiting;
                job.last_error = Some("lease expired".to_string());
                job.run_at = now;
                summary.requeued += 1;
            }
        }

        Ok(summary)
    }

    async fn promote_delayed(&self, now: DateTime<Utc>) -> Result<u64> {
        self.check_available()?;
        let mut table = self.table.lock();
        let mut promoted = 0;
        for job in table
            .jobs
            .values_mut()
            .filter(|j| j.state == JobState::Delayed && j.run_at <= now)
        {
            job.state = JobState::Waiting;
            job.updated_at = now;
            promoted += 1;
        }
        Ok(promoted)
    }

    async fn purge_finished(
        &self,
        completed_before: DateTime<Utc>,
        failed_before: DateTime<Utc>,
    ) -> Result<u64> {
        self.check_available()?;
        let mut table = self.table.lock();
        let before = table.jobs.len();
        table.jobs.retain(|_, job| {
            let cutoff = match job.state {
                JobState::Completed => completed_before,
                _ => failed_before,
            };
            !job.state.is_terminal() || job.finished_at.is_none_or(|at| at >= cutoff)
        });
        Ok((before - table.jobs.len()) as u64)
    }

    async fn stats(&self) -> Result<QueueStats> {
        self.check_available()?;
        let table = self.table.lock();
        Ok(QueueStats::from_counts(
            table.jobs.values().map(|job| (job.state, 1)),
        ))
    }

    async fn get(&self, job_id: i64) -> Result<Option<DispatchJob>> {
        self.check_available()?;
        Ok(self.table.lock().jobs.get(&job_id).cloned())
    }
}

// ============================================================================
// 模块与渠道配置
// ============================================================================

#[derive(Default)]
struct RegistryTables {
    next_module_id: i64,
    next_channel_id: i64,
    modules: BTreeMap<i64, Module>,
    channels: BTreeMap<i64, ChannelConfig>,
}

/// 内存模块注册表，同时实现模块与渠道配置仓储
#[derive(Default)]
pub struct MemoryRegistry {
    tables: Mutex<RegistryTables>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册模块并为其添加若干启用的渠道，返回渠道 ID
    pub fn seed_module(&self, module_key: &str, channel_count: usize) -> Vec<i64> {
        let mut tables = self.tables.lock();
        let now = Utc::now();

        if !tables.modules.values().any(|m| m.module_key == module_key) {
            tables.next_module_id += 1;
            let id = tables.next_module_id;
            tables.modules.insert(
                id,
                Module {
                    id,
                    module_key: module_key.to_string(),
                    module_name: module_key.to_string(),
                    category: String::new(),
                    parent_module_id: None,
                    is_active: true,
                    created_at: now,
                    updated_at: now,
                },
            );
        }

        (0..channel_count)
            .map(|i| {
                tables.next_channel_id += 1;
                let id = tables.next_channel_id;
                tables.channels.insert(
                    id,
                    ChannelConfig {
                        id,
                        module_key: module_key.to_string(),
                        endpoint_token: format!("token-{id}"),
                        target_chat_id: Some(format!("chat-{id}")),
                        display_name: format!("{module_key} #{i}"),
                        contact_name: None,
                        contact_phone: None,
                        is_active: true,
                        created_at: now,
                        updated_at: now,
                    },
                );
                id
            })
            .collect()
    }
}

#[async_trait]
impl ModuleRepositoryTrait for MemoryRegistry {
    async fn get_by_key(&self, module_key: &str) -> Result<Option<Module>> {
        let tables = self.tables.lock();
        Ok(tables
            .modules
            .values()
            .find(|m| m.module_key == module_key)
            .cloned())
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Module>> {
        Ok(self.tables.lock().modules.get(&id).cloned())
    }

    async fn list_all(&self) -> Result<Vec<Module>> {
        Ok(self.tables.lock().modules.values().cloned().collect())
    }

    async fn create(&self, module: &NewModule) -> Result<Module> {
        let mut tables = self.tables.lock();
        if tables
            .modules
            .values()
            .any(|m| m.module_key == module.module_key)
        {
            return Err(DispatchError::ModuleAlreadyExists(module.module_key.clone()));
        }
        if let Some(parent_id) = module.parent_module_id {
            if !tables.modules.contains_key(&parent_id) {
                return Err(DispatchError::InvalidHierarchy(format!(
                    "父模块不存在: {}",
                    parent_id
                )));
            }
        }

        tables.next_module_id += 1;
        let now = Utc::now();
        let created = Module {
            id: tables.next_module_id,
            module_key: module.module_key.clone(),
            module_name: module.module_name.clone(),
            category: module.category.clone(),
            parent_module_id: module.parent_module_id,
            is_active: module.is_active,
            created_at: now,
            updated_at: now,
        };
        tables.modules.insert(created.id, created.clone());
        Ok(created)
    }
}

#[async_trait]
impl ChannelConfigRepositoryTrait for MemoryRegistry {
    async fn get_active_channels(&self, module_key: &str) -> Result<Vec<ChannelConfig>> {
        let mut channels = self.list_by_module(module_key).await?;
        channels.retain(|c| c.is_active);
        Ok(channels)
    }

    async fn list_by_module(&self, module_key: &str) -> Result<Vec<ChannelConfig>> {
        let tables = self.tables.lock();
        let mut channels: Vec<ChannelConfig> = tables
            .channels
            .values()
            .filter(|c| c.module_key == module_key)
            .cloned()
            .collect();
        channels.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(channels)
    }

    async fn create(&self, config: &NewChannelConfig) -> Result<ChannelConfig> {
        let mut tables = self.tables.lock();
        if !tables
            .modules
            .values()
            .any(|m| m.module_key == config.module_key)
        {
            return Err(DispatchError::ModuleNotFound(config.module_key.clone()));
        }

        tables.next_channel_id += 1;
        let now = Utc::now();
        let created = ChannelConfig {
            id: tables.next_channel_id,
            module_key: config.module_key.clone(),
            endpoint_token: config.endpoint_token.clone(),
            target_chat_id: config.target_chat_id.clone(),
            display_name: config.display_name.clone(),
            contact_name: config.contact_name.clone(),
            contact_phone: config.contact_phone.clone(),
            is_active: config.is_active,
            created_at: now,
            updated_at: now,
        };
        tables.channels.insert(created.id, created.clone());
        Ok(created)
    }

    async fn set_active(&self, id: i64, is_active: bool) -> Result<ChannelConfig> {
        let mut tables = self.tables.lock();
        let channel = tables
            .channels
            .get_mut(&id)
            .ok_or(DispatchError::ChannelNotFound(id))?;
        channel.is_active = is_active;
        channel.updated_at = Utc::now();
        Ok(channel.clone())
    }
}
