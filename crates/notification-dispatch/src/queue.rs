//! 持久化任务队列服务
//!
//! 在仓储之上实现优先级、延迟、租约与重试退避语义。
//! 每个实例持有独立的存储句柄，`init` 时探活，`shutdown` 后拒绝新的入队与租用。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use dispatch_shared::config::QueueConfig;
use dispatch_shared::observability::metrics;
use dispatch_shared::retry::RetryPolicy;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::{DispatchError, Result};
use crate::models::{DispatchJob, JobState, NewDispatchJob, QueueStats};
use crate::repository::{JobRepositoryTrait, ReclaimSummary};

/// 队列运行参数
#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub default_priority: i32,
    /// 退避策略，其 max_attempts 写入每个新任务
    pub retry_policy: RetryPolicy,
    pub lease_timeout: Duration,
    pub completed_retention: Duration,
    pub failed_retention: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self::from(&QueueConfig::default())
    }
}

impl From<&QueueConfig> for QueueSettings {
    fn from(config: &QueueConfig) -> Self {
        Self {
            default_priority: config.default_priority,
            retry_policy: config.retry_policy(),
            lease_timeout: config.lease_timeout(),
            completed_retention: config.completed_retention(),
            failed_retention: config.failed_retention(),
        }
    }
}

/// 一次失败尝试的处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureOutcome {
    /// 已重新调度
    Retrying {
        attempt: i32,
        run_at: DateTime<Utc>,
        delay: Duration,
    },
    /// 尝试次数耗尽，进入终态
    Failed { attempts: i32 },
    /// 租约已被回收，本次写入被丢弃
    LeaseLost,
}

/// 维护任务执行结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub reclaimed: ReclaimSummary,
    pub promoted: u64,
    pub purged: u64,
    pub stats: QueueStats,
}

fn to_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

/// `now + duration`，溢出时取可表示的最大时间
fn after(now: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    now.checked_add_signed(to_delta(duration))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// `now - duration`，不早于 UNIX 纪元（PostgreSQL timestamptz 无法表示 chrono 的最小时间）
fn before(now: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    now.checked_sub_signed(to_delta(duration))
        .map_or(DateTime::UNIX_EPOCH, |t| t.max(DateTime::UNIX_EPOCH))
}

/// 任务队列服务
pub struct QueueService {
    repo: Arc<dyn JobRepositoryTrait>,
    settings: QueueSettings,
    closed: AtomicBool,
}

impl QueueService {
    /// 探活存储后创建服务实例
    pub async fn init(repo: Arc<dyn JobRepositoryTrait>, settings: QueueSettings) -> Result<Self> {
        repo.ping()
            .await
            .map_err(|e| DispatchError::QueuePersistFailure(e.to_string()))?;

        info!(
            max_attempts = settings.retry_policy.max_attempts,
            lease_timeout_secs = settings.lease_timeout.as_secs(),
            "任务队列已初始化"
        );

        Ok(Self {
            repo,
            settings,
            closed: AtomicBool::new(false),
        })
    }

    /// 关闭队列，之后的入队与租用返回 QueueClosed
    pub fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!("任务队列已关闭");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(DispatchError::QueueClosed);
        }
        Ok(())
    }

    /// 持久化任务，返回即代表已提交
    #[instrument(skip(self, job), fields(module_key = %job.module_key, priority = job.priority))]
    pub async fn enqueue(&self, job: NewDispatchJob) -> Result<DispatchJob> {
        self.ensure_open()?;

        let created = self
            .repo
            .enqueue(&job)
            .await
            .map_err(|e| DispatchError::QueuePersistFailure(e.to_string()))?;

        debug!(job_id = created.id, state = %created.state, "任务已入队");
        Ok(created)
    }

    /// 租用下一个可执行任务
    pub async fn lease_next(&self) -> Result<Option<DispatchJob>> {
        self.ensure_open()?;

        let now = Utc::now();
        let locked_until = after(now, self.settings.lease_timeout);
        self.repo
            .lease_next(now, Uuid::new_v4(), locked_until)
            .await
    }

    /// 续租，返回 false 表示租约已丢失
    pub async fn heartbeat(&self, job: &DispatchJob) -> Result<bool> {
        let Some(token) = job.lease_token else {
            return Ok(false);
        };
        let locked_until = after(Utc::now(), self.settings.lease_timeout);
        self.repo.extend_lease(job.id, token, locked_until).await
    }

    /// 标记完成，返回 false 表示租约已丢失
    pub async fn complete(&self, job: &DispatchJob) -> Result<bool> {
        let Some(token) = job.lease_token else {
            return Ok(false);
        };
        self.repo.complete(job.id, token, Utc::now()).await
    }

    /// 记录一次失败尝试：未耗尽次数则按退避重新调度，否则进入 failed
    #[instrument(skip(self, job, reason), fields(job_id = job.id, attempt = job.attempt_count))]
    pub async fn record_failure(&self, job: &DispatchJob, reason: &str) -> Result<FailureOutcome> {
        let Some(token) = job.lease_token else {
            return Ok(FailureOutcome::LeaseLost);
        };

        let now = Utc::now();
        if !job.is_final_attempt() {
            let delay = self
                .settings
                .retry_policy
                .delay_for_attempt(job.attempt_count.max(1) as u32);
            let run_at = after(now, delay);

            if !self.repo.schedule_retry(job.id, token, run_at, reason).await? {
                warn!("租约已丢失，放弃重试调度");
                return Ok(FailureOutcome::LeaseLost);
            }

            info!(
                delay_ms = delay.as_millis() as u64,
                max_attempts = job.max_attempts,
                "任务将在退避后重试"
            );
            return Ok(FailureOutcome::Retrying {
                attempt: job.attempt_count,
                run_at,
                delay,
            });
        }

        if !self.repo.fail(job.id, token, reason, now).await? {
            warn!("租约已丢失，放弃失败标记");
            return Ok(FailureOutcome::LeaseLost);
        }

        warn!(error = reason, "任务重试次数耗尽，进入失败状态");
        Ok(FailureOutcome::Failed {
            attempts: job.attempt_count,
        })
    }

    /// 维护：回收过期租约、提升到期延迟任务、清理过期终态任务，并发布队列指标
    pub async fn run_maintenance(&self) -> Result<MaintenanceReport> {
        let now = Utc::now();

        let reclaimed = self.repo.reclaim_expired(now).await?;
        let promoted = self.repo.promote_delayed(now).await?;
        let purged = self
            .repo
            .purge_finished(
                before(now, self.settings.completed_retention),
                before(now, self.settings.failed_retention),
            )
            .await?;
        let stats = self.stats().await?;

        for state in JobState::ALL {
            metrics::set_queue_depth(state.as_str(), stats.count(state));
        }

        Ok(MaintenanceReport {
            reclaimed,
            promoted,
            purged,
            stats,
        })
    }

    /// 队列各状态计数快照
    pub async fn stats(&self) -> Result<QueueStats> {
        self.repo.stats().await
    }

    pub async fn get_job(&self, job_id: i64) -> Result<DispatchJob> {
        self.repo
            .get(job_id)
            .await?
            .ok_or(DispatchError::JobNotFound(job_id))
    }
}
