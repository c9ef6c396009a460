//! 任务队列仓储
//!
//! 使用 `FOR UPDATE SKIP LOCKED` 实现多 Worker、多实例下的无阻塞独占租用：
//! 已被其他事务锁定的行直接跳过，而不是等待锁释放。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, warn};
use uuid::Uuid;

use super::traits::{JobRepositoryTrait, ReclaimSummary};
use crate::error::Result;
use crate::models::{DispatchJob, JobState, NewDispatchJob, QueueStats};

const JOB_COLUMNS: &str = "id, module_key, message, explicit_chat_id, priority, delay_ms, \
                           attempt_count, max_attempts, state, run_at, lease_token, locked_until, \
                           last_error, created_at, updated_at, finished_at";

/// 任务队列仓储（PostgreSQL）
pub struct JobRepository {
    pool: PgPool,
}

impl JobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobRepositoryTrait for JobRepository {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn enqueue(&self, job: &NewDispatchJob) -> Result<DispatchJob> {
        let created = sqlx::query_as::<_, DispatchJob>(&format!(
            r#"
            INSERT INTO notification_jobs
                (module_key, message, explicit_chat_id, priority, delay_ms,
                 attempt_count, max_attempts, state, run_at)
            VALUES ($1, $2, $3, $4, $5, 0, $6, $7, $8)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(&job.module_key)
        .bind(&job.message)
        .bind(&job.explicit_chat_id)
        .bind(job.priority)
        .bind(job.delay_ms)
        .bind(job.max_attempts)
        .bind(job.state)
        .bind(job.run_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }

    async fn lease_next(
        &self,
        now: DateTime<Utc>,
        lease_token: Uuid,
        locked_until: DateTime<Utc>,
    ) -> Result<Option<DispatchJob>> {
        // 选取与状态变更在同一条语句内完成，无需显式事务
        let job = sqlx::query_as::<_, DispatchJob>(
            r#"
            UPDATE notification_jobs j
            SET state = 'active',
                attempt_count = j.attempt_count + 1,
                lease_token = $2,
                locked_until = $3,
                updated_at = $1
            FROM (
                SELECT id
                FROM notification_jobs
                WHERE state IN ('waiting', 'delayed') AND run_at <= $1
                ORDER BY priority DESC, id ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            ) next
            WHERE j.id = next.id
            RETURNING j.id, j.module_key, j.message, j.explicit_chat_id, j.priority, j.delay_ms,
                      j.attempt_count, j.max_attempts, j.state, j.run_at, j.lease_token,
                      j.locked_until, j.last_error, j.created_at, j.updated_at, j.finished_at
            "#,
        )
        .bind(now)
        .bind(lease_token)
        .bind(locked_until)
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    async fn extend_lease(
        &self,
        job_id: i64,
        lease_token: Uuid,
        locked_until: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE notification_jobs
            SET locked_until = $3, updated_at = NOW()
            WHERE id = $1 AND lease_token = $2 AND state = 'active'
            "#,
        )
        .bind(job_id)
        .bind(lease_token)
        .bind(locked_until)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn complete(&self, job_id: i64, lease_token: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE notification_jobs
            SET state = 'completed', lease_token = NULL, locked_until = NULL,
                finished_at = $3, updated_at = $3
            WHERE id = $1 AND lease_token = $2 AND state = 'active'
            "#,
        )
        .bind(job_id)
        .bind(lease_token)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn schedule_retry(
        &self,
        job_id: i64,
        lease_token: Uuid,
        run_at: DateTime<Utc>,
        error: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE notification_jobs
            SET state = 'delayed', run_at = $3, last_error = $4,
                lease_token = NULL, locked_until = NULL, updated_at = NOW()
            WHERE id = $1 AND lease_token = $2 AND state = 'active'
            "#,
        )
        .bind(job_id)
        .bind(lease_token)
        .bind(run_at)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn fail(
        &self,
        job_id: i64,
        lease_token: Uuid,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE notification_jobs
            SET state = 'failed', last_error = $3, lease_token = NULL, locked_until = NULL,
                finished_at = $4, updated_at = $4
            WHERE id = $1 AND lease_token = $2 AND state = 'active'
            "#,
        )
        .bind(job_id)
        .bind(lease_token)
        .bind(error)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn reclaim_expired(&self, now: DateTime<Utc>) -> Result<ReclaimSummary> {
        let mut tx = self.pool.begin().await?;

        // 已用完尝试次数的任务直接失败，其余回到 waiting
        let failed = sqlx::query(
            r#"
            UPDATE notification_jobs
            SET state = 'failed', last_error = 'lease expired on final attempt',
                lease_token = NULL, locked_until = NULL, finished_at = $1, updated_at = $1
            WHERE state = 'active' AND locked_until < $1 AND attempt_count >= max_attempts
            "#,
        )
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let requeued = sqlx::query(
            r#"
            UPDATE notification_jobs
            SET state = 'waiting', last_error = 'lease expired',
                lease_token = NULL, locked_until = NULL, run_at = $1, updated_at = $1
            WHERE state = 'active' AND locked_until < $1
            "#,
        )
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;

        if failed + requeued > 0 {
            warn!(requeued, failed, "回收过期租约");
        }

        Ok(ReclaimSummary { requeued, failed })
    }

    async fn promote_delayed(&self, now: DateTime<Utc>) -> Result<u64> {
        let promoted = sqlx::query(
            r#"
            UPDATE notification_jobs
            SET state = 'waiting', updated_at = $1
            WHERE state = 'delayed' AND run_at <= $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(promoted)
    }

    async fn purge_finished(
        &self,
        completed_before: DateTime<Utc>,
        failed_before: DateTime<Utc>,
    ) -> Result<u64> {
        let purged = sqlx::query(
            r#"
            DELETE FROM notification_jobs
            WHERE (state = 'completed' AND finished_at < $1)
               OR (state = 'failed' AND finished_at < $2)
            "#,
        )
        .bind(completed_before)
        .bind(failed_before)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if purged > 0 {
            debug!(purged, "清理过期终态任务");
        }

        Ok(purged)
    }

    async fn stats(&self) -> Result<QueueStats> {
        let counts = sqlx::query_as::<_, (JobState, i64)>(
            "SELECT state, COUNT(*) FROM notification_jobs GROUP BY state",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(QueueStats::from_counts(counts))
    }

    async fn get(&self, job_id: i64) -> Result<Option<DispatchJob>> {
        let job = sqlx::query_as::<_, DispatchJob>(&format!(
            "SELECT {JOB_COLUMNS} FROM notification_jobs WHERE id = $1"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }
}
