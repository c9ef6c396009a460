//! 任务消费者
//!
//! 每个消费者循环租用一个任务，实时解析模块的启用渠道，并行投递到各渠道。
//! 至少一个渠道成功即标记完成，否则记为一次失败尝试交由队列按退避重试。
//! 执行期间定期续租，避免长时间发送被误判为 Worker 崩溃。

use std::sync::Arc;
use std::time::{Duration, Instant};

use dispatch_shared::observability::metrics;
use notification_dispatch::{
    ChannelConfig, DispatchJob, FailureOutcome, ModuleRegistry, QueueService,
};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::error::WorkerError;
use crate::sender::ChannelSender;

/// 单个渠道的投递结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryResult {
    pub channel_id: i64,
    pub display_name: String,
    pub success: bool,
    pub message_id: Option<String>,
    pub error: Option<String>,
}

/// 一次任务执行的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed {
        job_id: i64,
        attempt: i32,
        delivered: usize,
        total: usize,
    },
    Retrying {
        job_id: i64,
        attempt: i32,
        delay: Duration,
    },
    Failed {
        job_id: i64,
        attempts: i32,
    },
    /// 租约在执行期间被回收，结果未写入
    LeaseLost { job_id: i64 },
}

impl JobOutcome {
    pub fn job_id(&self) -> i64 {
        match self {
            Self::Completed { job_id, .. }
            | Self::Retrying { job_id, .. }
            | Self::Failed { job_id, .. }
            | Self::LeaseLost { job_id } => *job_id,
        }
    }

    /// 指标标签
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::Retrying { .. } => "retrying",
            Self::Failed { .. } => "failed",
            Self::LeaseLost { .. } => "lease_lost",
        }
    }
}

/// 通知消费者
pub struct NotificationWorker {
    id: String,
    queue: Arc<QueueService>,
    registry: Arc<ModuleRegistry>,
    sender: Arc<dyn ChannelSender>,
    heartbeat_interval: Duration,
}

impl NotificationWorker {
    pub fn new(
        id: impl Into<String>,
        queue: Arc<QueueService>,
        registry: Arc<ModuleRegistry>,
        sender: Arc<dyn ChannelSender>,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            id: id.into(),
            queue,
            registry,
            sender,
            heartbeat_interval,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// 启动消费循环，直到收到 shutdown 信号或队列关闭
    ///
    /// 正在执行的任务会完成当前尝试后再退出
    pub async fn run(&self, poll_interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(worker = %self.id, poll_interval = ?poll_interval, "通知消费者已启动");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let idle = match self.process_next().await {
                Ok(Some(_)) => false,
                Ok(None) => true,
                Err(e) if e.is_queue_closed() => {
                    info!(worker = %self.id, "队列已关闭");
                    break;
                }
                Err(e) => {
                    error!(worker = %self.id, error = %e, "任务处理出错");
                    true
                }
            };

            metrics::set_worker_last_run(&self.id);

            if idle {
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        info!(worker = %self.id, "通知消费者已停止");
    }

    /// 租用并执行一个任务，队列为空时返回 None
    pub async fn process_next(&self) -> Result<Option<JobOutcome>, WorkerError> {
        let Some(job) = self.queue.lease_next().await? else {
            return Ok(None);
        };

        let outcome = self.execute_with_heartbeat(&job).await?;
        Ok(Some(outcome))
    }

    /// 执行任务，期间按间隔续租
    async fn execute_with_heartbeat(&self, job: &DispatchJob) -> Result<JobOutcome, WorkerError> {
        let execution = self.execute(job);
        tokio::pin!(execution);

        let mut ticker = tokio::time::interval(self.heartbeat_interval);
        // interval 的第一次 tick 立即完成
        ticker.tick().await;

        loop {
            tokio::select! {
                outcome = &mut execution => return outcome,
                _ = ticker.tick() => match self.queue.heartbeat(job).await {
                    Ok(true) => debug!(job_id = job.id, "租约已续期"),
                    Ok(false) => warn!(job_id = job.id, "续租失败，租约可能已被回收"),
                    Err(e) => warn!(job_id = job.id, error = %e, "续租出错"),
                },
            }
        }
    }

    #[instrument(
        skip(self, job),
        fields(worker = %self.id, job_id = job.id, module_key = %job.module_key, attempt = job.attempt_count)
    )]
    async fn execute(&self, job: &DispatchJob) -> Result<JobOutcome, WorkerError> {
        let start = Instant::now();

        // 执行时实时读取渠道配置，入队后的配置变更会影响本次投递目标
        let deliveries = match self.registry.get_active_channels(&job.module_key).await {
            Ok(channels) => deliver_to_channels(self.sender.as_ref(), &channels, job).await,
            Err(e) => {
                warn!(error = %e, "读取渠道配置失败");
                let outcome = self.finish_failed(job, &format!("读取渠道配置失败: {e}")).await?;
                metrics::record_job_outcome(outcome.label(), start.elapsed().as_secs_f64());
                return Ok(outcome);
            }
        };

        for delivery in &deliveries {
            metrics::record_channel_send(delivery.success);
        }

        let delivered = deliveries.iter().filter(|d| d.success).count();
        let outcome = if delivered > 0 {
            if self.queue.complete(job).await? {
                info!(delivered, total = deliveries.len(), "通知任务已完成");
                JobOutcome::Completed {
                    job_id: job.id,
                    attempt: job.attempt_count,
                    delivered,
                    total: deliveries.len(),
                }
            } else {
                warn!("租约已丢失，完成状态未写入");
                JobOutcome::LeaseLost { job_id: job.id }
            }
        } else {
            let reason = if deliveries.is_empty() {
                "执行时模块没有启用的渠道".to_string()
            } else {
                summarize_failures(&deliveries)
            };
            self.finish_failed(job, &reason).await?
        };

        metrics::record_job_outcome(outcome.label(), start.elapsed().as_secs_f64());
        Ok(outcome)
    }

    async fn finish_failed(&self, job: &DispatchJob, reason: &str) -> Result<JobOutcome, WorkerError> {
        let reason = if job.is_final_attempt() {
            let terminal = WorkerError::TerminalFailure {
                job_id: job.id,
                attempts: job.attempt_count,
            };
            format!("{terminal}; {reason}")
        } else {
            reason.to_string()
        };

        let outcome = match self.queue.record_failure(job, &reason).await? {
            FailureOutcome::Retrying { attempt, delay, .. } => JobOutcome::Retrying {
                job_id: job.id,
                attempt,
                delay,
            },
            FailureOutcome::Failed { attempts } => JobOutcome::Failed {
                job_id: job.id,
                attempts,
            },
            FailureOutcome::LeaseLost => JobOutcome::LeaseLost { job_id: job.id },
        };
        Ok(outcome)
    }
}

/// 并行投递到所有渠道
///
/// 使用 futures::future::join_all 并行执行各渠道的发送，单个渠道失败不会阻塞其他渠道。
/// 目标优先取任务级 explicit_chat_id，其次是渠道默认 target_chat_id，两者都没有视为该渠道发送失败。
pub async fn deliver_to_channels(
    sender: &dyn ChannelSender,
    channels: &[ChannelConfig],
    job: &DispatchJob,
) -> Vec<DeliveryResult> {
    let futures: Vec<_> = channels
        .iter()
        .map(|channel| async move {
            let sent = match channel.resolve_destination(job.explicit_chat_id.as_deref()) {
                Some(destination) => {
                    sender
                        .send(&channel.endpoint_token, destination, &job.message)
                        .await
                }
                None => Err(WorkerError::MissingDestination {
                    channel: channel.id.to_string(),
                }),
            };

            match sent {
                Ok(receipt) => DeliveryResult {
                    channel_id: channel.id,
                    display_name: channel.display_name.clone(),
                    success: true,
                    message_id: receipt.message_id,
                    error: None,
                },
                Err(e) => {
                    warn!(
                        job_id = job.id,
                        channel_id = channel.id,
                        display_name = %channel.display_name,
                        error = %e,
                        "渠道发送失败"
                    );
                    DeliveryResult {
                        channel_id: channel.id,
                        display_name: channel.display_name.clone(),
                        success: false,
                        message_id: None,
                        error: Some(e.to_string()),
                    }
                }
            }
        })
        .collect();

    futures::future::join_all(futures).await
}

fn summarize_failures(deliveries: &[DeliveryResult]) -> String {
    deliveries
        .iter()
        .filter_map(|d| {
            d.error
                .as_ref()
                .map(|e| format!("channel {}: {}", d.channel_id, e))
        })
        .collect::<Vec<_>>()
        .join("; ")
}
