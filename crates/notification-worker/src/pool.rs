//! Worker 池
//!
//! 启动多个并发消费者与一个维护循环。维护循环定期回收过期租约、提升到期延迟任务、
//! 清理超出保留期的终态任务，并发布队列指标。
//! 多实例部署时各实例的维护循环可以并存，相关语句均为幂等更新。

use std::sync::Arc;
use std::time::Duration;

use dispatch_shared::config::WorkerConfig;
use dispatch_shared::observability::metrics;
use notification_dispatch::{ModuleRegistry, QueueService};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::consumer::NotificationWorker;
use crate::sender::ChannelSender;

/// Worker 池
pub struct WorkerPool {
    workers: Vec<Arc<NotificationWorker>>,
    queue: Arc<QueueService>,
    poll_interval: Duration,
    maintenance_interval: Duration,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<QueueService>,
        registry: Arc<ModuleRegistry>,
        sender: Arc<dyn ChannelSender>,
        config: &WorkerConfig,
    ) -> Self {
        let heartbeat_interval = Duration::from_secs(config.heartbeat_interval_secs.max(1));
        let workers = (0..config.concurrency.max(1))
            .map(|i| {
                Arc::new(NotificationWorker::new(
                    format!("worker-{i}"),
                    queue.clone(),
                    registry.clone(),
                    sender.clone(),
                    heartbeat_interval,
                ))
            })
            .collect();

        Self {
            workers,
            queue,
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            maintenance_interval: Duration::from_secs(config.maintenance_interval_secs.max(1)),
        }
    }

    /// 测试中使用毫秒级的轮询与维护间隔
    pub fn with_intervals(mut self, poll_interval: Duration, maintenance_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.maintenance_interval = maintenance_interval;
        self
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// 运行所有消费者与维护循环，直到收到 shutdown 信号
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        info!(
            workers = self.workers.len(),
            poll_interval = ?self.poll_interval,
            maintenance_interval = ?self.maintenance_interval,
            "Worker 池已启动"
        );

        let mut tasks = JoinSet::new();

        for worker in &self.workers {
            let worker = worker.clone();
            let shutdown = shutdown.clone();
            let poll_interval = self.poll_interval;
            tasks.spawn(async move { worker.run(poll_interval, shutdown).await });
        }

        tasks.spawn(run_maintenance_loop(
            self.queue.clone(),
            self.maintenance_interval,
            shutdown,
        ));

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Worker 任务异常退出");
            }
        }

        info!("Worker 池已停止");
    }
}

/// 维护循环
pub async fn run_maintenance_loop(
    queue: Arc<QueueService>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(interval = ?interval, "队列维护循环已启动");

    loop {
        if *shutdown.borrow() {
            break;
        }

        match queue.run_maintenance().await {
            Ok(report) => {
                if report.reclaimed.requeued + report.reclaimed.failed + report.promoted + report.purged > 0 {
                    info!(
                        requeued = report.reclaimed.requeued,
                        reclaim_failed = report.reclaimed.failed,
                        promoted = report.promoted,
                        purged = report.purged,
                        waiting = report.stats.waiting,
                        active = report.stats.active,
                        "队列维护完成"
                    );
                }
            }
            Err(e) => error!(error = %e, "队列维护出错"),
        }

        metrics::set_worker_last_run("maintenance");

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    info!("队列维护循环已停止");
}
