//! 通知工作者服务
//!
//! 从持久化队列消费分发任务并投递到各渠道。

use std::sync::Arc;

use dispatch_shared::{config::AppConfig, database::Database, observability};
use notification_dispatch::{
    ChannelConfigRepository, JobRepository, ModuleRegistry, ModuleRepository, QueueService,
    QueueSettings,
};
use notification_worker::{WorkerPool, build_sender};
use tokio::sync::watch;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load("notification-worker")?;

    let obs_config = config.observability.clone().with_service_name(&config.service_name);
    let _guard = observability::init(&obs_config).await?;

    info!(
        environment = %config.environment,
        sender = ?config.worker.sender,
        concurrency = config.worker.concurrency,
        "Starting notification-worker..."
    );

    // 数据库可能晚于 Worker 就绪（如 compose 同时启动），启动阶段按退避重试连接
    let db = Database::connect_with_retry(&config.database, &config.queue.retry_policy()).await?;
    db.run_migrations().await?;

    let pool = db.pool().clone();
    let registry = Arc::new(ModuleRegistry::new(
        Arc::new(ModuleRepository::new(pool.clone())),
        Arc::new(ChannelConfigRepository::new(pool.clone())),
    ));
    let queue = Arc::new(
        QueueService::init(
            Arc::new(JobRepository::new(pool)),
            QueueSettings::from(&config.queue),
        )
        .await?,
    );
    let sender = build_sender(&config.worker)?;

    let worker_pool = WorkerPool::new(queue.clone(), registry, sender, &config.worker);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    // 收到信号后各消费者完成当前尝试再退出，未完成的任务由租约机制保证不丢失
    worker_pool.run(shutdown_rx).await;

    queue.shutdown();
    db.close().await;
    info!("notification-worker shutdown complete");

    Ok(())
}

/// 监听关闭信号
///
/// K8s 通过 SIGTERM 通知 Pod 停止；本地开发通过 Ctrl+C。
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("注册 Ctrl+C 处理器失败");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("注册 SIGTERM 处理器失败")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}
