//! Worker 端到端测试
//!
//! 使用内存队列与内存注册表驱动完整的 分发 -> 租用 -> 扇出 -> 重试 流程。

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dispatch_shared::config::WorkerConfig;
use dispatch_shared::test_utils::test_queue_config;
use notification_dispatch::{
    DispatchOptions, Dispatcher, JobState, MemoryJobRepository, MemoryRegistry, ModuleRegistry,
    QueueService, QueueSettings,
};
use notification_worker::{
    ChannelSender, HttpChannelSender, JobOutcome, NotificationWorker, SendReceipt, WorkerError,
    WorkerPool,
};
use parking_lot::Mutex;
use tokio::sync::watch;

/// 按脚本返回结果的发送器，脚本耗尽后按 `fallback_fails` 决定结果
#[derive(Default)]
struct ScriptedSender {
    script: Mutex<VecDeque<bool>>,
    fallback_fails: bool,
    calls: Mutex<Vec<(String, String, String)>>,
}

impl ScriptedSender {
    fn failing_first(n: usize) -> Self {
        Self {
            script: Mutex::new(std::iter::repeat_n(false, n).collect()),
            ..Default::default()
        }
    }

    fn always_failing() -> Self {
        Self {
            fallback_fails: true,
            ..Default::default()
        }
    }

    fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    fn destinations(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(_, d, _)| d.clone()).collect()
    }
}

#[async_trait]
impl ChannelSender for ScriptedSender {
    async fn send(
        &self,
        token: &str,
        destination: &str,
        text: &str,
    ) -> Result<SendReceipt, WorkerError> {
        self.calls
            .lock()
            .push((token.to_string(), destination.to_string(), text.to_string()));
        let ok = self
            .script
            .lock()
            .pop_front()
            .unwrap_or(!self.fallback_fails);
        if ok {
            Ok(SendReceipt { message_id: None })
        } else {
            Err(WorkerError::SendFailed {
                channel: "scripted".to_string(),
                reason: "provider unavailable".to_string(),
            })
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

struct Harness {
    jobs: Arc<MemoryJobRepository>,
    registry: Arc<MemoryRegistry>,
    modules: Arc<ModuleRegistry>,
    queue: Arc<QueueService>,
    dispatcher: Dispatcher,
    sender: Arc<ScriptedSender>,
    worker: NotificationWorker,
}

async fn harness(sender: ScriptedSender) -> Harness {
    let jobs = Arc::new(MemoryJobRepository::new());
    let registry = Arc::new(MemoryRegistry::new());
    let modules = Arc::new(ModuleRegistry::new(registry.clone(), registry.clone()));
    let queue = Arc::new(
        QueueService::init(jobs.clone(), QueueSettings::from(&test_queue_config()))
            .await
            .unwrap(),
    );
    let dispatcher = Dispatcher::new(modules.clone(), queue.clone());
    let sender = Arc::new(sender);
    let worker = NotificationWorker::new(
        "worker-test",
        queue.clone(),
        modules.clone(),
        sender.clone(),
        Duration::from_secs(10),
    );
    Harness {
        jobs,
        registry,
        modules,
        queue,
        dispatcher,
        sender,
        worker,
    }
}

/// 反复尝试直到租到任务（等待退避结束）
async fn next_outcome(worker: &NotificationWorker) -> JobOutcome {
    for _ in 0..500 {
        if let Some(outcome) = worker.process_next().await.unwrap() {
            return outcome;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("no job became eligible");
}

#[tokio::test]
async fn scenario_a_two_channels_two_sends() {
    let h = harness(ScriptedSender::default()).await;
    h.registry.seed_module("order_completed", 2);

    let receipt = h
        .dispatcher
        .dispatch("order_completed", "Order #123 completed", DispatchOptions::default())
        .await
        .unwrap();

    let outcome = next_outcome(&h.worker).await;
    assert_eq!(
        outcome,
        JobOutcome::Completed {
            job_id: receipt.job_id,
            attempt: 1,
            delivered: 2,
            total: 2,
        }
    );
    assert_eq!(h.sender.call_count(), 2);

    let job = h.queue.get_job(receipt.job_id).await.unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert!(job.finished_at.is_some());
}

#[tokio::test]
async fn scenario_c_succeeds_on_fifth_attempt() {
    let h = harness(ScriptedSender::failing_first(4)).await;
    h.registry.seed_module("order_completed", 1);

    let receipt = h
        .dispatcher
        .dispatch("order_completed", "Order #123 completed", DispatchOptions::default())
        .await
        .unwrap();

    for attempt in 1..=4 {
        match next_outcome(&h.worker).await {
            JobOutcome::Retrying { attempt: a, .. } => assert_eq!(a, attempt),
            other => panic!("unexpected outcome {other:?}"),
        }
    }
    assert!(matches!(
        next_outcome(&h.worker).await,
        JobOutcome::Completed { attempt: 5, .. }
    ));

    let job = h.queue.get_job(receipt.job_id).await.unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.attempt_count, 5);
}

#[tokio::test]
async fn all_failing_sends_retry_with_growing_backoff_then_fail() {
    let h = harness(ScriptedSender::always_failing()).await;
    h.registry.seed_module("low_stock", 2);

    let receipt = h
        .dispatcher
        .dispatch("low_stock", "SKU-9 below threshold", DispatchOptions::default())
        .await
        .unwrap();

    let mut delays = Vec::new();
    loop {
        match next_outcome(&h.worker).await {
            JobOutcome::Retrying { delay, .. } => delays.push(delay),
            JobOutcome::Failed { attempts, .. } => {
                assert_eq!(attempts, 5);
                break;
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    assert_eq!(delays.len(), 4);
    assert!(delays.windows(2).all(|w| w[0] < w[1]));
    // 每次尝试都扇出到 2 个渠道
    assert_eq!(h.sender.call_count(), 10);

    let job = h.queue.get_job(receipt.job_id).await.unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert!(job.last_error.as_deref().unwrap().contains("重试次数耗尽"));

    // 终态后不再有任何尝试
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(h.worker.process_next().await.unwrap().is_none());
    assert_eq!(h.sender.call_count(), 10);
}

#[tokio::test]
async fn fan_out_matches_active_channel_count() {
    let h = harness(ScriptedSender::default()).await;
    let ids = h.registry.seed_module("deploy", 5);
    h.modules.set_channel_active(ids[0], false).await.unwrap();

    h.dispatcher
        .dispatch("deploy", "v1.2.3 released", DispatchOptions::default())
        .await
        .unwrap();
    next_outcome(&h.worker).await;

    assert_eq!(h.sender.call_count(), 4);
}

#[tokio::test]
async fn partial_success_completes_job() {
    // 扇出为并行执行，脚本中一个失败一个成功
    let h = harness(ScriptedSender::failing_first(1)).await;
    h.registry.seed_module("order_completed", 2);

    h.dispatcher
        .dispatch("order_completed", "x", DispatchOptions::default())
        .await
        .unwrap();

    assert!(matches!(
        next_outcome(&h.worker).await,
        JobOutcome::Completed {
            delivered: 1,
            total: 2,
            ..
        }
    ));
}

#[tokio::test]
async fn channels_resolved_at_execution_time() {
    let h = harness(ScriptedSender::default()).await;
    let ids = h.registry.seed_module("order_completed", 1);

    let receipt = h
        .dispatcher
        .dispatch("order_completed", "x", DispatchOptions::default())
        .await
        .unwrap();

    // 入队后全部停用：执行时没有渠道，记为一次失败尝试
    h.modules.set_channel_active(ids[0], false).await.unwrap();
    assert!(matches!(
        next_outcome(&h.worker).await,
        JobOutcome::Retrying { attempt: 1, .. }
    ));
    assert_eq!(h.sender.call_count(), 0);

    // 新增渠道后重试投递到新渠道
    let added = h.registry.seed_module("order_completed", 1);
    assert!(matches!(
        next_outcome(&h.worker).await,
        JobOutcome::Completed { attempt: 2, .. }
    ));
    assert_eq!(h.sender.destinations(), vec![format!("chat-{}", added[0])]);

    let job = h.queue.get_job(receipt.job_id).await.unwrap();
    assert_eq!(job.state, JobState::Completed);
}

#[tokio::test]
async fn explicit_chat_id_reaches_every_channel() {
    let h = harness(ScriptedSender::default()).await;
    h.registry.seed_module("order_completed", 3);

    h.dispatcher
        .dispatch(
            "order_completed",
            "x",
            DispatchOptions::default().with_chat_id("10086"),
        )
        .await
        .unwrap();
    next_outcome(&h.worker).await;

    assert_eq!(h.sender.destinations(), vec!["10086"; 3]);
}

/// 每次发送耗时固定的发送器
struct SlowSender {
    latency: Duration,
    calls: Mutex<usize>,
}

#[async_trait]
impl ChannelSender for SlowSender {
    async fn send(&self, _: &str, _: &str, _: &str) -> Result<SendReceipt, WorkerError> {
        *self.calls.lock() += 1;
        tokio::time::sleep(self.latency).await;
        Ok(SendReceipt { message_id: None })
    }

    fn name(&self) -> &'static str {
        "slow"
    }
}

#[tokio::test]
async fn heartbeat_keeps_slow_job_leased() {
    let jobs = Arc::new(MemoryJobRepository::new());
    let registry = Arc::new(MemoryRegistry::new());
    let modules = Arc::new(ModuleRegistry::new(registry.clone(), registry.clone()));
    let settings = QueueSettings {
        lease_timeout: Duration::from_millis(150),
        ..QueueSettings::from(&test_queue_config())
    };
    let queue = Arc::new(QueueService::init(jobs.clone(), settings).await.unwrap());
    let dispatcher = Dispatcher::new(modules.clone(), queue.clone());
    let sender = Arc::new(SlowSender {
        latency: Duration::from_millis(450),
        calls: Mutex::new(0),
    });
    let worker = Arc::new(NotificationWorker::new(
        "worker-slow",
        queue.clone(),
        modules.clone(),
        sender.clone(),
        Duration::from_millis(25),
    ));
    registry.seed_module("order_completed", 1);

    let receipt = dispatcher
        .dispatch("order_completed", "x", DispatchOptions::default())
        .await
        .unwrap();

    let running = tokio::spawn({
        let worker = worker.clone();
        async move { worker.process_next().await }
    });

    while queue.get_job(receipt.job_id).await.unwrap().state != JobState::Active {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    // 发送耗时是租约的三倍，期间持续运行维护任务
    while !running.is_finished() {
        let report = queue.run_maintenance().await.unwrap();
        assert_eq!(report.reclaimed.requeued, 0);
        assert_eq!(report.reclaimed.failed, 0);
        assert!(queue.lease_next().await.unwrap().is_none());
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let outcome = running.await.unwrap().unwrap();
    assert_eq!(
        outcome,
        Some(JobOutcome::Completed {
            job_id: receipt.job_id,
            attempt: 1,
            delivered: 1,
            total: 1,
        })
    );
    assert_eq!(*sender.calls.lock(), 1);

    let job = queue.get_job(receipt.job_id).await.unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.attempt_count, 1);
    assert!(worker.process_next().await.unwrap().is_none());
}

#[tokio::test]
async fn pool_drains_queue_and_stops_on_shutdown() {
    let h = harness(ScriptedSender::default()).await;
    h.registry.seed_module("order_completed", 1);
    for i in 0..10 {
        h.dispatcher
            .dispatch("order_completed", &format!("order {i}"), DispatchOptions::default())
            .await
            .unwrap();
    }

    let config = WorkerConfig {
        concurrency: 3,
        ..Default::default()
    };
    let pool = WorkerPool::new(
        h.queue.clone(),
        h.modules.clone(),
        h.sender.clone(),
        &config,
    )
    .with_intervals(Duration::from_millis(5), Duration::from_millis(10));
    assert_eq!(pool.size(), 3);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(pool.run(shutdown_rx));

    for _ in 0..200 {
        if h.queue.stats().await.unwrap().completed == 10 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(h.queue.stats().await.unwrap().completed, 10);
    assert_eq!(h.sender.call_count(), 10);

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("pool should stop after shutdown")
        .unwrap();
    assert_eq!(h.jobs.len(), 10);
}

#[tokio::test]
async fn http_sender_posts_to_gateway() {
    use axum::{Json, Router, http::HeaderMap, routing::post};

    let received: Arc<Mutex<Vec<(String, serde_json::Value)>>> = Arc::default();
    let sink = received.clone();
    let app = Router::new().route(
        "/send",
        post(move |headers: HeaderMap, Json(body): Json<serde_json::Value>| {
            let sink = sink.clone();
            async move {
                let auth = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                sink.lock().push((auth, body));
                Json(serde_json::json!({ "message_id": "gw-1" }))
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let sender =
        HttpChannelSender::new(format!("http://{addr}/send"), Duration::from_secs(2)).unwrap();
    let receipt = tokio_test::assert_ok!(sender.send("bot-token", "-1001", "hello").await);

    assert_eq!(receipt.message_id.as_deref(), Some("gw-1"));
    let received = received.lock();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].0, "Bearer bot-token");
    assert_eq!(received[0].1["destination"], "-1001");
    assert_eq!(received[0].1["text"], "hello");
}
