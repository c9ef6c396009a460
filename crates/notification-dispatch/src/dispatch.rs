//! 分发入口
//!
//! 事件生产方的同步调用入口：校验请求，确认模块存在启用的渠道，然后持久化一个任务。
//! 只等待入队完成，不等待投递。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dispatch_shared::observability::metrics;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use crate::error::{DispatchError, Result};
use crate::models::{JobState, MAX_DELAY_MS, NewDispatchJob};
use crate::queue::QueueService;
use crate::registry::ModuleRegistry;

/// 分发选项
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchOptions {
    /// 未指定时使用队列默认优先级
    pub priority: Option<i32>,
    pub delay: Option<Duration>,
    /// 覆盖各渠道默认投递目标
    pub explicit_chat_id: Option<String>,
}

impl DispatchOptions {
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_chat_id(mut self, chat_id: impl Into<String>) -> Self {
        self.explicit_chat_id = Some(chat_id.into());
        self
    }
}

/// 分发成功回执
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReceipt {
    pub job_id: i64,
    pub queued: bool,
    /// 入队时模块启用的渠道数，实际扇出以执行时为准
    pub total_channels: usize,
    pub state: JobState,
}

/// 分发结果的对外视图
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub success: bool,
    #[serde(rename = "jobId", skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queued: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_channels: Option<usize>,
}

impl From<&DispatchReceipt> for DispatchOutcome {
    fn from(receipt: &DispatchReceipt) -> Self {
        Self {
            success: true,
            job_id: Some(receipt.job_id.to_string()),
            queued: Some(receipt.queued),
            error: None,
            total_channels: Some(receipt.total_channels),
        }
    }
}

impl From<&DispatchError> for DispatchOutcome {
    fn from(err: &DispatchError) -> Self {
        Self {
            success: false,
            job_id: None,
            queued: None,
            error: Some(err.code().to_string()),
            total_channels: None,
        }
    }
}

impl From<&Result<DispatchReceipt>> for DispatchOutcome {
    fn from(result: &Result<DispatchReceipt>) -> Self {
        match result {
            Ok(receipt) => receipt.into(),
            Err(err) => err.into(),
        }
    }
}

/// 分发服务
pub struct Dispatcher {
    registry: Arc<ModuleRegistry>,
    queue: Arc<QueueService>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ModuleRegistry>, queue: Arc<QueueService>) -> Self {
        Self { registry, queue }
    }

    /// 分发一条通知
    ///
    /// 校验顺序：参数 -> 启用渠道 -> 入队。每次成功调用恰好创建一个任务。
    #[instrument(skip(self, message, options), fields(module_key = %module_key))]
    pub async fn dispatch(
        &self,
        module_key: &str,
        message: &str,
        options: DispatchOptions,
    ) -> Result<DispatchReceipt> {
        let result = self.try_dispatch(module_key, message, options).await;

        match &result {
            Ok(receipt) => {
                metrics::record_dispatch(module_key, "accepted");
                info!(
                    job_id = receipt.job_id,
                    total_channels = receipt.total_channels,
                    state = %receipt.state,
                    "通知已入队"
                );
            }
            Err(e) if e.is_business_error() => {
                metrics::record_dispatch(module_key, e.code());
                warn!(code = e.code(), error = %e, "通知分发被拒绝");
            }
            Err(e) => {
                metrics::record_dispatch(module_key, e.code());
                error!(code = e.code(), error = %e, "通知入队失败");
            }
        }

        result
    }

    async fn try_dispatch(
        &self,
        module_key: &str,
        message: &str,
        options: DispatchOptions,
    ) -> Result<DispatchReceipt> {
        if module_key.trim().is_empty() {
            return Err(DispatchError::InvalidRequest("module 不能为空".to_string()));
        }
        if message.trim().is_empty() {
            return Err(DispatchError::InvalidRequest("message 不能为空".to_string()));
        }
        let delay_ms = match options.delay {
            Some(d) => i64::try_from(d.as_millis())
                .ok()
                .filter(|ms| *ms <= MAX_DELAY_MS)
                .ok_or_else(|| {
                    DispatchError::InvalidRequest(format!("delay 不能超过 {MAX_DELAY_MS} 毫秒"))
                })?,
            None => 0,
        };

        let channels = self.registry.get_active_channels(module_key).await?;
        if channels.is_empty() {
            return Err(DispatchError::NoActiveChannel(module_key.to_string()));
        }

        let settings = self.queue.settings();
        let priority = options.priority.unwrap_or(settings.default_priority);
        let explicit_chat_id = options.explicit_chat_id.filter(|id| !id.trim().is_empty());

        let job = NewDispatchJob::new(
            module_key,
            message,
            priority,
            delay_ms,
            settings.retry_policy.max_attempts as i32,
            Utc::now(),
        )
        .with_chat_id(explicit_chat_id);

        let created = self.queue.enqueue(job).await?;

        Ok(DispatchReceipt {
            job_id: created.id,
            queued: true,
            total_channels: channels.len(),
            state: created.state,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChannelConfig;
    use crate::queue::QueueSettings;
    use crate::repository::{
        MemoryJobRepository, MockChannelConfigRepositoryTrait, MockModuleRepositoryTrait,
    };

    fn channel(id: i64, module_key: &str) -> ChannelConfig {
        ChannelConfig {
            id,
            module_key: module_key.to_string(),
            endpoint_token: format!("token-{id}"),
            target_chat_id: Some(format!("chat-{id}")),
            display_name: format!("群 {id}"),
            contact_name: None,
            contact_phone: None,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    async fn dispatcher(
        channels: MockChannelConfigRepositoryTrait,
    ) -> (Arc<MemoryJobRepository>, Dispatcher) {
        let repo = Arc::new(MemoryJobRepository::new());
        let queue = QueueService::init(repo.clone(), QueueSettings::default())
            .await
            .unwrap();
        let registry = ModuleRegistry::new(
            Arc::new(MockModuleRepositoryTrait::new()),
            Arc::new(channels),
        );
        (repo, Dispatcher::new(Arc::new(registry), Arc::new(queue)))
    }

    #[tokio::test]
    async fn test_invalid_request_skips_lookup() {
        let mut channels = MockChannelConfigRepositoryTrait::new();
        channels.expect_get_active_channels().never();
        let (repo, dispatcher) = dispatcher(channels).await;

        for (module, message) in [("", "msg"), ("m", ""), ("   ", "msg"), ("m", " \n")] {
            let err = dispatcher
                .dispatch(module, message, DispatchOptions::default())
                .await
                .unwrap_err();
            assert_eq!(err.code(), "InvalidRequest");
        }
        assert!(repo.is_empty());
    }

    #[tokio::test]
    async fn test_no_active_channel_enqueues_nothing() {
        let mut channels = MockChannelConfigRepositoryTrait::new();
        channels
            .expect_get_active_channels()
            .returning(|_| Ok(vec![]));
        let (repo, dispatcher) = dispatcher(channels).await;

        let err = dispatcher
            .dispatch("unknown_module", "x", DispatchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::NoActiveChannel(_)));
        assert!(repo.is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_persists_single_job() {
        let mut channels = MockChannelConfigRepositoryTrait::new();
        channels
            .expect_get_active_channels()
            .returning(|key| Ok(vec![channel(2, key), channel(1, key)]));
        let (repo, dispatcher) = dispatcher(channels).await;

        let receipt = dispatcher
            .dispatch(
                "order_completed",
                "Order #123 completed",
                DispatchOptions::default().with_chat_id("42"),
            )
            .await
            .unwrap();

        assert!(receipt.queued);
        assert_eq!(receipt.total_channels, 2);
        assert_eq!(receipt.state, JobState::Waiting);

        let jobs = repo.snapshot();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, receipt.job_id);
        assert_eq!(jobs[0].priority, 1);
        assert_eq!(jobs[0].max_attempts, 5);
        assert_eq!(jobs[0].explicit_chat_id.as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn test_delay_creates_delayed_job() {
        let mut channels = MockChannelConfigRepositoryTrait::new();
        channels
            .expect_get_active_channels()
            .returning(|key| Ok(vec![channel(1, key)]));
        let (repo, dispatcher) = dispatcher(channels).await;

        let receipt = dispatcher
            .dispatch(
                "low_stock",
                "SKU-9 below threshold",
                DispatchOptions::default()
                    .with_priority(10)
                    .with_delay(Duration::from_secs(30)),
            )
            .await
            .unwrap();

        assert_eq!(receipt.state, JobState::Delayed);
        let job = &repo.snapshot()[0];
        assert_eq!(job.priority, 10);
        assert_eq!(job.delay_ms, 30_000);
    }

    #[tokio::test]
    async fn test_out_of_range_delay_rejected() {
        let mut channels = MockChannelConfigRepositoryTrait::new();
        channels.expect_get_active_channels().never();
        let (repo, dispatcher) = dispatcher(channels).await;

        for delay in [
            Duration::from_millis(i64::MAX as u64),
            Duration::from_millis(MAX_DELAY_MS as u64 + 1),
            Duration::MAX,
        ] {
            let err = dispatcher
                .dispatch("order_completed", "x", DispatchOptions::default().with_delay(delay))
                .await
                .unwrap_err();
            assert_eq!(err.code(), "InvalidRequest");
        }
        assert!(repo.is_empty());
    }

    #[tokio::test]
    async fn test_max_delay_accepted() {
        let mut channels = MockChannelConfigRepositoryTrait::new();
        channels
            .expect_get_active_channels()
            .returning(|key| Ok(vec![channel(1, key)]));
        let (repo, dispatcher) = dispatcher(channels).await;

        let receipt = dispatcher
            .dispatch(
                "order_completed",
                "x",
                DispatchOptions::default().with_delay(Duration::from_millis(MAX_DELAY_MS as u64)),
            )
            .await
            .unwrap();
        assert_eq!(receipt.state, JobState::Delayed);
        assert_eq!(repo.snapshot()[0].delay_ms, MAX_DELAY_MS);
    }

    #[tokio::test]
    async fn test_persist_failure_surfaces() {
        let mut channels = MockChannelConfigRepositoryTrait::new();
        channels
            .expect_get_active_channels()
            .returning(|key| Ok(vec![channel(1, key)]));
        let (repo, dispatcher) = dispatcher(channels).await;
        repo.set_unavailable(true);

        let result = dispatcher
            .dispatch("order_completed", "x", DispatchOptions::default())
            .await;
        let outcome = DispatchOutcome::from(&result);
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("QueuePersistFailure"));
    }

    #[test]
    fn test_outcome_json_shape() {
        let ok = DispatchOutcome::from(&DispatchReceipt {
            job_id: 17,
            queued: true,
            total_channels: 2,
            state: JobState::Waiting,
        });
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["jobId"], "17");
        assert_eq!(json["queued"], true);
        assert_eq!(json["total_channels"], 2);
        assert!(json.get("error").is_none());

        let err = DispatchOutcome::from(&DispatchError::NoActiveChannel("m".into()));
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "NoActiveChannel");
        assert!(json.get("jobId").is_none());
    }
}
