//! 渠道发送器
//!
//! 通过 `ChannelSender` trait 抽象外部渠道的发送能力：给定凭证、目标与文本，
//! 返回成功或失败原因。具体服务商的报文格式不在此处约定。
//! `LogChannelSender` 仅记录日志，便于在无外部依赖时验证投递管道；
//! `HttpChannelSender` 将消息 POST 到配置的网关。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dispatch_shared::config::{SenderKind, WorkerConfig};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::WorkerError;

/// 发送回执
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    /// 外部渠道返回的消息标识，用于追踪投递状态
    pub message_id: Option<String>,
}

/// 渠道发送器 trait
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChannelSender: Send + Sync {
    async fn send(
        &self,
        token: &str,
        destination: &str,
        text: &str,
    ) -> Result<SendReceipt, WorkerError>;

    /// 发送器名称，用于日志与错误信息
    fn name(&self) -> &'static str;
}

// ---------------------------------------------------------------------------
// 日志发送器
// ---------------------------------------------------------------------------

/// 模拟发送器
///
/// 本地开发默认使用，生产环境替换为 `HttpChannelSender`
pub struct LogChannelSender;

#[async_trait]
impl ChannelSender for LogChannelSender {
    async fn send(
        &self,
        _token: &str,
        destination: &str,
        text: &str,
    ) -> Result<SendReceipt, WorkerError> {
        let message_id = Uuid::now_v7().to_string();

        info!(
            sender = self.name(),
            destination = %destination,
            message_id = %message_id,
            text_len = text.len(),
            "模拟发送渠道通知"
        );

        Ok(SendReceipt {
            message_id: Some(message_id),
        })
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

// ---------------------------------------------------------------------------
// HTTP 网关发送器
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct GatewayRequest<'a> {
    destination: &'a str,
    text: &'a str,
}

/// HTTP 网关发送器
///
/// 凭证以 Bearer 方式传递；非 2xx 响应与超时都视为发送失败
pub struct HttpChannelSender {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpChannelSender {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, WorkerError> {
        let endpoint = endpoint.into();
        if endpoint.trim().is_empty() {
            return Err(WorkerError::InvalidSenderConfig(
                "http_endpoint 不能为空".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WorkerError::InvalidSenderConfig(e.to_string()))?;

        Ok(Self { client, endpoint })
    }

    fn failure(&self, reason: impl Into<String>) -> WorkerError {
        WorkerError::SendFailed {
            channel: self.name().to_string(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl ChannelSender for HttpChannelSender {
    async fn send(
        &self,
        token: &str,
        destination: &str,
        text: &str,
    ) -> Result<SendReceipt, WorkerError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(token)
            .json(&GatewayRequest { destination, text })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    self.failure("请求超时")
                } else {
                    self.failure(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.failure(format!("HTTP {}: {}", status.as_u16(), body)));
        }

        // 网关可能返回 {"message_id": "..."}，缺失时不影响结果
        let message_id = response
            .json::<serde_json::Value>()
            .await
            .ok()
            .and_then(|v| v.get("message_id").and_then(|id| id.as_str()).map(String::from));

        debug!(destination = %destination, message_id = ?message_id, "网关发送成功");
        Ok(SendReceipt { message_id })
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// 按配置构建发送器
pub fn build_sender(config: &WorkerConfig) -> Result<Arc<dyn ChannelSender>, WorkerError> {
    match config.sender {
        SenderKind::Log => Ok(Arc::new(LogChannelSender)),
        SenderKind::Http => {
            let endpoint = config.http_endpoint.clone().ok_or_else(|| {
                WorkerError::InvalidSenderConfig("sender=http 时必须配置 http_endpoint".to_string())
            })?;
            Ok(Arc::new(HttpChannelSender::new(
                endpoint,
                Duration::from_secs(config.send_timeout_secs),
            )?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_sender_succeeds() {
        let receipt = LogChannelSender
            .send("token", "-100123", "Order #123 completed")
            .await
            .unwrap();
        assert!(receipt.message_id.is_some());
    }

    #[test]
    fn test_build_sender_by_kind() {
        let config = WorkerConfig::default();
        assert_eq!(build_sender(&config).unwrap().name(), "log");

        let config = WorkerConfig {
            sender: SenderKind::Http,
            http_endpoint: Some("http://127.0.0.1:9/send".to_string()),
            ..Default::default()
        };
        assert_eq!(build_sender(&config).unwrap().name(), "http");
    }

    #[test]
    fn test_http_sender_requires_endpoint() {
        let config = WorkerConfig {
            sender: SenderKind::Http,
            http_endpoint: None,
            ..Default::default()
        };
        assert!(matches!(
            build_sender(&config),
            Err(WorkerError::InvalidSenderConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_http_sender_unreachable_gateway() {
        // 端口 9 (discard) 在测试环境中通常无人监听
        let sender =
            HttpChannelSender::new("http://127.0.0.1:9/send", Duration::from_millis(500)).unwrap();
        let err = sender.send("token", "42", "hello").await.unwrap_err();
        assert!(matches!(err, WorkerError::SendFailed { .. }));
    }
}
