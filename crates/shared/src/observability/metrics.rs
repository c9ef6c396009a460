//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::ObservabilityConfig;

/// 全局 Prometheus handle，用于渲染指标
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics 资源守卫
pub struct MetricsHandle {
    _server_handle: tokio::task::JoinHandle<()>,
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 端点。
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    let _ = PROMETHEUS_HANDLE.set(handle.clone());

    register_common_metrics(&config.service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle {
        _server_handle: server_handle,
    })
}

/// 注册通用指标描述
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!("http_requests_total", "Total number of HTTP requests");
    metrics::describe_histogram!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds"
    );

    metrics::describe_counter!(
        "dispatch_requests_total",
        "Total number of dispatch calls by result"
    );
    metrics::describe_counter!(
        "channel_sends_total",
        "Total number of per-channel send attempts by result"
    );
    metrics::describe_counter!(
        "job_outcomes_total",
        "Total number of job executions by outcome"
    );
    metrics::describe_histogram!(
        "job_execution_duration_seconds",
        "Time spent executing one job attempt"
    );
    metrics::describe_gauge!("queue_jobs", "Number of jobs in the queue by state");
    metrics::describe_gauge!(
        "worker_last_run_timestamp",
        "Unix timestamp of the last worker loop iteration"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// 启动指标 HTTP 服务器
async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

/// 获取全局 Prometheus handle（用于自定义渲染）
pub fn get_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ============================================================================
// 指标记录函数
// ============================================================================

/// 记录 HTTP 请求
#[inline]
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!(
        "http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str.clone()
    )
    .increment(1);

    metrics::histogram!(
        "http_request_duration_seconds",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str
    )
    .record(duration_secs);
}

/// 记录一次分发调用
///
/// result 取值为错误码或 "accepted"
#[inline]
pub fn record_dispatch(module_key: &str, result: &str) {
    metrics::counter!(
        "dispatch_requests_total",
        "module" => module_key.to_string(),
        "result" => result.to_string()
    )
    .increment(1);
}

/// 记录单个渠道的发送结果
#[inline]
pub fn record_channel_send(success: bool) {
    let result = if success { "success" } else { "failure" };
    metrics::counter!("channel_sends_total", "result" => result).increment(1);
}

/// 记录任务执行结果
///
/// outcome: completed / retrying / failed / lease_lost
#[inline]
pub fn record_job_outcome(outcome: &str, duration_secs: f64) {
    metrics::counter!("job_outcomes_total", "outcome" => outcome.to_string()).increment(1);
    metrics::histogram!("job_execution_duration_seconds").record(duration_secs);
}

/// 更新队列各状态的任务数
#[inline]
pub fn set_queue_depth(state: &str, count: i64) {
    metrics::gauge!("queue_jobs", "state" => state.to_string()).set(count as f64);
}

/// 记录 Worker 最近一次运行时间
#[inline]
pub fn set_worker_last_run(worker: &str) {
    metrics::gauge!("worker_last_run_timestamp", "worker" => worker.to_string())
        .set(chrono::Utc::now().timestamp() as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_functions_do_not_panic() {
        // 即使没有初始化 recorder，这些函数也不应该 panic
        record_http_request("POST", "/api/notifications/dispatch", 202, 0.01);
        record_dispatch("order_completed", "accepted");
        record_dispatch("unknown_module", "NoActiveChannel");
        record_channel_send(true);
        record_channel_send(false);
        record_job_outcome("completed", 0.2);
        set_queue_depth("waiting", 3);
        set_worker_last_run("worker-0");
    }
}
