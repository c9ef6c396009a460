//! 通知分发 HTTP 服务
//!
//! 接收事件生产方的分发请求并写入持久化队列，投递由 notification-worker 完成。

use std::sync::Arc;

use axum::{Json, Router, http::HeaderValue, middleware, routing::get};
use dispatch_api::{routes, state::AppState};
use dispatch_shared::{
    config::AppConfig,
    database::Database,
    observability::{self, middleware as obs_middleware},
};
use notification_dispatch::{
    ChannelConfigRepository, JobRepository, ModuleRegistry, ModuleRepository, QueueService,
    QueueSettings,
};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load("dispatch-api")?;

    let obs_config = config.observability.clone().with_service_name(&config.service_name);
    let _guard = observability::init(&obs_config).await?;

    info!("Starting dispatch-api on {}", config.server_addr());

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
    let state = AppState::new(registry, queue.clone());

    // NOTIFY_CORS_ORIGINS 为逗号分隔的来源列表，未设置时允许所有来源
    let cors = match std::env::var("NOTIFY_CORS_ORIGINS") {
        Ok(origins) if origins != "*" => {
            info!("CORS allowed_origins: {}", origins);
            let origins: Vec<_> = origins
                .split(',')
                .filter_map(|s| s.trim().parse::<HeaderValue>().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
        _ => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    };

    let app = Router::new()
        .nest("/api", routes::api_routes())
        .route("/health", get(health_check))
        .route(
            "/ready",
            get({
                let db_for_ready = db.clone();
                move || readiness_check(db_for_ready.clone())
            }),
        )
        .layer(cors)
        .layer(middleware::from_fn(obs_middleware::http_tracing))
        .layer(middleware::from_fn(obs_middleware::request_id))
        .with_state(state);

    let listener = TcpListener::bind(config.server_addr()).await?;
    info!("Listening on {}", config.server_addr());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 连接已排空，拒绝之后的入队
    queue.shutdown();
    db.close().await;
    info!("Server shutdown complete");

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

/// 存活探针
async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "dispatch-api"
    }))
}

/// 就绪探针：检查数据库连接是否可用
async fn readiness_check(db: Database) -> Json<serde_json::Value> {
    let (status, database) = match db.ping().await {
        Ok(latency) => (
            "ok",
            serde_json::json!({ "status": "ok", "latency_ms": latency.as_millis() as u64 }),
        ),
        Err(e) => (
            "degraded",
            serde_json::json!({ "status": "fail", "error": e.to_string() }),
        ),
    };

    Json(serde_json::json!({
        "status": status,
        "service": "dispatch-api",
        "checks": { "database": database }
    }))
}
