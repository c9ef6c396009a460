//! 路由配置模块

use axum::{
    Router,
    routing::{get, post},
};

use crate::{handlers, state::AppState};

/// 分发与队列观测路由
pub fn notification_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/notifications/dispatch",
            post(handlers::dispatch::dispatch_notification),
        )
        .route("/notifications/stats", get(handlers::stats::queue_stats))
        .route("/notifications/jobs/{id}", get(handlers::stats::get_job))
}

/// 模块配置只读路由
pub fn module_routes() -> Router<AppState> {
    Router::new()
        .route("/modules", get(handlers::modules::list_modules))
        .route(
            "/modules/{key}/channels",
            get(handlers::modules::module_channels),
        )
}

/// 构建完整的 API 路由（不含前缀，由调用方挂载）
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(notification_routes())
        .merge(module_routes())
}
