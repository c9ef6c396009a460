//! 队列观测处理器

use axum::{
    Json,
    extract::{Path, State},
};
use notification_dispatch::{DispatchJob, QueueStats};

use crate::{dto::ApiResponse, error::Result, state::AppState};

/// 各状态任务数
///
/// GET /api/notifications/stats
pub async fn queue_stats(State(state): State<AppState>) -> Result<Json<QueueStats>> {
    let stats = state.queue.stats().await?;
    Ok(Json(stats))
}

/// 单个任务快照
///
/// GET /api/notifications/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<DispatchJob>>> {
    let job = state.queue.get_job(id).await?;
    Ok(Json(ApiResponse::success(job)))
}
