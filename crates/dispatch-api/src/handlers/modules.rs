//! 模块与渠道配置查询处理器

use axum::{
    Json,
    extract::{Path, State},
};
use notification_dispatch::ModuleNode;

use crate::{
    dto::{ApiResponse, ChannelView},
    error::Result,
    state::AppState,
};

/// 模块树
///
/// GET /api/modules
pub async fn list_modules(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<ModuleNode>>>> {
    let tree = state.registry.tree().await?;
    Ok(Json(ApiResponse::success(tree)))
}

/// 模块下启用的渠道
///
/// GET /api/modules/{key}/channels
pub async fn module_channels(
    State(state): State<AppState>,
    Path(module_key): Path<String>,
) -> Result<Json<ApiResponse<Vec<ChannelView>>>> {
    let channels = state.registry.module_channels(&module_key).await?;
    let views = channels.iter().map(ChannelView::from).collect();
    Ok(Json(ApiResponse::success(views)))
}
