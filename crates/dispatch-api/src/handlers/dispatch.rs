//! 分发入口处理器
//!
//! 响应体固定为 `{success, jobId?, queued?, error?, total_channels?}`，
//! 不使用统一响应包装，便于生产方直接判断结果。

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
};
use notification_dispatch::{DispatchError, DispatchOutcome};
use tracing::warn;
use validator::Validate;

use crate::{dto::DispatchRequest, error::dispatch_status, state::AppState};

/// 分发一条通知
///
/// POST /api/notifications/dispatch
pub async fn dispatch_notification(
    State(state): State<AppState>,
    payload: Result<Json<DispatchRequest>, JsonRejection>,
) -> (StatusCode, Json<DispatchOutcome>) {
    let req = match payload {
        Ok(Json(req)) => req,
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "分发请求体解析失败");
            return invalid(rejection.body_text());
        }
    };

    if let Err(e) = req.validate() {
        return invalid(e.to_string());
    }
    let options = match req.options() {
        Ok(options) => options,
        Err(e) => return invalid(e.to_string()),
    };

    let result = state
        .dispatcher
        .dispatch(&req.module, &req.message, options)
        .await;

    let status = match &result {
        Ok(_) => StatusCode::ACCEPTED,
        Err(e) => dispatch_status(e),
    };
    (status, Json(DispatchOutcome::from(&result)))
}

fn invalid(reason: String) -> (StatusCode, Json<DispatchOutcome>) {
    let err = DispatchError::InvalidRequest(reason);
    (StatusCode::BAD_REQUEST, Json(DispatchOutcome::from(&err)))
}
