//! HTTP 层错误类型定义

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use notification_dispatch::DispatchError;
use serde_json::json;

/// HTTP 层错误类型
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("参数验证失败: {0}")]
    Validation(String),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl ApiError {
    /// 返回对应的 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Dispatch(e) => dispatch_status(e),
        }
    }

    /// 返回错误码（用于 API 响应）
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "InvalidRequest",
            Self::Dispatch(e) => e.code(),
        }
    }
}

/// 分发错误到 HTTP 状态码的映射
pub fn dispatch_status(err: &DispatchError) -> StatusCode {
    match err {
        DispatchError::InvalidRequest(_) | DispatchError::InvalidHierarchy(_) => {
            StatusCode::BAD_REQUEST
        }
        DispatchError::NoActiveChannel(_) => StatusCode::UNPROCESSABLE_ENTITY,
        DispatchError::QueuePersistFailure(_) | DispatchError::QueueClosed => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        DispatchError::ModuleNotFound(_)
        | DispatchError::ChannelNotFound(_)
        | DispatchError::JobNotFound(_) => StatusCode::NOT_FOUND,
        DispatchError::ModuleAlreadyExists(_) => StatusCode::CONFLICT,
        DispatchError::Database(_) | DispatchError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // 系统级错误只返回通用提示，详细信息仅记录日志
        let message = match &self {
            Self::Dispatch(DispatchError::Database(e)) => {
                tracing::error!(error = %e, "数据库操作失败");
                "服务内部错误，请稍后重试".to_string()
            }
            Self::Dispatch(DispatchError::Internal(e)) => {
                tracing::error!(error = %e, "内部错误");
                "服务内部错误，请稍后重试".to_string()
            }
            other => other.to_string(),
        };

        let body = json!({
            "success": false,
            "code": self.error_code(),
            "message": message,
            "data": serde_json::Value::Null
        });

        (status, axum::Json(body)).into_response()
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(errors.to_string())
    }
}

/// Handler 层 Result 类型别名
pub type Result<T> = std::result::Result<T, ApiError>;
