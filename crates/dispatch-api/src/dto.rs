//! 请求与响应 DTO 定义

use std::time::Duration;

use chrono::{DateTime, Utc};
use notification_dispatch::{ChannelConfig, DispatchOptions, MAX_DELAY_MS};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::ApiError;

/// 投递目标的最大长度，与 explicit_chat_id 列宽一致
const MAX_CHAT_ID_LEN: usize = 100;

/// API 统一响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            code: "SUCCESS".to_string(),
            message: "操作成功".to_string(),
            data: Some(data),
        }
    }
}

/// 投递目标，生产方可能传字符串或数字
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ChatId {
    Number(i64),
    Text(String),
}

impl ChatId {
    pub fn into_string(self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::Text(s) => s,
        }
    }
}

/// 分发请求
///
/// `module` 与 `message` 缺失时按空串处理，由分发入口统一返回 InvalidRequest
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DispatchRequest {
    #[serde(default)]
    #[validate(length(max = 100, message = "module 长度不能超过100个字符"))]
    pub module: String,
    #[serde(default)]
    pub message: String,
    pub chat_id: Option<ChatId>,
    pub priority: Option<i32>,
    /// 延迟毫秒数，非正数表示立即执行
    pub delay: Option<i64>,
}

impl DispatchRequest {
    /// 转换为分发选项
    pub fn options(&self) -> Result<DispatchOptions, ApiError> {
        let mut options = DispatchOptions {
            priority: self.priority,
            ..Default::default()
        };

        if let Some(ms) = self.delay.filter(|ms| *ms > 0) {
            if ms > MAX_DELAY_MS {
                return Err(ApiError::Validation(format!(
                    "delay 不能超过{MAX_DELAY_MS}毫秒"
                )));
            }
            options.delay = Some(Duration::from_millis(ms.unsigned_abs()));
        }

        if let Some(chat_id) = self.chat_id.clone() {
            let chat_id = chat_id.into_string();
            if chat_id.chars().count() > MAX_CHAT_ID_LEN {
                return Err(ApiError::Validation(format!(
                    "chatId 长度不能超过{MAX_CHAT_ID_LEN}个字符"
                )));
            }
            if !chat_id.trim().is_empty() {
                options.explicit_chat_id = Some(chat_id);
            }
        }

        Ok(options)
    }
}

/// 渠道配置只读视图，凭证脱敏
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelView {
    pub id: i64,
    pub module_key: String,
    pub display_name: String,
    pub endpoint_token: String,
    pub target_chat_id: Option<String>,
    pub contact_name: Option<String>,
    pub contact_phone: Option<String>,
    pub is_active: bool,
    pub updated_at: DateTime<Utc>,
}

impl From<&ChannelConfig> for ChannelView {
    fn from(channel: &ChannelConfig) -> Self {
        Self {
            id: channel.id,
            module_key: channel.module_key.clone(),
            display_name: channel.display_name.clone(),
            endpoint_token: channel.masked_token(),
            target_chat_id: channel.target_chat_id.clone(),
            contact_name: channel.contact_name.clone(),
            contact_phone: channel.contact_phone.clone(),
            is_active: channel.is_active,
            updated_at: channel.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(json: serde_json::Value) -> DispatchRequest {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_chat_id_accepts_string_or_number() {
        let req = request(serde_json::json!({
            "module": "order_completed",
            "message": "hi",
            "chatId": -1001234
        }));
        assert_eq!(
            req.options().unwrap().explicit_chat_id.as_deref(),
            Some("-1001234")
        );

        let req = request(serde_json::json!({
            "module": "order_completed",
            "message": "hi",
            "chatId": "@ops"
        }));
        assert_eq!(req.options().unwrap().explicit_chat_id.as_deref(), Some("@ops"));
    }

    #[test]
    fn test_blank_chat_id_is_ignored() {
        let req = request(serde_json::json!({ "module": "m", "message": "x", "chatId": "  " }));
        assert_eq!(req.options().unwrap().explicit_chat_id, None);
    }

    #[test]
    fn test_non_positive_delay_means_immediate() {
        let req = request(serde_json::json!({ "module": "m", "message": "x", "delay": -5 }));
        assert_eq!(req.options().unwrap().delay, None);

        let req = request(serde_json::json!({ "module": "m", "message": "x", "delay": 1500 }));
        let options = tokio_test::assert_ok!(req.options());
        assert_eq!(options.delay, Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_delay_above_maximum_rejected() {
        let req = request(serde_json::json!({ "module": "m", "message": "x", "delay": i64::MAX }));
        assert!(matches!(req.options(), Err(ApiError::Validation(_))));

        let req = request(serde_json::json!({ "module": "m", "message": "x", "delay": MAX_DELAY_MS }));
        let options = tokio_test::assert_ok!(req.options());
        assert_eq!(options.delay, Some(Duration::from_millis(MAX_DELAY_MS as u64)));
    }

    #[test]
    fn test_missing_fields_default_to_empty() {
        let req = request(serde_json::json!({}));
        assert!(req.module.is_empty());
        assert!(req.message.is_empty());
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_overlong_module_rejected() {
        let req = request(serde_json::json!({ "module": "m".repeat(101), "message": "x" }));
        assert!(req.validate().is_err());
    }
}
