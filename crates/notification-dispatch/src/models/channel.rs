//! 渠道配置实体

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 渠道配置
///
/// 同一模块可绑定多个渠道，每个渠道独立启停
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ChannelConfig {
    pub id: i64,
    pub module_key: String,
    /// 外部渠道凭证，不直接对外输出
    #[serde(skip_serializing)]
    pub endpoint_token: String,
    /// 默认投递目标
    #[sqlx(default)]
    pub target_chat_id: Option<String>,
    pub display_name: String,
    #[sqlx(default)]
    pub contact_name: Option<String>,
    #[sqlx(default)]
    pub contact_phone: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChannelConfig {
    /// 脱敏后的凭证，仅保留前 4 位；不超过 8 位的凭证整体隐藏
    pub fn masked_token(&self) -> String {
        const VISIBLE: usize = 4;
        if self.endpoint_token.chars().count() <= VISIBLE * 2 {
            return "****".to_string();
        }
        let prefix: String = self.endpoint_token.chars().take(VISIBLE).collect();
        format!("{}****", prefix)
    }

    /// 计算实际投递目标：任务级覆盖优先于渠道默认值
    pub fn resolve_destination<'a>(&'a self, explicit_chat_id: Option<&'a str>) -> Option<&'a str> {
        explicit_chat_id
            .filter(|id| !id.trim().is_empty())
            .or(self.target_chat_id.as_deref())
            .filter(|id| !id.trim().is_empty())
    }
}

/// 新建渠道配置参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewChannelConfig {
    pub module_key: String,
    pub endpoint_token: String,
    pub target_chat_id: Option<String>,
    pub display_name: String,
    pub contact_name: Option<String>,
    pub contact_phone: Option<String>,
    pub is_active: bool,
}

impl NewChannelConfig {
    pub fn new(
        module_key: impl Into<String>,
        endpoint_token: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            module_key: module_key.into(),
            endpoint_token: endpoint_token.into(),
            target_chat_id: None,
            display_name: display_name.into(),
            contact_name: None,
            contact_phone: None,
            is_active: true,
        }
    }

    pub fn with_target(mut self, chat_id: impl Into<String>) -> Self {
        self.target_chat_id = Some(chat_id.into());
        self
    }

    pub fn with_contact(mut self, name: impl Into<String>, phone: Option<String>) -> Self {
        self.contact_name = Some(name.into());
        self.contact_phone = phone;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(target: Option<&str>) -> ChannelConfig {
        ChannelConfig {
            id: 1,
            module_key: "order_completed".into(),
            endpoint_token: "bot123456:secret".into(),
            target_chat_id: target.map(String::from),
            display_name: "运营群".into(),
            contact_name: None,
            contact_phone: None,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_masked_token() {
        assert_eq!(channel(None).masked_token(), "bot1****");

        for short in ["", "abc", "abcd", "abcdefgh"] {
            let channel = ChannelConfig {
                endpoint_token: short.into(),
                ..channel(None)
            };
            assert_eq!(channel.masked_token(), "****", "{short}");
        }
    }

    #[test]
    fn test_resolve_destination() {
        let c = channel(Some("-1001"));
        assert_eq!(c.resolve_destination(None), Some("-1001"));
        assert_eq!(c.resolve_destination(Some("42")), Some("42"));
        assert_eq!(c.resolve_destination(Some("  ")), Some("-1001"));
        assert_eq!(channel(None).resolve_destination(None), None);
    }

    #[test]
    fn test_token_not_serialized() {
        let json = serde_json::to_value(channel(None)).unwrap();
        assert!(json.get("endpointToken").is_none());
        assert_eq!(json["displayName"], "运营群");
    }
}
