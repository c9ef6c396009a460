//! 渠道配置仓储
//!
//! Worker 在任务执行时实时读取，不做快照

use async_trait::async_trait;
use sqlx::PgPool;

use super::traits::ChannelConfigRepositoryTrait;
use crate::error::{DispatchError, Result};
use crate::models::{ChannelConfig, NewChannelConfig};

const CHANNEL_COLUMNS: &str = "id, module_key, endpoint_token, target_chat_id, display_name, \
                               contact_name, contact_phone, is_active, created_at, updated_at";

/// 渠道配置仓储（PostgreSQL）
pub struct ChannelConfigRepository {
    pool: PgPool,
}

impl ChannelConfigRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChannelConfigRepositoryTrait for ChannelConfigRepository {
    async fn get_active_channels(&self, module_key: &str) -> Result<Vec<ChannelConfig>> {
        let channels = sqlx::query_as::<_, ChannelConfig>(&format!(
            r#"
            SELECT {CHANNEL_COLUMNS}
            FROM notification_channel_configs
            WHERE module_key = $1 AND is_active = TRUE
            ORDER BY created_at DESC, id DESC
            "#
        ))
        .bind(module_key)
        .fetch_all(&self.pool)
        .await?;

        Ok(channels)
    }

    async fn list_by_module(&self, module_key: &str) -> Result<Vec<ChannelConfig>> {
        let channels = sqlx::query_as::<_, ChannelConfig>(&format!(
            r#"
            SELECT {CHANNEL_COLUMNS}
            FROM notification_channel_configs
            WHERE module_key = $1
            ORDER BY created_at DESC, id DESC
            "#
        ))
        .bind(module_key)
        .fetch_all(&self.pool)
        .await?;

        Ok(channels)
    }

    async fn create(&self, config: &NewChannelConfig) -> Result<ChannelConfig> {
        // 仅当模块存在时插入，避免产生孤立配置
        let created = sqlx::query_as::<_, ChannelConfig>(&format!(
            r#"
            INSERT INTO notification_channel_configs
                (module_key, endpoint_token, target_chat_id, display_name,
                 contact_name, contact_phone, is_active)
            SELECT $1, $2, $3, $4, $5, $6, $7
            WHERE EXISTS (SELECT 1 FROM notification_modules WHERE module_key = $1)
            RETURNING {CHANNEL_COLUMNS}
            "#
        ))
        .bind(&config.module_key)
        .bind(&config.endpoint_token)
        .bind(&config.target_chat_id)
        .bind(&config.display_name)
        .bind(&config.contact_name)
        .bind(&config.contact_phone)
        .bind(config.is_active)
        .fetch_optional(&self.pool)
        .await?;

        created.ok_or_else(|| DispatchError::ModuleNotFound(config.module_key.clone()))
    }

    async fn set_active(&self, id: i64, is_active: bool) -> Result<ChannelConfig> {
        let updated = sqlx::query_as::<_, ChannelConfig>(&format!(
            r#"
            UPDATE notification_channel_configs
            SET is_active = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING {CHANNEL_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(is_active)
        .fetch_optional(&self.pool)
        .await?;

        updated.ok_or(DispatchError::ChannelNotFound(id))
    }
}
