//! 模块仓储

use async_trait::async_trait;
use sqlx::PgPool;

use super::traits::ModuleRepositoryTrait;
use crate::error::{DispatchError, Result};
use crate::models::{Module, NewModule};

const MODULE_COLUMNS: &str = "id, module_key, module_name, category, parent_module_id, \
                              is_active, created_at, updated_at";

/// 模块仓储（PostgreSQL）
pub struct ModuleRepository {
    pool: PgPool,
}

impl ModuleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ModuleRepositoryTrait for ModuleRepository {
    async fn get_by_key(&self, module_key: &str) -> Result<Option<Module>> {
        let module = sqlx::query_as::<_, Module>(&format!(
            "SELECT {MODULE_COLUMNS} FROM notification_modules WHERE module_key = $1"
        ))
        .bind(module_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(module)
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Module>> {
        let module = sqlx::query_as::<_, Module>(&format!(
            "SELECT {MODULE_COLUMNS} FROM notification_modules WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(module)
    }

    async fn list_all(&self) -> Result<Vec<Module>> {
        let modules = sqlx::query_as::<_, Module>(&format!(
            "SELECT {MODULE_COLUMNS} FROM notification_modules ORDER BY id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(modules)
    }

    async fn create(&self, module: &NewModule) -> Result<Module> {
        let created = sqlx::query_as::<_, Module>(&format!(
            r#"
            INSERT INTO notification_modules
                (module_key, module_name, category, parent_module_id, is_active)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {MODULE_COLUMNS}
            "#
        ))
        .bind(&module.module_key)
        .bind(&module.module_name)
        .bind(&module.category)
        .bind(module.parent_module_id)
        .bind(module.is_active)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                DispatchError::ModuleAlreadyExists(module.module_key.clone())
            }
            sqlx::Error::Database(ref db) if db.is_foreign_key_violation() => {
                DispatchError::InvalidHierarchy(format!(
                    "父模块不存在: {:?}",
                    module.parent_module_id
                ))
            }
            other => DispatchError::Database(other),
        })?;

        Ok(created)
    }
}
