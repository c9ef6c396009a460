//! 通知模块实体
//!
//! 模块通过 parent_module_id 组成"分类 -> 子模块"的层级

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 通知模块，标识一类可通知的业务事件（如 order_completed）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Module {
    pub id: i64,
    /// 全局唯一的模块标识
    pub module_key: String,
    pub module_name: String,
    /// 分组标签
    pub category: String,
    #[sqlx(default)]
    pub parent_module_id: Option<i64>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 新建模块参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewModule {
    pub module_key: String,
    pub module_name: String,
    pub category: String,
    pub parent_module_id: Option<i64>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

impl NewModule {
    pub fn new(module_key: impl Into<String>, module_name: impl Into<String>) -> Self {
        Self {
            module_key: module_key.into(),
            module_name: module_name.into(),
            category: String::new(),
            parent_module_id: None,
            is_active: true,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_parent(mut self, parent_module_id: i64) -> Self {
        self.parent_module_id = Some(parent_module_id);
        self
    }
}

/// 模块树节点
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleNode {
    #[serde(flatten)]
    pub module: Module,
    pub children: Vec<ModuleNode>,
}
