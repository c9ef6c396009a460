//! 模块与渠道注册表
//!
//! 分发路径只读：`get_active_channels` 在入队前做快速失败检查，Worker 在执行时再次实时读取。
//! 管理路径（注册模块、增删渠道）在写入前校验层级的完整性。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{info, instrument};

use crate::error::{DispatchError, Result};
use crate::models::{ChannelConfig, Module, ModuleNode, NewChannelConfig, NewModule};
use crate::repository::{ChannelConfigRepositoryTrait, ModuleRepositoryTrait};

/// 校验模块层级：父模块必须存在且不能成环
pub fn validate_hierarchy(modules: &[Module]) -> Result<()> {
    let parents: HashMap<i64, Option<i64>> =
        modules.iter().map(|m| (m.id, m.parent_module_id)).collect();

    for module in modules {
        if let Some(parent_id) = module.parent_module_id {
            if !parents.contains_key(&parent_id) {
                return Err(DispatchError::InvalidHierarchy(format!(
                    "模块 {} 的父模块 {} 不存在",
                    module.module_key, parent_id
                )));
            }
        }
    }

    for module in modules {
        let mut visited = HashSet::new();
        let mut current = Some(module.id);
        while let Some(id) = current {
            if !visited.insert(id) {
                return Err(DispatchError::InvalidHierarchy(format!(
                    "模块 {} 的层级存在环",
                    module.module_key
                )));
            }
            current = parents.get(&id).copied().flatten();
        }
    }

    Ok(())
}

/// 构建"分类 -> 子模块"森林，同层按 id 升序
///
/// 调用前应先通过 `validate_hierarchy`，成环的节点不会出现在结果中
pub fn build_tree(modules: &[Module]) -> Vec<ModuleNode> {
    let mut children: HashMap<Option<i64>, Vec<&Module>> = HashMap::new();
    for module in modules {
        children
            .entry(module.parent_module_id)
            .or_default()
            .push(module);
    }
    for siblings in children.values_mut() {
        siblings.sort_by_key(|m| m.id);
    }

    fn attach(parent: Option<i64>, children: &HashMap<Option<i64>, Vec<&Module>>) -> Vec<ModuleNode> {
        children
            .get(&parent)
            .map(|siblings| {
                siblings
                    .iter()
                    .map(|m| ModuleNode {
                        module: (*m).clone(),
                        children: attach(Some(m.id), children),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    attach(None, &children)
}

/// 模块注册表
pub struct ModuleRegistry {
    modules: Arc<dyn ModuleRepositoryTrait>,
    channels: Arc<dyn ChannelConfigRepositoryTrait>,
}

impl ModuleRegistry {
    pub fn new(
        modules: Arc<dyn ModuleRepositoryTrait>,
        channels: Arc<dyn ChannelConfigRepositoryTrait>,
    ) -> Self {
        Self { modules, channels }
    }

    /// 模块当前启用的渠道，按创建时间倒序；无配置时为空列表
    pub async fn get_active_channels(&self, module_key: &str) -> Result<Vec<ChannelConfig>> {
        self.channels.get_active_channels(module_key).await
    }

    pub async fn get_module(&self, module_key: &str) -> Result<Module> {
        self.modules
            .get_by_key(module_key)
            .await?
            .ok_or_else(|| DispatchError::ModuleNotFound(module_key.to_string()))
    }

    /// 注册模块
    #[instrument(skip(self, module), fields(module_key = %module.module_key))]
    pub async fn register(&self, module: NewModule) -> Result<Module> {
        if module.module_key.trim().is_empty() {
            return Err(DispatchError::InvalidRequest(
                "module_key 不能为空".to_string(),
            ));
        }
        if self.modules.get_by_key(&module.module_key).await?.is_some() {
            return Err(DispatchError::ModuleAlreadyExists(module.module_key));
        }

        let existing = self.modules.list_all().await?;
        validate_hierarchy(&existing)?;

        if let Some(parent_id) = module.parent_module_id {
            if !existing.iter().any(|m| m.id == parent_id) {
                return Err(DispatchError::InvalidHierarchy(format!(
                    "父模块 {} 不存在",
                    parent_id
                )));
            }
        }

        let created = self.modules.create(&module).await?;
        info!(module_id = created.id, "模块已注册");
        Ok(created)
    }

    /// 模块树
    pub async fn tree(&self) -> Result<Vec<ModuleNode>> {
        let modules = self.modules.list_all().await?;
        validate_hierarchy(&modules)?;
        Ok(build_tree(&modules))
    }

    /// 模块存在时返回其启用渠道
    pub async fn module_channels(&self, module_key: &str) -> Result<Vec<ChannelConfig>> {
        self.get_module(module_key).await?;
        self.channels.get_active_channels(module_key).await
    }

    #[instrument(skip(self, config), fields(module_key = %config.module_key))]
    pub async fn add_channel(&self, config: NewChannelConfig) -> Result<ChannelConfig> {
        if config.endpoint_token.trim().is_empty() {
            return Err(DispatchError::InvalidRequest(
                "endpoint_token 不能为空".to_string(),
            ));
        }
        let created = self.channels.create(&config).await?;
        info!(channel_id = created.id, "渠道配置已创建");
        Ok(created)
    }

    pub async fn set_channel_active(&self, channel_id: i64, is_active: bool) -> Result<ChannelConfig> {
        let updated = self.channels.set_active(channel_id, is_active).await?;
        info!(channel_id, is_active, module_key = %updated.module_key, "渠道启用状态已变更");
        Ok(updated)
    }

    pub async fn list_channels(&self, module_key: &str) -> Result<Vec<ChannelConfig>> {
        self.channels.list_by_module(module_key).await
    }
}
