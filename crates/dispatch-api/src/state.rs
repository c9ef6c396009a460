//! 应用状态定义

use std::sync::Arc;

use notification_dispatch::{Dispatcher, ModuleRegistry, QueueService};

/// Axum 应用共享状态
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub queue: Arc<QueueService>,
    pub registry: Arc<ModuleRegistry>,
}

impl AppState {
    /// 由注册表与队列服务构建分发入口
    pub fn new(registry: Arc<ModuleRegistry>, queue: Arc<QueueService>) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(registry.clone(), queue.clone()));
        Self {
            dispatcher,
            queue,
            registry,
        }
    }
}
