//! 通知分发 HTTP 服务
//!
//! 为事件生产方提供分发入口，并提供队列与模块配置的只读查询。
//!
//! ## 模块结构
//!
//! - `dto`: 请求和响应的数据传输对象
//! - `error`: 错误类型定义
//! - `handlers`: HTTP 请求处理器
//! - `routes`: 路由配置
//! - `state`: 应用状态

pub mod dto;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use dto::{ApiResponse, ChannelView, ChatId, DispatchRequest};
pub use error::{ApiError, Result};
pub use state::AppState;
