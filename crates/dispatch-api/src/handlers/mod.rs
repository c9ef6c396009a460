//! HTTP 请求处理器

pub mod dispatch;
pub mod modules;
pub mod stats;
