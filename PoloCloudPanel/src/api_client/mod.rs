// PoloCloudPanel/src/api_client/mod.rs

//! 与管理后端 REST 接口交互的客户端。
//!
//! 连接层只依赖两个端点：
//! - `GET /api/v3/auth/token`：获取打开日志流之前需要的短期令牌；
//! - `GET /api/v3/alive`：连接配置页面的存活探测。

pub mod service;

pub use service::{probe_backend_alive, ApiError, HttpTokenProvider, TokenProvider};
