//! `rust_websocket_utils` 是一个提供 WebSocket 客户端实用功能的 Rust Crate。
//! 它把"可断线重连、可多路订阅"的客户端连接层拆成若干彼此独立的小组件，
//! 供 `PoloCloudPanel` 的会话与注册表使用。
//!
//! 主要模块包括：
//! - `message`: 定义统一的消息信封 `TypedMessage` 以及入站帧的解码规则。
//! - `error`: 定义库中使用的错误类型 `WsError`。
//! - `client`: 传输层抽象与 tokio-tungstenite 实现、调度器、重连策略、消息分发器以及测试替身。

pub mod client;
pub mod error;
pub mod message;

pub use error::WsError;
pub use message::TypedMessage;
