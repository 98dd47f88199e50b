// PoloCloudPanel/src/event.rs

//! 会话对外发布的事件。
//!
//! 订阅者通过 `SocketSession::on_event` 注册回调；晚到的订阅者只会收到之后发生的事件，
//! 当前状态可以通过 `on_state_change` 立即获得。

use common_models::ConnectionState;
use rust_websocket_utils::{TypedMessage, WsError};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// 生命周期状态发生变化。
    StateChanged(ConnectionState),
    /// 开始一次握手。`attempt` 为此前连续失败的次数，首次连接为 0。
    Connecting { attempt: u32 },
    /// 握手成功，会话进入 `Open`。
    Connected,
    /// 一条已打开的连接断开（主动断开或意外断开）。
    Disconnected { reason: String },
    /// 错误。`fatal` 为 `true` 时会话已进入 `Failed`，不会再自动重连。
    Error { error: Arc<WsError>, fatal: bool },
    /// 收到一条入站消息（在分发给按类型订阅的回调之前发布）。
    Message(TypedMessage),
    /// 一次心跳往返的测量结果。
    LatencyUpdated(Duration),
}

impl SessionEvent {
    /// 事件名，用于日志。
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::StateChanged(_) => "state_changed",
            SessionEvent::Connecting { .. } => "connecting",
            SessionEvent::Connected => "connected",
            SessionEvent::Disconnected { .. } => "disconnected",
            SessionEvent::Error { .. } => "error",
            SessionEvent::Message(_) => "message",
            SessionEvent::LatencyUpdated(_) => "latency_updated",
        }
    }
}
