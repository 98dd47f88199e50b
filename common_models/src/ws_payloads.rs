//! 包含 WebSocket 通信中使用的各种 Payload 结构体定义。

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 心跳探测请求的消息类型。由会话定期发送。
pub const PING_MESSAGE_TYPE: &str = "ping";
/// 心跳探测响应的消息类型。后端回送与请求相同的 `id`。
pub const PONG_MESSAGE_TYPE: &str = "pong";
/// 非结构化文本（例如日志行）的消息类型。
pub const RAW_MESSAGE_TYPE: &str = "raw";

/// `ping` 消息的负载。`id` 用于把 `pong` 与对应的 `ping` 配对，从而计算往返延迟。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PingPayload {
    pub id: String,
}

impl PingPayload {
    /// 生成一个带有新 UUID v4 标识的心跳负载。
    pub fn new() -> Self {
        Self { id: Uuid::new_v4().to_string() }
    }
}

impl Default for PingPayload {
    fn default() -> Self {
        Self::new()
    }
}

/// `pong` 消息的负载。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PongPayload {
    pub id: String,
}

/// 令牌端点 `GET /api/v3/auth/token` 的响应体。
/// 令牌是短期凭据，只在打开需要鉴权的会话前获取。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TokenResponse {
    pub token: String,
}
