// rust_websocket_utils/src/error.rs

//! 定义 WebSocket 工具库相关的错误类型。

use thiserror::Error;

/// WebSocket 工具库的统一错误类型。
///
/// 可重试的错误（见 [`WsError::is_retryable`]）由会话的重连策略在本地恢复，只会以非致命的 "error" 事件形式出现；
/// 重试次数用尽（`ReconnectExhausted`）或遇到不可重试的错误（例如 `InvalidUrl`）时会话进入终止状态 `Failed`。
#[derive(Error, Debug)]
pub enum WsError {
    /// 当 serde 序列化失败时返回。
    #[error("序列化错误: {0}")]
    SerializationError(String),

    /// 当 serde 反序列化失败时返回（例如收到格式错误的帧）。
    #[error("反序列化错误: {0}")]
    DeserializationError(String),

    /// WebSocket 协议相关的错误，例如握手失败、连接被重置等。
    #[error("WebSocket协议错误: {0}")]
    WebSocketProtocolError(#[from] tokio_tungstenite::tungstenite::Error),

    /// 底层 I/O 错误。
    #[error("I/O错误: {0}")]
    IoError(#[from] std::io::Error),

    /// 当尝试发送消息到一个已关闭的通道时发生。
    #[error("发送错误: 通道已关闭")]
    SendErrorClosed,

    /// 传输层连接建立失败（非协议层原因，例如测试替身拒绝了握手）。
    #[error("连接失败: {0}")]
    ConnectionFailed(String),

    /// 连接被对端关闭（未携带错误）。
    #[error("连接已被对端关闭")]
    ConnectionClosed,

    /// 握手超时。
    #[error("连接超时")]
    ConnectionTimeout,

    /// 在规定窗口内没有收到心跳响应。
    #[error("心跳超时: {0} 毫秒内未收到 pong")]
    PongTimeout(u64),

    /// 重连前刷新短期令牌失败。
    #[error("令牌刷新失败: {0}")]
    TokenRefresh(String),

    /// 无效的 URL 格式。
    #[error("无效的URL: {0}")]
    InvalidUrl(String),

    /// 未连接错误，当尝试在未建立连接时进行操作。
    #[error("未连接")]
    NotConnected,

    /// 重连次数已用尽，会话进入 `Failed`。
    #[error("重连失败: 已尝试 {attempts} 次, 最后一次错误: {last_error}")]
    ReconnectExhausted { attempts: u32, last_error: String },

    /// 同一连接标识被以不同的 URL 请求。
    #[error("连接 '{identity}' 已使用 URL '{existing}'，拒绝以 '{requested}' 重新获取")]
    ConfigMismatch {
        identity: String,
        existing: String,
        requested: String,
    },

    /// 注册表已经关闭，不再接受新的 `acquire`。
    #[error("连接注册表已关闭")]
    RegistryShutdown,

    /// 通用消息错误，用于其他未明确分类的错误。
    #[error("消息错误: {0}")]
    Message(String),
}

impl WsError {
    /// 此错误是否由传输层引起（可通过重连恢复）。
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            WsError::WebSocketProtocolError(_)
                | WsError::IoError(_)
                | WsError::ConnectionFailed(_)
                | WsError::ConnectionClosed
                | WsError::ConnectionTimeout
                | WsError::PongTimeout(_)
                | WsError::SendErrorClosed
        )
    }

    /// 会话遇到此错误后是否值得按退避策略重试。
    ///
    /// # Returns
    /// * `bool` - 传输层错误与令牌刷新失败（令牌端点可能暂时不可用）返回 `true`；
    ///   其余错误（URL 无效、协议外的本地错误等）重试也不会成功，返回 `false`。
    pub fn is_retryable(&self) -> bool {
        self.is_transport() || matches!(self, WsError::TokenRefresh(_))
    }
}
