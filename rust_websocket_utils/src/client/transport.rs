// rust_websocket_utils/src/client/transport.rs

//! 客户端 WebSocket 传输层核心逻辑。
//!
//! 上层会话只通过 `Transport::open` 获得一条 `TransportLink`：
//! - `outbound`: 出站文本帧的发送端。丢弃它即请求关闭连接。
//! - `inbound`: 入站事件的接收端。通道结束（`recv()` 返回 `None`）即表示连接已关闭。
//!
//! 这样会话层的状态机与具体的 socket 实现解耦，测试时可以换成 `testing::MockTransport`。

use crate::error::WsError;
use crate::message::truncate;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::client::IntoClientRequest,
    tungstenite::http::{header::AUTHORIZATION, HeaderValue},
    tungstenite::protocol::Message,
    tungstenite::Error as TungsteniteError,
};
use url::Url;

/// 会话令牌在握手中的传递方式。具体约定由后端决定。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthPlacement {
    /// 作为 `token` 查询参数附加到 URL 上（浏览器 WebSocket 唯一可用的方式）。
    #[default]
    QueryParam,
    /// 作为 `Authorization: Bearer <token>` 请求头发送。
    BearerHeader,
}

/// 一次打开连接的请求。
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectRequest {
    pub url: String,
    pub auth_token: Option<String>,
    pub auth_placement: AuthPlacement,
}

impl ConnectRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auth_token: None,
            auth_placement: AuthPlacement::default(),
        }
    }

    pub fn with_token(mut self, token: Option<String>, placement: AuthPlacement) -> Self {
        self.auth_token = token;
        self.auth_placement = placement;
        self
    }

    /// 实际要连接的 URL：校验 scheme，并在 `QueryParam` 模式下附加令牌。
    pub fn effective_url(&self) -> Result<Url, WsError> {
        let mut url = Url::parse(&self.url)
            .map_err(|e| WsError::InvalidUrl(format!("无效的 WebSocket URL '{}': {}", self.url, e)))?;
        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(WsError::InvalidUrl(format!(
                "WebSocket URL '{}' 的协议必须是 ws 或 wss",
                self.url
            )));
        }
        if let (Some(token), AuthPlacement::QueryParam) = (&self.auth_token, self.auth_placement) {
            url.query_pairs_mut().append_pair("token", token);
        }
        Ok(url)
    }
}

/// 传输层上报给会话的入站事件。
#[derive(Debug)]
pub enum TransportEvent {
    /// 一个文本帧。
    Frame(String),
    /// 传输层错误。之后通道会结束。
    Error(WsError),
}

/// 一条已建立的物理连接，以一对通道的形式交给会话。
#[derive(Debug)]
pub struct TransportLink {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

/// 打开物理连接的能力。
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// 完成握手后返回连接；握手失败返回错误。
    async fn open(&self, request: ConnectRequest) -> Result<TransportLink, WsError>;
}

/// 基于 `tokio-tungstenite` 的传输层实现。
///
/// 握手成功后派生两个任务：写任务把 `outbound` 中的文本帧写入 socket，
/// `outbound` 被丢弃时发送 Close 帧；读任务把文本帧转发到 `inbound`，连接结束时关闭该通道。
#[derive(Debug, Default, Clone)]
pub struct TungsteniteTransport;

impl TungsteniteTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for TungsteniteTransport {
    async fn open(&self, request: ConnectRequest) -> Result<TransportLink, WsError> {
        let url = request.effective_url()?;
        info!("客户端：开始尝试连接到 WebSocket 服务器，URL: {}", request.url);

        let mut client_request = url.as_str().into_client_request()?;
        if let (Some(token), AuthPlacement::BearerHeader) = (&request.auth_token, request.auth_placement) {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| WsError::Message(format!("令牌无法作为请求头发送: {}", e)))?;
            client_request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (ws_stream, response) = match connect_async(client_request).await {
            Ok(ok) => ok,
            Err(e) => {
                error!("客户端：连接到 {} 失败，错误: {}", request.url, e);
                return Err(WsError::WebSocketProtocolError(e));
            }
        };
        info!("客户端：已成功连接到 {} (HTTP 状态码: {})", request.url, response.status());
        debug!("客户端：WebSocket 连接响应头: {:?}", response.headers());

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<TransportEvent>();

        // 写任务
        let url_for_writer = request.url.clone();
        tokio::spawn(async move {
            while let Some(text) = outbound_rx.recv().await {
                debug!("客户端：发送文本帧: {}", truncate(&text, 200));
                if let Err(e) = ws_sender.send(Message::Text(text)).await {
                    warn!("客户端：向 {} 写入文本帧失败: {}", url_for_writer, e);
                    return;
                }
            }
            debug!("客户端：出站通道已关闭，正在向 {} 发送 Close 帧。", url_for_writer);
            let _ = ws_sender.close().await;
        });

        // 读任务
        let url_for_reader = request.url;
        tokio::spawn(async move {
            loop {
                let event = match ws_receiver.next().await {
                    Some(Ok(Message::Text(text))) => TransportEvent::Frame(text),
                    Some(Ok(Message::Binary(bin))) => {
                        debug!("客户端：收到非预期的二进制消息，长度: {} 字节，已忽略。", bin.len());
                        continue;
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {
                        // 协议层控制帧由 tungstenite 自行处理
                        continue;
                    }
                    Some(Ok(Message::Close(close_frame))) => {
                        debug!("客户端：收到 Close 控制帧，详细信息: {:?}", close_frame);
                        break;
                    }
                    Some(Err(TungsteniteError::ConnectionClosed)) | Some(Err(TungsteniteError::AlreadyClosed)) | None => {
                        debug!("客户端：与 {} 的 WebSocket 接收流已结束。", url_for_reader);
                        break;
                    }
                    Some(Err(e)) => {
                        error!("客户端：从 {} 接收消息时发生底层错误: {}", url_for_reader, e);
                        let _ = inbound_tx.send(TransportEvent::Error(WsError::WebSocketProtocolError(e)));
                        break;
                    }
                };
                if inbound_tx.send(event).is_err() {
                    debug!("客户端：会话已不再接收 {} 的入站帧，读任务退出。", url_for_reader);
                    break;
                }
            }
        });

        Ok(TransportLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}
