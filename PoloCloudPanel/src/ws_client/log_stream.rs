// PoloCloudPanel/src/ws_client/log_stream.rs

//! 日志流。
//!
//! 服务控制台 (`/api/v3/service/{name}/screen`) 与全局日志 (`/api/v3/logs`) 都以 `raw` 消息推送日志行。
//! 打开连接前必须先获取一个短期令牌；令牌获取失败时不会打开传输层。

use crate::api_client::TokenProvider;
use crate::config::BackendConfig;
use crate::event::SessionEvent;
use crate::ws_client::registry::{ConnectionRegistry, SessionHandle};
use crate::ws_client::session::SessionConfig;
use common_models::ws_payloads::RAW_MESSAGE_TYPE;
use common_models::ConnectionState;
use log::{error, info, warn};
use rust_websocket_utils::client::scheduler::lock_or_recover;
use rust_websocket_utils::client::Subscription;
use rust_websocket_utils::TypedMessage;
use std::sync::{Arc, Mutex};

/// 日志来源。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogStreamTarget {
    /// 整个集群的日志。
    Global,
    /// 某个服务的控制台输出。
    ServiceScreen(String),
}

impl LogStreamTarget {
    /// 连接标识：`logs` 或 `service-screen:<name>`。
    pub fn identity(&self) -> String {
        match self {
            LogStreamTarget::Global => "logs".to_string(),
            LogStreamTarget::ServiceScreen(name) => format!("service-screen:{}", name),
        }
    }

    pub fn url(&self, backend: &BackendConfig) -> anyhow::Result<String> {
        match self {
            LogStreamTarget::Global => backend.logs_ws_url(),
            LogStreamTarget::ServiceScreen(name) => backend.service_screen_ws_url(name),
        }
    }
}

struct ActiveStream {
    subscription: Option<Subscription>,
    handle: SessionHandle,
}

pub struct ServiceLogStream {
    target: LogStreamTarget,
    url: String,
    registry: ConnectionRegistry,
    token_provider: Arc<dyn TokenProvider>,
    active: Mutex<Option<ActiveStream>>,
}

impl ServiceLogStream {
    pub fn new(
        target: LogStreamTarget,
        url: impl Into<String>,
        registry: ConnectionRegistry,
        token_provider: Arc<dyn TokenProvider>,
    ) -> Self {
        Self {
            target,
            url: url.into(),
            registry,
            token_provider,
            active: Mutex::new(None),
        }
    }

    pub fn target(&self) -> &LogStreamTarget {
        &self.target
    }

    /// 获取令牌并打开日志流，每一行日志都交给 `sink`。
    ///
    /// 再次调用会先注销上一次的 `sink`，之后的日志行只交给新的 `sink`。
    /// 令牌来源同时交给会话：自动重连之前会重新获取令牌，过期的短期令牌不会被重复使用。
    ///
    /// # Arguments
    /// * `sink`: 接收每一行日志的回调。
    ///
    /// # Returns
    /// * `bool` - 已发起连接时返回 `true`；获取连接或令牌失败时返回 `false`，
    ///   此时不发起握手，会话保持 `Idle`。
    pub async fn connect<F>(&self, sink: F) -> bool
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let identity = self.target.identity();
        let handle = match self.registry.acquire(&identity, SessionConfig::new(self.url.clone())) {
            Ok(handle) => handle,
            Err(e) => {
                error!("[日志流 {}] 获取连接失败: {}", identity, e);
                return false;
            }
        };
        // 先注销旧的 sink，避免同一行日志交给两个 sink；新句柄已持有引用，会话不会因此被销毁
        let previous = lock_or_recover(&self.active).take();
        drop(previous);

        let token = match self.token_provider.fetch_token().await {
            Ok(token) => token,
            Err(e) => {
                warn!("[日志流 {}] 获取令牌失败，不打开连接: {}", identity, e);
                self.replace_active(ActiveStream { subscription: None, handle });
                return false;
            }
        };

        handle.set_token_provider(Some(Arc::clone(&self.token_provider)));
        handle.set_auth_token(Some(token));
        let subscription = handle.on_message(RAW_MESSAGE_TYPE, move |message: &TypedMessage| {
            match message.as_raw_text() {
                Some(line) => sink(line),
                None => sink(&message.data.to_string()),
            }
        });
        handle.connect();
        info!("[日志流 {}] 已开始接收日志。", identity);
        self.replace_active(ActiveStream { subscription: Some(subscription), handle });
        true
    }

    fn replace_active(&self, next: ActiveStream) {
        let previous = lock_or_recover(&self.active).replace(next);
        drop(previous);
    }

    /// 停止接收日志并释放连接。
    pub fn disconnect(&self) {
        let previous = lock_or_recover(&self.active).take();
        if let Some(ActiveStream { subscription, handle }) = previous {
            drop(subscription);
            handle.release();
            info!("[日志流 {}] 已停止。", self.target.identity());
        }
    }

    /// 订阅底层会话的事件；尚未获取连接时返回 `None`。
    pub fn on_event<F>(&self, handler: F) -> Option<Subscription>
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        lock_or_recover(&self.active)
            .as_ref()
            .map(|active| active.handle.on_event(handler))
    }

    pub fn state(&self) -> ConnectionState {
        lock_or_recover(&self.active)
            .as_ref()
            .map_or(ConnectionState::Idle, |active| active.handle.state())
    }

    pub fn is_streaming(&self) -> bool {
        lock_or_recover(&self.active)
            .as_ref()
            .is_some_and(|active| active.subscription.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_identity_and_url() {
        let backend = BackendConfig::default();
        let screen = LogStreamTarget::ServiceScreen("lobby-1".into());
        assert_eq!(screen.identity(), "service-screen:lobby-1");
        assert_eq!(
            screen.url(&backend).unwrap(),
            "ws://127.0.0.1:8080/api/v3/service/lobby-1/screen"
        );
        assert_eq!(LogStreamTarget::Global.identity(), "logs");
        assert_eq!(LogStreamTarget::Global.url(&backend).unwrap(), "ws://127.0.0.1:8080/api/v3/logs");
    }
}
