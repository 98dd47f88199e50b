// PoloCloudPanel/src/ws_client/liveness.rs

//! 后端连通性指示。
//!
//! 使用共享的 `alive` 连接，把会话状态折算为 `LivenessStatus`（连接中 / 已连接 / 已断开）。
//! 是否连接由当前路由决定：登录页与引导页（及其子路径）上不建立连接，并释放已有连接。

use crate::ws_client::registry::{ConnectionRegistry, SessionHandle};
use crate::ws_client::session::SessionConfig;
use common_models::LivenessStatus;
use log::{debug, error, info};
use rust_websocket_utils::client::scheduler::lock_or_recover;
use rust_websocket_utils::client::Subscription;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// 连通性指示使用的连接标识。
pub const ALIVE_IDENTITY: &str = "alive";

const UNAUTHENTICATED_ROUTES: [&str; 2] = ["/login", "/onboarding"];

/// 路由是否属于无需登录的页面。查询串与片段不参与判断。
pub fn is_unauthenticated_route(route: &str) -> bool {
    let path = route.split(['?', '#']).next().unwrap_or_default();
    let path = path.trim_end_matches('/');
    UNAUTHENTICATED_ROUTES
        .iter()
        .any(|prefix| path == *prefix || path.starts_with(&format!("{}/", prefix)))
}

struct ActiveLiveness {
    // 先注销订阅，再释放会话
    _subscription: Subscription,
    handle: SessionHandle,
}

pub struct BackendLiveness {
    registry: ConnectionRegistry,
    url: String,
    active: Mutex<Option<ActiveLiveness>>,
    status: Arc<watch::Sender<LivenessStatus>>,
}

impl BackendLiveness {
    pub fn new(registry: ConnectionRegistry, url: impl Into<String>) -> Self {
        let (status, _) = watch::channel(LivenessStatus::Disconnected);
        Self {
            registry,
            url: url.into(),
            active: Mutex::new(None),
            status: Arc::new(status),
        }
    }

    /// 路由变化时调用。
    ///
    /// # Arguments
    /// * `route`: 当前页面路由，例如 `/dashboard`、`/login?next=/`。
    ///   无需登录的页面释放连接；其他页面获取并连接 `alive`，已终止的会话会被重新获取。
    pub fn sync_route(&self, route: &str) {
        if is_unauthenticated_route(route) {
            let released = lock_or_recover(&self.active).take();
            if released.is_some() {
                info!("[连通性] 进入无需登录的页面 '{}'，释放 alive 连接。", route);
            }
            drop(released);
            self.status.send_replace(LivenessStatus::Disconnected);
            return;
        }

        let mut active = lock_or_recover(&self.active);
        if let Some(existing) = active.as_ref() {
            if !existing.handle.state().is_terminal() {
                // 已持有存活的连接：Idle 时发起连接，其余状态下 connect() 无效果
                existing.handle.connect();
                return;
            }
            // 会话已终止：放弃旧会话，重新向注册表获取
            info!("[连通性] alive 连接已终止，重新获取连接。");
            drop(active.take());
        }
        let handle = match self.registry.acquire(ALIVE_IDENTITY, SessionConfig::new(self.url.clone())) {
            Ok(handle) => handle,
            Err(e) => {
                error!("[连通性] 获取 alive 连接失败: {}", e);
                self.status.send_replace(LivenessStatus::Disconnected);
                return;
            }
        };
        let status = Arc::clone(&self.status);
        let subscription = handle.on_state_change(move |state| {
            let next = LivenessStatus::from(state);
            if *status.borrow() != next {
                debug!("[连通性] 状态变为 {:?}", next);
            }
            status.send_replace(next);
        });
        handle.connect();
        *active = Some(ActiveLiveness { _subscription: subscription, handle });
    }

    /// 释放连接（例如注销登录时）。
    pub fn stop(&self) {
        drop(lock_or_recover(&self.active).take());
        self.status.send_replace(LivenessStatus::Disconnected);
    }

    pub fn status(&self) -> LivenessStatus {
        *self.status.borrow()
    }

    pub fn connected(&self) -> bool {
        self.status() == LivenessStatus::Connected
    }

    pub fn connecting(&self) -> bool {
        self.status() == LivenessStatus::Connecting
    }

    /// 订阅状态变化，适合驱动界面上的指示灯。
    pub fn subscribe_status(&self) -> watch::Receiver<LivenessStatus> {
        self.status.subscribe()
    }
}
