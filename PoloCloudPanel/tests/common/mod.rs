// PoloCloudPanel/tests/common/mod.rs

//! 集成测试共用的装配代码：虚拟时间调度器 + 可编程传输层 + 事件记录。

#![allow(dead_code)]

use async_trait::async_trait;
use log::LevelFilter;
use polocloud_panel::api_client::{ApiError, TokenProvider};
use polocloud_panel::event::SessionEvent;
use polocloud_panel::ws_client::{ConnectionRegistry, SessionSettings, SocketSession};
use rust_websocket_utils::client::testing::{ManualScheduler, MockTransport, MockTransportController};
use rust_websocket_utils::client::{AuthPlacement, ReconnectPolicy, Subscription};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const ALIVE_URL: &str = "ws://127.0.0.1:8080/api/v3/alive";
pub const SCREEN_URL: &str = "ws://127.0.0.1:8080/api/v3/service/lobby-1/screen";

pub fn init_test_logger() {
    let _ = env_logger::builder().filter_level(LevelFilter::Debug).is_test(true).try_init();
}

/// 无抖动、最多重连 3 次的设置，便于精确断言延迟。
pub fn test_settings() -> SessionSettings {
    SessionSettings {
        handshake_timeout: Duration::from_secs(10),
        heartbeat_interval: Duration::from_secs(30),
        pong_timeout: Duration::from_secs(10),
        auth_placement: AuthPlacement::QueryParam,
        policy: ReconnectPolicy {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_jitter: Duration::ZERO,
            max_attempts: 3,
        },
    }
}

pub struct Harness {
    pub registry: ConnectionRegistry,
    pub scheduler: Arc<ManualScheduler>,
    pub controller: MockTransportController,
}

pub fn harness() -> Harness {
    init_test_logger();
    let (transport, controller) = MockTransport::new();
    let scheduler = Arc::new(ManualScheduler::new());
    let registry = ConnectionRegistry::new(Arc::new(transport), scheduler.clone(), test_settings());
    Harness { registry, scheduler, controller }
}

/// 让已派生的任务（握手、读循环）运行到下一个挂起点。
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// 记录会话发布的所有事件。
pub struct EventLog {
    events: Arc<Mutex<Vec<SessionEvent>>>,
    _subscription: Subscription,
}

impl EventLog {
    pub fn attach(session: &SocketSession) -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let subscription = session.on_event(move |event| sink.lock().unwrap().push(event.clone()));
        Self { events, _subscription: subscription }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().iter().map(|e| e.name()).filter(|n| *n != "message").collect()
    }

    /// 所有事件名，包括 `message`。
    pub fn all_names(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().iter().map(|e| e.name()).collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events.lock().unwrap().iter().filter(|e| e.name() == name).count()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn fatal_errors(&self) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, SessionEvent::Error { fatal: true, .. }))
            .count()
    }

    pub fn latencies(&self) -> Vec<Duration> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                SessionEvent::LatencyUpdated(d) => Some(*d),
                _ => None,
            })
            .collect()
    }
}

/// 总是返回同一个令牌，并记录调用次数。
pub struct StaticTokenProvider {
    pub token: String,
    pub calls: AtomicUsize,
}

impl StaticTokenProvider {
    pub fn new(token: &str) -> Self {
        Self { token: token.to_string(), calls: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn fetch_token(&self) -> Result<String, ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.token.clone())
    }
}

/// 总是失败的令牌来源。
pub struct FailingTokenProvider;

#[async_trait]
impl TokenProvider for FailingTokenProvider {
    async fn fetch_token(&self) -> Result<String, ApiError> {
        Err(ApiError::Status { status: 401, body: "login required".to_string() })
    }
}

/// 每次调用返回一个新令牌 (`token-1`、`token-2` ...)；可设置为从第 N+1 次调用起失败。
pub struct SequenceTokenProvider {
    pub calls: AtomicUsize,
    fail_after: Option<usize>,
}

impl SequenceTokenProvider {
    pub fn new() -> Self {
        Self { calls: AtomicUsize::new(0), fail_after: None }
    }

    pub fn failing_after(successes: usize) -> Self {
        Self { calls: AtomicUsize::new(0), fail_after: Some(successes) }
    }
}

#[async_trait]
impl TokenProvider for SequenceTokenProvider {
    async fn fetch_token(&self) -> Result<String, ApiError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        match self.fail_after {
            Some(limit) if n > limit => Err(ApiError::Status { status: 503, body: "unavailable".to_string() }),
            _ => Ok(format!("token-{}", n)),
        }
    }
}
