// PoloCloudPanel/src/ws_client/session.rs

//! 单条逻辑连接的会话。
//!
//! `SocketSession` 包装一条物理连接，负责：打开/关闭生命周期、出站发送、入站帧解码与分发、
//! 心跳延迟测量，以及按 `ReconnectPolicy` 自动重连。
//!
//! 状态机：`Idle → Connecting → Open → (Closing | Reconnecting) → Closed`，另有终止状态 `Failed`。
//!
//! 并发约定：
//! - 所有会话状态保存在一个 `std::sync::Mutex` 中，临界区很短，绝不跨越 `.await`，也不在持锁时调用订阅者回调。
//! - 事件在状态锁内按状态变化的顺序写入发布队列，释放锁后由唯一的发布者依次投递。
//!   订阅者看到的事件顺序因此总是与状态变化顺序一致；回调中再调用会话方法产生的事件排在队尾。
//! - 每次握手都会开启一个新的 epoch。所有异步延续（令牌刷新、握手结果、读循环、定时器）都携带启动时的 epoch，
//!   若 epoch 或状态已不匹配则直接丢弃，因此 `disconnect()` 之后不会再有任何事件。

use crate::api_client::TokenProvider;
use crate::event::SessionEvent;
use common_models::ws_payloads::{PingPayload, PongPayload, PING_MESSAGE_TYPE, PONG_MESSAGE_TYPE};
use common_models::ConnectionState;
use log::{debug, error, info, warn};
use rust_websocket_utils::client::scheduler::lock_or_recover;
use rust_websocket_utils::client::{
    AuthPlacement, ConnectRequest, ListenerSet, MessageDispatcher, ReconnectPolicy, Scheduler, Subscription,
    TimerId, Transport, TransportEvent, TransportLink,
};
use rust_websocket_utils::{TypedMessage, WsError};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

/// 会话的时间参数与重连策略。同一注册表中的所有会话共用一份。
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub handshake_timeout: Duration,
    pub heartbeat_interval: Duration,
    /// 发送 ping 后等待 pong 的窗口，超时视为连接异常断开。
    pub pong_timeout: Duration,
    pub auth_placement: AuthPlacement,
    pub policy: ReconnectPolicy,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10), // 握手超时
            heartbeat_interval: Duration::from_secs(30), // 心跳间隔
            pong_timeout: Duration::from_secs(10), // Pong 超时
            auth_placement: AuthPlacement::default(),
            policy: ReconnectPolicy::default(),
        }
    }
}

/// 获取一条连接时提供的目标地址与可选令牌。
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub url: String,
    pub auth_token: Option<String>,
}

impl SessionConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), auth_token: None }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }
}

struct PendingPing {
    sent_at: Instant,
    timeout: TimerId,
}

struct SessionInner {
    url: String,
    auth_token: Option<String>,
    /// 当前令牌尚未被任何一次握手使用过。
    token_fresh: bool,
    token_provider: Option<Arc<dyn TokenProvider>>,
    state: ConnectionState,
    epoch: u64,
    /// 连续失败次数；每次成功打开后归零。
    attempts: u32,
    latency: Option<Duration>,
    outbound: Option<mpsc::UnboundedSender<String>>,
    pending_pings: HashMap<String, PendingPing>,
    handshake_timer: Option<TimerId>,
    heartbeat_timer: Option<TimerId>,
    reconnect_timer: Option<TimerId>,
    io_task: Option<AbortHandle>,
    /// 已不再是注册表中该标识的会话（被替换或被销毁），不允许再次连接。
    retired: bool,
}

/// 一次握手需要的全部信息；`refresh` 为 `Some` 时先获取新令牌。
struct OpenPlan {
    epoch: u64,
    request: ConnectRequest,
    refresh: Option<Arc<dyn TokenProvider>>,
}

/// 释放锁之后要执行的副作用。
#[derive(Default)]
struct Effects {
    cancelled: Vec<TimerId>,
    aborted: Option<AbortHandle>,
    open: Option<OpenPlan>,
    reconnect: Option<(u64, Duration)>,
}

#[derive(Default)]
struct EventQueue {
    pending: VecDeque<SessionEvent>,
    draining: bool,
}

pub struct SocketSession {
    identity: String,
    settings: SessionSettings,
    transport: Arc<dyn Transport>,
    scheduler: Arc<dyn Scheduler>,
    dispatcher: MessageDispatcher,
    listeners: ListenerSet<SessionEvent>,
    inner: Mutex<SessionInner>,
    // 锁顺序: inner → events
    events: Mutex<EventQueue>,
    weak_self: Weak<SocketSession>,
}

impl fmt::Debug for SocketSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketSession")
            .field("identity", &self.identity)
            .field("state", &self.state())
            .finish()
    }
}

impl SocketSession {
    /// 创建一个处于 `Idle` 的会话。会话只有在调用 `connect()` 后才会打开传输层。
    ///
    /// 通常由 [`ConnectionRegistry::acquire`](crate::ws_client::ConnectionRegistry::acquire) 创建，
    /// 直接构造的会话不受注册表"每个标识一个会话"的约束。
    ///
    /// # Arguments
    /// * `identity`: 连接标识，仅用于日志与注册表查找。
    /// * `config`: 目标 URL 与初始令牌。
    /// * `settings`: 超时、心跳与重连参数。
    /// * `transport`: 打开物理连接的传输层。
    /// * `scheduler`: 所有定时器都通过它申请。
    ///
    /// # Returns
    /// * `Arc<SocketSession>` - 会话内部的异步任务只持有弱引用，最后一个 `Arc` 释放后任务自动失效。
    pub fn new(
        identity: impl Into<String>,
        config: SessionConfig,
        settings: SessionSettings,
        transport: Arc<dyn Transport>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Arc<Self> {
        let identity = identity.into();
        debug!("[会话 {}] 创建会话，目标 URL: {}", identity, config.url);
        Arc::new_cyclic(|weak| SocketSession {
            identity,
            settings,
            transport,
            scheduler,
            dispatcher: MessageDispatcher::new(),
            listeners: ListenerSet::new(),
            inner: Mutex::new(SessionInner {
                url: config.url,
                token_fresh: config.auth_token.is_some(),
                auth_token: config.auth_token,
                token_provider: None,
                state: ConnectionState::Idle,
                epoch: 0,
                attempts: 0,
                latency: None,
                outbound: None,
                pending_pings: HashMap::new(),
                handshake_timer: None,
                heartbeat_timer: None,
                reconnect_timer: None,
                io_task: None,
                retired: false,
            }),
            events: Mutex::new(EventQueue::default()),
            weak_self: weak.clone(),
        })
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn url(&self) -> String {
        lock_or_recover(&self.inner).url.clone()
    }

    pub fn state(&self) -> ConnectionState {
        lock_or_recover(&self.inner).state
    }

    /// 当前连续失败次数。
    pub fn attempts(&self) -> u32 {
        lock_or_recover(&self.inner).attempts
    }

    /// 最近一次测得的往返延迟。
    pub fn latency(&self) -> Option<Duration> {
        lock_or_recover(&self.inner).latency
    }

    pub fn auth_token(&self) -> Option<String> {
        lock_or_recover(&self.inner).auth_token.clone()
    }

    /// 更新令牌，下一次握手时生效，不影响当前已打开的连接。
    ///
    /// 设置的令牌被视为"新鲜"的：下一次握手直接使用它，不会先向令牌来源刷新。
    ///
    /// # Arguments
    /// * `token`: 新令牌；`None` 表示之后的握手不再携带令牌。
    pub fn set_auth_token(&self, token: Option<String>) {
        let mut inner = lock_or_recover(&self.inner);
        inner.token_fresh = token.is_some();
        inner.auth_token = token;
    }

    /// 设置短期令牌的来源。
    ///
    /// 设置后，凡是当前令牌已经被某次握手用过，下一次握手（包括自动重连）之前都会先获取新令牌；
    /// 获取失败按一次失败的连接尝试处理，交给重连策略。
    ///
    /// # Arguments
    /// * `provider`: 令牌来源；`None` 表示一直沿用现有令牌。
    pub fn set_token_provider(&self, provider: Option<Arc<dyn TokenProvider>>) {
        lock_or_recover(&self.inner).token_provider = provider;
    }

    /// 已发送但尚未收到 pong 的 ping 数量。
    pub fn outstanding_pings(&self) -> usize {
        lock_or_recover(&self.inner).pending_pings.len()
    }

    /// 该会话是否已被注册表替换或销毁。
    pub fn is_retired(&self) -> bool {
        lock_or_recover(&self.inner).retired
    }

    /// 开始连接。
    ///
    /// 在 `Idle` 上开始首次连接；在 `Closed`/`Failed` 上开始一次新的连接并清零失败计数；
    /// 会话已处于连接中、已打开或等待重连时什么也不做。必须在 tokio 运行时中调用。
    ///
    /// 已被注册表替换或销毁的会话拒绝连接（只记录一条警告），
    /// 此时应重新 `acquire` 获取该标识当前的会话。
    pub fn connect(&self) {
        let mut fx = Effects::default();
        {
            let mut inner = lock_or_recover(&self.inner);
            if inner.retired {
                warn!(
                    "[会话 {}] 会话已被注册表替换或销毁，忽略 connect()；请重新获取连接。",
                    self.identity
                );
                return;
            }
            match inner.state {
                ConnectionState::Idle => {}
                ConnectionState::Closed | ConnectionState::Failed => {
                    inner.attempts = 0;
                }
                other => {
                    debug!("[会话 {}] connect() 被忽略，当前状态: {}", self.identity, other);
                    return;
                }
            }
            info!("[会话 {}] 开始连接到 {}", self.identity, inner.url);
            self.begin_attempt_locked(&mut inner, &mut fx);
        }
        self.apply(fx);
    }

    /// 主动断开：同步取消所有定时器、关闭传输层并进入 `Closed`。之后不会再发布任何事件。
    ///
    /// `Failed` 与 `Closed` 上调用无效果。
    pub fn disconnect(&self) {
        let mut fx = Effects::default();
        {
            let mut inner = lock_or_recover(&self.inner);
            let previous = inner.state;
            if previous.is_terminal() {
                return;
            }
            inner.epoch += 1;
            self.teardown_locked(&mut inner, &mut fx);
            if previous != ConnectionState::Idle {
                inner.state = ConnectionState::Closing;
                self.queue_event(SessionEvent::StateChanged(ConnectionState::Closing));
            }
            inner.state = ConnectionState::Closed;
            self.queue_event(SessionEvent::StateChanged(ConnectionState::Closed));
            if previous == ConnectionState::Open {
                self.queue_event(SessionEvent::Disconnected { reason: "客户端主动断开".to_string() });
            }
            info!("[会话 {}] 已断开 (之前状态: {})", self.identity, previous);
        }
        self.apply(fx);
    }

    /// 断开、标记为已退役并清除所有订阅。会话被注册表销毁时调用。
    pub fn shutdown(&self) {
        lock_or_recover(&self.inner).retired = true;
        self.disconnect();
        self.dispatcher.clear();
        self.listeners.clear();
        debug!("[会话 {}] 已销毁，订阅已全部清除。", self.identity);
    }

    /// 注册表替换会话前调用：若会话已终止则标记为退役。
    ///
    /// 检查与标记在同一个锁作用域内完成，与并发的 `connect()` 不会交错。
    ///
    /// # Returns
    /// * `bool` - 会话已终止并被标记为退役时返回 `true`；会话仍然存活时返回 `false`，调用方应继续复用它。
    pub(crate) fn retire_if_terminal(&self) -> bool {
        let mut inner = lock_or_recover(&self.inner);
        if inner.state.is_terminal() {
            inner.retired = true;
            true
        } else {
            false
        }
    }

    /// 发送一条消息。只有 `Open` 状态下允许发送。
    ///
    /// # Arguments
    /// * `message`: 要发送的消息，序列化为一个文本帧。
    ///
    /// # Returns
    /// * `Result<(), WsError>` - 消息已交给写任务时返回 `Ok(())`；
    ///   会话未打开返回 `WsError::NotConnected`，写任务已退出返回 `WsError::SendErrorClosed`。
    pub fn send(&self, message: &TypedMessage) -> Result<(), WsError> {
        let frame = message.to_frame()?;
        let inner = lock_or_recover(&self.inner);
        if inner.state != ConnectionState::Open {
            return Err(WsError::NotConnected);
        }
        match &inner.outbound {
            Some(tx) => tx.send(frame).map_err(|_| WsError::SendErrorClosed),
            None => Err(WsError::NotConnected),
        }
    }

    pub fn send_typed<T: Serialize>(&self, message_type: &str, data: &T) -> Result<(), WsError> {
        self.send(&TypedMessage::new(message_type, data)?)
    }

    /// 订阅所有会话事件。
    ///
    /// # Returns
    /// * `Subscription` - 释放（或丢弃）它即取消订阅，不影响其他订阅者与连接本身。
    pub fn on_event<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.listeners.add(None, handler)
    }

    /// 订阅状态变化。回调会立即以当前状态调用一次，之后只接收新的变化。
    pub fn on_state_change<F>(&self, handler: F) -> Subscription
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        let for_events = Arc::clone(&handler);
        let subscription = self.listeners.add(None, move |event: &SessionEvent| {
            if let SessionEvent::StateChanged(state) = event {
                for_events(*state);
            }
        });
        handler(self.state());
        subscription
    }

    /// 订阅某一类型的入站消息。
    ///
    /// # Arguments
    /// * `message_type`: 消息类型，例如 `raw`、`pong`。
    /// * `handler`: 按订阅顺序调用；回调内的 panic 会被捕获并记录，不影响其他订阅者。
    pub fn on_message<F>(&self, message_type: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&TypedMessage) + Send + Sync + 'static,
    {
        self.dispatcher.subscribe(message_type, handler)
    }

    /// 事件入队。调用方必须持有状态锁，保证入队顺序与状态变化顺序一致。
    fn queue_event(&self, event: SessionEvent) {
        lock_or_recover(&self.events).pending.push_back(event);
    }

    /// 依次投递队列中的事件。已有发布者在投递时立即返回，新事件由该发布者继续投递。
    fn drain_events(&self) {
        {
            let mut queue = lock_or_recover(&self.events);
            if queue.draining {
                return;
            }
            queue.draining = true;
        }
        loop {
            let next = {
                let mut queue = lock_or_recover(&self.events);
                match queue.pending.pop_front() {
                    Some(event) => event,
                    None => {
                        queue.draining = false;
                        return;
                    }
                }
            };
            debug!("[会话 {}] 发布事件: {}", self.identity, next.name());
            self.listeners.notify(None, &next);
            if let SessionEvent::Message(message) = &next {
                self.dispatcher.dispatch(message);
            }
        }
    }

    fn begin_attempt_locked(&self, inner: &mut SessionInner, fx: &mut Effects) {
        inner.epoch += 1;
        let epoch = inner.epoch;
        inner.state = ConnectionState::Connecting;

        let weak = self.weak_self.clone();
        inner.handshake_timer = Some(self.scheduler.schedule(
            self.settings.handshake_timeout,
            Box::new(move || {
                if let Some(session) = weak.upgrade() {
                    session.on_handshake_timeout(epoch);
                }
            }),
        ));

        self.queue_event(SessionEvent::StateChanged(ConnectionState::Connecting));
        self.queue_event(SessionEvent::Connecting { attempt: inner.attempts });

        // 用过的令牌不再可信，有令牌来源时先刷新
        let refresh = if inner.token_fresh { None } else { inner.token_provider.clone() };
        inner.token_fresh = false;
        let request = ConnectRequest::new(inner.url.clone())
            .with_token(inner.auth_token.clone(), self.settings.auth_placement);
        fx.open = Some(OpenPlan { epoch, request, refresh });
    }

    fn teardown_locked(&self, inner: &mut SessionInner, fx: &mut Effects) {
        inner.outbound = None;
        fx.cancelled.extend(inner.handshake_timer.take());
        fx.cancelled.extend(inner.heartbeat_timer.take());
        fx.cancelled.extend(inner.reconnect_timer.take());
        fx.cancelled.extend(inner.pending_pings.drain().map(|(_, ping)| ping.timeout));
        fx.aborted = inner.io_task.take();
    }

    fn apply(&self, fx: Effects) {
        for id in fx.cancelled {
            self.scheduler.cancel(id);
        }
        if let Some(task) = fx.aborted {
            task.abort();
        }
        self.drain_events();
        if let Some(plan) = fx.open {
            self.spawn_open(plan);
        }
        if let Some((epoch, delay)) = fx.reconnect {
            self.arm_reconnect(epoch, delay);
        }
    }

    fn spawn_open(&self, plan: OpenPlan) {
        let OpenPlan { epoch, request, refresh } = plan;
        let mut inner = lock_or_recover(&self.inner);
        if inner.epoch != epoch || inner.state != ConnectionState::Connecting {
            debug!("[会话 {}] 握手开始前会话已改变，放弃本次打开。", self.identity);
            return;
        }
        let weak = self.weak_self.clone();
        let transport = Arc::clone(&self.transport);
        let placement = self.settings.auth_placement;
        let task = tokio::spawn(async move {
            let request = match refresh {
                None => request,
                Some(provider) => {
                    let fetched = provider.fetch_token().await;
                    let Some(session) = weak.upgrade() else {
                        return;
                    };
                    match fetched {
                        Ok(token) => {
                            if !session.adopt_refreshed_token(epoch, &token) {
                                return;
                            }
                            request.with_token(Some(token), placement)
                        }
                        Err(e) => {
                            session.on_link_lost(epoch, WsError::TokenRefresh(e.to_string()));
                            return;
                        }
                    }
                }
            };

            let result = transport.open(request).await;
            let Some(session) = weak.upgrade() else {
                return;
            };
            match result {
                Ok(link) => {
                    if let Some(inbound) = session.on_open_success(epoch, link) {
                        drop(session);
                        SocketSession::read_loop(weak, epoch, inbound).await;
                    }
                }
                Err(e) => session.on_link_lost(epoch, e),
            }
        });
        inner.io_task = Some(task.abort_handle());
    }

    /// 保存刷新得到的令牌。返回 `false` 表示本次尝试已过期。
    fn adopt_refreshed_token(&self, epoch: u64, token: &str) -> bool {
        let mut inner = lock_or_recover(&self.inner);
        if inner.epoch != epoch || inner.state != ConnectionState::Connecting {
            debug!("[会话 {}] 令牌刷新完成时尝试已过期，丢弃。", self.identity);
            return false;
        }
        inner.auth_token = Some(token.to_string());
        debug!("[会话 {}] 已刷新令牌。", self.identity);
        true
    }

    fn on_open_success(&self, epoch: u64, link: TransportLink) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        let TransportLink { outbound, inbound } = link;
        let mut fx = Effects::default();
        {
            let mut inner = lock_or_recover(&self.inner);
            if inner.epoch != epoch || inner.state != ConnectionState::Connecting {
                debug!("[会话 {}] 丢弃过期的握手结果 (epoch {})。", self.identity, epoch);
                return None;
            }
            fx.cancelled.extend(inner.handshake_timer.take());
            inner.state = ConnectionState::Open;
            inner.attempts = 0;
            inner.outbound = Some(outbound);
            inner.heartbeat_timer = Some(self.arm_heartbeat(epoch));
            self.queue_event(SessionEvent::StateChanged(ConnectionState::Open));
            self.queue_event(SessionEvent::Connected);
            info!("[会话 {}] 连接已建立: {}", self.identity, inner.url);
        }
        self.apply(fx);
        Some(inbound)
    }

    async fn read_loop(weak: Weak<SocketSession>, epoch: u64, mut inbound: mpsc::UnboundedReceiver<TransportEvent>) {
        let mut failure = None;
        while let Some(event) = inbound.recv().await {
            let Some(session) = weak.upgrade() else {
                return;
            };
            match event {
                TransportEvent::Frame(text) => {
                    if !session.on_frame(epoch, &text) {
                        return;
                    }
                }
                TransportEvent::Error(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        if let Some(session) = weak.upgrade() {
            session.on_link_lost(epoch, failure.unwrap_or(WsError::ConnectionClosed));
        }
    }

    /// 处理一个入站帧。返回 `false` 表示本 epoch 已结束，读循环应退出。
    fn on_frame(&self, epoch: u64, text: &str) -> bool {
        let message = match TypedMessage::decode_frame(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("[会话 {}] 丢弃格式错误的帧: {}", self.identity, e);
                return true;
            }
        };
        let mut fx = Effects::default();
        {
            let mut inner = lock_or_recover(&self.inner);
            if inner.epoch != epoch || inner.state != ConnectionState::Open {
                return false;
            }
            if message.is_type(PONG_MESSAGE_TYPE) {
                self.record_pong_locked(&mut inner, &message, &mut fx);
            }
            // 消息与状态事件走同一个队列，分发顺序与状态变化一致
            self.queue_event(SessionEvent::Message(message));
        }
        self.apply(fx);
        true
    }

    /// pong 按 id 与 ping 配对；没有 id 的 pong 匹配最早的未决 ping。每个 ping 只计算一次延迟。
    fn record_pong_locked(&self, inner: &mut SessionInner, message: &TypedMessage, fx: &mut Effects) {
        let key = match message.deserialize_data::<PongPayload>() {
            Ok(pong) => Some(pong.id),
            Err(_) => inner
                .pending_pings
                .iter()
                .min_by_key(|(_, ping)| ping.sent_at)
                .map(|(id, _)| id.clone()),
        };
        match key.and_then(|id| inner.pending_pings.remove(&id)) {
            Some(ping) => {
                let rtt = self.scheduler.now().saturating_duration_since(ping.sent_at);
                inner.latency = Some(rtt);
                fx.cancelled.push(ping.timeout);
                self.queue_event(SessionEvent::LatencyUpdated(rtt));
                debug!("[会话 {}] 心跳往返延迟: {:?}", self.identity, rtt);
            }
            None => debug!("[会话 {}] 收到无法配对的 pong (可能是重复响应)，已忽略。", self.identity),
        }
    }

    fn arm_heartbeat(&self, epoch: u64) -> TimerId {
        let weak = self.weak_self.clone();
        self.scheduler.schedule(
            self.settings.heartbeat_interval,
            Box::new(move || {
                if let Some(session) = weak.upgrade() {
                    session.on_heartbeat(epoch);
                }
            }),
        )
    }

    fn on_heartbeat(&self, epoch: u64) {
        let lost = {
            let mut inner = lock_or_recover(&self.inner);
            if inner.epoch != epoch || inner.state != ConnectionState::Open {
                return;
            }
            inner.heartbeat_timer = None;
            let ping = PingPayload::new();
            match TypedMessage::new(PING_MESSAGE_TYPE, &ping).and_then(|m| m.to_frame()) {
                Err(e) => {
                    error!("[会话 {}] 构造 ping 消息失败: {}", self.identity, e);
                    inner.heartbeat_timer = Some(self.arm_heartbeat(epoch));
                    None
                }
                Ok(frame) => {
                    let sent = inner.outbound.as_ref().is_some_and(|tx| tx.send(frame).is_ok());
                    if sent {
                        let weak = self.weak_self.clone();
                        let id = ping.id.clone();
                        let timeout = self.scheduler.schedule(
                            self.settings.pong_timeout,
                            Box::new(move || {
                                if let Some(session) = weak.upgrade() {
                                    session.on_pong_timeout(epoch, &id);
                                }
                            }),
                        );
                        let sent_at = self.scheduler.now();
                        inner.pending_pings.insert(ping.id, PendingPing { sent_at, timeout });
                        inner.heartbeat_timer = Some(self.arm_heartbeat(epoch));
                        None
                    } else {
                        Some(WsError::SendErrorClosed)
                    }
                }
            }
        };
        if let Some(e) = lost {
            self.on_link_lost(epoch, e);
        }
    }

    fn on_pong_timeout(&self, epoch: u64, ping_id: &str) {
        {
            let mut inner = lock_or_recover(&self.inner);
            if inner.epoch != epoch || inner.state != ConnectionState::Open {
                return;
            }
            if inner.pending_pings.remove(ping_id).is_none() {
                return;
            }
        }
        let window = self.settings.pong_timeout.as_millis() as u64;
        warn!("[会话 {}] {} 毫秒内未收到 pong，视为连接断开。", self.identity, window);
        self.on_link_lost(epoch, WsError::PongTimeout(window));
    }

    fn on_handshake_timeout(&self, epoch: u64) {
        self.on_link_lost(epoch, WsError::ConnectionTimeout);
    }

    /// 握手失败、令牌刷新失败、握手超时或已打开的连接意外断开。
    ///
    /// 可重试的错误：依次发布 `Disconnected`（仅当连接曾经打开）、非致命 `Error`、状态变化；
    /// 重试次数用尽时进入 `Failed` 并额外发布一个致命错误。
    /// 不可重试的错误（例如 URL 无效）直接进入 `Failed`，以致命 `Error` 发布该错误本身。
    fn on_link_lost(&self, epoch: u64, error: WsError) {
        let mut fx = Effects::default();
        {
            let mut inner = lock_or_recover(&self.inner);
            if inner.epoch != epoch || !matches!(inner.state, ConnectionState::Connecting | ConnectionState::Open) {
                debug!("[会话 {}] 忽略过期的连接错误: {}", self.identity, error);
                return;
            }
            let was_open = inner.state == ConnectionState::Open;
            self.teardown_locked(&mut inner, &mut fx);
            inner.attempts = inner.attempts.saturating_add(1);
            let reason = error.to_string();
            if was_open {
                self.queue_event(SessionEvent::Disconnected { reason: reason.clone() });
            }

            if !error.is_retryable() {
                inner.state = ConnectionState::Failed;
                self.queue_event(SessionEvent::StateChanged(ConnectionState::Failed));
                self.queue_event(SessionEvent::Error { error: Arc::new(error), fatal: true });
                error!("[会话 {}] 遇到不可重试的错误，放弃连接: {}", self.identity, reason);
            } else {
                self.queue_event(SessionEvent::Error { error: Arc::new(error), fatal: false });
                match self.settings.policy.next_delay(inner.attempts - 1) {
                    Some(delay) => {
                        inner.state = ConnectionState::Reconnecting;
                        self.queue_event(SessionEvent::StateChanged(ConnectionState::Reconnecting));
                        fx.reconnect = Some((epoch, delay));
                        warn!(
                            "[会话 {}] 连接中断 ({})，{:?} 后进行第 {} 次重连。",
                            self.identity, reason, delay, inner.attempts
                        );
                    }
                    None => {
                        inner.state = ConnectionState::Failed;
                        self.queue_event(SessionEvent::StateChanged(ConnectionState::Failed));
                        self.queue_event(SessionEvent::Error {
                            error: Arc::new(WsError::ReconnectExhausted {
                                attempts: inner.attempts,
                                last_error: reason,
                            }),
                            fatal: true,
                        });
                        error!(
                            "[会话 {}] 已连续失败 {} 次，放弃重连。",
                            self.identity, inner.attempts
                        );
                    }
                }
            }
        }
        self.apply(fx);
    }

    fn arm_reconnect(&self, epoch: u64, delay: Duration) {
        let mut inner = lock_or_recover(&self.inner);
        if inner.epoch != epoch || inner.state != ConnectionState::Reconnecting || inner.reconnect_timer.is_some() {
            return;
        }
        let weak = self.weak_self.clone();
        inner.reconnect_timer = Some(self.scheduler.schedule(
            delay,
            Box::new(move || {
                if let Some(session) = weak.upgrade() {
                    session.on_reconnect_due(epoch);
                }
            }),
        ));
    }

    fn on_reconnect_due(&self, epoch: u64) {
        let mut fx = Effects::default();
        {
            let mut inner = lock_or_recover(&self.inner);
            if inner.epoch != epoch || inner.state != ConnectionState::Reconnecting {
                return;
            }
            inner.reconnect_timer = None;
            self.begin_attempt_locked(&mut inner, &mut fx);
        }
        self.apply(fx);
    }
}
