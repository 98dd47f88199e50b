// rust_websocket_utils/src/client/testing.rs

//! 测试替身。
//!
//! - `ManualScheduler`: 虚拟时间调度器。时间只在调用 `advance` 时前进，到期的定时器按到期时间顺序执行。
//! - `MockTransport`: 可编程的传输层。每次 `open` 都会作为一个待决的 `MockAttempt` 交给测试，
//!   由测试决定握手成功 (`accept`) 还是失败 (`reject`)；成功后测试通过 `MockPeer` 扮演后端。

use crate::client::scheduler::{lock_or_recover, Scheduler, TimerId, TimerTask};
use crate::client::transport::{ConnectRequest, Transport, TransportEvent, TransportLink};
use crate::error::WsError;
use crate::message::TypedMessage;
use async_trait::async_trait;
use log::debug;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};

struct ManualTimer {
    id: u64,
    due: Duration,
    task: TimerTask,
}

struct ManualState {
    elapsed: Duration,
    next_id: u64,
    timers: Vec<ManualTimer>,
}

/// 虚拟时间调度器。
pub struct ManualScheduler {
    origin: Instant,
    state: Mutex<ManualState>,
}

impl Default for ManualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            state: Mutex::new(ManualState { elapsed: Duration::ZERO, next_id: 0, timers: Vec::new() }),
        }
    }

    /// 自创建以来经过的虚拟时间。
    pub fn elapsed(&self) -> Duration {
        lock_or_recover(&self.state).elapsed
    }

    /// 把虚拟时间推进 `by`，依次执行期间到期的定时器。
    ///
    /// 定时器按 (到期时间, 安排顺序) 执行；执行时虚拟时钟停在该定时器的到期时刻。
    /// 执行过程中新安排且在窗口内到期的定时器同样会被执行。返回执行的定时器数量。
    pub fn advance(&self, by: Duration) -> usize {
        let target = lock_or_recover(&self.state).elapsed + by;
        let mut fired = 0;
        loop {
            let task = {
                let mut state = lock_or_recover(&self.state);
                let next = state
                    .timers
                    .iter()
                    .enumerate()
                    .filter(|(_, t)| t.due <= target)
                    .min_by_key(|(_, t)| (t.due, t.id))
                    .map(|(index, _)| index);
                match next {
                    Some(index) => {
                        let timer = state.timers.remove(index);
                        if timer.due > state.elapsed {
                            state.elapsed = timer.due;
                        }
                        timer.task
                    }
                    None => {
                        state.elapsed = target;
                        break;
                    }
                }
            };
            // 任务在锁外执行，允许其再次调用 schedule/cancel
            task();
            fired += 1;
        }
        fired
    }

    /// 尚未执行也未取消的定时器数量。
    pub fn pending_count(&self) -> usize {
        lock_or_recover(&self.state).timers.len()
    }

    /// 每个待执行定时器距当前虚拟时间的剩余延迟，按到期顺序排列。
    pub fn pending_delays(&self) -> Vec<Duration> {
        let state = lock_or_recover(&self.state);
        let mut timers: Vec<(Duration, u64)> = state.timers.iter().map(|t| (t.due, t.id)).collect();
        timers.sort();
        timers.into_iter().map(|(due, _)| due.saturating_sub(state.elapsed)).collect()
    }
}

impl Scheduler for ManualScheduler {
    fn now(&self) -> Instant {
        self.origin + lock_or_recover(&self.state).elapsed
    }

    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerId {
        let mut state = lock_or_recover(&self.state);
        let id = state.next_id;
        state.next_id += 1;
        let due = state.elapsed + delay;
        state.timers.push(ManualTimer { id, due, task });
        TimerId(id)
    }

    fn cancel(&self, id: TimerId) {
        lock_or_recover(&self.state).timers.retain(|t| t.id != id.0);
    }
}

/// 一次待决的打开请求。丢弃它等同于以 `ConnectionFailed` 拒绝。
pub struct MockAttempt {
    pub request: ConnectRequest,
    responder: oneshot::Sender<Result<TransportLink, WsError>>,
}

impl MockAttempt {
    /// 完成握手，返回扮演后端的一端。
    pub fn accept(self) -> MockPeer {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<TransportEvent>();
        let link = TransportLink { outbound: outbound_tx, inbound: inbound_rx };
        if self.responder.send(Ok(link)).is_err() {
            debug!("[MockTransport] 打开请求在握手完成前已被放弃: {}", self.request.url);
        }
        MockPeer {
            request: self.request,
            inbound: Some(inbound_tx),
            sent: outbound_rx,
            buffered: VecDeque::new(),
        }
    }

    /// 以给定错误拒绝握手。
    pub fn reject(self, error: WsError) {
        let _ = self.responder.send(Err(error));
    }
}

/// 连接建立后由测试扮演的后端。
pub struct MockPeer {
    pub request: ConnectRequest,
    inbound: Option<mpsc::UnboundedSender<TransportEvent>>,
    sent: mpsc::UnboundedReceiver<String>,
    buffered: VecDeque<String>,
}

impl MockPeer {
    /// 推送一个入站文本帧。连接已断开时返回 `false`。
    pub fn send_frame(&self, frame: impl Into<String>) -> bool {
        match &self.inbound {
            Some(tx) => tx.send(TransportEvent::Frame(frame.into())).is_ok(),
            None => false,
        }
    }

    pub fn send_message(&self, message: &TypedMessage) -> bool {
        match message.to_frame() {
            Ok(frame) => self.send_frame(frame),
            Err(_) => false,
        }
    }

    /// 上报一个传输层错误并断开连接。
    pub fn fail(&mut self, error: WsError) {
        if let Some(tx) = self.inbound.take() {
            let _ = tx.send(TransportEvent::Error(error));
        }
    }

    /// 由后端一侧关闭连接。
    pub fn close(&mut self) {
        self.inbound = None;
    }

    /// 等待客户端发出的下一个文本帧；客户端关闭出站通道后返回 `None`。
    pub async fn next_sent(&mut self) -> Option<String> {
        if let Some(frame) = self.buffered.pop_front() {
            return Some(frame);
        }
        self.sent.recv().await
    }

    /// 不等待地取出客户端已发出的所有帧。
    pub fn drain_sent(&mut self) -> Vec<String> {
        let mut frames: Vec<String> = self.buffered.drain(..).collect();
        while let Ok(frame) = self.sent.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// 客户端是否已经丢弃了出站通道（即请求关闭连接）。已发出但未取走的帧会被保留。
    pub fn client_closed(&mut self) -> bool {
        loop {
            match self.sent.try_recv() {
                Ok(frame) => self.buffered.push_back(frame),
                Err(mpsc::error::TryRecvError::Empty) => return false,
                Err(mpsc::error::TryRecvError::Disconnected) => return true,
            }
        }
    }
}

/// 可编程的传输层，与 `MockTransportController` 成对创建。
#[derive(Clone)]
pub struct MockTransport {
    attempts: mpsc::UnboundedSender<MockAttempt>,
    opened: Arc<AtomicUsize>,
}

/// 测试一侧的控制器：观察并决定每一次打开请求。
pub struct MockTransportController {
    attempts: mpsc::UnboundedReceiver<MockAttempt>,
    opened: Arc<AtomicUsize>,
}

impl MockTransport {
    pub fn new() -> (MockTransport, MockTransportController) {
        let (tx, rx) = mpsc::unbounded_channel();
        let opened = Arc::new(AtomicUsize::new(0));
        (
            MockTransport { attempts: tx, opened: Arc::clone(&opened) },
            MockTransportController { attempts: rx, opened },
        )
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, request: ConnectRequest) -> Result<TransportLink, WsError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let (responder, decision) = oneshot::channel();
        if self.attempts.send(MockAttempt { request, responder }).is_err() {
            return Err(WsError::ConnectionFailed("MockTransport 控制器已被丢弃".to_string()));
        }
        match decision.await {
            Ok(result) => result,
            Err(_) => Err(WsError::ConnectionFailed("打开请求未被处理".to_string())),
        }
    }
}

impl MockTransportController {
    /// 等待下一次打开请求。
    pub async fn next_attempt(&mut self) -> Option<MockAttempt> {
        self.attempts.recv().await
    }

    pub fn try_next_attempt(&mut self) -> Option<MockAttempt> {
        self.attempts.try_recv().ok()
    }

    /// 至今发起过的打开请求总数。
    pub fn attempt_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}
