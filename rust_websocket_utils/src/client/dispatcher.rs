// rust_websocket_utils/src/client/dispatcher.rs

//! 消息分发器。
//!
//! 每个会话拥有一个 `MessageDispatcher`，把入站的 `TypedMessage` 按 `type` 字段路由给订阅者：
//! - 同一类型的所有回调按订阅顺序依次执行；没有订阅者的类型静默忽略（兼容后端新增的消息类型）。
//! - 每次回调相互隔离：回调 panic 会在分发边界被捕获并记录，后续回调照常执行。
//! - 格式错误的帧在解码阶段被丢弃并记录，不会传播到传输层。

use crate::client::scheduler::lock_or_recover;
use crate::client::subscription::Subscription;
use crate::message::{truncate, TypedMessage};
use log::{debug, error, warn};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync + 'static>;

struct Entry<E> {
    id: u64,
    topic: Option<String>,
    handler: Handler<E>,
}

struct ListenerTable<E> {
    next_id: u64,
    entries: Vec<Entry<E>>,
}

/// 一组回调。`topic` 为 `None` 的回调接收所有事件，否则只接收同一主题的事件。
pub struct ListenerSet<E> {
    table: Arc<Mutex<ListenerTable<E>>>,
}

impl<E: 'static> Default for ListenerSet<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: 'static> ListenerSet<E> {
    pub fn new() -> Self {
        Self {
            table: Arc::new(Mutex::new(ListenerTable { next_id: 0, entries: Vec::new() })),
        }
    }

    pub fn add<F>(&self, topic: Option<String>, handler: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = {
            let mut table = lock_or_recover(&self.table);
            let id = table.next_id;
            table.next_id += 1;
            table.entries.push(Entry { id, topic, handler: Arc::new(handler) });
            id
        };
        let weak: Weak<Mutex<ListenerTable<E>>> = Arc::downgrade(&self.table);
        Subscription::new(move || {
            if let Some(table) = weak.upgrade() {
                lock_or_recover(&table).entries.retain(|entry| entry.id != id);
            }
        })
    }

    /// 依次调用匹配的回调，返回被调用的回调数量。
    ///
    /// 调用前先对回调列表做快照，因此回调内部可以安全地订阅或注销。
    pub fn notify(&self, topic: Option<&str>, event: &E) -> usize {
        let handlers: Vec<Handler<E>> = {
            let table = lock_or_recover(&self.table);
            table
                .entries
                .iter()
                .filter(|entry| entry.topic.is_none() || entry.topic.as_deref() == topic)
                .map(|entry| Arc::clone(&entry.handler))
                .collect()
        };
        for handler in &handlers {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(event))) {
                error!(
                    "[分发器] 订阅者回调发生 panic (主题: {:?})，已隔离: {}",
                    topic,
                    panic_message(&panic)
                );
            }
        }
        handlers.len()
    }

    pub fn len(&self) -> usize {
        lock_or_recover(&self.table).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        lock_or_recover(&self.table).entries.clear();
    }
}

fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "<非字符串 panic 负载>".to_string()
    }
}

/// 单个会话内的消息分发器。
#[derive(Default)]
pub struct MessageDispatcher {
    listeners: ListenerSet<TypedMessage>,
}

impl MessageDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// 订阅某一类型的消息。
    pub fn subscribe<F>(&self, message_type: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&TypedMessage) + Send + Sync + 'static,
    {
        self.listeners.add(Some(message_type.into()), handler)
    }

    /// 分发一条已解码的消息，返回被调用的回调数量。
    pub fn dispatch(&self, message: &TypedMessage) -> usize {
        let delivered = self.listeners.notify(Some(&message.message_type), message);
        if delivered == 0 {
            debug!("[分发器] 类型为 '{}' 的消息没有订阅者，已忽略。", message.message_type);
        }
        delivered
    }

    /// 解码并分发一个原始文本帧。格式错误的帧被丢弃并记录，返回 `None`。
    pub fn dispatch_frame(&self, frame: &str) -> Option<TypedMessage> {
        match TypedMessage::decode_frame(frame) {
            Ok(message) => {
                self.dispatch(&message);
                Some(message)
            }
            Err(e) => {
                warn!("[分发器] 丢弃格式错误的帧: {} (帧内容: {})", e, truncate(frame, 120));
                None
            }
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn clear(&self) {
        self.listeners.clear();
    }
}
