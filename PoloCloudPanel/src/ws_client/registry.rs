// PoloCloudPanel/src/ws_client/registry.rs

//! 连接注册表。
//!
//! 以连接标识（例如 `alive`、`service-screen:lobby-1`）为键保存会话，保证每个标识最多只有一个存活的会话。
//! 查找与插入在同一个锁作用域内完成，中间没有挂起点，因此并发 `acquire` 同一个新标识
//! 只会创建一个会话、打开一条传输层连接。
//!
//! 会话按引用计数管理：每个 `SessionHandle` 持有一份引用，最后一个句柄释放时会话被销毁。

use crate::ws_client::session::{SessionConfig, SessionSettings, SocketSession};
use log::{debug, info, warn};
use rust_websocket_utils::client::scheduler::lock_or_recover;
use rust_websocket_utils::client::{Scheduler, Transport};
use rust_websocket_utils::WsError;
use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Mutex, Weak};

struct RegistryEntry {
    session: Arc<SocketSession>,
    refs: usize,
}

struct RegistryState {
    sessions: HashMap<String, RegistryEntry>,
    shut_down: bool,
}

struct RegistryInner {
    transport: Arc<dyn Transport>,
    scheduler: Arc<dyn Scheduler>,
    settings: SessionSettings,
    state: Mutex<RegistryState>,
}

/// 面板内所有逻辑连接的上下文对象。克隆得到的是同一个注册表。
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("sessions", &self.session_count())
            .finish()
    }
}

impl ConnectionRegistry {
    /// 创建注册表。
    ///
    /// # Arguments
    /// * `transport`: 所有会话共用的传输层。
    /// * `scheduler`: 所有会话共用的定时器调度器。
    /// * `settings`: 新建会话使用的超时与重连参数。
    pub fn new(transport: Arc<dyn Transport>, scheduler: Arc<dyn Scheduler>, settings: SessionSettings) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                transport,
                scheduler,
                settings,
                state: Mutex::new(RegistryState { sessions: HashMap::new(), shut_down: false }),
            }),
        }
    }

    /// 获取某个标识的会话句柄。
    ///
    /// - 已存在且未终止的会话：URL 相同则返回它的句柄；URL 不同则返回 `ConfigMismatch`。
    ///   令牌不同不算冲突，保留先来者的令牌（令牌通过 `set_auth_token` 显式刷新）。
    /// - 不存在或已终止（`Closed`/`Failed`）：创建新的 `Idle` 会话替换之。被替换的旧会话退役，
    ///   仍持有旧句柄的使用者对它调用 `connect()` 不会再打开连接。
    ///
    /// # Arguments
    /// * `identity`: 连接标识，例如 `alive`、`service-screen:lobby-1`。
    /// * `config`: 目标 URL 与可选令牌；复用已有会话时只用于冲突检查。
    ///
    /// # Returns
    /// * `Result<SessionHandle, WsError>` - 成功时返回持有一份引用的句柄；
    ///   注册表已关闭返回 `WsError::RegistryShutdown`，URL 冲突返回 `WsError::ConfigMismatch`。
    pub fn acquire(&self, identity: &str, config: SessionConfig) -> Result<SessionHandle, WsError> {
        let mut state = lock_or_recover(&self.inner.state);
        if state.shut_down {
            return Err(WsError::RegistryShutdown);
        }

        if let Some(entry) = state.sessions.get_mut(identity) {
            // 终止的会话先退役，旧句柄之后无法再次打开它
            if !entry.session.retire_if_terminal() {
                let existing = entry.session.url();
                if existing != config.url {
                    return Err(WsError::ConfigMismatch {
                        identity: identity.to_string(),
                        existing,
                        requested: config.url,
                    });
                }
                if config.auth_token.is_some() && config.auth_token != entry.session.auth_token() {
                    warn!(
                        "[注册表] 连接 '{}' 已存在，忽略新提供的令牌；请通过 set_auth_token 刷新。",
                        identity
                    );
                }
                entry.refs += 1;
                debug!("[注册表] 复用连接 '{}' (引用数: {})", identity, entry.refs);
                return Ok(self.handle_for(Arc::clone(&entry.session)));
            }
            debug!("[注册表] 连接 '{}' 已终止，将创建新的会话替换。", identity);
        }

        let session = SocketSession::new(
            identity,
            config,
            self.inner.settings.clone(),
            Arc::clone(&self.inner.transport),
            Arc::clone(&self.inner.scheduler),
        );
        state
            .sessions
            .insert(identity.to_string(), RegistryEntry { session: Arc::clone(&session), refs: 1 });
        info!("[注册表] 已创建连接 '{}'", identity);
        Ok(self.handle_for(session))
    }

    fn handle_for(&self, session: Arc<SocketSession>) -> SessionHandle {
        SessionHandle { session, registry: Arc::downgrade(&self.inner) }
    }

    /// 断开并销毁所有会话；之后的 `acquire` 返回 `RegistryShutdown`。
    ///
    /// 会话在注册表锁之外逐个销毁，销毁过程中发布的事件不会与注册表锁交错。
    pub fn shutdown(&self) {
        let drained: Vec<Arc<SocketSession>> = {
            let mut state = lock_or_recover(&self.inner.state);
            state.shut_down = true;
            state.sessions.drain().map(|(_, entry)| entry.session).collect()
        };
        info!("[注册表] 正在关闭，销毁 {} 个会话。", drained.len());
        for session in drained {
            session.shutdown();
        }
    }

    pub fn session_count(&self) -> usize {
        lock_or_recover(&self.inner.state).sessions.len()
    }

    pub fn contains(&self, identity: &str) -> bool {
        lock_or_recover(&self.inner.state).sessions.contains_key(identity)
    }

    /// 某个标识当前的引用数；不存在时为 0。
    pub fn ref_count(&self, identity: &str) -> usize {
        lock_or_recover(&self.inner.state)
            .sessions
            .get(identity)
            .map_or(0, |entry| entry.refs)
    }
}

impl RegistryInner {
    fn release(&self, session: &Arc<SocketSession>) {
        let removed = {
            let mut state = lock_or_recover(&self.state);
            let identity = session.identity();
            match state.sessions.get_mut(identity) {
                // 终止后被替换的旧会话不影响新会话的引用数
                Some(entry) if Arc::ptr_eq(&entry.session, session) => {
                    entry.refs -= 1;
                    if entry.refs == 0 {
                        state.sessions.remove(identity).map(|entry| entry.session)
                    } else {
                        debug!("[注册表] 释放连接 '{}' (剩余引用数: {})", identity, entry.refs);
                        None
                    }
                }
                _ => Some(Arc::clone(session)),
            }
        };
        if let Some(session) = removed {
            info!("[注册表] 连接 '{}' 的最后一个引用已释放，销毁会话。", session.identity());
            session.shutdown();
        }
    }
}

/// 会话句柄。丢弃句柄（或调用 `release()`）即释放一份引用。
pub struct SessionHandle {
    session: Arc<SocketSession>,
    registry: Weak<RegistryInner>,
}

impl SessionHandle {
    /// 显式释放引用，与丢弃句柄等价。最后一个引用释放时会话被断开并从注册表移除。
    pub fn release(self) {}

    /// 两个句柄是否指向同一个会话。
    pub fn same_session(&self, other: &SessionHandle) -> bool {
        Arc::ptr_eq(&self.session, &other.session)
    }

    /// 底层会话。克隆出的 `Arc` 不计入注册表的引用数。
    pub fn session(&self) -> &Arc<SocketSession> {
        &self.session
    }
}

impl Deref for SessionHandle {
    type Target = SocketSession;

    fn deref(&self) -> &SocketSession {
        &self.session
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        match self.registry.upgrade() {
            Some(registry) => registry.release(&self.session),
            None => self.session.shutdown(),
        }
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("identity", &self.session.identity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common_models::ConnectionState;
    use rust_websocket_utils::client::testing::{ManualScheduler, MockTransport};

    fn registry() -> ConnectionRegistry {
        let (transport, _controller) = MockTransport::new();
        ConnectionRegistry::new(Arc::new(transport), Arc::new(ManualScheduler::new()), SessionSettings::default())
    }

    #[test]
    fn test_acquire_same_identity_shares_session_and_counts_refs() {
        let registry = registry();
        let a = registry.acquire("alive", SessionConfig::new("ws://h/api/v3/alive")).unwrap();
        let b = registry.acquire("alive", SessionConfig::new("ws://h/api/v3/alive")).unwrap();
        assert!(a.same_session(&b));
        assert_eq!(registry.ref_count("alive"), 2);

        a.release();
        assert_eq!(registry.ref_count("alive"), 1);
        assert_eq!(b.state(), ConnectionState::Idle, "仍有引用时会话不应被销毁");

        drop(b);
        assert!(!registry.contains("alive"));
    }

    #[test]
    fn test_url_mismatch_is_rejected() {
        let registry = registry();
        let _a = registry.acquire("alive", SessionConfig::new("ws://h/api/v3/alive")).unwrap();
        match registry.acquire("alive", SessionConfig::new("ws://other/api/v3/alive")) {
            Err(WsError::ConfigMismatch { existing, requested, .. }) => {
                assert_eq!(existing, "ws://h/api/v3/alive");
                assert_eq!(requested, "ws://other/api/v3/alive");
            }
            other => panic!("预期 ConfigMismatch，实际: {:?}", other),
        }
        assert_eq!(registry.ref_count("alive"), 1);
    }

    #[test]
    /// 令牌不同不是冲突，先来者的令牌保留。
    fn test_first_writer_token_wins() {
        let registry = registry();
        let a = registry
            .acquire("logs", SessionConfig::new("ws://h/api/v3/logs").with_token("first"))
            .unwrap();
        let b = registry
            .acquire("logs", SessionConfig::new("ws://h/api/v3/logs").with_token("second"))
            .unwrap();
        assert!(a.same_session(&b));
        assert_eq!(b.auth_token().as_deref(), Some("first"));
    }

    #[test]
    /// 已终止的会话被替换；旧句柄释放不影响新会话的引用数。
    fn test_terminal_session_is_replaced() {
        let registry = registry();
        let old = registry.acquire("alive", SessionConfig::new("ws://h/api/v3/alive")).unwrap();
        old.disconnect();
        assert_eq!(old.state(), ConnectionState::Closed);

        let fresh = registry.acquire("alive", SessionConfig::new("ws://other/api/v3/alive")).unwrap();
        assert!(!old.same_session(&fresh));
        assert_eq!(fresh.state(), ConnectionState::Idle);

        drop(old);
        assert_eq!(registry.ref_count("alive"), 1);
        assert_eq!(fresh.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    /// 被替换的旧会话退役：旧句柄上的 connect() 不会再发起握手。
    async fn test_replaced_session_refuses_to_reconnect() {
        let (transport, controller) = MockTransport::new();
        let registry =
            ConnectionRegistry::new(Arc::new(transport), Arc::new(ManualScheduler::new()), SessionSettings::default());
        let old = registry.acquire("alive", SessionConfig::new("ws://h/api/v3/alive")).unwrap();
        old.disconnect();
        assert!(!old.is_retired(), "仍是注册表中的会话时不应退役");

        let fresh = registry.acquire("alive", SessionConfig::new("ws://h/api/v3/alive")).unwrap();
        assert!(old.is_retired());
        assert!(!fresh.is_retired());

        old.connect();
        assert_eq!(old.state(), ConnectionState::Closed);
        tokio::task::yield_now().await;
        assert_eq!(controller.attempt_count(), 0);
    }

    #[test]
    fn test_released_session_is_retired() {
        let registry = registry();
        let handle = registry.acquire("alive", SessionConfig::new("ws://h/api/v3/alive")).unwrap();
        let session = Arc::clone(handle.session());
        drop(handle);
        assert!(session.is_retired());
        assert_eq!(session.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_shutdown_closes_sessions_and_rejects_acquire() {
        let registry = registry();
        let handle = registry.acquire("alive", SessionConfig::new("ws://h/api/v3/alive")).unwrap();
        registry.shutdown();
        assert_eq!(handle.state(), ConnectionState::Closed);
        assert_eq!(registry.session_count(), 0);
        assert!(matches!(
            registry.acquire("alive", SessionConfig::new("ws://h/api/v3/alive")),
            Err(WsError::RegistryShutdown)
        ));
        // 关闭后释放句柄不会 panic
        drop(handle);
    }
}
