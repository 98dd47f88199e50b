//! 通用枚举模块。
//!
//! 本模块定义了在 PoloCloud 面板连接层多个组件之间共享的通用枚举类型。
//! 这些枚举为会话生命周期与连接指示器提供类型安全、一致的表示。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 一个 Socket 会话的生命周期状态。
///
/// 合法的迁移路径：`Idle → Connecting → Open → (Closing | Reconnecting) → Closed`，
/// 以及仅在重连次数耗尽后才会进入的终止错误状态 `Failed`。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// 尚无传输层连接。会话创建时的初始状态。
    Idle,
    /// 传输层握手进行中。
    Connecting,
    /// 连接已建立，心跳运行中，允许收发消息。
    Open,
    /// 连接意外断开，已按退避策略安排了下一次重连。
    Reconnecting,
    /// 正在拆除传输层（显式断开时的瞬时状态）。
    Closing,
    /// 已关闭，所有定时器已取消，不会再自动重连。
    Closed,
    /// 重连次数耗尽后的终止错误状态。
    Failed,
}

impl ConnectionState {
    /// 会话是否已处于终止状态 (`Closed` 或 `Failed`)。
    /// 注册表不会把处于终止状态的会话交给新的 `acquire` 调用。
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Failed)
    }

    /// 会话当前是否"活跃"：正在连接、已连接或等待重连。
    /// 对活跃会话再次调用 `connect()` 是一个空操作。
    pub fn is_active(self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Open | ConnectionState::Reconnecting
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// 面板外壳中持久连接指示器所展示的状态。
///
/// 由 `ConnectionState` 派生而来：`Connecting`/`Reconnecting` 视为"连接中"，
/// `Open` 视为"已连接"，其余均视为"未连接"。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessStatus {
    Connecting,
    Connected,
    Disconnected,
}

impl From<ConnectionState> for LivenessStatus {
    fn from(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Open => LivenessStatus::Connected,
            ConnectionState::Connecting | ConnectionState::Reconnecting => LivenessStatus::Connecting,
            _ => LivenessStatus::Disconnected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    /// 终止状态与活跃状态的判定互不重叠。
    fn test_terminal_and_active_states_are_disjoint() {
        let all = [
            ConnectionState::Idle,
            ConnectionState::Connecting,
            ConnectionState::Open,
            ConnectionState::Reconnecting,
            ConnectionState::Closing,
            ConnectionState::Closed,
            ConnectionState::Failed,
        ];
        for state in all {
            assert!(!(state.is_terminal() && state.is_active()), "状态 {} 同时被判定为终止与活跃", state);
        }
        assert!(ConnectionState::Failed.is_terminal());
        assert!(ConnectionState::Closed.is_terminal());
        assert!(!ConnectionState::Idle.is_terminal());
        assert!(ConnectionState::Reconnecting.is_active());
    }

    #[test]
    fn test_liveness_status_derived_from_connection_state() {
        assert_eq!(LivenessStatus::from(ConnectionState::Open), LivenessStatus::Connected);
        assert_eq!(LivenessStatus::from(ConnectionState::Reconnecting), LivenessStatus::Connecting);
        assert_eq!(LivenessStatus::from(ConnectionState::Connecting), LivenessStatus::Connecting);
        assert_eq!(LivenessStatus::from(ConnectionState::Failed), LivenessStatus::Disconnected);
        assert_eq!(LivenessStatus::from(ConnectionState::Idle), LivenessStatus::Disconnected);
    }
}
