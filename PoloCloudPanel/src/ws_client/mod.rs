// PoloCloudPanel/src/ws_client/mod.rs

//! 面板的 WebSocket 连接层。
//!
//! - `session`: 单条逻辑连接的状态机（握手、心跳、重连、分发）。
//! - `registry`: 按连接标识共享会话的注册表。
//! - `liveness`: 基于 `alive` 连接的后端连通性指示。
//! - `log_stream`: 服务控制台与全局日志流。

pub mod liveness;
pub mod log_stream;
pub mod registry;
pub mod session;

pub use liveness::{is_unauthenticated_route, BackendLiveness, ALIVE_IDENTITY};
pub use log_stream::{LogStreamTarget, ServiceLogStream};
pub use registry::{ConnectionRegistry, SessionHandle};
pub use session::{SessionConfig, SessionSettings, SocketSession};
