//! `common_models` 公共模型库 crate。
//!
//! 本 crate 集中定义了 PoloCloud 面板连接层各个 Rust 组件（`rust_websocket_utils` 工具库、
//! `PoloCloudPanel` 面板连接层）之间共享的核心数据结构和枚举类型。
//!
//! 主要包含以下类型的模型：
//! - **WebSocket 消息负载 (`ws_payloads`)**: 保留消息类型常量 (`ping`/`pong`/`raw`)、
//!   心跳负载以及令牌端点的响应体。
//! - **通用枚举 (`enums`)**: 会话生命周期状态 (`ConnectionState`) 与连接指示器状态 (`LivenessStatus`)。
//!
//! 所有模型都派生 `Serialize`/`Deserialize`/`Debug`/`Clone`，以便在日志、配置和网络通信中统一使用。

pub mod enums;       // 会话状态与连接指示器相关的枚举
pub mod ws_payloads; // WebSocket 通信中使用的各种消息负载结构体

pub use enums::{ConnectionState, LivenessStatus};
