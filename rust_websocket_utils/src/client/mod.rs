// rust_websocket_utils/src/client/mod.rs

//! WebSocket 客户端模块。
//!
//! 主要职责包括：
//! - **传输层抽象** (`transport`): `Transport` trait 以及基于 `tokio-tungstenite` 的实现。
//!   一条物理连接被表示为一对通道 (`TransportLink`)，上层不直接接触 socket。
//! - **定时器能力** (`scheduler`): 重连延迟、心跳、握手超时都经由可注入的 `Scheduler` 安排。
//! - **重连策略** (`reconnect`): 无状态的指数退避 + 抖动计算。
//! - **消息分发** (`dispatcher`): 按消息类型把入站消息路由给订阅者。
//! - **订阅句柄** (`subscription`): 订阅返回的 RAII 释放器。
//! - **测试替身** (`testing`): 虚拟时间调度器与可编程的传输层。

pub mod dispatcher;
pub mod reconnect;
pub mod scheduler;
pub mod subscription;
pub mod testing;
pub mod transport;

pub use dispatcher::{ListenerSet, MessageDispatcher};
pub use reconnect::ReconnectPolicy;
pub use scheduler::{Scheduler, TimerId, TokioScheduler};
pub use subscription::Subscription;
pub use transport::{AuthPlacement, ConnectRequest, Transport, TransportEvent, TransportLink, TungsteniteTransport};
