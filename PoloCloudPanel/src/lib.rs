//! PoloCloud 面板实时连接层的库入口。
//!
//! `main.rs` 中的二进制只是这些模块的一个薄封装；集成测试直接使用本库。

pub mod api_client; // 令牌端点与存活探测
pub mod config;     // 面板配置加载与端点地址
pub mod event;      // 会话事件定义
pub mod state;      // 共享状态 (PanelState)
pub mod ws_client;  // WebSocket 会话、注册表与适配器
