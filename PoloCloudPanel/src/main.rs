// PoloCloudPanel/src/main.rs

use anyhow::{Context, Result};
use log::{error, info, warn, LevelFilter};
use polocloud_panel::api_client::probe_backend_alive;
use polocloud_panel::config::load_panel_config;
use polocloud_panel::event::SessionEvent;
use polocloud_panel::state::PanelState;
use std::time::Duration;

/// 面板连接层的命令行入口。
///
/// ## 主要职责：
/// 1. 初始化日志系统 (`env_logger`)。
/// 2. 加载配置并探测后端是否存活。
/// 3. 启动连通性指示；若命令行给出了服务名，则跟随该服务的控制台输出。
/// 4. 收到 Ctrl+C 后关闭所有连接。
#[tokio::main]
async fn main() -> Result<()> {
    // 默认级别为 Info，本应用与工具库的日志级别设置为 Debug
    env_logger::Builder::new()
        .filter_level(LevelFilter::Info)
        .filter_module("polocloud_panel", LevelFilter::Debug)
        .filter_module("rust_websocket_utils", LevelFilter::Debug)
        .format_timestamp_millis()
        .parse_default_env()
        .try_init()
        .context("初始化 env_logger 日志服务失败")?;

    info!("PoloCloud 面板连接层正在启动...");

    let config = load_panel_config();
    let http = reqwest::Client::new();
    match probe_backend_alive(&http, &config.backend.alive_http_url(), Duration::from_secs(5)).await {
        Ok(true) => info!("后端 {} 可用。", config.backend.http_base_url()),
        Ok(false) => warn!("后端 {} 返回了非成功状态码。", config.backend.http_base_url()),
        Err(e) => warn!("无法访问后端 {}: {}", config.backend.http_base_url(), e),
    }

    let state = PanelState::new(config, http)?;
    let liveness = state.liveness();
    let mut status = liveness.subscribe_status();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = *status.borrow_and_update();
            info!("后端连通性: {:?}", current);
        }
    });
    liveness.sync_route("/dashboard");

    let log_stream = match std::env::args().nth(1) {
        Some(service) => {
            let stream = state.service_log_stream(&service)?;
            if stream.connect(|line| info!("[screen] {}", line)).await {
                info!("正在跟随服务 '{}' 的控制台输出。", service);
            } else {
                warn!("无法打开服务 '{}' 的控制台。", service);
            }
            let events = stream.on_event(|event| {
                if let SessionEvent::Error { error, fatal } = event {
                    if *fatal {
                        error!("日志流已放弃重连: {}", error);
                    } else {
                        warn!("日志流连接错误: {}", error);
                    }
                }
            });
            Some((events, stream))
        }
        None => None,
    };

    tokio::signal::ctrl_c().await.context("等待 Ctrl+C 信号失败")?;
    info!("收到退出信号，正在关闭连接...");
    drop(log_stream);
    state.shutdown();
    Ok(())
}
