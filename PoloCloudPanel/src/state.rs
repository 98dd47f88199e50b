// PoloCloudPanel/src/state.rs

//! 面板的共享状态。
//!
//! `PanelState` 在启动时创建一次，持有配置、连接注册表与令牌来源，
//! 所有适配器（连通性指示、日志流）都从这里构造，共用同一个注册表。

use crate::api_client::{HttpTokenProvider, TokenProvider};
use crate::config::PanelConfig;
use crate::ws_client::{BackendLiveness, ConnectionRegistry, LogStreamTarget, ServiceLogStream};
use anyhow::{Context, Result};
use log::info;
use rust_websocket_utils::client::{Scheduler, TokioScheduler, Transport, TungsteniteTransport};
use std::sync::Arc;

pub struct PanelState {
    config: PanelConfig,
    registry: ConnectionRegistry,
    token_provider: Arc<dyn TokenProvider>,
    liveness: Arc<BackendLiveness>,
}

impl PanelState {
    /// 使用 tokio-tungstenite 传输层、tokio 定时器与 HTTP 令牌端点创建状态。
    pub fn new(config: PanelConfig, http: reqwest::Client) -> Result<Self> {
        let token_provider = Arc::new(HttpTokenProvider::new(http, config.backend.token_http_url()));
        Self::with_parts(
            config,
            Arc::new(TungsteniteTransport::new()),
            Arc::new(TokioScheduler::new()),
            token_provider,
        )
    }

    /// 使用指定的传输层、调度器与令牌来源创建状态。
    pub fn with_parts(
        config: PanelConfig,
        transport: Arc<dyn Transport>,
        scheduler: Arc<dyn Scheduler>,
        token_provider: Arc<dyn TokenProvider>,
    ) -> Result<Self> {
        config.validate().context("面板配置无效")?;
        let registry = ConnectionRegistry::new(transport, scheduler, config.websocket.session_settings());
        let alive_url = config.backend.alive_ws_url().context("无法构造 alive 连接地址")?;
        let liveness = Arc::new(BackendLiveness::new(registry.clone(), alive_url));
        info!("[状态] 面板状态已初始化，后端: {}", config.backend.http_base_url());
        Ok(Self { config, registry, token_provider, liveness })
    }

    pub fn config(&self) -> &PanelConfig {
        &self.config
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn liveness(&self) -> Arc<BackendLiveness> {
        Arc::clone(&self.liveness)
    }

    pub fn log_stream(&self, target: LogStreamTarget) -> Result<ServiceLogStream> {
        let url = target.url(&self.config.backend)?;
        Ok(ServiceLogStream::new(target, url, self.registry.clone(), Arc::clone(&self.token_provider)))
    }

    pub fn service_log_stream(&self, service_name: &str) -> Result<ServiceLogStream> {
        self.log_stream(LogStreamTarget::ServiceScreen(service_name.to_string()))
    }

    /// 停止连通性指示并关闭所有连接。
    pub fn shutdown(&self) {
        self.liveness.stop();
        self.registry.shutdown();
        info!("[状态] 所有连接已关闭。");
    }
}
