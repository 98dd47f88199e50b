// PoloCloudPanel/src/config.rs

//! 面板连接层配置管理模块。
//!
//! 配置保存在工作目录下的 `panel_settings.json` 中，也可以通过环境变量
//! `POLOCLOUD_PANEL_CONFIG` 指定另一个文件。文件缺失或内容无效时使用默认配置，
//! 启动流程不会因此失败。
//!
//! 除了加载之外，本模块还负责根据后端地址拼出所有 REST 与 WebSocket 端点：
//! `{ws|wss}://{host}:{port}{basePath}/api/v3/...`，`http` 对应 `ws`，`https` 对应 `wss`。

use anyhow::{bail, Context, Result};
use log::{info, warn};
use rust_websocket_utils::client::{AuthPlacement, ReconnectPolicy};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ws_client::session::SessionSettings;

/// 默认配置文件名。
pub const CONFIG_FILE_NAME: &str = "panel_settings.json";
/// 指定配置文件路径的环境变量。
pub const CONFIG_PATH_ENV: &str = "POLOCLOUD_PANEL_CONFIG";

pub const DEFAULT_BACKEND_HOST: &str = "127.0.0.1";
pub const DEFAULT_BACKEND_PORT: u16 = 8080;

/// 心跳发送间隔，单位：毫秒。
const HEARTBEAT_INTERVAL_MS: u64 = 30_000;
/// 等待 Pong 回复的超时时间，单位：毫秒。应小于心跳间隔。
const PONG_TIMEOUT_MS: u64 = 10_000;
/// 握手超时，单位：毫秒。
const HANDSHAKE_TIMEOUT_MS: u64 = 10_000;

/// 面板配置，对应配置文件的完整内容。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PanelConfig {
    pub backend: BackendConfig,
    pub websocket: WsClientConfig,
}

/// 管理后端的地址。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BackendConfig {
    /// `http` 或 `https`。
    pub protocol: String,
    pub host: String,
    pub port: u16,
    /// 反向代理下的路径前缀，例如 `/polocloud`；为空表示根路径。
    pub base_path: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: DEFAULT_BACKEND_HOST.to_string(),
            port: DEFAULT_BACKEND_PORT,
            base_path: String::new(),
        }
    }
}

/// WebSocket 会话相关的时间参数。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WsClientConfig {
    pub handshake_timeout_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub pong_timeout_ms: u64,
    pub auth_placement: AuthPlacement,
    pub reconnect: ReconnectConfig,
}

impl Default for WsClientConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: HANDSHAKE_TIMEOUT_MS,
            heartbeat_interval_ms: HEARTBEAT_INTERVAL_MS,
            pong_timeout_ms: PONG_TIMEOUT_MS,
            auth_placement: AuthPlacement::default(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        let policy = ReconnectPolicy::default();
        Self {
            base_delay_ms: policy.base_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            jitter_ms: policy.max_jitter.as_millis() as u64,
            max_attempts: policy.max_attempts,
        }
    }
}

impl ReconnectConfig {
    pub fn to_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            max_jitter: Duration::from_millis(self.jitter_ms),
            max_attempts: self.max_attempts,
        }
    }
}

impl BackendConfig {
    fn normalized_base_path(&self) -> String {
        let trimmed = self.base_path.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            String::new()
        } else if trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{}", trimmed)
        }
    }

    fn ws_scheme(&self) -> Result<&'static str> {
        match self.protocol.to_ascii_lowercase().as_str() {
            "http" => Ok("ws"),
            "https" => Ok("wss"),
            other => bail!("不支持的后端协议 '{}'，只允许 http 或 https", other),
        }
    }

    /// `{protocol}://{host}:{port}{basePath}`
    pub fn http_base_url(&self) -> String {
        format!(
            "{}://{}:{}{}",
            self.protocol.to_ascii_lowercase(),
            self.host,
            self.port,
            self.normalized_base_path()
        )
    }

    fn ws_url(&self, api_path: &str) -> Result<String> {
        Ok(format!(
            "{}://{}:{}{}/api/v3/{}",
            self.ws_scheme()?,
            self.host,
            self.port,
            self.normalized_base_path(),
            api_path
        ))
    }

    pub fn alive_ws_url(&self) -> Result<String> {
        self.ws_url("alive")
    }

    pub fn logs_ws_url(&self) -> Result<String> {
        self.ws_url("logs")
    }

    /// 服务名作为一个路径段编码，避免特殊字符改变 URL 结构。
    pub fn service_screen_ws_url(&self, service_name: &str) -> Result<String> {
        let mut url = url::Url::parse(&self.ws_url("service")?)
            .with_context(|| format!("无法解析后端地址 {}", self.http_base_url()))?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("后端地址不能作为路径前缀"))?
            .push(service_name)
            .push("screen");
        Ok(url.to_string())
    }

    pub fn alive_http_url(&self) -> String {
        format!("{}/api/v3/alive", self.http_base_url())
    }

    pub fn token_http_url(&self) -> String {
        format!("{}/api/v3/auth/token", self.http_base_url())
    }
}

impl WsClientConfig {
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            pong_timeout: Duration::from_millis(self.pong_timeout_ms),
            auth_placement: self.auth_placement,
            policy: self.reconnect.to_policy(),
        }
    }
}

impl PanelConfig {
    /// 从指定文件读取配置。
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("读取配置文件 '{}' 失败", path.display()))?;
        let config: PanelConfig = serde_json::from_str(&content)
            .with_context(|| format!("解析配置文件 '{}' 的内容失败", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// 保存为格式化的 JSON。父目录不存在时会被创建。
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("创建配置目录 '{}' 失败", parent.display()))?;
            }
        }
        let content = serde_json::to_string_pretty(self).context("序列化面板配置失败")?;
        fs::write(path, content).with_context(|| format!("写入配置文件 '{}' 失败", path.display()))?;
        info!("[配置] 面板配置已保存至: '{}'", path.display());
        Ok(())
    }

    /// 加载配置；文件不存在或无效时退回默认配置。
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            info!("[配置] 配置文件 '{}' 未找到，使用默认配置。", path.display());
            return Self::default();
        }
        match Self::load_from(path) {
            Ok(config) => {
                info!("[配置] 已从 '{}' 加载面板配置。", path.display());
                config
            }
            Err(e) => {
                warn!("[配置] {:#}，使用默认配置。", e);
                Self::default()
            }
        }
    }

    /// 检查后端协议，并确认心跳参数合理（pong 超时应小于心跳间隔）。
    pub fn validate(&self) -> Result<()> {
        self.backend.ws_scheme()?;
        if self.websocket.heartbeat_interval_ms == 0 {
            bail!("heartbeat_interval_ms 必须大于 0");
        }
        if self.websocket.pong_timeout_ms >= self.websocket.heartbeat_interval_ms {
            warn!(
                "[配置] pong 超时 ({} ms) 不小于心跳间隔 ({} ms)，下一次心跳前可能无法检测到超时。",
                self.websocket.pong_timeout_ms, self.websocket.heartbeat_interval_ms
            );
        }
        Ok(())
    }
}

/// 配置文件路径：环境变量优先，否则为工作目录下的 `panel_settings.json`。
pub fn config_path() -> PathBuf {
    std::env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME))
}

/// 按 `config_path()` 加载配置。
pub fn load_panel_config() -> PanelConfig {
    PanelConfig::load_or_default(&config_path())
}
