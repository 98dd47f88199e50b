// PoloCloudPanel/src/api_client/service.rs

use async_trait::async_trait;
use common_models::ws_payloads::TokenResponse;
use log::{debug, warn};
use std::time::Duration;
use thiserror::Error;

/// REST 调用的错误类型。
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP 请求失败: {0}")]
    Http(#[from] reqwest::Error),

    #[error("后端返回非成功状态码 {status}: {body}")]
    Status { status: u16, body: String },

    #[error("令牌响应无效: {0}")]
    InvalidResponse(String),
}

/// 获取短期会话令牌的能力。
#[async_trait]
pub trait TokenProvider: Send + Sync + 'static {
    async fn fetch_token(&self) -> Result<String, ApiError>;
}

/// 通过 `GET /api/v3/auth/token` 获取令牌。
///
/// 面板的 REST 凭据（如果有）以 `Authorization: Bearer` 发送。
#[derive(Debug, Clone)]
pub struct HttpTokenProvider {
    client: reqwest::Client,
    url: String,
    credentials: Option<String>,
}

impl HttpTokenProvider {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self { client, url: url.into(), credentials: None }
    }

    pub fn with_credentials(mut self, credentials: Option<String>) -> Self {
        self.credentials = credentials;
        self
    }
}

#[async_trait]
impl TokenProvider for HttpTokenProvider {
    async fn fetch_token(&self) -> Result<String, ApiError> {
        debug!("[API] 请求会话令牌: {}", self.url);
        let mut request = self.client.get(&self.url);
        if let Some(credentials) = &self.credentials {
            request = request.bearer_auth(credentials);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("[API] 令牌端点返回 {}: {}", status, body);
            return Err(ApiError::Status { status: status.as_u16(), body });
        }
        let token: TokenResponse = response.json().await?;
        if token.token.is_empty() {
            return Err(ApiError::InvalidResponse("令牌为空".to_string()));
        }
        Ok(token.token)
    }
}

/// 探测后端是否存活：2xx 视为存活，其他状态码视为不可用，网络错误原样返回。
pub async fn probe_backend_alive(client: &reqwest::Client, url: &str, timeout: Duration) -> Result<bool, ApiError> {
    let response = client.get(url).timeout(timeout).send().await?;
    let alive = response.status().is_success();
    debug!("[API] 存活探测 {} -> {}", url, response.status());
    Ok(alive)
}
