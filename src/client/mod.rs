//! 后端 API 客户端
//! 为每个请求附加访问令牌，在令牌即将过期时先刷新，收到 401 时刷新并重试一次。
//! 任意时刻最多只有一个刷新请求在途，其余请求排队等待同一个结果。

pub mod refresh;

use chrono::Utc;
use reqwest::{Client, Method, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    api::REFRESH_TOKEN_PATH,
    auth::{jwt, TokenStore},
    config::{ApiConfig, SessionConfig},
    error::{AppError, Result},
    models::auth::{RefreshTokenRequest, RefreshTokenResponse},
    realtime::{EventBus, SessionEvent, Severity},
};

use refresh::{RefreshGate, Ticket};

/// 一个待发送的请求
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub id: Uuid,
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    retried: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            retried: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    /// 是否已经因 401 重试过
    pub fn is_retried(&self) -> bool {
        self.retried
    }
}

/// 刷新失败时是否广播会话过期
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expiry {
    Announce,
    Silent,
}

/// 带会话协调的 API 客户端
pub struct ApiClient {
    http: Client,
    base_url: String,
    tokens: TokenStore,
    events: EventBus,
    session: SessionConfig,
    gate: RefreshGate,
}

impl ApiClient {
    pub fn new(
        api: &ApiConfig,
        session: SessionConfig,
        tokens: TokenStore,
        events: EventBus,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(api.timeout_secs))
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: api.base_url.trim_end_matches('/').to_string(),
            tokens,
            events,
            session,
            gate: RefreshGate::new(),
        })
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn is_refreshing(&self) -> bool {
        self.gate.is_refreshing()
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// 发送请求：主动刷新、附加令牌、401 时刷新后重试一次
    pub async fn send(&self, mut request: ApiRequest) -> Result<Response> {
        let mut token = self.bearer_token().await;

        loop {
            let response = self.dispatch(&request, token.as_deref()).await?;
            if response.status() != StatusCode::UNAUTHORIZED {
                return check_status(response).await;
            }

            if request.retried {
                warn!(request_id = %request.id, path = %request.path, "Request rejected again after token refresh");
                return Err(AppError::Unauthorized);
            }

            debug!(request_id = %request.id, path = %request.path, "Received 401, refreshing token before retry");
            request.retried = true;
            metrics::counter!("session_requests_retried_total").increment(1);
            token = Some(self.refresh_access_token().await?);
        }
    }

    async fn dispatch(&self, request: &ApiRequest, token: Option<&str>) -> Result<Response> {
        let mut builder = self
            .http
            .request(request.method.clone(), self.url(&request.path));

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        debug!(
            request_id = %request.id,
            method = %request.method,
            path = %request.path,
            authenticated = token.is_some(),
            retried = request.retried,
            "Sending API request"
        );

        Ok(builder.send().await?)
    }

    /// 发送前读取令牌；即将过期时先刷新（或加入进行中的刷新）。
    /// 主动刷新失败不阻止请求，按刷新后存储中的令牌发送。
    async fn bearer_token(&self) -> Option<String> {
        let token = self.stored_access_token()?;

        if !jwt::is_expiring_soon(&token, self.session.refresh_lookahead(), Utc::now()) {
            return Some(token);
        }

        debug!("Access token expiring soon, refreshing before send");
        if let Err(e) = self.refresh_access_token().await {
            debug!(error = %e, "Proactive refresh failed, sending with stored token");
        }
        self.stored_access_token()
    }

    fn stored_access_token(&self) -> Option<String> {
        match self.tokens.access_token() {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "Failed to read access token");
                None
            }
        }
    }

    /// 刷新访问令牌。已有刷新在途时等待其结果，不会发出第二个刷新请求。
    pub async fn refresh_access_token(&self) -> Result<String> {
        self.refresh(Expiry::Announce).await
    }

    /// 启动恢复时的刷新：失败只清除令牌，不广播会话过期
    pub async fn restore_access_token(&self) -> Result<String> {
        self.refresh(Expiry::Silent).await
    }

    async fn refresh(&self, expiry: Expiry) -> Result<String> {
        match self.gate.join() {
            Ticket::Waiter(receiver) => {
                debug!("Token refresh in flight, waiting for its outcome");
                refresh::wait(receiver).await
            }
            Ticket::Leader => {
                let guard = self.gate.leader_guard();
                let outcome = self.perform_refresh().await;

                match &outcome {
                    Ok(_) => {
                        metrics::counter!("session_refresh_total", "outcome" => "success")
                            .increment(1);
                    }
                    Err(e) => {
                        metrics::counter!("session_refresh_total", "outcome" => "failure")
                            .increment(1);
                        self.expire_session(e, expiry);
                    }
                }

                let waiters = guard.settle(&outcome);
                debug!(waiters, success = outcome.is_ok(), "Token refresh settled");
                outcome
            }
        }
    }

    async fn perform_refresh(&self) -> Result<String> {
        let refresh = self
            .tokens
            .refresh_token()
            .map_err(|e| AppError::RefreshFailure(e.to_string()))?
            .ok_or(AppError::NoRefreshTokenAvailable)?;

        info!("Refreshing access token");

        // 刷新请求不经过 send，避免递归进入刷新逻辑
        let response = self
            .http
            .post(self.url(REFRESH_TOKEN_PATH))
            .json(&RefreshTokenRequest { refresh })
            .send()
            .await
            .map_err(|e| AppError::RefreshFailure(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::RefreshFailure(format!(
                "Refresh rejected with status {}: {}",
                status.as_u16(),
                error_message(&body, status)
            )));
        }

        let tokens: RefreshTokenResponse = response
            .json()
            .await
            .map_err(|e| AppError::RefreshFailure(format!("Invalid refresh response: {}", e)))?;

        self.tokens
            .rotate(&tokens.access, tokens.refresh.as_deref())
            .map_err(|e| AppError::RefreshFailure(e.to_string()))?;

        info!(rotated_refresh = tokens.refresh.is_some(), "Access token refreshed");
        self.events.publish(SessionEvent::TokenRefreshed {
            user: jwt::user_from_token(&tokens.access),
        });

        Ok(tokens.access)
    }

    /// 刷新失败：清除令牌；仅当清除前存在凭据时广播过期并延迟跳转登录页
    fn expire_session(&self, error: &AppError, expiry: Expiry) {
        warn!(error = %error, "Token refresh failed, ending session");

        let had_credentials = match self.tokens.clear_tokens() {
            Ok(had) => had,
            Err(e) => {
                warn!(error = %e, "Failed to clear tokens after refresh failure");
                true
            }
        };
        if !had_credentials || expiry == Expiry::Silent {
            return;
        }

        let message = self.session.expired_message.clone();
        self.events.publish(SessionEvent::SessionExpired {
            message: message.clone(),
        });
        self.events.publish(SessionEvent::Notice {
            message,
            severity: Severity::Warning,
        });

        let events = self.events.clone();
        let delay = self.session.redirect_delay();
        let path = self.session.login_path.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            events.publish(SessionEvent::RedirectToLogin { path });
        });
    }

    /// 不附加令牌、不参与刷新的请求（登录、注册）
    pub async fn post_public<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.http.post(self.url(path)).json(body).send().await?;
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T> {
        let response = self.send(request).await?;
        Ok(response.json().await?)
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send_json(Method::POST, path, body).await
    }

    pub async fn put_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send_json(Method::PUT, path, body).await
    }

    pub async fn patch_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send_json(Method::PATCH, path, body).await
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        self.send(ApiRequest::new(Method::DELETE, path)).await?;
        Ok(())
    }

    async fn send_json<B, T>(&self, method: Method, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = ApiRequest::new(method, path).json(body)?;
        let response = self.send(request).await?;
        Ok(response.json().await?)
    }
}

/// 非 2xx 响应转换为 `AppError::Http`
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = error_message(&body, status);
    debug!(status = status.as_u16(), message = %message, "API request failed");

    Err(AppError::Http {
        status: status.as_u16(),
        message,
    })
}

/// 从错误响应体中提取提示：依次取 `message`、`detail`，否则使用状态码描述
pub fn error_message(body: &str, status: StatusCode) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            ["message", "detail"]
                .iter()
                .find_map(|key| value.get(*key).and_then(|v| v.as_str()).map(str::to_string))
        })
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("Request failed")
                .to_string()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_prefers_message_then_detail() {
        assert_eq!(
            error_message(r#"{"message":"Sai mật khẩu","detail":"x"}"#, StatusCode::BAD_REQUEST),
            "Sai mật khẩu"
        );
        assert_eq!(
            error_message(r#"{"detail":"Not found."}"#, StatusCode::NOT_FOUND),
            "Not found."
        );
        assert_eq!(
            error_message("<html>", StatusCode::INTERNAL_SERVER_ERROR),
            "Internal Server Error"
        );
    }

    #[test]
    fn test_request_builder() {
        let request = ApiRequest::get("/exam/").query("exam_group", 7);
        assert_eq!(request.method, Method::GET);
        assert_eq!(request.query, vec![("exam_group".to_string(), "7".to_string())]);
        assert!(!request.is_retried());
        assert!(request.body.is_none());
    }
}
