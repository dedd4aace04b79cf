//! 认证会话：启动恢复、登录、注册、登出
//! 会话快照通过 watch 通道发布；`is_authenticated` 每次变化都会在事件总线上广播。
//! 刷新失败与强制登出通过事件总线到达，由 `start` 启动的监听任务处理。

use chrono::Utc;
use secrecy::{ExposeSecret, Secret};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use tokio::{
    sync::{broadcast::error::RecvError, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use validator::Validate;

use crate::{
    api::auth_api,
    auth::jwt,
    client::ApiClient,
    error::{AppError, Result},
    models::{
        auth::{LoginRequest, RegisterRequest},
        Role, User,
    },
    realtime::{EventBus, SessionEvent, Severity},
};

/// 注册时提交的账户状态
const REGISTER_STATUS: &str = "confirming";

/// 会话阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPhase {
    /// 启动恢复尚未完成
    Booting,
    Anonymous,
    Authenticating,
    Authenticated,
    /// 最近一次登录失败（未认证，`error` 已设置）
    AuthFailed,
}

/// 会话快照
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub phase: AuthPhase,
    pub user: Option<User>,
    pub error: Option<String>,
}

impl Session {
    fn booting() -> Self {
        Self {
            phase: AuthPhase::Booting,
            user: None,
            error: None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.phase == AuthPhase::Authenticated && self.user.is_some()
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.phase, AuthPhase::Booting | AuthPhase::Authenticating)
    }

    pub fn is_teacher(&self) -> bool {
        self.user.as_ref().is_some_and(User::is_teacher)
    }
}

/// 会话状态单元，监听任务与调用方共享
struct SessionCell {
    state: watch::Sender<Session>,
    events: EventBus,
}

impl SessionCell {
    /// 修改会话；认证状态翻转时广播 `AuthStateChanged`
    fn update(&self, f: impl FnOnce(&mut Session)) {
        let mut flipped = None;
        self.state.send_modify(|session| {
            let before = session.is_authenticated();
            f(session);
            let after = session.is_authenticated();
            if before != after {
                flipped = Some(after);
            }
        });

        if let Some(authenticated) = flipped {
            debug!(authenticated, "Authentication state changed");
            self.events
                .publish(SessionEvent::AuthStateChanged { authenticated });
        }
    }

    fn authenticate(&self, user: User) {
        self.update(|session| {
            session.phase = AuthPhase::Authenticated;
            session.user = Some(user);
            session.error = None;
        });
    }

    fn snapshot(&self) -> Session {
        self.state.borrow().clone()
    }

    fn handle_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::SessionExpired { message } => {
                if self.is_settled_anonymous() {
                    return;
                }
                info!("Session expired, signing out");
                self.update(|session| {
                    session.phase = AuthPhase::Anonymous;
                    session.user = None;
                    session.error = Some(message);
                });
            }
            SessionEvent::Logout => {
                if self.is_settled_anonymous() {
                    return;
                }
                info!("Forced logout received");
                self.update(|session| {
                    session.phase = AuthPhase::Anonymous;
                    session.user = None;
                });
            }
            SessionEvent::TokenRefreshed { user: Some(user) } => {
                if self.snapshot().is_authenticated() {
                    debug!(user_id = user.id, "Session user replaced from refreshed token");
                    self.update(|session| session.user = Some(user));
                }
            }
            _ => {}
        }
    }

    fn is_settled_anonymous(&self) -> bool {
        let session = self.state.borrow();
        session.phase == AuthPhase::Anonymous && session.user.is_none()
    }
}

/// 认证会话状态机
pub struct AuthSession {
    client: Arc<ApiClient>,
    cell: Arc<SessionCell>,
    login_path: String,
    restored: AtomicBool,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl AuthSession {
    pub fn new(client: Arc<ApiClient>, login_path: impl Into<String>) -> Self {
        let (state, _) = watch::channel(Session::booting());
        let cell = Arc::new(SessionCell {
            state,
            events: client.events().clone(),
        });

        Self {
            client,
            cell,
            login_path: login_path.into(),
            restored: AtomicBool::new(false),
            listener: Mutex::new(None),
        }
    }

    /// 当前会话快照
    pub fn current(&self) -> Session {
        self.cell.snapshot()
    }

    /// 订阅会话变化
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.cell.state.subscribe()
    }

    /// 启动事件监听；重复调用无效果
    pub fn start(&self) {
        let mut listener = self.listener.lock().unwrap_or_else(|p| p.into_inner());
        if listener.is_some() {
            return;
        }

        // 在返回前订阅，之后发布的事件都会被收到
        let mut receiver = self.cell.events.subscribe();
        let cell = self.cell.clone();
        *listener = Some(tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => cell.handle_event(event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Session listener lagged behind event bus");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Session listener stopped");
        }));
    }

    /// 停止事件监听
    pub fn shutdown(&self) {
        if let Some(handle) = self
            .listener
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
        {
            handle.abort();
        }
    }

    /// 启动恢复：本地令牌有效则直接认证，否则尝试刷新一次。只执行一次。
    pub async fn restore(&self) -> Session {
        if self.restored.swap(true, Ordering::SeqCst) {
            return self.current();
        }

        let tokens = self.client.tokens();
        let stored = tokens.access_token().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to read stored access token");
            None
        });

        if let Some(token) = stored.filter(|t| !jwt::is_expired(t, Utc::now())) {
            if let Some(user) = jwt::user_from_token(&token) {
                info!(user_id = user.id, "Session restored from stored token");
                self.cell.authenticate(user);
                return self.current();
            }
        }

        match self.client.restore_access_token().await {
            Ok(access) => {
                if let Some(user) = jwt::user_from_token(&access) {
                    info!(user_id = user.id, "Session restored via token refresh");
                    self.cell.authenticate(user);
                    return self.current();
                }
                warn!("Refreshed access token could not be decoded");
            }
            Err(e) => debug!(error = %e, "No session to restore"),
        }

        if let Err(e) = tokens.clear_tokens() {
            warn!(error = %e, "Failed to clear tokens after failed restore");
        }
        self.cell.update(|session| {
            session.phase = AuthPhase::Anonymous;
            session.user = None;
        });
        self.cell.events.publish(SessionEvent::RedirectToLogin {
            path: self.login_path.clone(),
        });
        self.current()
    }

    /// 登录；失败时不修改令牌存储
    pub async fn login(&self, email: &str, password: &Secret<String>, remember: bool) -> Result<User> {
        let request = LoginRequest {
            email: email.trim().to_string(),
            password: password.expose_secret().clone(),
        };

        self.cell.update(|session| {
            session.phase = AuthPhase::Authenticating;
            session.error = None;
        });

        match self.try_login(&request, remember).await {
            Ok(user) => {
                info!(user_id = user.id, remember, "Login successful");
                self.cell.authenticate(user.clone());
                self.cell.events.publish(SessionEvent::Notice {
                    message: format!("Welcome back, {}", user.name),
                    severity: Severity::Success,
                });
                Ok(user)
            }
            Err(e) => {
                warn!(error = %e, "Login failed");
                let message = e.user_message();
                self.cell.update(|session| {
                    session.phase = AuthPhase::AuthFailed;
                    session.user = None;
                    session.error = Some(message);
                });
                Err(e)
            }
        }
    }

    async fn try_login(&self, request: &LoginRequest, remember: bool) -> Result<User> {
        let response = auth_api::login(&self.client, request).await?;

        // 先解析用户，解析失败时存储保持不变
        let user = jwt::user_from_token(&response.access)
            .ok_or_else(|| AppError::authentication("Invalid token response"))?;

        let tokens = self.client.tokens();
        tokens.save_session(&response.access, &response.refresh, remember)?;
        if remember {
            tokens.set_remember_email(&request.email)?;
        }
        Ok(user)
    }

    /// 注册新账户；从不改变认证状态
    pub async fn register(
        &self,
        name: &str,
        email: &str,
        password: &Secret<String>,
        role: Role,
    ) -> Result<()> {
        let request = RegisterRequest {
            name: name.trim().to_string(),
            email: email.trim().to_string(),
            password: password.expose_secret().clone(),
            role,
            status: REGISTER_STATUS.to_string(),
        };

        let result = match request.validate() {
            Ok(()) => auth_api::register(&self.client, &request).await.map(|_| ()),
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(()) => {
                info!(role = ?role, "Registration submitted");
                self.cell.update(|session| session.error = None);
                self.cell.events.publish(SessionEvent::Notice {
                    message: "Registration successful".to_string(),
                    severity: Severity::Success,
                });
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Registration failed");
                let message = e.user_message();
                self.cell.update(|session| session.error = Some(message));
                Err(e)
            }
        }
    }

    /// 登出：清除令牌与记住的邮箱
    pub fn logout(&self) {
        let tokens = self.client.tokens();
        if let Err(e) = tokens.clear_tokens() {
            warn!(error = %e, "Failed to clear tokens on logout");
        }
        if let Err(e) = tokens.clear_remember_email() {
            warn!(error = %e, "Failed to clear remembered email on logout");
        }

        self.cell.update(|session| {
            session.phase = AuthPhase::Anonymous;
            session.user = None;
            session.error = None;
        });

        info!("Logged out");
        let events = &self.cell.events;
        events.publish(SessionEvent::Logout);
        events.publish(SessionEvent::Notice {
            message: "Logged out".to_string(),
            severity: Severity::Info,
        });
        events.publish(SessionEvent::RedirectToLogin {
            path: self.login_path.clone(),
        });
    }

    pub fn clear_error(&self) {
        self.cell.update(|session| {
            if session.phase == AuthPhase::AuthFailed {
                session.phase = AuthPhase::Anonymous;
            }
            session.error = None;
        });
    }

    pub fn remembered_email(&self) -> Option<String> {
        self.client.tokens().remember_email().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to read remembered email");
            None
        })
    }
}

impl Drop for AuthSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}
