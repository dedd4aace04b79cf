//! 会话事件总线
//! HTTP 层与会话状态之间通过类型化的广播通道通信，而不是直接引用

use tokio::sync::broadcast;

use crate::models::User;

/// 提示级别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Success,
    Info,
    Warning,
    Error,
}

/// 会话事件类型
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// 强制回到匿名状态
    Logout,
    /// 刷新失败，会话过期
    SessionExpired { message: String },
    /// 令牌刷新成功（携带从新令牌解析出的用户）
    TokenRefreshed { user: Option<User> },
    /// 认证状态变更
    AuthStateChanged { authenticated: bool },
    /// 跳转到登录页
    RedirectToLogin { path: String },
    /// 面向用户的提示
    Notice { message: String, severity: Severity },
}

impl SessionEvent {
    /// 获取事件类型名称
    pub fn event_type(&self) -> &str {
        match self {
            SessionEvent::Logout => "logout",
            SessionEvent::SessionExpired { .. } => "session_expired",
            SessionEvent::TokenRefreshed { .. } => "token_refreshed",
            SessionEvent::AuthStateChanged { .. } => "auth_state_changed",
            SessionEvent::RedirectToLogin { .. } => "redirect_to_login",
            SessionEvent::Notice { .. } => "notice",
        }
    }
}

/// 事件总线
#[derive(Clone)]
pub struct EventBus {
    /// 广播发送器（用于向所有订阅者发送事件）
    sender: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    /// 创建新的事件总线
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// 发布事件；没有订阅者时事件被丢弃
    pub fn publish(&self, event: SessionEvent) {
        let event_type = event.event_type().to_string();
        match self.sender.send(event) {
            Ok(receivers) => tracing::debug!(event = %event_type, receivers, "Session event published"),
            Err(_) => tracing::debug!(event = %event_type, "Session event dropped, no subscribers"),
        }
    }

    /// 订阅事件
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_subscriber_receives_event() {
        let bus = EventBus::new(16);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        bus.publish(SessionEvent::Logout);

        assert_eq!(first.recv().await.unwrap(), SessionEvent::Logout);
        assert_eq!(second.recv().await.unwrap(), SessionEvent::Logout);
    }

    #[test]
    fn test_publish_without_subscribers_does_not_fail() {
        let bus = EventBus::new(16);
        bus.publish(SessionEvent::AuthStateChanged {
            authenticated: false,
        });
    }

    #[test]
    fn test_event_type_names() {
        assert_eq!(SessionEvent::Logout.event_type(), "logout");
        assert_eq!(
            SessionEvent::SessionExpired {
                message: "x".to_string()
            }
            .event_type(),
            "session_expired"
        );
    }
}
