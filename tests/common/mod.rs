//! 测试公共模块
//! 提供测试配置、令牌构造与模拟后端

#![allow(dead_code)]

use chrono::Utc;
use exam_session::{
    config::{ApiConfig, AppConfig, LoggingConfig, SessionConfig, StorageConfig},
    context::AppContext,
    realtime::SessionEvent,
    storage::MemoryStore,
};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::json;
use std::{sync::Arc, time::Duration};
use tokio::sync::broadcast;
use wiremock::MockServer;

/// 会话过期后的跳转延迟（测试中缩短）
pub const REDIRECT_DELAY_MS: u64 = 50;

/// 创建测试配置
pub fn create_test_config(base_url: &str) -> AppConfig {
    AppConfig {
        api: ApiConfig {
            base_url: base_url.to_string(),
            timeout_secs: 5,
        },
        session: SessionConfig {
            refresh_lookahead_secs: 300,
            redirect_delay_ms: REDIRECT_DELAY_MS,
            login_path: "/auth/login".to_string(),
            expired_message: "Session expired".to_string(),
        },
        storage: StorageConfig {
            backend: "memory".to_string(),
            path: String::new(),
            access_token_days: 1,
            access_token_remember_days: 7,
            refresh_token_days: 7,
            refresh_token_remember_days: 30,
            remember_email_days: 30,
        },
        logging: LoggingConfig {
            level: "debug".to_string(),
            format: "pretty".to_string(),
        },
    }
}

/// 构造访问令牌；签名密钥任意，客户端不校验签名
pub fn create_token(user_id: i64, name: &str, role: &str, expires_in_secs: i64) -> String {
    let now = Utc::now().timestamp();
    let claims = json!({
        "id": user_id,
        "name": name,
        "email": format!("{}@example.com", name.to_lowercase()),
        "role": role,
        "exp": now + expires_in_secs,
        "iat": now,
    });
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(b"backend-only-secret"),
    )
    .expect("Failed to encode test token")
}

/// 一小时后过期的学生令牌
pub fn student_token(user_id: i64) -> String {
    create_token(user_id, "Student", "student", 3600)
}

/// 模拟后端与连接到它的应用上下文
pub struct TestApp {
    pub server: MockServer,
    pub context: AppContext,
}

pub async fn setup() -> TestApp {
    let server = MockServer::start().await;
    let config = create_test_config(&server.uri());
    let context = AppContext::with_storage(config, Arc::new(MemoryStore::new()))
        .expect("Failed to build test context");
    TestApp { server, context }
}

/// 在给定时间窗口内收集事件
pub async fn collect_events(
    receiver: &mut broadcast::Receiver<SessionEvent>,
    window: Duration,
) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    let deadline = tokio::time::Instant::now() + window;
    while let Ok(Ok(event)) = tokio::time::timeout_at(deadline, receiver.recv()).await {
        events.push(event);
    }
    events
}
