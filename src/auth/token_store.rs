//! 令牌存储
//! 在持久化键值存储之上保存访问令牌、刷新令牌与“记住我”邮箱

use chrono::{Duration, Utc};
use std::sync::Arc;

use crate::{config::StorageConfig, error::Result, storage::KeyValueStore};

pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
pub const REMEMBER_EMAIL_KEY: &str = "remember_email";
const REMEMBER_SESSION_KEY: &str = "remember_session";

/// 保留策略（天）
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    pub access_token_days: i64,
    pub access_token_remember_days: i64,
    pub refresh_token_days: i64,
    pub refresh_token_remember_days: i64,
    pub remember_email_days: i64,
}

impl From<&StorageConfig> for RetentionPolicy {
    fn from(config: &StorageConfig) -> Self {
        Self {
            access_token_days: config.access_token_days,
            access_token_remember_days: config.access_token_remember_days,
            refresh_token_days: config.refresh_token_days,
            refresh_token_remember_days: config.refresh_token_remember_days,
            remember_email_days: config.remember_email_days,
        }
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            access_token_days: 1,
            access_token_remember_days: 7,
            refresh_token_days: 7,
            refresh_token_remember_days: 30,
            remember_email_days: 30,
        }
    }
}

/// 进程内共享的令牌存储
#[derive(Clone)]
pub struct TokenStore {
    storage: Arc<dyn KeyValueStore>,
    retention: RetentionPolicy,
}

impl TokenStore {
    pub fn new(storage: Arc<dyn KeyValueStore>, retention: RetentionPolicy) -> Self {
        Self { storage, retention }
    }

    /// 保存访问令牌，“记住我”时延长保留时间
    pub fn set_access_token(&self, token: &str, remember: bool) -> Result<()> {
        let days = if remember {
            self.retention.access_token_remember_days
        } else {
            self.retention.access_token_days
        };
        tracing::debug!(days, token_len = token.len(), "Storing access token");
        self.storage
            .set(ACCESS_TOKEN_KEY, token, Some(Utc::now() + Duration::days(days)))
    }

    /// 保存刷新令牌
    pub fn set_refresh_token(&self, token: &str, remember: bool) -> Result<()> {
        let days = if remember {
            self.retention.refresh_token_remember_days
        } else {
            self.retention.refresh_token_days
        };
        tracing::debug!(days, token_len = token.len(), "Storing refresh token");
        self.storage
            .set(REFRESH_TOKEN_KEY, token, Some(Utc::now() + Duration::days(days)))
    }

    /// 登录成功后保存令牌对，并记录本次会话是否“记住我”
    pub fn save_session(&self, access: &str, refresh: &str, remember: bool) -> Result<()> {
        self.set_access_token(access, remember)?;
        self.set_refresh_token(refresh, remember)?;
        if remember {
            self.storage.set(
                REMEMBER_SESSION_KEY,
                "1",
                Some(Utc::now() + Duration::days(self.retention.refresh_token_remember_days)),
            )
        } else {
            self.storage.remove(REMEMBER_SESSION_KEY)
        }
    }

    /// 刷新后轮换令牌，沿用登录时的保留策略
    pub fn rotate(&self, access: &str, refresh: Option<&str>) -> Result<()> {
        let remember = self.remembers_session()?;
        self.set_access_token(access, remember)?;
        if let Some(refresh) = refresh {
            self.set_refresh_token(refresh, remember)?;
        }
        Ok(())
    }

    pub fn remembers_session(&self) -> Result<bool> {
        Ok(self.storage.get(REMEMBER_SESSION_KEY)?.is_some())
    }

    pub fn access_token(&self) -> Result<Option<String>> {
        self.storage.get(ACCESS_TOKEN_KEY)
    }

    pub fn refresh_token(&self) -> Result<Option<String>> {
        self.storage.get(REFRESH_TOKEN_KEY)
    }

    /// 清除令牌，返回清除前是否存在任何凭据
    pub fn clear_tokens(&self) -> Result<bool> {
        let had_credentials = self.access_token()?.is_some() || self.refresh_token()?.is_some();
        self.storage.remove(ACCESS_TOKEN_KEY)?;
        self.storage.remove(REFRESH_TOKEN_KEY)?;
        self.storage.remove(REMEMBER_SESSION_KEY)?;
        tracing::debug!(had_credentials, "Tokens cleared");
        Ok(had_credentials)
    }

    pub fn set_remember_email(&self, email: &str) -> Result<()> {
        self.storage.set(
            REMEMBER_EMAIL_KEY,
            email,
            Some(Utc::now() + Duration::days(self.retention.remember_email_days)),
        )
    }

    pub fn remember_email(&self) -> Result<Option<String>> {
        self.storage.get(REMEMBER_EMAIL_KEY)
    }

    pub fn clear_remember_email(&self) -> Result<()> {
        self.storage.remove(REMEMBER_EMAIL_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FileStore, MemoryStore};
    use tempfile::TempDir;

    fn memory_store() -> TokenStore {
        TokenStore::new(Arc::new(MemoryStore::new()), RetentionPolicy::default())
    }

    #[test]
    fn test_set_and_clear_tokens() {
        let store = memory_store();
        assert!(!store.clear_tokens().unwrap());

        store.set_access_token("access", false).unwrap();
        store.set_refresh_token("refresh", false).unwrap();
        assert_eq!(store.access_token().unwrap().as_deref(), Some("access"));
        assert_eq!(store.refresh_token().unwrap().as_deref(), Some("refresh"));

        assert!(store.clear_tokens().unwrap());
        assert!(store.access_token().unwrap().is_none());
        assert!(store.refresh_token().unwrap().is_none());
    }

    #[test]
    fn test_clear_tokens_keeps_remembered_email() {
        let store = memory_store();
        store.set_remember_email("lan@example.com").unwrap();
        store.set_access_token("access", true).unwrap();

        store.clear_tokens().unwrap();
        assert_eq!(
            store.remember_email().unwrap().as_deref(),
            Some("lan@example.com")
        );

        store.clear_remember_email().unwrap();
        assert!(store.remember_email().unwrap().is_none());
    }

    #[test]
    fn test_rotate_keeps_session_and_optional_refresh() {
        let store = memory_store();
        store.save_session("a1", "r1", true).unwrap();
        assert!(store.remembers_session().unwrap());

        store.rotate("a2", None).unwrap();
        assert_eq!(store.access_token().unwrap().as_deref(), Some("a2"));
        assert_eq!(store.refresh_token().unwrap().as_deref(), Some("r1"));

        store.rotate("a3", Some("r2")).unwrap();
        assert_eq!(store.refresh_token().unwrap().as_deref(), Some("r2"));

        store.clear_tokens().unwrap();
        assert!(!store.remembers_session().unwrap());
    }

    #[test]
    fn test_remember_me_lengthens_retention() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        let store = TokenStore::new(
            Arc::new(FileStore::open(&path).unwrap()),
            RetentionPolicy::default(),
        );

        store.set_refresh_token("short", false).unwrap();
        let short: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let short_expiry = short[REFRESH_TOKEN_KEY]["expires_at"]
            .as_str()
            .unwrap()
            .parse::<chrono::DateTime<Utc>>()
            .unwrap();

        store.set_refresh_token("long", true).unwrap();
        let long: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let long_expiry = long[REFRESH_TOKEN_KEY]["expires_at"]
            .as_str()
            .unwrap()
            .parse::<chrono::DateTime<Utc>>()
            .unwrap();

        assert!(long_expiry - short_expiry > Duration::days(20));
    }
}
