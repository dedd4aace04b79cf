//! 配置系统
//! 从环境变量加载所有配置（前缀 EXAM_）

use config::{Config, ConfigError, Environment};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// 后端 API 根地址，例如 "http://localhost:8000"
    pub base_url: String,
    /// 请求超时时间（秒）
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// 主动刷新阈值：访问令牌剩余有效期小于该值时先刷新（秒）
    pub refresh_lookahead_secs: u64,
    /// 会话过期后跳转登录页的延迟（毫秒）
    pub redirect_delay_ms: u64,
    /// 登录页路径
    pub login_path: String,
    /// 会话过期时展示给用户的提示
    pub expired_message: String,
}

impl SessionConfig {
    pub fn refresh_lookahead(&self) -> Duration {
        Duration::from_secs(self.refresh_lookahead_secs)
    }

    pub fn redirect_delay(&self) -> Duration {
        Duration::from_millis(self.redirect_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// 存储后端: file, memory
    pub backend: String,
    /// 文件存储路径
    pub path: String,
    /// 访问令牌保留天数（未勾选“记住我”）
    pub access_token_days: i64,
    /// 访问令牌保留天数（勾选“记住我”）
    pub access_token_remember_days: i64,
    /// 刷新令牌保留天数（未勾选“记住我”）
    pub refresh_token_days: i64,
    /// 刷新令牌保留天数（勾选“记住我”）
    pub refresh_token_remember_days: i64,
    /// 记住的邮箱保留天数
    pub remember_email_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别: trace, debug, info, warn, error
    pub level: String,
    /// 日志格式: json, pretty
    pub format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub session: SessionConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut settings = Config::builder();

        // 添加默认配置
        settings = settings
            .set_default("api.base_url", "http://localhost:8000")?
            .set_default("api.timeout_secs", 30)?
            .set_default("session.refresh_lookahead_secs", 300)?
            .set_default("session.redirect_delay_ms", 1000)?
            .set_default("session.login_path", "/auth/login")?
            .set_default("session.expired_message", "Session expired")?
            .set_default("storage.backend", "file")?
            .set_default("storage.path", ".exam-session/store.json")?
            .set_default("storage.access_token_days", 1)?
            .set_default("storage.access_token_remember_days", 7)?
            .set_default("storage.refresh_token_days", 7)?
            .set_default("storage.refresh_token_remember_days", 30)?
            .set_default("storage.remember_email_days", 30)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?;

        // 从环境变量加载配置（前缀为 EXAM_）
        settings = settings.add_source(
            Environment::with_prefix("EXAM")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = settings.build()?.try_deserialize()?;

        // 验证配置
        config.validate()?;

        Ok(config)
    }

    /// 验证配置合法性
    pub fn validate(&self) -> Result<(), ConfigError> {
        // 验证 API 地址
        let base_url = self.api.base_url.to_lowercase();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Message(format!(
                "Invalid api.base_url: {}. Must start with http:// or https://",
                self.api.base_url
            )));
        }

        if self.api.timeout_secs == 0 || self.api.timeout_secs > 300 {
            return Err(ConfigError::Message(
                "api.timeout_secs must be between 1 and 300".to_string(),
            ));
        }

        // 刷新阈值不超过 1 小时
        if self.session.refresh_lookahead_secs > 3600 {
            return Err(ConfigError::Message(
                "session.refresh_lookahead_secs must be <= 3600".to_string(),
            ));
        }

        if !self.session.login_path.starts_with('/') {
            return Err(ConfigError::Message(
                "session.login_path must start with '/'".to_string(),
            ));
        }

        // 验证存储后端
        match self.storage.backend.to_lowercase().as_str() {
            "file" | "memory" => {}
            _ => {
                return Err(ConfigError::Message(format!(
                    "Invalid storage backend: {}. Must be one of: file, memory",
                    self.storage.backend
                )))
            }
        }

        // 验证保留策略：“记住我”必须延长而不是缩短保留时间
        let retention = [
            self.storage.access_token_days,
            self.storage.access_token_remember_days,
            self.storage.refresh_token_days,
            self.storage.refresh_token_remember_days,
            self.storage.remember_email_days,
        ];
        if retention.iter().any(|days| *days < 1 || *days > 365) {
            return Err(ConfigError::Message(
                "storage retention days must be between 1 and 365".to_string(),
            ));
        }
        if self.storage.access_token_remember_days < self.storage.access_token_days
            || self.storage.refresh_token_remember_days < self.storage.refresh_token_days
        {
            return Err(ConfigError::Message(
                "remember-me retention must not be shorter than the default retention".to_string(),
            ));
        }

        // 验证日志级别
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::Message(format!(
                    "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                    self.logging.level
                )))
            }
        }

        // 验证日志格式
        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" => {}
            _ => {
                return Err(ConfigError::Message(format!(
                    "Invalid log format: {}. Must be one of: json, pretty",
                    self.logging.format
                )))
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        std::env::remove_var("EXAM_API__BASE_URL");
        std::env::remove_var("EXAM_LOGGING__LEVEL");
        std::env::remove_var("EXAM_STORAGE__BACKEND");
        std::env::remove_var("EXAM_SESSION__REFRESH_LOOKAHEAD_SECS");
    }

    #[test]
    #[serial]
    fn test_config_defaults() {
        clear_env();

        let config = AppConfig::from_env().unwrap();
        assert_eq!(config.api.base_url, "http://localhost:8000");
        assert_eq!(config.session.refresh_lookahead_secs, 300);
        assert_eq!(config.session.refresh_lookahead(), Duration::from_secs(300));
        assert_eq!(config.session.login_path, "/auth/login");
        assert_eq!(config.storage.refresh_token_remember_days, 30);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    #[serial]
    fn test_config_env_override() {
        clear_env();
        std::env::set_var("EXAM_API__BASE_URL", "https://api.example.com");
        std::env::set_var("EXAM_SESSION__REFRESH_LOOKAHEAD_SECS", "120");

        let config = AppConfig::from_env().unwrap();
        assert_eq!(config.api.base_url, "https://api.example.com");
        assert_eq!(config.session.refresh_lookahead_secs, 120);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_config_validation_invalid_base_url() {
        clear_env();
        std::env::set_var("EXAM_API__BASE_URL", "ftp://example.com");

        let result = AppConfig::from_env();
        assert!(result.is_err());

        clear_env();
    }

    #[test]
    #[serial]
    fn test_config_validation_invalid_log_level() {
        clear_env();
        std::env::set_var("EXAM_LOGGING__LEVEL", "invalid");

        let result = AppConfig::from_env();
        assert!(result.is_err());

        clear_env();
    }

    #[test]
    #[serial]
    fn test_config_validation_invalid_storage_backend() {
        clear_env();
        std::env::set_var("EXAM_STORAGE__BACKEND", "cookies");

        let result = AppConfig::from_env();
        assert!(result.is_err());

        clear_env();
    }
}
