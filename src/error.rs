//! 统一错误模型
//! 定义会话核心的所有错误类型
//!
//! `AppError` 实现了 `Clone`：一次刷新的结果需要原样分发给所有排队等待的请求。

use thiserror::Error;

/// 结果类型别名
pub type Result<T> = std::result::Result<T, AppError>;

/// 应用错误类型
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AppError {
    /// 令牌格式错误，无法解析
    #[error("Invalid token")]
    InvalidToken,

    /// 刷新接口拒绝或网络错误，当前会话终止
    #[error("Token refresh failed: {0}")]
    RefreshFailure(String),

    /// 本地没有可用的刷新令牌
    #[error("No refresh token available")]
    NoRefreshTokenAvailable,

    /// 登录/注册失败（可恢复，展示给用户）
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// 重试后仍返回 401
    #[error("Authentication failed")]
    Unauthorized,

    /// 服务端返回非成功状态码
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AppError {
    /// 获取用户友好的错误消息（不包含敏感信息）
    pub fn user_message(&self) -> String {
        match self {
            AppError::InvalidToken => "Invalid session token".to_string(),
            AppError::RefreshFailure(_) | AppError::NoRefreshTokenAvailable => {
                "Session expired".to_string()
            }
            AppError::Authentication(msg) => msg.clone(),
            AppError::Unauthorized => "Authentication failed".to_string(),
            AppError::Http { message, .. } => message.clone(),
            AppError::Network(_) => "Network error, please try again".to_string(),
            AppError::Validation(msg) => msg.clone(),
            AppError::Storage(_) => "Local storage error".to_string(),
            AppError::Serialization(_) => "Unexpected server response".to_string(),
            AppError::Config(_) => "Configuration error".to_string(),
        }
    }

    /// 获取错误码（对应 HTTP 状态码语义）
    pub fn code(&self) -> u16 {
        match self {
            AppError::InvalidToken
            | AppError::RefreshFailure(_)
            | AppError::NoRefreshTokenAvailable
            | AppError::Authentication(_)
            | AppError::Unauthorized => 401,
            AppError::Http { status, .. } => *status,
            AppError::Validation(_) => 400,
            AppError::Network(_) => 503,
            AppError::Storage(_)
            | AppError::Serialization(_)
            | AppError::Config(_) => 500,
        }
    }

    /// 是否为终止当前会话的刷新错误
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            AppError::RefreshFailure(_) | AppError::NoRefreshTokenAvailable
        )
    }

    // 便捷方法
    pub fn authentication(msg: &str) -> Self {
        AppError::Authentication(msg.to_string())
    }
}

/// 从 reqwest::Error 转换
impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            AppError::Serialization(e.to_string())
        } else {
            AppError::Network(e.to_string())
        }
    }
}

/// 从 serde_json::Error 转换
impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Serialization(e.to_string())
    }
}

/// 从 std::io::Error 转换
impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Storage(e.to_string())
    }
}

/// 从 config::ConfigError 转换
impl From<config::ConfigError> for AppError {
    fn from(e: config::ConfigError) -> Self {
        AppError::Config(e.to_string())
    }
}

/// 从 validator::ValidationErrors 转换
impl From<validator::ValidationErrors> for AppError {
    fn from(e: validator::ValidationErrors) -> Self {
        AppError::Validation(e.to_string())
    }
}
