//! Authentication-related models

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Login request
#[derive(Debug, Serialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

/// Login response
#[derive(Debug, Deserialize)]
pub struct LoginResponse {
    pub access: String,
    pub refresh: String,
}

/// Token refresh request
#[derive(Debug, Serialize)]
pub struct RefreshTokenRequest {
    pub refresh: String,
}

/// Token refresh response（后端可能不轮换刷新令牌）
#[derive(Debug, Deserialize)]
pub struct RefreshTokenResponse {
    pub access: String,
    #[serde(default)]
    pub refresh: Option<String>,
}

/// Register request
#[derive(Debug, Serialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 255, message = "Name is required"))]
    pub name: String,
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    #[validate(length(min = 6, max = 128, message = "Password must be 6-128 characters"))]
    pub password: String,
    pub role: super::user::Role,
    /// 新注册账户等待确认
    pub status: String,
}
