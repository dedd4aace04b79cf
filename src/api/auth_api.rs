//! 认证接口
//! 登录与注册不携带访问令牌，也不触发刷新

use validator::Validate;

use super::{LOGIN_PATH, REGISTER_PATH};
use crate::{
    client::ApiClient,
    error::Result,
    models::auth::{LoginRequest, LoginResponse, RegisterRequest},
};

/// `POST /login/`
pub async fn login(client: &ApiClient, request: &LoginRequest) -> Result<LoginResponse> {
    request.validate()?;
    client.post_public(LOGIN_PATH, request).await
}

/// `POST /master/user/`，返回后端创建的用户记录
pub async fn register(client: &ApiClient, request: &RegisterRequest) -> Result<serde_json::Value> {
    request.validate()?;
    client.post_public(REGISTER_PATH, request).await
}
