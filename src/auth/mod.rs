//! Authentication module
//! 令牌解析与令牌存储

pub mod jwt;
pub mod token_store;

pub use jwt::Claims;
pub use token_store::{RetentionPolicy, TokenStore};
