//! 数据模型模块
//! 认证、用户与考试相关的数据契约

pub mod auth;
pub mod exam;
pub mod user;

pub use user::{Avatar, Role, User};
