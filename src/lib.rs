//! 考试应用会话核心
//! 令牌存储、会话协调（单飞刷新）、认证状态机与考试解锁计时

pub mod api;
pub mod auth;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod models;
pub mod realtime;
pub mod services;
pub mod storage;
pub mod telemetry;
