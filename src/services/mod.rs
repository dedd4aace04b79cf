//! 会话与考试流程服务

pub mod auth_service;
pub mod exam_flow;

pub use auth_service::{AuthPhase, AuthSession, Session};
pub use exam_flow::{ExamFlow, ExamFlowState, UnlockRecord};
