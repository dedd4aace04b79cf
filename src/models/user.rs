//! 用户模型

use serde::{Deserialize, Serialize};

/// 用户角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Teacher,
    Admin,
}

impl Role {
    /// 教师与管理员拥有教师权限
    pub fn is_teacher(&self) -> bool {
        matches!(self, Role::Teacher | Role::Admin)
    }
}

/// 头像
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Avatar {
    pub id: Option<i64>,
    pub url: Option<String>,
}

/// 会话中的用户信息（从访问令牌解析）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub parent_name: Option<String>,
    pub parent_phone: Option<String>,
    pub school: Option<String>,
    pub avatar: Avatar,
    /// 访问令牌过期时间（Unix 秒）
    pub exp: i64,
}

impl User {
    pub fn is_teacher(&self) -> bool {
        self.role.is_teacher()
    }
}
