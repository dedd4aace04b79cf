//! 后端接口
//! 路径常量与按资源划分的类型化调用

use serde::Deserialize;

pub mod auth_api;
pub mod exam_api;

pub const LOGIN_PATH: &str = "/login/";
pub const REFRESH_TOKEN_PATH: &str = "/login/get_new_token/";
pub const REGISTER_PATH: &str = "/master/user/";
pub const EXAM_GROUP_PATH: &str = "/exam_group/";
pub const EXAM_PATH: &str = "/exam/";
pub const EXAM_RESULT_PATH: &str = "/exam_result/";

/// 列表接口可能直接返回数组，也可能返回分页对象
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ListResponse<T> {
    Plain(Vec<T>),
    Paged { results: Vec<T> },
}

impl<T> ListResponse<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            ListResponse::Plain(items) => items,
            ListResponse::Paged { results } => results,
        }
    }
}
