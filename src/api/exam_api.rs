//! 考试相关接口

use super::{ListResponse, EXAM_GROUP_PATH, EXAM_PATH, EXAM_RESULT_PATH};
use crate::{
    client::{ApiClient, ApiRequest},
    error::Result,
    models::exam::{CreateExamResultRequest, Exam, ExamGroup, ExamResult},
};

/// `GET /exam_group/{id}/`
pub async fn exam_group(client: &ApiClient, group_id: i64) -> Result<ExamGroup> {
    client
        .get_json(ApiRequest::get(format!("{}{}/", EXAM_GROUP_PATH, group_id)))
        .await
}

/// `GET /exam/?exam_group={id}`
pub async fn exams(client: &ApiClient, group_id: i64) -> Result<Vec<Exam>> {
    let list: ListResponse<Exam> = client
        .get_json(ApiRequest::get(EXAM_PATH).query("exam_group", group_id))
        .await?;
    Ok(list.into_vec())
}

/// `GET /exam_result/?student={uid}&exam_group={gid}`
pub async fn results(client: &ApiClient, student_id: i64, group_id: i64) -> Result<Vec<ExamResult>> {
    let list: ListResponse<ExamResult> = client
        .get_json(
            ApiRequest::get(EXAM_RESULT_PATH)
                .query("student", student_id)
                .query("exam_group", group_id),
        )
        .await?;
    Ok(list.into_vec())
}

/// `POST /exam_result/`
pub async fn create_result(
    client: &ApiClient,
    payload: &CreateExamResultRequest,
) -> Result<serde_json::Value> {
    client.post_json(EXAM_RESULT_PATH, payload).await
}
