//! 考试相关模型
//! 考试组、考试、考试结果与解锁状态

use serde::{Deserialize, Serialize};

/// 考试组：组内考试按顺序解锁
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamGroup {
    pub id: i64,
    pub name: String,
    /// 完成一个考试后解锁下一个所需等待的时间（秒）
    pub await_time: i64,
    /// 所属班级
    #[serde(rename = "clas", default)]
    pub class_id: Option<i64>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub is_once: bool,
    #[serde(default)]
    pub is_save_local: bool,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// 考试
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exam {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub exam_group: Option<i64>,
    /// 考试时长（分钟）
    #[serde(default)]
    pub total_time: i64,
    #[serde(default)]
    pub number_of_question: i64,
    #[serde(default)]
    pub description: String,
}

/// 考试解锁状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExamStatus {
    /// 未解锁
    Locked,
    /// 可以开始
    Unlocked,
    /// 倒计时中
    Unlocking,
    /// 已提交
    Completed,
}

/// 带解锁状态的考试
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamWithStatus {
    #[serde(flatten)]
    pub exam: Exam,
    pub status: ExamStatus,
}

impl ExamWithStatus {
    pub fn id(&self) -> i64 {
        self.exam.id
    }
}

/// 学生提交的考试结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamResult {
    pub id: i64,
    pub exam: i64,
    pub user: i64,
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub number_of_question: i64,
    #[serde(default)]
    pub number_of_correct_answer: i64,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// 单题作答
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamAnswer {
    /// 题目 ID
    pub question: i64,
    /// 作答内容，未作答为空字符串
    pub answer: String,
}

/// 提交考试结果请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateExamResultRequest {
    /// 设备类型: desktop, mobile
    pub device: String,
    pub exam: i64,
    pub user: i64,
    /// doing, finished
    pub status: String,
    pub questions: Vec<ExamAnswer>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exam_group_deserialize() {
        let json = r#"{
            "id": 7,
            "name": "Midterm",
            "await_time": 120,
            "clas": 3,
            "start_time": "2024-05-01",
            "is_once": true,
            "is_save_local": false,
            "users": [],
            "classes": []
        }"#;

        let group: ExamGroup = serde_json::from_str(json).unwrap();
        assert_eq!(group.id, 7);
        assert_eq!(group.await_time, 120);
        assert_eq!(group.class_id, Some(3));
        assert!(group.is_once);
    }

    #[test]
    fn test_exam_status_serialization() {
        let statuses = vec![
            (ExamStatus::Locked, "locked"),
            (ExamStatus::Unlocked, "unlocked"),
            (ExamStatus::Unlocking, "unlocking"),
            (ExamStatus::Completed, "completed"),
        ];

        for (status, expected) in statuses {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", expected));
        }
    }
}
