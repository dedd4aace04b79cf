//! 考试解锁流程
//! 同一考试组内的试卷按顺序开放：完成一份后，下一份需等待组配置的 `await_time` 秒。
//! 等待起点持久化为解锁记录，重新加载时按 `now - unlock_started_at` 重新计算剩余时间。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    api::exam_api,
    client::ApiClient,
    error::{AppError, Result},
    models::exam::{
        CreateExamResultRequest, Exam, ExamGroup, ExamResult, ExamStatus, ExamWithStatus,
    },
    storage::KeyValueStore,
};

/// 倒计时精度
pub const TICK: Duration = Duration::from_secs(1);

/// 解锁记录存储键
pub fn unlock_key(user_id: i64, group_id: i64) -> String {
    format!("unlock-{}-{}", user_id, group_id)
}

/// 持久化的解锁记录；每个 (用户, 考试组) 最多一条
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockRecord {
    pub exam_id: i64,
    pub unlock_started_at: DateTime<Utc>,
}

/// 考试流程快照
#[derive(Debug, Clone, Default)]
pub struct ExamFlowState {
    pub group: Option<ExamGroup>,
    pub exams: Vec<ExamWithStatus>,
    /// 正在解锁时的剩余秒数
    pub remaining_secs: Option<i64>,
    pub is_loading: bool,
}

impl ExamFlowState {
    pub fn is_unlocking(&self) -> bool {
        self.remaining_secs.is_some()
    }

    pub fn status_of(&self, exam_id: i64) -> Option<ExamStatus> {
        self.exams
            .iter()
            .find(|e| e.id() == exam_id)
            .map(|e| e.status)
    }

    pub fn unlocking_exam(&self) -> Option<&ExamWithStatus> {
        self.exams.iter().find(|e| e.status == ExamStatus::Unlocking)
    }
}

/// 按结果与解锁记录计算出的试卷状态
#[derive(Debug)]
pub struct Reconciled {
    pub exams: Vec<ExamWithStatus>,
    pub remaining_secs: Option<i64>,
    /// 记录已失效（过期或指向无效试卷），需删除
    pub discard_record: bool,
}

/// 纯函数：有结果的试卷为 completed，其余为 locked；再按解锁记录决定唯一的开放项
pub fn reconcile(
    exams: Vec<Exam>,
    results: &[ExamResult],
    await_time: i64,
    record: Option<&UnlockRecord>,
    now: DateTime<Utc>,
) -> Reconciled {
    let mut exams: Vec<ExamWithStatus> = exams
        .into_iter()
        .map(|exam| {
            let status = if results.iter().any(|r| r.exam == exam.id) {
                ExamStatus::Completed
            } else {
                ExamStatus::Locked
            };
            ExamWithStatus { exam, status }
        })
        .collect();

    let mut discard_record = false;

    if let Some(record) = record {
        let target = exams
            .iter()
            .position(|e| e.id() == record.exam_id && e.status != ExamStatus::Completed);

        match target {
            Some(index) => {
                let elapsed = (now - record.unlock_started_at).num_seconds().max(0);
                let remaining = await_time - elapsed;
                if remaining > 0 {
                    exams[index].status = ExamStatus::Unlocking;
                    return Reconciled {
                        exams,
                        remaining_secs: Some(remaining),
                        discard_record: false,
                    };
                }
                exams[index].status = ExamStatus::Unlocked;
                return Reconciled {
                    exams,
                    remaining_secs: None,
                    discard_record: true,
                };
            }
            None => {
                debug!(exam_id = record.exam_id, "Unlock record points at no pending exam");
                discard_record = true;
            }
        }
    }

    if let Some(first) = exams.iter_mut().find(|e| e.status == ExamStatus::Locked) {
        first.status = ExamStatus::Unlocked;
    }

    Reconciled {
        exams,
        remaining_secs: None,
        discard_record,
    }
}

/// 与倒计时任务共享的部分
struct FlowInner {
    state: watch::Sender<ExamFlowState>,
    storage: Arc<dyn KeyValueStore>,
}

impl FlowInner {
    fn remove_record(&self, key: &str) {
        if let Err(e) = self.storage.remove(key) {
            warn!(key, error = %e, "Failed to remove unlock record");
        }
    }

    /// 读取解锁记录；损坏的记录被删除并视为不存在
    fn read_record(&self, key: &str) -> Option<UnlockRecord> {
        let raw = match self.storage.get(key) {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(key, error = %e, "Failed to read unlock record");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(key, error = %e, "Discarding malformed unlock record");
                self.remove_record(key);
                None
            }
        }
    }
}

/// 一名学生的考试解锁流程
pub struct ExamFlow {
    inner: Arc<FlowInner>,
    user_id: i64,
    countdown: Mutex<Option<JoinHandle<()>>>,
}

impl ExamFlow {
    pub fn new(storage: Arc<dyn KeyValueStore>, user_id: i64) -> Self {
        let (state, _) = watch::channel(ExamFlowState::default());
        Self {
            inner: Arc::new(FlowInner { state, storage }),
            user_id,
            countdown: Mutex::new(None),
        }
    }

    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    pub fn current(&self) -> ExamFlowState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ExamFlowState> {
        self.inner.state.subscribe()
    }

    /// 拉取考试组、试卷与本人成绩（并发），然后加载
    pub async fn initialize(&self, api: &ApiClient, group_id: i64, now: DateTime<Utc>) -> Result<()> {
        self.inner.state.send_modify(|s| s.is_loading = true);

        let fetched = tokio::try_join!(
            exam_api::exam_group(api, group_id),
            exam_api::exams(api, group_id),
            exam_api::results(api, self.user_id, group_id),
        );

        match fetched {
            Ok((group, exams, results)) => {
                self.load(group, exams, &results, now);
                Ok(())
            }
            Err(e) => {
                warn!(group_id, error = %e, "Failed to load exam flow");
                self.inner.state.send_modify(|s| s.is_loading = false);
                Err(e)
            }
        }
    }

    /// 根据试卷、成绩与持久化记录重建状态
    pub fn load(&self, group: ExamGroup, exams: Vec<Exam>, results: &[ExamResult], now: DateTime<Utc>) {
        let key = unlock_key(self.user_id, group.id);
        let record = self.inner.read_record(&key);
        let reconciled = reconcile(exams, results, group.await_time, record.as_ref(), now);

        if reconciled.discard_record {
            self.inner.remove_record(&key);
        }

        info!(
            group_id = group.id,
            exams = reconciled.exams.len(),
            remaining_secs = ?reconciled.remaining_secs,
            "Exam flow loaded"
        );

        let remaining = reconciled.remaining_secs;
        self.inner.state.send_modify(|s| {
            s.group = Some(group);
            s.exams = reconciled.exams;
            s.remaining_secs = remaining;
            s.is_loading = false;
        });

        if remaining.is_some() {
            self.start_countdown(key);
        } else {
            self.stop_countdown();
        }
    }

    /// 标记试卷完成，并开始下一份试卷的等待
    pub fn complete(&self, exam_id: i64, now: DateTime<Utc>) -> Result<()> {
        let group = self
            .inner
            .state
            .borrow()
            .group
            .clone()
            .ok_or_else(|| AppError::Validation("No exam group loaded".to_string()))?;
        let key = unlock_key(self.user_id, group.id);

        // 先算出下一步，记录写入成功后再修改内存状态
        let (unlocking_other, next_id) = {
            let state = self.inner.state.borrow();
            let unlocking_other = state
                .exams
                .iter()
                .any(|e| e.status == ExamStatus::Unlocking && e.id() != exam_id);
            let next_id = state
                .exams
                .iter()
                .find(|e| e.status == ExamStatus::Locked && e.id() != exam_id)
                .map(|e| e.id());
            (unlocking_other, next_id)
        };

        let mark_completed = |s: &mut ExamFlowState| {
            if let Some(exam) = s.exams.iter_mut().find(|e| e.id() == exam_id) {
                exam.status = ExamStatus::Completed;
            }
        };

        if unlocking_other {
            self.inner.state.send_modify(mark_completed);
            debug!(exam_id, "Exam completed while another exam is unlocking");
            return Ok(());
        }

        match next_id {
            Some(next_id) if group.await_time > 0 => {
                let record = UnlockRecord {
                    exam_id: next_id,
                    unlock_started_at: now,
                };
                self.inner
                    .storage
                    .set(&key, &serde_json::to_string(&record)?, None)?;

                self.inner.state.send_modify(|s| {
                    mark_completed(s);
                    if let Some(next) = s.exams.iter_mut().find(|e| e.id() == next_id) {
                        next.status = ExamStatus::Unlocking;
                    }
                    s.remaining_secs = Some(group.await_time);
                });
                info!(
                    exam_id,
                    next_exam_id = next_id,
                    await_time = group.await_time,
                    "Exam completed, next exam unlocking"
                );
                self.start_countdown(key);
            }
            _ => {
                self.inner.state.send_modify(|s| {
                    mark_completed(s);
                    if let Some(next) = next_id.and_then(|id| s.exams.iter_mut().find(|e| e.id() == id)) {
                        next.status = ExamStatus::Unlocked;
                    }
                    s.remaining_secs = None;
                });
                info!(exam_id, "Exam completed");
                self.stop_countdown();
                self.inner.remove_record(&key);
            }
        }
        Ok(())
    }

    /// 提交成绩，成功后标记完成
    pub async fn submit_result(
        &self,
        api: &ApiClient,
        payload: &CreateExamResultRequest,
        now: DateTime<Utc>,
    ) -> Result<serde_json::Value> {
        let created = exam_api::create_result(api, payload).await?;
        self.complete(payload.exam, now)?;
        Ok(created)
    }

    /// 启动倒计时，替换已有的倒计时任务
    fn start_countdown(&self, key: String) {
        let inner = self.inner.clone();
        let handle = tokio::spawn(run_countdown(inner, key));

        let mut countdown = self.countdown.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(previous) = countdown.replace(handle) {
            previous.abort();
        }
    }

    fn stop_countdown(&self) {
        if let Some(handle) = self
            .countdown
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
        {
            handle.abort();
        }
    }

    /// 停止倒计时；持久化记录保留，下次加载时继续
    pub fn shutdown(&self) {
        self.stop_countdown();
    }
}

impl Drop for ExamFlow {
    fn drop(&mut self) {
        self.stop_countdown();
    }
}

enum Tick {
    Continue,
    Promoted,
    Idle,
}

async fn run_countdown(inner: Arc<FlowInner>, key: String) {
    let mut interval = tokio::time::interval(TICK);
    // 首次 tick 立即返回
    interval.tick().await;

    loop {
        interval.tick().await;

        let mut outcome = Tick::Idle;
        inner.state.send_modify(|s| match s.remaining_secs {
            Some(remaining) if remaining > 1 => {
                s.remaining_secs = Some(remaining - 1);
                outcome = Tick::Continue;
            }
            Some(_) => {
                s.remaining_secs = None;
                if let Some(exam) = s.exams.iter_mut().find(|e| e.status == ExamStatus::Unlocking) {
                    exam.status = ExamStatus::Unlocked;
                }
                outcome = Tick::Promoted;
            }
            None => {}
        });

        match outcome {
            Tick::Continue => {}
            Tick::Promoted => {
                inner.remove_record(&key);
                info!(key = %key, "Unlock wait finished");
                break;
            }
            Tick::Idle => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn exam(id: i64) -> Exam {
        Exam {
            id,
            name: format!("Đề {}", id),
            code: format!("E{}", id),
            exam_group: Some(1),
            total_time: 45,
            number_of_question: 10,
            description: String::new(),
        }
    }

    fn result(exam: i64) -> ExamResult {
        ExamResult {
            id: exam * 100,
            exam,
            user: 7,
            device: None,
            status: "submitted".to_string(),
            score: None,
            number_of_question: 10,
            number_of_correct_answer: 0,
            created_at: None,
        }
    }

    fn statuses(reconciled: &Reconciled) -> Vec<ExamStatus> {
        reconciled.exams.iter().map(|e| e.status).collect()
    }

    #[test]
    fn test_bootstrap_unlocks_first_pending() {
        let now = Utc::now();
        let r = reconcile(vec![exam(1), exam(2), exam(3)], &[], 120, None, now);
        assert_eq!(
            statuses(&r),
            vec![ExamStatus::Unlocked, ExamStatus::Locked, ExamStatus::Locked]
        );
        assert!(r.remaining_secs.is_none());
        assert!(!r.discard_record);
    }

    #[test]
    fn test_record_within_wait_is_unlocking() {
        let now = Utc::now();
        let record = UnlockRecord {
            exam_id: 2,
            unlock_started_at: now - ChronoDuration::seconds(90),
        };
        let r = reconcile(vec![exam(1), exam(2)], &[result(1)], 120, Some(&record), now);
        assert_eq!(statuses(&r), vec![ExamStatus::Completed, ExamStatus::Unlocking]);
        assert_eq!(r.remaining_secs, Some(30));
        assert!(!r.discard_record);
    }

    #[test]
    fn test_record_past_wait_is_unlocked_and_discarded() {
        let now = Utc::now();
        let record = UnlockRecord {
            exam_id: 2,
            unlock_started_at: now - ChronoDuration::seconds(90),
        };
        let r = reconcile(vec![exam(1), exam(2)], &[result(1)], 60, Some(&record), now);
        assert_eq!(statuses(&r), vec![ExamStatus::Completed, ExamStatus::Unlocked]);
        assert!(r.remaining_secs.is_none());
        assert!(r.discard_record);
    }

    #[test]
    fn test_record_for_completed_exam_falls_back_to_bootstrap() {
        let now = Utc::now();
        let record = UnlockRecord {
            exam_id: 1,
            unlock_started_at: now,
        };
        let r = reconcile(vec![exam(1), exam(2)], &[result(1)], 60, Some(&record), now);
        assert_eq!(statuses(&r), vec![ExamStatus::Completed, ExamStatus::Unlocked]);
        assert!(r.discard_record);
    }

    #[test]
    fn test_future_timestamp_clamped() {
        let now = Utc::now();
        let record = UnlockRecord {
            exam_id: 1,
            unlock_started_at: now + ChronoDuration::seconds(500),
        };
        let r = reconcile(vec![exam(1)], &[], 60, Some(&record), now);
        assert_eq!(r.remaining_secs, Some(60));
    }

    #[test]
    fn test_unlock_key_format() {
        assert_eq!(unlock_key(7, 3), "unlock-7-3");
    }
}
