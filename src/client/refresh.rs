//! 单飞刷新闸门
//! `Idle` / `Refreshing` 状态保存在唯一的字段中；刷新进行中到达的调用者
//! 进入等待队列，由 `flush` 统一以同一个结果唤醒。

use std::sync::{Mutex, MutexGuard};
use tokio::sync::oneshot;

use crate::error::{AppError, Result};

/// 一次刷新的结果：新的访问令牌或刷新错误
pub type RefreshOutcome = Result<String>;

/// 等待中的请求续体
#[derive(Default)]
pub struct PendingQueue {
    waiters: Vec<oneshot::Sender<RefreshOutcome>>,
}

impl PendingQueue {
    /// 加入队列，返回等待结果的接收端
    pub fn enqueue(&mut self) -> oneshot::Receiver<RefreshOutcome> {
        let (tx, rx) = oneshot::channel();
        self.waiters.push(tx);
        rx
    }

    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    /// 以同一个结果唤醒所有等待者，每个续体恰好调用一次
    pub fn flush(self, outcome: &RefreshOutcome) -> usize {
        let count = self.waiters.len();
        for waiter in self.waiters {
            // 接收端已被丢弃（调用方取消）时忽略
            let _ = waiter.send(outcome.clone());
        }
        count
    }
}

/// 刷新状态
pub enum RefreshState {
    Idle,
    Refreshing(PendingQueue),
}

/// 调用 `RefreshGate::join` 的结果
pub enum Ticket {
    /// 由调用者发起唯一的刷新请求
    Leader,
    /// 已有刷新在进行，等待其结果
    Waiter(oneshot::Receiver<RefreshOutcome>),
}

/// 保证同一时间最多一个刷新请求在途
pub struct RefreshGate {
    state: Mutex<RefreshState>,
}

impl RefreshGate {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RefreshState::Idle),
        }
    }

    // 锁从不跨越 await 持有
    fn lock(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(*self.lock(), RefreshState::Refreshing(_))
    }

    /// 已排队的等待者数量
    pub fn waiting(&self) -> usize {
        match &*self.lock() {
            RefreshState::Idle => 0,
            RefreshState::Refreshing(queue) => queue.len(),
        }
    }

    /// `Idle` 时转入 `Refreshing` 并成为发起者；否则排队等待
    pub fn join(&self) -> Ticket {
        let mut state = self.lock();
        match &mut *state {
            RefreshState::Idle => {
                *state = RefreshState::Refreshing(PendingQueue::default());
                Ticket::Leader
            }
            RefreshState::Refreshing(queue) => Ticket::Waiter(queue.enqueue()),
        }
    }

    /// 回到 `Idle` 并以结果清空队列，返回被唤醒的等待者数量
    pub fn settle(&self, outcome: &RefreshOutcome) -> usize {
        let previous = std::mem::replace(&mut *self.lock(), RefreshState::Idle);
        match previous {
            RefreshState::Refreshing(queue) => queue.flush(outcome),
            RefreshState::Idle => 0,
        }
    }

    /// 发起者守卫：发起者的 future 被中途丢弃时以失败结算，避免等待者挂起
    pub fn leader_guard(&self) -> LeaderGuard<'_> {
        LeaderGuard {
            gate: self,
            settled: false,
        }
    }
}

impl Default for RefreshGate {
    fn default() -> Self {
        Self::new()
    }
}

pub struct LeaderGuard<'a> {
    gate: &'a RefreshGate,
    settled: bool,
}

impl LeaderGuard<'_> {
    pub fn settle(mut self, outcome: &RefreshOutcome) -> usize {
        self.settled = true;
        self.gate.settle(outcome)
    }
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            tracing::warn!("Token refresh abandoned before settling");
            self.gate.settle(&Err(AppError::RefreshFailure(
                "refresh cancelled".to_string(),
            )));
        }
    }
}

/// 等待发起者的结果；发送端被丢弃视为刷新失败
pub async fn wait(receiver: oneshot::Receiver<RefreshOutcome>) -> RefreshOutcome {
    receiver
        .await
        .unwrap_or_else(|_| Err(AppError::RefreshFailure("refresh abandoned".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_single_leader_and_waiters_share_outcome() {
        let gate = RefreshGate::new();

        assert!(matches!(gate.join(), Ticket::Leader));
        assert!(gate.is_refreshing());

        let waiters: Vec<_> = (0..3)
            .map(|_| match gate.join() {
                Ticket::Waiter(rx) => rx,
                Ticket::Leader => panic!("second leader while refreshing"),
            })
            .collect();
        assert_eq!(gate.waiting(), 3);

        let woken = gate.settle(&Ok("new-token".to_string()));
        assert_eq!(woken, 3);
        assert!(!gate.is_refreshing());

        for rx in waiters {
            assert_eq!(wait(rx).await.unwrap(), "new-token");
        }
    }

    #[tokio::test]
    async fn test_failure_rejects_every_waiter() {
        let gate = RefreshGate::new();
        assert!(matches!(gate.join(), Ticket::Leader));

        let waiters: Vec<_> = (0..2)
            .filter_map(|_| match gate.join() {
                Ticket::Waiter(rx) => Some(rx),
                Ticket::Leader => None,
            })
            .collect();
        assert_eq!(waiters.len(), 2);

        gate.settle(&Err(AppError::RefreshFailure("401".to_string())));

        for rx in waiters {
            assert_eq!(
                wait(rx).await.unwrap_err(),
                AppError::RefreshFailure("401".to_string())
            );
        }
    }

    #[tokio::test]
    async fn test_dropped_leader_settles_with_failure() {
        let gate = RefreshGate::new();
        assert!(matches!(gate.join(), Ticket::Leader));
        let guard = gate.leader_guard();

        let rx = match gate.join() {
            Ticket::Waiter(rx) => rx,
            Ticket::Leader => panic!("expected waiter"),
        };

        drop(guard);

        assert!(!gate.is_refreshing());
        assert!(wait(rx).await.unwrap_err().is_session_fatal());
    }

    #[test]
    fn test_gate_reusable_after_settle() {
        let gate = RefreshGate::new();
        assert!(matches!(gate.join(), Ticket::Leader));
        assert_eq!(gate.settle(&Ok("t".to_string())), 0);
        assert!(matches!(gate.join(), Ticket::Leader));
    }
}
