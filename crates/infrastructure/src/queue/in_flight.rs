use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use taskq_domain::TaskId;

/// 正在 worker 上执行的任务集合
///
/// 同一个任务ID同一时刻最多只能被一个 worker 执行；reset 会跳过集合中的任务。
#[derive(Debug, Clone, Default)]
pub struct InFlightTracker {
    inner: Arc<Mutex<HashSet<TaskId>>>,
}

impl InFlightTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<TaskId>> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 登记开始执行，任务已在执行中时返回 `None`
    pub fn try_begin(&self, task_id: TaskId) -> Option<InFlightGuard> {
        if self.lock().insert(task_id) {
            Some(InFlightGuard {
                tracker: self.clone(),
                task_id,
            })
        } else {
            None
        }
    }

    pub fn contains(&self, task_id: TaskId) -> bool {
        self.lock().contains(&task_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn snapshot(&self) -> HashSet<TaskId> {
        self.lock().clone()
    }
}

/// 离开作用域时自动从执行集合中移除
#[derive(Debug)]
pub struct InFlightGuard {
    tracker: InFlightTracker,
    task_id: TaskId,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.tracker.lock().remove(&self.task_id);
    }
}
