//! Priority task queue with a full task-state index.
//!
//! Four FIFO levels, scanned highest first at dequeue. The queue also owns
//! the authoritative record of every task it has seen: pending, running,
//! and terminal executions live in separate maps so status lookups never
//! touch the FIFOs.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::task::{
    TaskDefinition, TaskExecution, TaskPriority, TaskResult, TaskStatus,
};

/// Snapshot of queue occupancy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Pending counts keyed by priority name
    pub pending_by_priority: HashMap<String, usize>,
}

struct QueueInner {
    /// One FIFO per priority level, indexed by `level_index`
    levels: [VecDeque<String>; 4],
    /// Tasks waiting for a worker (including those waiting out a backoff)
    pending: HashMap<String, TaskExecution>,
    /// Tasks currently held by a worker
    running: HashMap<String, TaskExecution>,
    /// Terminal tasks: completed, failed, and cancelled
    terminal: HashMap<String, TaskExecution>,
}

impl QueueInner {
    fn contains(&self, task_id: &str) -> bool {
        self.pending.contains_key(task_id)
            || self.running.contains_key(task_id)
            || self.terminal.contains_key(task_id)
    }
}

fn level_index(priority: TaskPriority) -> usize {
    priority as usize - 1
}

/// Shared, thread-safe priority queue. Clones share the same state.
///
/// Cancellation never digs ids out of the FIFOs: a cancelled entry goes
/// stale in place and is skipped at dequeue time.
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<Mutex<QueueInner>>,
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(QueueInner {
                levels: [
                    VecDeque::new(),
                    VecDeque::new(),
                    VecDeque::new(),
                    VecDeque::new(),
                ],
                pending: HashMap::new(),
                running: HashMap::new(),
                terminal: HashMap::new(),
            })),
        }
    }

    /// Add a validated task to its priority level.
    pub async fn enqueue(&self, definition: TaskDefinition) -> EngineResult<String> {
        definition.validate().map_err(EngineError::Validation)?;

        let mut inner = self.inner.lock().await;
        if inner.contains(&definition.id) {
            return Err(EngineError::DuplicateTask(definition.id));
        }

        let task_id = definition.id.clone();
        let priority = definition.priority;
        inner.levels[level_index(priority)].push_back(task_id.clone());
        inner
            .pending
            .insert(task_id.clone(), TaskExecution::new(definition));

        debug!(task_id = %task_id, priority = %priority, "task enqueued");
        Ok(task_id)
    }

    /// Pop the highest-priority pending task and hand it to a worker.
    ///
    /// Stale FIFO entries (tasks cancelled while queued) are discarded
    /// during the scan.
    pub async fn dequeue(&self, worker_id: &str) -> Option<TaskExecution> {
        let mut inner = self.inner.lock().await;
        for priority in TaskPriority::scan_order() {
            let level = level_index(priority);
            while let Some(task_id) = inner.levels[level].pop_front() {
                let Some(mut execution) = inner.pending.remove(&task_id) else {
                    continue; // stale: cancelled or already moved
                };
                execution.mark_running(worker_id);
                inner.running.insert(task_id, execution.clone());
                return Some(execution);
            }
        }
        None
    }

    /// Record a successful result for a running task.
    ///
    /// An unknown id is ignored with a warning: this is how the late result
    /// of a task cancelled mid-flight gets dropped.
    pub async fn complete_task(&self, task_id: &str, result: &TaskResult) {
        let mut inner = self.inner.lock().await;
        let Some(mut execution) = inner.running.remove(task_id) else {
            warn!(task_id = %task_id, "result for unknown task dropped");
            return;
        };
        execution.apply_result(result);
        inner.terminal.insert(task_id.to_string(), execution);
    }

    /// Record a failed attempt for a running task. Returns the attempt
    /// count after recording, or `None` if the task is no longer running.
    pub async fn fail_attempt(&self, task_id: &str, error: &str) -> Option<u32> {
        let mut inner = self.inner.lock().await;
        let execution = inner.running.get_mut(task_id)?;
        execution.record_failure(error);
        Some(execution.current_attempt)
    }

    /// Move a failed task back to pending ahead of a retry. It is NOT put
    /// back on a FIFO yet; `requeue` does that after the backoff elapses.
    pub async fn prepare_retry(&self, task_id: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(mut execution) = inner.running.remove(task_id) {
            execution.reset_for_retry();
            inner.pending.insert(task_id.to_string(), execution);
        }
    }

    /// Put a retrying task back on its priority FIFO. Returns `false` if
    /// the task was cancelled while waiting out its backoff.
    pub async fn requeue(&self, task_id: &str) -> bool {
        let mut inner = self.inner.lock().await;
        let Some(execution) = inner.pending.get(task_id) else {
            return false;
        };
        let level = level_index(execution.definition.priority);
        inner.levels[level].push_back(task_id.to_string());
        true
    }

    /// Mark a running task terminally failed and return its outcome.
    pub async fn fail_task(&self, task_id: &str) -> Option<TaskResult> {
        let mut inner = self.inner.lock().await;
        let mut execution = inner.running.remove(task_id)?;
        execution.mark_failed();
        let result = execution.to_result();
        inner.terminal.insert(task_id.to_string(), execution);
        Some(result)
    }

    /// Cancel a pending or running task. Terminal and unknown tasks return
    /// `false`. A running task keeps executing; its eventual result hits
    /// the unknown-id path in `complete_task` and is dropped.
    pub async fn cancel(&self, task_id: &str) -> bool {
        let mut inner = self.inner.lock().await;
        let execution = inner
            .pending
            .remove(task_id)
            .or_else(|| inner.running.remove(task_id));
        let Some(mut execution) = execution else {
            return false;
        };
        execution.mark_cancelled();
        inner.terminal.insert(task_id.to_string(), execution);
        debug!(task_id = %task_id, "task cancelled");
        true
    }

    /// Current status of a task, wherever it lives.
    pub async fn get_task_status(&self, task_id: &str) -> Option<TaskStatus> {
        self.get_task(task_id).await.map(|execution| execution.status)
    }

    /// Full execution record of a task.
    pub async fn get_task(&self, task_id: &str) -> Option<TaskExecution> {
        let inner = self.inner.lock().await;
        inner
            .pending
            .get(task_id)
            .or_else(|| inner.running.get(task_id))
            .or_else(|| inner.terminal.get(task_id))
            .cloned()
    }

    /// Terminal outcome of a task. `None` while the task is still live.
    pub async fn get_task_result(&self, task_id: &str) -> Option<TaskResult> {
        let inner = self.inner.lock().await;
        inner.terminal.get(task_id).map(TaskExecution::to_result)
    }

    /// Occupancy snapshot.
    pub async fn stats(&self) -> QueueStats {
        let inner = self.inner.lock().await;

        let mut pending_by_priority: HashMap<String, usize> = HashMap::new();
        for execution in inner.pending.values() {
            *pending_by_priority
                .entry(execution.definition.priority.as_str().to_string())
                .or_insert(0) += 1;
        }

        let mut completed = 0;
        let mut failed = 0;
        let mut cancelled = 0;
        for execution in inner.terminal.values() {
            match execution.status {
                TaskStatus::Completed => completed += 1,
                TaskStatus::Failed => failed += 1,
                TaskStatus::Cancelled => cancelled += 1,
                TaskStatus::Pending | TaskStatus::Running => {}
            }
        }

        QueueStats {
            pending: inner.pending.len(),
            running: inner.running.len(),
            completed,
            failed,
            cancelled,
            pending_by_priority,
        }
    }
}
