//! Domain errors for the taskforge orchestration core.

use thiserror::Error;

/// Domain-level errors surfaced by the queue, engine, and event service.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("No handler registered for task type: {0}")]
    HandlerNotFound(String),

    #[error("Task {task_id} timed out after {timeout_secs}s")]
    Timeout { task_id: String, timeout_secs: u64 },

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Task already exists: {0}")]
    DuplicateTask(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
