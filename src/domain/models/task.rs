//! Task domain model.
//!
//! A task is a unit of orchestrated work submitted with a priority and
//! execution constraints. Definitions are immutable after submission;
//! mutable execution state lives in [`TaskExecution`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Status of a task in the execution pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Queued, waiting for a worker (or waiting out a retry backoff)
    #[default]
    Pending,
    /// Currently being executed by a worker
    Running,
    /// Completed successfully
    Completed,
    /// Failed terminally (retry budget exhausted or configuration error)
    Failed,
    /// Cancelled before completion
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" | "complete" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Priority level for tasks. Higher levels are always dequeued first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low = 1,
    #[default]
    Normal = 2,
    High = 3,
    Urgent = 4,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "normal" => Some(Self::Normal),
            "high" => Some(Self::High),
            "urgent" => Some(Self::Urgent),
            _ => None,
        }
    }

    /// All levels, highest first. This is the dequeue scan order.
    pub const fn scan_order() -> [Self; 4] {
        [Self::Urgent, Self::High, Self::Normal, Self::Low]
    }
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of work a task performs. Determines which registered handler runs it.
///
/// Unknown strings round-trip through the `Custom` variant rather than
/// failing deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskType {
    /// Run an AI agent against its configured provider
    AgentRun,
    /// Single chat completion round-trip
    ChatCompletion,
    /// Compute embeddings for a batch of inputs
    Embedding,
    /// Export tenant data
    DataExport,
    /// Internal housekeeping
    Maintenance,
    /// Caller-defined task type
    Custom(String),
}

impl TaskType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::AgentRun => "agent_run",
            Self::ChatCompletion => "chat_completion",
            Self::Embedding => "embedding",
            Self::DataExport => "data_export",
            Self::Maintenance => "maintenance",
            Self::Custom(s) => s,
        }
    }

    /// Parse a type string. Unknown strings become `Custom`.
    pub fn parse(s: &str) -> Self {
        match s {
            "agent_run" => Self::AgentRun,
            "chat_completion" => Self::ChatCompletion,
            "embedding" => Self::Embedding,
            "data_export" => Self::DataExport,
            "maintenance" => Self::Maintenance,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl From<String> for TaskType {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<TaskType> for String {
    fn from(t: TaskType) -> Self {
        t.as_str().to_string()
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Immutable description of a unit of work.
///
/// Re-enqueued verbatim on retry; nothing here changes after submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    /// Caller-assigned unique identifier
    pub id: String,
    /// Kind of work; resolves the handler at dequeue time
    pub task_type: TaskType,
    /// Scheduling priority
    pub priority: TaskPriority,
    /// Opaque input payload passed to the handler
    pub input: HashMap<String, Value>,
    /// Agent this task runs against (or a `config` key in `input`)
    pub agent_id: Option<String>,
    /// Owning tenant
    pub tenant_id: Option<String>,
    /// Submitting user
    pub user_id: Option<String>,
    /// Wall-clock execution budget; engine default applies when unset or zero
    pub timeout_secs: Option<u64>,
    /// Retries allowed after the initial attempt
    pub max_retries: u32,
    /// Declared dependencies. Recorded but not actively resolved.
    pub depends_on: Vec<String>,
    /// When submitted
    pub created_at: DateTime<Utc>,
}

impl TaskDefinition {
    /// Create a new definition with defaults (normal priority, 3 retries).
    pub fn new(id: impl Into<String>, task_type: TaskType) -> Self {
        Self {
            id: id.into(),
            task_type,
            priority: TaskPriority::default(),
            input: HashMap::new(),
            agent_id: None,
            tenant_id: None,
            user_id: None,
            timeout_secs: None,
            max_retries: 3,
            depends_on: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Set priority.
    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the input payload.
    pub fn with_input(mut self, input: HashMap<String, Value>) -> Self {
        self.input = input;
        self
    }

    /// Set the agent reference.
    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    /// Set the owning tenant.
    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Set the submitting user.
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Set the execution timeout in seconds.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Set the retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Declare a dependency on another task.
    pub fn with_dependency(mut self, task_id: impl Into<String>) -> Self {
        let task_id = task_id.into();
        if task_id != self.id && !self.depends_on.contains(&task_id) {
            self.depends_on.push(task_id);
        }
        self
    }

    /// Effective timeout, falling back to the engine default when unset
    /// or non-positive.
    pub fn effective_timeout(&self, default_secs: u64) -> u64 {
        match self.timeout_secs {
            Some(secs) if secs > 0 => secs,
            _ => default_secs,
        }
    }

    /// Validate a definition before it may enter the queue.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("task id cannot be empty".to_string());
        }
        if self.agent_id.is_none() && !self.input.contains_key("config") {
            return Err(format!(
                "task {} has neither an agent_id nor a config input",
                self.id
            ));
        }
        Ok(())
    }
}

/// Mutable execution state wrapped around an immutable definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskExecution {
    /// The submitted definition
    pub definition: TaskDefinition,
    /// Current status
    pub status: TaskStatus,
    /// Attempts that have failed so far (monotonically non-decreasing)
    pub current_attempt: u32,
    /// When the current (or last) attempt started
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal state
    pub completed_at: Option<DateTime<Utc>>,
    /// Handler output on success
    pub result: Option<Value>,
    /// One entry per failed attempt
    pub error_history: Vec<String>,
    /// Worker that last picked this task up
    pub worker_id: Option<String>,
    /// Cost reported by the handler
    pub cost_estimate: Option<f64>,
    /// Token usage reported by the handler
    pub token_usage: Option<u64>,
}

impl TaskExecution {
    /// Wrap a definition in fresh pending state.
    pub fn new(definition: TaskDefinition) -> Self {
        Self {
            definition,
            status: TaskStatus::Pending,
            current_attempt: 0,
            started_at: None,
            completed_at: None,
            result: None,
            error_history: Vec::new(),
            worker_id: None,
            cost_estimate: None,
            token_usage: None,
        }
    }

    /// Move to running under the given worker.
    pub fn mark_running(&mut self, worker_id: &str) {
        self.status = TaskStatus::Running;
        self.started_at = Some(Utc::now());
        self.worker_id = Some(worker_id.to_string());
    }

    /// Record a failed attempt.
    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.current_attempt += 1;
        self.error_history.push(error.into());
    }

    /// Reset to pending ahead of a retry. The attempt counter and error
    /// history survive; the start timestamp does not.
    pub fn reset_for_retry(&mut self) {
        self.status = TaskStatus::Pending;
        self.started_at = None;
        self.worker_id = None;
    }

    /// Apply a successful handler result and mark completed.
    pub fn apply_result(&mut self, result: &TaskResult) {
        self.status = TaskStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.result = result.output.clone();
        self.cost_estimate = result.cost_estimate;
        self.token_usage = result.token_usage;
    }

    /// Mark terminally failed.
    pub fn mark_failed(&mut self) {
        self.status = TaskStatus::Failed;
        self.completed_at = Some(Utc::now());
    }

    /// Mark cancelled.
    pub fn mark_cancelled(&mut self) {
        self.status = TaskStatus::Cancelled;
        self.completed_at = Some(Utc::now());
    }

    /// Wall-clock execution time of the last attempt, if both ends are known.
    pub fn execution_time_ms(&self) -> Option<u64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => {
                u64::try_from((end - start).num_milliseconds().max(0)).ok()
            }
            _ => None,
        }
    }

    /// Last recorded error, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.error_history.last().map(String::as_str)
    }

    /// Build the user-visible terminal outcome.
    pub fn to_result(&self) -> TaskResult {
        TaskResult {
            task_id: self.definition.id.clone(),
            status: self.status,
            output: self.result.clone(),
            error_message: self.last_error().map(str::to_string),
            error_history: self.error_history.clone(),
            started_at: self.started_at,
            completed_at: self.completed_at,
            execution_time_ms: self.execution_time_ms().unwrap_or(0),
            cost_estimate: self.cost_estimate,
            token_usage: self.token_usage,
        }
    }
}

/// Terminal outcome of a task, as returned by handlers and exposed to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub status: TaskStatus,
    pub output: Option<Value>,
    pub error_message: Option<String>,
    /// One entry per failed attempt (empty for handler-built results)
    pub error_history: Vec<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub execution_time_ms: u64,
    pub cost_estimate: Option<f64>,
    pub token_usage: Option<u64>,
}

impl TaskResult {
    /// Successful outcome with an output payload.
    pub fn success(task_id: impl Into<String>, output: Value) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Completed,
            output: Some(output),
            error_message: None,
            error_history: Vec::new(),
            started_at: None,
            completed_at: Some(Utc::now()),
            execution_time_ms: 0,
            cost_estimate: None,
            token_usage: None,
        }
    }

    /// Failed outcome with an error message.
    pub fn failure(task_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Failed,
            output: None,
            error_message: Some(error.into()),
            error_history: Vec::new(),
            started_at: None,
            completed_at: Some(Utc::now()),
            execution_time_ms: 0,
            cost_estimate: None,
            token_usage: None,
        }
    }

    /// Attach a cost estimate.
    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost_estimate = Some(cost);
        self
    }

    /// Attach token usage.
    pub fn with_tokens(mut self, tokens: u64) -> Self {
        self.token_usage = Some(tokens);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_definition() -> TaskDefinition {
        TaskDefinition::new("t-1", TaskType::AgentRun).with_agent("agent-1")
    }

    #[test]
    fn test_priority_ordering() {
        assert!(TaskPriority::Urgent > TaskPriority::High);
        assert!(TaskPriority::High > TaskPriority::Normal);
        assert!(TaskPriority::Normal > TaskPriority::Low);
        assert_eq!(
            TaskPriority::scan_order(),
            [
                TaskPriority::Urgent,
                TaskPriority::High,
                TaskPriority::Normal,
                TaskPriority::Low
            ]
        );
    }

    #[test]
    fn test_task_type_custom_fallback() {
        assert_eq!(TaskType::parse("agent_run"), TaskType::AgentRun);
        assert_eq!(
            TaskType::parse("video_transcode"),
            TaskType::Custom("video_transcode".to_string())
        );
        assert_eq!(TaskType::parse("video_transcode").as_str(), "video_transcode");
    }

    #[test]
    fn test_task_type_serde_round_trip() {
        let t: TaskType = serde_json::from_str("\"embedding\"").unwrap();
        assert_eq!(t, TaskType::Embedding);

        let t: TaskType = serde_json::from_str("\"something_else\"").unwrap();
        assert_eq!(t, TaskType::Custom("something_else".to_string()));
        assert_eq!(serde_json::to_string(&t).unwrap(), "\"something_else\"");
    }

    #[test]
    fn test_definition_validation() {
        assert!(test_definition().validate().is_ok());

        let no_id = TaskDefinition::new("", TaskType::AgentRun).with_agent("a");
        assert!(no_id.validate().is_err());

        let no_agent = TaskDefinition::new("t-2", TaskType::AgentRun);
        assert!(no_agent.validate().is_err());

        let mut input = HashMap::new();
        input.insert("config".to_string(), json!({"model": "m"}));
        let config_ref = TaskDefinition::new("t-3", TaskType::AgentRun).with_input(input);
        assert!(config_ref.validate().is_ok());
    }

    #[test]
    fn test_effective_timeout_defaults() {
        let def = test_definition();
        assert_eq!(def.effective_timeout(300), 300);

        let def = test_definition().with_timeout(0);
        assert_eq!(def.effective_timeout(300), 300);

        let def = test_definition().with_timeout(15);
        assert_eq!(def.effective_timeout(300), 15);
    }

    #[test]
    fn test_self_dependency_ignored() {
        let def = test_definition().with_dependency("t-1").with_dependency("t-0");
        assert_eq!(def.depends_on, vec!["t-0".to_string()]);
    }

    #[test]
    fn test_execution_lifecycle() {
        let mut exec = TaskExecution::new(test_definition());
        assert_eq!(exec.status, TaskStatus::Pending);

        exec.mark_running("worker-0");
        assert_eq!(exec.status, TaskStatus::Running);
        assert!(exec.started_at.is_some());
        assert_eq!(exec.worker_id.as_deref(), Some("worker-0"));

        exec.record_failure("boom");
        assert_eq!(exec.current_attempt, 1);
        assert_eq!(exec.error_history, vec!["boom".to_string()]);

        exec.reset_for_retry();
        assert_eq!(exec.status, TaskStatus::Pending);
        assert!(exec.started_at.is_none());
        assert_eq!(exec.current_attempt, 1);

        exec.mark_running("worker-1");
        let result = TaskResult::success("t-1", json!({"ok": true})).with_cost(0.02);
        exec.apply_result(&result);
        assert_eq!(exec.status, TaskStatus::Completed);
        assert!(exec.status.is_terminal());
        assert_eq!(exec.cost_estimate, Some(0.02));
    }

    #[test]
    fn test_to_result_carries_error_history() {
        let mut exec = TaskExecution::new(test_definition());
        exec.mark_running("worker-0");
        exec.record_failure("first");
        exec.record_failure("second");
        exec.mark_failed();

        let result = exec.to_result();
        assert_eq!(result.status, TaskStatus::Failed);
        assert_eq!(result.error_message.as_deref(), Some("second"));
        assert_eq!(result.error_history.len(), 2);
    }
}
