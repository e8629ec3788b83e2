//! Event domain model.
//!
//! Events are immutable records of something that happened, published for
//! observers through the [`EventService`](crate::services::EventService).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Type of a published event.
///
/// Unknown strings fall back to the `Custom` variant so that callers can
/// publish ad-hoc event types without registering them anywhere.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    TaskSubmitted,
    TaskCompleted,
    TaskFailed,
    TaskCancelled,
    AgentCreated,
    AgentUpdated,
    ChatMessage,
    /// Caller-defined event type
    Custom(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::TaskSubmitted => "task.submitted",
            Self::TaskCompleted => "task.completed",
            Self::TaskFailed => "task.failed",
            Self::TaskCancelled => "task.cancelled",
            Self::AgentCreated => "agent.created",
            Self::AgentUpdated => "agent.updated",
            Self::ChatMessage => "chat.message",
            Self::Custom(s) => s,
        }
    }

    /// Parse a type string. Unknown strings become `Custom`.
    pub fn parse(s: &str) -> Self {
        match s {
            "task.submitted" => Self::TaskSubmitted,
            "task.completed" => Self::TaskCompleted,
            "task.failed" => Self::TaskFailed,
            "task.cancelled" => Self::TaskCancelled,
            "agent.created" => Self::AgentCreated,
            "agent.updated" => Self::AgentUpdated,
            "chat.message" => Self::ChatMessage,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl From<String> for EventType {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<EventType> for String {
    fn from(t: EventType) -> Self {
        t.as_str().to_string()
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Delivery priority of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

/// An immutable record of something that happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Generated unique identifier
    pub event_id: Uuid,
    /// Type, used for subscription matching
    pub event_type: EventType,
    /// When the event was published
    pub timestamp: DateTime<Utc>,
    /// Arbitrary payload
    pub data: HashMap<String, Value>,
    /// Owning tenant
    pub tenant_id: Option<String>,
    /// Acting user
    pub user_id: Option<String>,
    /// Related agent
    pub agent_id: Option<String>,
    /// Related task
    pub task_id: Option<String>,
    /// Correlation across related events
    pub correlation_id: Option<Uuid>,
    /// Publishing component
    pub source: Option<String>,
    /// Schema version of the envelope
    pub version: String,
    /// Delivery priority
    pub priority: EventPriority,
}

impl Event {
    /// Create a new event with a generated id and current timestamp.
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            timestamp: Utc::now(),
            data: HashMap::new(),
            tenant_id: None,
            user_id: None,
            agent_id: None,
            task_id: None,
            correlation_id: None,
            source: None,
            version: "1.0".to_string(),
            priority: EventPriority::default(),
        }
    }

    /// Set the payload.
    pub fn with_data(mut self, data: HashMap<String, Value>) -> Self {
        self.data = data;
        self
    }

    /// Set the owning tenant.
    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Set the acting user.
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Set the related agent.
    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    /// Set the related task.
    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    /// Set the correlation id.
    pub fn with_correlation(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Set the publishing component.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Set the delivery priority.
    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Resolve an attribute by name for filter matching.
    ///
    /// Well-known keys resolve to envelope fields; anything else falls
    /// through to the payload map.
    pub fn attribute(&self, key: &str) -> Option<Value> {
        match key {
            "event_type" | "type" => Some(Value::String(self.event_type.as_str().to_string())),
            "tenant_id" => self.tenant_id.clone().map(Value::String),
            "user_id" => self.user_id.clone().map(Value::String),
            "agent_id" => self.agent_id.clone().map(Value::String),
            "task_id" => self.task_id.clone().map(Value::String),
            "source" => self.source.clone().map(Value::String),
            _ => self.data.get(key).cloned(),
        }
    }
}

/// Retry policy for event handler dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total dispatch attempts allowed per (event, handler) pair
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Exponential backoff base, in seconds
    #[serde(default = "default_backoff_base")]
    pub backoff_base: u64,
    /// Backoff cap, in seconds
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base: default_backoff_base(),
            max_backoff_secs: default_max_backoff_secs(),
        }
    }
}

impl RetryConfig {
    /// Backoff delay after the given failed attempt (1-indexed).
    pub fn backoff_delay(&self, attempt: u32) -> std::time::Duration {
        let secs = self
            .backoff_base
            .saturating_pow(attempt)
            .min(self.max_backoff_secs);
        std::time::Duration::from_secs(secs)
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base() -> u64 {
    2
}

fn default_max_backoff_secs() -> u64 {
    30
}

/// An event whose dispatch to a specific handler permanently failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub event: Event,
    pub handler_id: String,
    pub error: String,
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
}
