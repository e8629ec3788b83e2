//! Domain models.

pub mod config;
pub mod event;
pub mod task;

pub use config::{EngineConfig, EventServiceConfig, EventStoreConfig};
pub use event::{DeadLetter, Event, EventPriority, EventType, RetryConfig};
pub use task::{TaskDefinition, TaskExecution, TaskPriority, TaskResult, TaskStatus, TaskType};
