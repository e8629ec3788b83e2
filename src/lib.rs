//! Taskforge - Task Orchestration Core
//!
//! Taskforge is the in-process orchestration core of a multi-tenant AI-agent
//! backend: a priority task queue, a worker-pool execution engine with
//! timeout and retry handling, and an event bus with a bounded in-memory
//! store.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): models, error taxonomy, and the handler
//!   trait seams
//! - **Service Layer** (`services`): the queue, engine, event store, and
//!   event bus
//! - **Infrastructure Layer** (`infrastructure`): configuration loading and
//!   logging setup
//!
//! # Example
//!
//! ```ignore
//! use taskforge::{
//!     EngineConfig, EventServiceConfig, EventStore, EventStoreConfig,
//!     EventService, TaskDefinition, TaskExecutionEngine, TaskQueue, TaskType,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let events = EventService::new(
//!         EventStore::new(EventStoreConfig::default()),
//!         EventServiceConfig::default(),
//!     );
//!     let engine = TaskExecutionEngine::new(
//!         TaskQueue::new(),
//!         events.clone(),
//!         EngineConfig::default(),
//!     );
//!     events.start().await;
//!     engine.start().await;
//!
//!     let def = TaskDefinition::new("task-1", TaskType::AgentRun).with_agent("agent-1");
//!     engine.submit_task(def).await?;
//!     Ok(())
//! }
//! ```

pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::errors::{EngineError, EngineResult};
pub use domain::models::{
    DeadLetter, EngineConfig, Event, EventPriority, EventServiceConfig, EventStoreConfig,
    EventType, RetryConfig, TaskDefinition, TaskExecution, TaskPriority, TaskResult, TaskStatus,
    TaskType,
};
pub use domain::ports::{EventHandler, TaskHandler};
pub use infrastructure::config::{Config, ConfigError, ConfigLoader};
pub use infrastructure::logging::{LogConfig, LogFormat, Logger};
pub use services::{
    EngineStats, EventService, EventServiceStats, EventStore, EventStoreStats, HandlerStats,
    QueueStats, TaskExecutionEngine, TaskQueue,
};
