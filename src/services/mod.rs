//! Service layer: queue, engine, event store, and event bus.

pub mod event_service;
pub mod event_store;
pub mod execution_engine;
pub mod task_queue;

pub use event_service::{EventService, EventServiceStats, HandlerStats};
pub use event_store::{EventStore, EventStoreStats};
pub use execution_engine::{EngineStats, TaskExecutionEngine};
pub use task_queue::{QueueStats, TaskQueue};
