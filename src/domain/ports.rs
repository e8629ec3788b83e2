//! Trait seams for caller-supplied handler code.

use async_trait::async_trait;

use super::models::event::Event;
use super::models::task::{TaskDefinition, TaskResult};

/// Executes tasks of a registered type.
///
/// Implementations are shared across workers and must be safe to call
/// concurrently. A returned `Err` counts as a failed attempt and is subject
/// to the engine's retry policy.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(&self, task: &TaskDefinition) -> anyhow::Result<TaskResult>;
}

/// Reacts to published events.
///
/// Handlers for the same event run concurrently; a returned `Err` triggers
/// the per-handler retry policy and, once exhausted, a dead-letter entry.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &Event) -> anyhow::Result<()>;
}
