//! Worker-pool task execution engine.
//!
//! A fixed set of workers polls the queue, resolves a handler by task type,
//! and runs it under a wall-clock timeout. Failed attempts retry with
//! exponential backoff, slept on the worker that failed, so sustained
//! failures reduce effective concurrency. Lifecycle events go through the
//! event service.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::config::EngineConfig;
use crate::domain::models::event::{Event, EventType};
use crate::domain::models::task::{TaskDefinition, TaskExecution, TaskResult, TaskStatus, TaskType};
use crate::domain::ports::TaskHandler;

use super::event_service::EventService;
use super::task_queue::{QueueStats, TaskQueue};

/// Engine counters plus a queue snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStats {
    pub running: bool,
    pub workers: usize,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub total_execution_ms: u64,
    pub total_cost: f64,
    pub queue: QueueStats,
}

#[derive(Default)]
struct EngineMetrics {
    tasks_completed: u64,
    tasks_failed: u64,
    total_execution_ms: u64,
    total_cost: f64,
}

/// Backoff before the next attempt, given how many attempts have failed.
fn backoff_delay(failed_attempts: u32, max_backoff_secs: u64) -> Duration {
    let secs = 2u64.saturating_pow(failed_attempts).min(max_backoff_secs);
    Duration::from_secs(secs)
}

/// Worker pool over a [`TaskQueue`], publishing lifecycle events. Clones
/// share the same queue, registry, and counters.
#[derive(Clone)]
pub struct TaskExecutionEngine {
    queue: TaskQueue,
    events: EventService,
    config: EngineConfig,
    handlers: Arc<RwLock<HashMap<TaskType, Arc<dyn TaskHandler>>>>,
    metrics: Arc<Mutex<EngineMetrics>>,
    running: Arc<AtomicBool>,
    workers: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl TaskExecutionEngine {
    pub fn new(queue: TaskQueue, events: EventService, config: EngineConfig) -> Self {
        Self {
            queue,
            events,
            config,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            metrics: Arc::new(Mutex::new(EngineMetrics::default())),
            running: Arc::new(AtomicBool::new(false)),
            workers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Register (or silently replace) the handler for a task type.
    pub async fn register_task_handler(&self, task_type: TaskType, handler: Arc<dyn TaskHandler>) {
        debug!(task_type = %task_type, "task handler registered");
        self.handlers.write().await.insert(task_type, handler);
    }

    /// Spawn the worker pool. Idempotent.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(workers = self.config.max_concurrent_tasks, "execution engine starting");

        let mut workers = self.workers.lock().await;
        for index in 0..self.config.max_concurrent_tasks {
            let engine = self.clone();
            workers.push(tokio::spawn(async move {
                engine.worker_loop(&format!("worker-{index}")).await;
            }));
        }
    }

    /// Stop the pool. In-flight work is abandoned, not drained.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("execution engine stopping");
        for worker in self.workers.lock().await.drain(..) {
            worker.abort();
        }
    }

    /// Validate and enqueue a task, publishing `task.submitted`.
    #[instrument(skip(self, definition), fields(task_id = %definition.id), err)]
    pub async fn submit_task(&self, definition: TaskDefinition) -> EngineResult<String> {
        let event = Event::new(EventType::TaskSubmitted)
            .with_task(definition.id.clone())
            .with_data(HashMap::from([
                ("task_id".to_string(), json!(definition.id)),
                ("task_type".to_string(), json!(definition.task_type.as_str())),
                ("priority".to_string(), json!(definition.priority.as_str())),
            ]));
        let event = match &definition.tenant_id {
            Some(tenant_id) => event.with_tenant(tenant_id.clone()),
            None => event,
        };

        let task_id = self.queue.enqueue(definition).await?;
        self.events.publish(event.with_source("execution_engine"));
        Ok(task_id)
    }

    /// Cancel a pending or running task. Running handlers are not
    /// interrupted; their late result is dropped by the queue.
    #[instrument(skip(self))]
    pub async fn cancel_task(&self, task_id: &str) -> bool {
        let cancelled = self.queue.cancel(task_id).await;
        if cancelled {
            self.events.publish(
                Event::new(EventType::TaskCancelled)
                    .with_task(task_id.to_string())
                    .with_data(HashMap::from([("task_id".to_string(), json!(task_id))]))
                    .with_source("execution_engine"),
            );
        }
        cancelled
    }

    pub async fn get_task_status(&self, task_id: &str) -> Option<TaskStatus> {
        self.queue.get_task_status(task_id).await
    }

    pub async fn get_task(&self, task_id: &str) -> Option<TaskExecution> {
        self.queue.get_task(task_id).await
    }

    pub async fn get_task_result(&self, task_id: &str) -> Option<TaskResult> {
        self.queue.get_task_result(task_id).await
    }

    /// Counters plus queue occupancy.
    pub async fn stats(&self) -> EngineStats {
        let metrics = self.metrics.lock().await;
        EngineStats {
            running: self.running.load(Ordering::SeqCst),
            workers: self.config.max_concurrent_tasks,
            tasks_completed: metrics.tasks_completed,
            tasks_failed: metrics.tasks_failed,
            total_execution_ms: metrics.total_execution_ms,
            total_cost: metrics.total_cost,
            queue: self.queue.stats().await,
        }
    }

    async fn worker_loop(&self, worker_id: &str) {
        debug!(worker_id, "worker started");
        while self.running.load(Ordering::SeqCst) {
            match self.queue.dequeue(worker_id).await {
                Some(execution) => self.process_task(execution, worker_id).await,
                None => {
                    tokio::time::sleep(Duration::from_millis(self.config.poll_interval_ms)).await;
                }
            }
        }
        debug!(worker_id, "worker stopped");
    }

    /// Run one dequeued task through handler resolution, timeout, and the
    /// retry/backoff path.
    async fn process_task(&self, execution: TaskExecution, worker_id: &str) {
        let definition = execution.definition;
        let task_id = definition.id.clone();

        let handler = self.handlers.read().await.get(&definition.task_type).cloned();
        let Some(handler) = handler else {
            // configuration error: terminal, no retry budget consumed
            let error = EngineError::HandlerNotFound(definition.task_type.as_str().to_string());
            warn!(task_id = %task_id, error = %error, "failing task without handler");
            self.queue.fail_attempt(&task_id, &error.to_string()).await;
            if let Some(result) = self.queue.fail_task(&task_id).await {
                self.record_failure(&definition, &result, worker_id).await;
            }
            return;
        };

        let timeout_secs = definition.effective_timeout(self.config.default_timeout_secs);
        let started = tokio::time::Instant::now();
        let outcome =
            tokio::time::timeout(Duration::from_secs(timeout_secs), handler.run(&definition)).await;

        let error = match outcome {
            Ok(Ok(result)) => {
                let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                self.queue.complete_task(&task_id, &result).await;
                {
                    let mut metrics = self.metrics.lock().await;
                    metrics.tasks_completed += 1;
                    metrics.total_execution_ms += elapsed_ms;
                    metrics.total_cost += result.cost_estimate.unwrap_or(0.0);
                }
                self.publish_lifecycle(
                    EventType::TaskCompleted,
                    &definition,
                    HashMap::from([
                        ("task_id".to_string(), json!(task_id)),
                        ("execution_time_ms".to_string(), json!(elapsed_ms)),
                        ("cost_estimate".to_string(), json!(result.cost_estimate)),
                    ]),
                );
                debug!(task_id = %task_id, elapsed_ms, "task completed");
                return;
            }
            Ok(Err(err)) => EngineError::Execution(err.to_string()),
            Err(_) => EngineError::Timeout {
                task_id: task_id.clone(),
                timeout_secs,
            },
        };

        let Some(failed_attempts) = self.queue.fail_attempt(&task_id, &error.to_string()).await
        else {
            // cancelled while running; drop the outcome
            return;
        };

        if failed_attempts <= definition.max_retries {
            let delay = backoff_delay(failed_attempts, self.config.max_backoff_secs);
            warn!(
                task_id = %task_id,
                attempt = failed_attempts,
                delay_secs = delay.as_secs(),
                error = %error,
                "task attempt failed, backing off before retry"
            );
            self.queue.prepare_retry(&task_id).await;
            tokio::time::sleep(delay).await;
            if !self.queue.requeue(&task_id).await {
                debug!(task_id = %task_id, "task cancelled during backoff");
            }
        } else if let Some(result) = self.queue.fail_task(&task_id).await {
            warn!(
                task_id = %task_id,
                attempts = failed_attempts,
                error = %error,
                "task exhausted retries"
            );
            self.record_failure(&definition, &result, worker_id).await;
        }
    }

    async fn record_failure(
        &self,
        definition: &TaskDefinition,
        result: &TaskResult,
        worker_id: &str,
    ) {
        self.metrics.lock().await.tasks_failed += 1;
        self.publish_lifecycle(
            EventType::TaskFailed,
            definition,
            HashMap::from([
                ("task_id".to_string(), json!(definition.id)),
                ("attempts".to_string(), json!(result.error_history.len())),
                ("error".to_string(), json!(result.error_message)),
                ("worker_id".to_string(), json!(worker_id)),
            ]),
        );
    }

    fn publish_lifecycle(
        &self,
        event_type: EventType,
        definition: &TaskDefinition,
        data: HashMap<String, Value>,
    ) {
        let event = Event::new(event_type)
            .with_task(definition.id.clone())
            .with_data(data)
            .with_source("execution_engine");
        let event = match &definition.tenant_id {
            Some(tenant_id) => event.with_tenant(tenant_id.clone()),
            None => event,
        };
        self.events.publish(event);
    }
}
