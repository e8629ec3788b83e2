//! End-to-end tests for the execution engine: submit through completion,
//! retry/backoff behavior, priority ordering, and cancellation semantics.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Mutex;

use taskforge::{
    EngineConfig, Event, EventHandler, EventService, EventServiceConfig, EventStore,
    EventStoreConfig, EventType, TaskDefinition, TaskExecutionEngine, TaskHandler, TaskPriority,
    TaskQueue, TaskResult, TaskStatus, TaskType,
};

fn harness(max_workers: usize) -> (TaskExecutionEngine, EventService) {
    let events = EventService::new(
        EventStore::new(EventStoreConfig::default()),
        EventServiceConfig::default(),
    );
    let engine = TaskExecutionEngine::new(
        TaskQueue::new(),
        events.clone(),
        EngineConfig {
            max_concurrent_tasks: max_workers,
            poll_interval_ms: 10,
            default_timeout_secs: 300,
            max_backoff_secs: 30,
        },
    );
    (engine, events)
}

fn agent_task(id: &str) -> TaskDefinition {
    TaskDefinition::new(id, TaskType::AgentRun).with_agent("agent-1")
}

async fn wait_for_terminal(engine: &TaskExecutionEngine, task_id: &str) -> TaskStatus {
    for _ in 0..500 {
        if let Some(status) = engine.get_task_status(task_id).await {
            if status.is_terminal() {
                return status;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("task {task_id} never reached a terminal state");
}

struct EchoHandler;

#[async_trait]
impl TaskHandler for EchoHandler {
    async fn run(&self, task: &TaskDefinition) -> anyhow::Result<TaskResult> {
        Ok(TaskResult::success(task.id.clone(), json!({"echo": task.id})).with_cost(0.01))
    }
}

/// Fails the first `fail_first` invocations, succeeds afterwards. Records
/// the paused-clock time of each attempt.
struct FlakyHandler {
    calls: AtomicU32,
    fail_first: u32,
    attempt_times: Mutex<Vec<tokio::time::Instant>>,
}

impl FlakyHandler {
    fn new(fail_first: u32) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            fail_first,
            attempt_times: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskHandler for FlakyHandler {
    async fn run(&self, task: &TaskDefinition) -> anyhow::Result<TaskResult> {
        self.attempt_times.lock().await.push(tokio::time::Instant::now());
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            anyhow::bail!("attempt {call} failed");
        }
        Ok(TaskResult::success(task.id.clone(), json!({"attempt": call})))
    }
}

/// Records the order in which tasks ran.
struct OrderingHandler {
    order: Mutex<Vec<String>>,
}

#[async_trait]
impl TaskHandler for OrderingHandler {
    async fn run(&self, task: &TaskDefinition) -> anyhow::Result<TaskResult> {
        self.order.lock().await.push(task.id.clone());
        Ok(TaskResult::success(task.id.clone(), json!({})))
    }
}

/// Counts `task.failed` events and remembers their task ids.
struct FailureObserver {
    fired: AtomicU32,
    task_ids: Mutex<Vec<String>>,
}

impl FailureObserver {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            fired: AtomicU32::new(0),
            task_ids: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl EventHandler for FailureObserver {
    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        self.fired.fetch_add(1, Ordering::SeqCst);
        if let Some(task_id) = &event.task_id {
            self.task_ids.lock().await.push(task_id.clone());
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_submit_runs_to_completion() {
    let (engine, events) = harness(2);
    engine
        .register_task_handler(TaskType::AgentRun, Arc::new(EchoHandler))
        .await;
    events.start().await;
    engine.start().await;

    let task_id = engine.submit_task(agent_task("t-echo")).await.unwrap();
    assert_eq!(wait_for_terminal(&engine, &task_id).await, TaskStatus::Completed);

    let result = engine.get_task_result(&task_id).await.unwrap();
    assert_eq!(result.status, TaskStatus::Completed);
    assert_eq!(result.output, Some(json!({"echo": "t-echo"})));
    assert_eq!(result.cost_estimate, Some(0.01));

    // lifecycle events reach the store
    tokio::time::sleep(Duration::from_millis(200)).await;
    let submitted = events
        .get_events(Some(&EventType::TaskSubmitted), None, 10, None)
        .await;
    let completed = events
        .get_events(Some(&EventType::TaskCompleted), None, 10, None)
        .await;
    assert_eq!(submitted.len(), 1);
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].task_id.as_deref(), Some("t-echo"));

    let stats = engine.stats().await;
    assert_eq!(stats.tasks_completed, 1);
    assert_eq!(stats.tasks_failed, 0);

    engine.stop().await;
    events.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_retry_bound_is_max_retries_plus_one() {
    let (engine, events) = harness(1);
    let handler = FlakyHandler::new(u32::MAX);
    engine
        .register_task_handler(TaskType::AgentRun, handler.clone())
        .await;

    let observer = FailureObserver::new();
    events
        .register_handler("observer", vec![EventType::TaskFailed], observer.clone(), None)
        .await;

    events.start().await;
    engine.start().await;

    let task_id = engine
        .submit_task(agent_task("t-doomed").with_max_retries(2))
        .await
        .unwrap();
    assert_eq!(wait_for_terminal(&engine, &task_id).await, TaskStatus::Failed);

    // 1 initial attempt + 2 retries
    assert_eq!(handler.calls(), 3);
    let result = engine.get_task_result(&task_id).await.unwrap();
    assert_eq!(result.error_history.len(), 3);

    // exactly one task.failed event with the right task id
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(observer.fired.load(Ordering::SeqCst), 1);
    assert_eq!(*observer.task_ids.lock().await, vec![task_id.clone()]);

    engine.stop().await;
    events.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_backoff_doubles_between_attempts() {
    let (engine, events) = harness(1);
    let handler = FlakyHandler::new(2);
    engine
        .register_task_handler(TaskType::AgentRun, handler.clone())
        .await;
    events.start().await;
    engine.start().await;

    let task_id = engine.submit_task(agent_task("t-flaky")).await.unwrap();
    assert_eq!(wait_for_terminal(&engine, &task_id).await, TaskStatus::Completed);

    assert_eq!(handler.calls(), 3);
    let times = handler.attempt_times.lock().await;
    // 2s before attempt 2, 4s before attempt 3 (plus requeue latency)
    assert!(times[1] - times[0] >= Duration::from_secs(2));
    assert!(times[1] - times[0] < Duration::from_secs(4));
    assert!(times[2] - times[1] >= Duration::from_secs(4));
    assert!(times[2] - times[1] < Duration::from_secs(8));

    let result = engine.get_task_result(&task_id).await.unwrap();
    assert_eq!(result.error_history.len(), 2);

    engine.stop().await;
    events.stop().await;
}

#[tokio::test]
async fn test_urgent_dequeued_before_low() {
    let (engine, events) = harness(1);
    let handler = Arc::new(OrderingHandler {
        order: Mutex::new(Vec::new()),
    });
    engine
        .register_task_handler(TaskType::AgentRun, handler.clone())
        .await;
    events.start().await;

    // enqueue before any worker is running so the scan order decides
    engine
        .submit_task(agent_task("t-low").with_priority(TaskPriority::Low))
        .await
        .unwrap();
    engine
        .submit_task(agent_task("t-urgent").with_priority(TaskPriority::Urgent))
        .await
        .unwrap();
    engine.start().await;

    wait_for_terminal(&engine, "t-low").await;
    wait_for_terminal(&engine, "t-urgent").await;

    let order = handler.order.lock().await;
    assert_eq!(*order, vec!["t-urgent".to_string(), "t-low".to_string()]);

    engine.stop().await;
    events.stop().await;
}

#[tokio::test]
async fn test_missing_handler_fails_without_retries() {
    let (engine, events) = harness(1);
    events.start().await;
    engine.start().await;

    let task_id = engine
        .submit_task(agent_task("t-orphan").with_max_retries(5))
        .await
        .unwrap();
    assert_eq!(wait_for_terminal(&engine, &task_id).await, TaskStatus::Failed);

    let result = engine.get_task_result(&task_id).await.unwrap();
    assert_eq!(result.error_history.len(), 1, "no retry budget consumed");
    assert!(result
        .error_message
        .unwrap()
        .contains("No handler registered"));

    engine.stop().await;
    events.stop().await;
}

#[tokio::test]
async fn test_cancel_pending_and_terminal_semantics() {
    let (engine, events) = harness(1);
    engine
        .register_task_handler(TaskType::AgentRun, Arc::new(EchoHandler))
        .await;
    events.start().await;

    // engine not started: task stays pending and can be cancelled
    let task_id = engine.submit_task(agent_task("t-parked")).await.unwrap();
    assert!(engine.cancel_task(&task_id).await);
    assert_eq!(
        engine.get_task_status(&task_id).await,
        Some(TaskStatus::Cancelled)
    );
    // second cancel is a no-op on a terminal task
    assert!(!engine.cancel_task(&task_id).await);

    engine.start().await;
    let done_id = engine.submit_task(agent_task("t-done")).await.unwrap();
    assert_eq!(wait_for_terminal(&engine, &done_id).await, TaskStatus::Completed);
    assert!(!engine.cancel_task(&done_id).await);
    assert_eq!(
        engine.get_task_status(&done_id).await,
        Some(TaskStatus::Completed)
    );

    tokio::time::sleep(Duration::from_millis(200)).await;
    let cancelled = events
        .get_events(Some(&EventType::TaskCancelled), None, 10, None)
        .await;
    assert_eq!(cancelled.len(), 1);
    assert_eq!(cancelled[0].task_id.as_deref(), Some("t-parked"));

    engine.stop().await;
    events.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_task_timeout_counts_as_failed_attempt() {
    struct SleepyHandler;

    #[async_trait]
    impl TaskHandler for SleepyHandler {
        async fn run(&self, task: &TaskDefinition) -> anyhow::Result<TaskResult> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(TaskResult::success(task.id.clone(), json!({})))
        }
    }

    let (engine, events) = harness(1);
    engine
        .register_task_handler(TaskType::AgentRun, Arc::new(SleepyHandler))
        .await;
    events.start().await;
    engine.start().await;

    let task_id = engine
        .submit_task(agent_task("t-slow").with_timeout(1).with_max_retries(0))
        .await
        .unwrap();
    assert_eq!(wait_for_terminal(&engine, &task_id).await, TaskStatus::Failed);

    let result = engine.get_task_result(&task_id).await.unwrap();
    assert_eq!(result.error_history.len(), 1);
    assert!(result.error_message.unwrap().contains("timed out after 1s"));

    engine.stop().await;
    events.stop().await;
}

#[tokio::test]
async fn test_duplicate_and_invalid_submissions_rejected() {
    let (engine, _events) = harness(1);
    let mut input = HashMap::new();
    input.insert("config".to_string(), json!({"model": "m"}));

    engine
        .submit_task(TaskDefinition::new("t-1", TaskType::ChatCompletion).with_input(input))
        .await
        .unwrap();

    assert!(engine.submit_task(agent_task("t-1")).await.is_err());
    assert!(engine
        .submit_task(TaskDefinition::new("", TaskType::AgentRun))
        .await
        .is_err());
}
