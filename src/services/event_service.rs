//! Event bus: ingestion channel, single processor loop, handler fan-out.
//!
//! Publishing is fire-and-forget: events go onto an unbounded channel and
//! the publisher gets the event id back immediately. Exactly one processor
//! loop drains the channel, persists each event to the store, then fans it
//! out concurrently to every matching handler. A handler failure is retried
//! with exponential backoff; exhaustion lands the event in the dead-letter
//! queue. Handler failures never reach the publisher.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::models::config::EventServiceConfig;
use crate::domain::models::event::{DeadLetter, Event, EventType};
use crate::domain::ports::EventHandler;

use super::event_store::{EventStore, EventStoreStats};

/// Interval between retention sweeps of the store.
const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// A registered event handler with its subscription and counters.
struct HandlerRegistration {
    handler: Arc<dyn EventHandler>,
    event_types: HashSet<EventType>,
    /// Every key/value pair must match the event for dispatch to happen
    filters: HashMap<String, Value>,
    enabled: bool,
    processed: u64,
    failed: u64,
    last_processed: Option<DateTime<Utc>>,
}

impl HandlerRegistration {
    fn matches(&self, event: &Event) -> bool {
        if !self.enabled || !self.event_types.contains(&event.event_type) {
            return false;
        }
        self.filters
            .iter()
            .all(|(key, expected)| event.attribute(key).as_ref() == Some(expected))
    }
}

/// Per-handler counters exposed through `service_stats`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerStats {
    pub handler_id: String,
    pub enabled: bool,
    pub event_types: Vec<String>,
    pub processed: u64,
    pub failed: u64,
    pub last_processed: Option<DateTime<Utc>>,
}

/// Snapshot of the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventServiceStats {
    pub running: bool,
    /// Events accepted but not yet drained by the processor
    pub queue_depth: usize,
    pub dead_letters: usize,
    pub handlers: Vec<HandlerStats>,
    pub store: EventStoreStats,
}

/// Single-consumer event bus over an [`EventStore`]. Clones share the same
/// channel, registry, and store.
#[derive(Clone)]
pub struct EventService {
    store: EventStore,
    config: EventServiceConfig,
    sender: mpsc::UnboundedSender<Event>,
    receiver: Arc<Mutex<Option<mpsc::UnboundedReceiver<Event>>>>,
    handlers: Arc<RwLock<HashMap<String, HandlerRegistration>>>,
    dead_letters: Arc<Mutex<Vec<DeadLetter>>>,
    running: Arc<AtomicBool>,
    queue_depth: Arc<AtomicUsize>,
    processor: Arc<Mutex<Option<JoinHandle<()>>>>,
    sweeper: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl EventService {
    pub fn new(store: EventStore, config: EventServiceConfig) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            store,
            config,
            sender,
            receiver: Arc::new(Mutex::new(Some(receiver))),
            handlers: Arc::new(RwLock::new(HashMap::new())),
            dead_letters: Arc::new(Mutex::new(Vec::new())),
            running: Arc::new(AtomicBool::new(false)),
            queue_depth: Arc::new(AtomicUsize::new(0)),
            processor: Arc::new(Mutex::new(None)),
            sweeper: Arc::new(Mutex::new(None)),
        }
    }

    /// Register (or replace) a handler. Returns `true` when a previous
    /// registration with the same id was replaced.
    pub async fn register_handler(
        &self,
        handler_id: impl Into<String>,
        event_types: Vec<EventType>,
        handler: Arc<dyn EventHandler>,
        filters: Option<HashMap<String, Value>>,
    ) -> bool {
        let handler_id = handler_id.into();
        let registration = HandlerRegistration {
            handler,
            event_types: event_types.into_iter().collect(),
            filters: filters.unwrap_or_default(),
            enabled: true,
            processed: 0,
            failed: 0,
            last_processed: None,
        };
        let replaced = self
            .handlers
            .write()
            .await
            .insert(handler_id.clone(), registration)
            .is_some();
        debug!(handler_id = %handler_id, replaced, "handler registered");
        replaced
    }

    /// Remove a handler. Returns `false` for unknown ids.
    pub async fn unregister_handler(&self, handler_id: &str) -> bool {
        self.handlers.write().await.remove(handler_id).is_some()
    }

    /// Enable or disable a handler without losing its counters.
    pub async fn set_handler_enabled(&self, handler_id: &str, enabled: bool) -> bool {
        let mut handlers = self.handlers.write().await;
        match handlers.get_mut(handler_id) {
            Some(registration) => {
                registration.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Build and publish an event from raw parts. The type falls back to
    /// `data["type"]` when not given; unknown strings become `Custom`.
    pub fn publish_event(
        &self,
        data: HashMap<String, Value>,
        event_type: Option<EventType>,
        tenant_id: Option<String>,
        correlation_id: Option<Uuid>,
    ) -> Uuid {
        let event_type = event_type.unwrap_or_else(|| {
            data.get("type")
                .and_then(Value::as_str)
                .map_or(EventType::Custom("unknown".to_string()), EventType::parse)
        });

        let mut event = Event::new(event_type).with_data(data);
        if let Some(tenant_id) = tenant_id {
            event = event.with_tenant(tenant_id);
        }
        if let Some(correlation_id) = correlation_id {
            event = event.with_correlation(correlation_id);
        }
        self.publish(event)
    }

    /// Publish a fully built event. Fire-and-forget: the id is returned
    /// immediately and dispatch happens on the processor loop.
    pub fn publish(&self, event: Event) -> Uuid {
        let event_id = event.event_id;
        self.queue_depth.fetch_add(1, Ordering::SeqCst);
        if self.sender.send(event).is_err() {
            // receiver dropped after stop; nothing to dispatch to
            self.queue_depth.fetch_sub(1, Ordering::SeqCst);
            warn!(event_id = %event_id, "event dropped, ingestion channel closed");
        }
        event_id
    }

    /// Start the processor loop and the hourly retention sweep. Idempotent.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(mut receiver) = self.receiver.lock().await.take() else {
            return;
        };
        info!("event service starting");

        let service = self.clone();
        let processor = tokio::spawn(async move {
            while service.running.load(Ordering::SeqCst) {
                match tokio::time::timeout(Duration::from_secs(1), receiver.recv()).await {
                    Ok(Some(event)) => {
                        service.queue_depth.fetch_sub(1, Ordering::SeqCst);
                        service.process_event(event).await;
                    }
                    Ok(None) => break,
                    Err(_) => {} // idle; re-check the running flag
                }
            }
            // hand the receiver back so start() works again
            *service.receiver.lock().await = Some(receiver);
        });

        let service = self.clone();
        let sweeper = tokio::spawn(async move {
            loop {
                tokio::time::sleep(SWEEP_INTERVAL).await;
                if !service.running.load(Ordering::SeqCst) {
                    break;
                }
                let removed = service.store.cleanup_expired().await;
                if removed > 0 {
                    debug!(removed, "retention sweep removed expired events");
                }
            }
        });

        *self.processor.lock().await = Some(processor);
        *self.sweeper.lock().await = Some(sweeper);
    }

    /// Stop the loops. Events already accepted stay queued for the next
    /// `start`; the in-flight event finishes dispatching before the
    /// processor exits.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("event service stopping");
        if let Some(sweeper) = self.sweeper.lock().await.take() {
            sweeper.abort();
        }
        if let Some(processor) = self.processor.lock().await.take() {
            let _ = processor.await;
        }
    }

    /// Persist and fan out one event.
    #[instrument(skip(self, event), fields(event_id = %event.event_id, event_type = %event.event_type))]
    async fn process_event(&self, event: Event) {
        self.store.store_event(event.clone()).await;

        let matched: Vec<(String, Arc<dyn EventHandler>)> = {
            let handlers = self.handlers.read().await;
            handlers
                .iter()
                .filter(|(_, registration)| registration.matches(&event))
                .map(|(handler_id, registration)| {
                    (handler_id.clone(), Arc::clone(&registration.handler))
                })
                .collect()
        };
        if matched.is_empty() {
            return;
        }

        let dispatches = matched.into_iter().map(|(handler_id, handler)| {
            let service = self.clone();
            let event = event.clone();
            async move {
                service.dispatch_with_retry(&handler_id, handler, &event).await;
            }
        });
        join_all(dispatches).await;
    }

    /// Run one handler against one event, retrying with exponential backoff.
    /// Exhausted retries push a dead letter.
    async fn dispatch_with_retry(
        &self,
        handler_id: &str,
        handler: Arc<dyn EventHandler>,
        event: &Event,
    ) {
        let retry = &self.config.retry;
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match handler.handle(event).await {
                Ok(()) => {
                    self.record_dispatch(handler_id, true).await;
                    return;
                }
                Err(err) if attempt <= retry.max_retries => {
                    warn!(
                        handler_id = %handler_id,
                        event_id = %event.event_id,
                        attempt,
                        error = %err,
                        "handler failed, retrying"
                    );
                    tokio::time::sleep(retry.backoff_delay(attempt)).await;
                }
                Err(err) => {
                    error!(
                        handler_id = %handler_id,
                        event_id = %event.event_id,
                        attempts = attempt,
                        error = %err,
                        "handler exhausted retries, dead-lettering"
                    );
                    self.record_dispatch(handler_id, false).await;
                    self.dead_letters.lock().await.push(DeadLetter {
                        event: event.clone(),
                        handler_id: handler_id.to_string(),
                        error: err.to_string(),
                        attempts: attempt,
                        failed_at: Utc::now(),
                    });
                    return;
                }
            }
        }
    }

    async fn record_dispatch(&self, handler_id: &str, success: bool) {
        let mut handlers = self.handlers.write().await;
        if let Some(registration) = handlers.get_mut(handler_id) {
            if success {
                registration.processed += 1;
            } else {
                registration.failed += 1;
            }
            registration.last_processed = Some(Utc::now());
        }
    }

    /// Query stored events. Precedence: type filter, else tenant filter,
    /// else global recent. Newest first.
    pub async fn get_events(
        &self,
        event_type: Option<&EventType>,
        tenant_id: Option<&str>,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> Vec<Event> {
        if let Some(event_type) = event_type {
            return self.store.get_events_by_type(event_type, limit, since).await;
        }
        if let Some(tenant_id) = tenant_id {
            return self.store.get_events_by_tenant(tenant_id, limit, since).await;
        }
        self.store.recent_events(limit, since).await
    }

    /// Dead letters accumulated so far.
    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.lock().await.clone()
    }

    /// Full service snapshot.
    pub async fn stats(&self) -> EventServiceStats {
        let handlers = {
            let handlers = self.handlers.read().await;
            let mut stats: Vec<HandlerStats> = handlers
                .iter()
                .map(|(handler_id, registration)| HandlerStats {
                    handler_id: handler_id.clone(),
                    enabled: registration.enabled,
                    event_types: registration
                        .event_types
                        .iter()
                        .map(|event_type| event_type.as_str().to_string())
                        .collect(),
                    processed: registration.processed,
                    failed: registration.failed,
                    last_processed: registration.last_processed,
                })
                .collect();
            stats.sort_by(|a, b| a.handler_id.cmp(&b.handler_id));
            stats
        };

        EventServiceStats {
            running: self.running.load(Ordering::SeqCst),
            queue_depth: self.queue_depth.load(Ordering::SeqCst),
            dead_letters: self.dead_letters.lock().await.len(),
            handlers,
            store: self.store.stats().await,
        }
    }
}
