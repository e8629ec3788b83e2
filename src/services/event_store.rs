//! Bounded in-memory event store with type and tenant indexes.
//!
//! Retention is enforced two ways: events older than the retention window
//! are swept out, and if the store is still over capacity after the sweep,
//! the oldest events are evicted until it fits.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::domain::models::config::EventStoreConfig;
use crate::domain::models::event::{Event, EventType};

/// Snapshot of store contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventStoreStats {
    pub total_events: usize,
    /// Counts keyed by event type string
    pub events_by_type: HashMap<String, usize>,
    /// Distinct tenants with at least one stored event
    pub tenants: usize,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

struct StoreInner {
    by_id: HashMap<Uuid, Event>,
    by_type: HashMap<EventType, Vec<Uuid>>,
    by_tenant: HashMap<String, Vec<Uuid>>,
    /// Insertion order, oldest at the front
    order: VecDeque<Uuid>,
}

impl StoreInner {
    fn remove(&mut self, event_id: Uuid) {
        let Some(event) = self.by_id.remove(&event_id) else {
            return;
        };
        if let Some(ids) = self.by_type.get_mut(&event.event_type) {
            ids.retain(|id| *id != event_id);
            if ids.is_empty() {
                self.by_type.remove(&event.event_type);
            }
        }
        if let Some(tenant_id) = &event.tenant_id {
            if let Some(ids) = self.by_tenant.get_mut(tenant_id) {
                ids.retain(|id| *id != event_id);
                if ids.is_empty() {
                    self.by_tenant.remove(tenant_id);
                }
            }
        }
    }

    /// Drop events older than the cutoff. Returns how many were removed.
    fn sweep_expired(&mut self, cutoff: DateTime<Utc>) -> usize {
        let mut removed = 0;
        while let Some(oldest_id) = self.order.front().copied() {
            let expired = self
                .by_id
                .get(&oldest_id)
                .is_none_or(|event| event.timestamp < cutoff);
            if !expired {
                break;
            }
            self.order.pop_front();
            self.remove(oldest_id);
            removed += 1;
        }
        removed
    }

    /// Evict oldest-first until the store fits the capacity bound.
    fn evict_to_capacity(&mut self, max_events: usize) -> usize {
        let mut removed = 0;
        while self.by_id.len() > max_events {
            let Some(oldest_id) = self.order.pop_front() else {
                break;
            };
            self.remove(oldest_id);
            removed += 1;
        }
        removed
    }
}

/// Thread-safe bounded event store. Clones share the same state.
#[derive(Clone)]
pub struct EventStore {
    config: EventStoreConfig,
    inner: Arc<RwLock<StoreInner>>,
}

impl EventStore {
    pub fn new(config: EventStoreConfig) -> Self {
        Self {
            config,
            inner: Arc::new(RwLock::new(StoreInner {
                by_id: HashMap::new(),
                by_type: HashMap::new(),
                by_tenant: HashMap::new(),
                order: VecDeque::new(),
            })),
        }
    }

    /// Append an event, enforcing retention and capacity bounds.
    pub async fn store_event(&self, event: Event) {
        let mut inner = self.inner.write().await;

        let event_id = event.event_id;
        inner
            .by_type
            .entry(event.event_type.clone())
            .or_default()
            .push(event_id);
        if let Some(tenant_id) = &event.tenant_id {
            inner
                .by_tenant
                .entry(tenant_id.clone())
                .or_default()
                .push(event_id);
        }
        inner.order.push_back(event_id);
        inner.by_id.insert(event_id, event);

        if inner.by_id.len() > self.config.max_events {
            let cutoff = Utc::now() - Duration::hours(self.config.retention_hours);
            let swept = inner.sweep_expired(cutoff);
            let evicted = inner.evict_to_capacity(self.config.max_events);
            debug!(swept, evicted, "event store over capacity, cleaned up");
        }
    }

    /// Look up a single event by id.
    pub async fn get_event(&self, event_id: Uuid) -> Option<Event> {
        self.inner.read().await.by_id.get(&event_id).cloned()
    }

    /// Events of one type, newest first, optionally bounded to events at or
    /// after `since`.
    pub async fn get_events_by_type(
        &self,
        event_type: &EventType,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> Vec<Event> {
        let inner = self.inner.read().await;
        let Some(ids) = inner.by_type.get(event_type) else {
            return Vec::new();
        };
        ids.iter()
            .rev()
            .filter_map(|id| inner.by_id.get(id))
            .filter(|event| since.is_none_or(|cutoff| event.timestamp >= cutoff))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Events for one tenant, newest first, optionally bounded to events at
    /// or after `since`.
    pub async fn get_events_by_tenant(
        &self,
        tenant_id: &str,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> Vec<Event> {
        let inner = self.inner.read().await;
        let Some(ids) = inner.by_tenant.get(tenant_id) else {
            return Vec::new();
        };
        ids.iter()
            .rev()
            .filter_map(|id| inner.by_id.get(id))
            .filter(|event| since.is_none_or(|cutoff| event.timestamp >= cutoff))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Most recent events, newest first, optionally bounded to events at or
    /// after `since`.
    pub async fn recent_events(&self, limit: usize, since: Option<DateTime<Utc>>) -> Vec<Event> {
        let inner = self.inner.read().await;
        inner
            .order
            .iter()
            .rev()
            .filter_map(|id| inner.by_id.get(id))
            .filter(|event| since.is_none_or(|cutoff| event.timestamp >= cutoff))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Sweep events older than the retention window. Returns how many were
    /// removed.
    pub async fn cleanup_expired(&self) -> usize {
        let cutoff = Utc::now() - Duration::hours(self.config.retention_hours);
        let mut inner = self.inner.write().await;
        inner.sweep_expired(cutoff)
    }

    /// Contents snapshot.
    pub async fn stats(&self) -> EventStoreStats {
        let inner = self.inner.read().await;
        let events_by_type = inner
            .by_type
            .iter()
            .map(|(event_type, ids)| (event_type.as_str().to_string(), ids.len()))
            .collect();
        let oldest = inner
            .order
            .front()
            .and_then(|id| inner.by_id.get(id))
            .map(|event| event.timestamp);
        let newest = inner
            .order
            .back()
            .and_then(|id| inner.by_id.get(id))
            .map(|event| event.timestamp);

        EventStoreStats {
            total_events: inner.by_id.len(),
            events_by_type,
            tenants: inner.by_tenant.len(),
            oldest,
            newest,
        }
    }
}
