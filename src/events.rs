// src/events.rs - Notification feed with bounded per-subscriber queues
//
// Publishing never blocks a condition worker: each subscriber owns a bounded
// queue and a full queue drops its oldest pending item.

use crate::{
    condition::{
        AckState, ActivationState, ConditionId, ConditionView, EventId, EventKind, ShelvingState,
    },
    value::Quality,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::warn;

/// One notification about a condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionEvent {
    pub condition_id: ConditionId,
    pub event_id: EventId,
    /// Per-condition, strictly increasing and gap-free
    pub sequence: u64,
    pub kind: EventKind,
    pub activation: ActivationState,
    pub ack: AckState,
    pub shelving: ShelvingState,
    pub severity: u16,
    pub quality: Quality,
    pub retain: bool,
    pub enabled: bool,
    pub suppressed_or_shelved: bool,
    pub comment: Option<String>,
    pub source: String,
    pub area: Option<String>,
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ConditionEvent {
    pub fn from_view(view: &ConditionView, kind: EventKind, sequence: u64, timestamp: DateTime<Utc>) -> Self {
        Self {
            condition_id: view.id.clone(),
            event_id: view.event_id,
            sequence,
            kind,
            activation: view.activation,
            ack: view.ack,
            shelving: view.shelving,
            severity: view.severity,
            quality: view.quality,
            retain: view.retain,
            enabled: view.enabled,
            suppressed_or_shelved: view.suppressed_or_shelved(),
            comment: view.comment.clone(),
            source: view.source.clone(),
            area: view.area.clone(),
            message: view.message.clone(),
            timestamp,
        }
    }
}

/// Item delivered to a subscriber
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedItem {
    Event(ConditionEvent),
    RefreshStart { request: u64 },
    /// Current state of a retained condition; carries the last assigned
    /// sequence number instead of a new one
    Refresh(ConditionEvent),
    RefreshEnd { request: u64 },
}

/// Selects which conditions a subscriber hears about
///
/// Only condition-constant attributes are matched, so a subscriber sees every
/// sequence number of the conditions it selects.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionFilter {
    pub conditions: Option<HashSet<ConditionId>>,
    pub areas: Option<HashSet<String>>,
    pub sources: Option<HashSet<String>>,
}

impl SubscriptionFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn conditions<I, T>(ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<ConditionId>,
    {
        Self {
            conditions: Some(ids.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub fn areas<I, T>(areas: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            areas: Some(areas.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub fn matches(&self, event: &ConditionEvent) -> bool {
        if let Some(ids) = &self.conditions {
            if !ids.contains(&event.condition_id) {
                return false;
            }
        }
        if let Some(areas) = &self.areas {
            match &event.area {
                Some(area) if areas.contains(area) => {}
                _ => return false,
            }
        }
        if let Some(sources) = &self.sources {
            if !sources.contains(&event.source) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug)]
struct SubscriberQueue {
    filter: SubscriptionFilter,
    capacity: usize,
    items: Mutex<VecDeque<FeedItem>>,
    notify: Notify,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl SubscriberQueue {
    fn push(&self, id: u64, item: FeedItem) {
        {
            let mut items = self.items.lock();
            if items.len() >= self.capacity {
                items.pop_front();
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped.is_power_of_two() {
                    warn!("Subscriber {} queue full, {} notifications dropped so far", id, dropped);
                }
            }
            items.push_back(item);
        }
        self.notify.notify_one();
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }
}

type SubscriberMap = DashMap<u64, Arc<SubscriberQueue>>;

/// Fan-out point for condition notifications
#[derive(Debug)]
pub struct EventHub {
    subscribers: Arc<SubscriberMap>,
    next_id: AtomicU64,
    default_capacity: usize,
}

impl EventHub {
    pub fn new(default_capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
            default_capacity: default_capacity.max(1),
        }
    }

    pub fn subscribe(&self, filter: SubscriptionFilter) -> Subscription {
        self.subscribe_with_capacity(filter, self.default_capacity)
    }

    pub fn subscribe_with_capacity(&self, filter: SubscriptionFilter, capacity: usize) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(SubscriberQueue {
            filter,
            capacity: capacity.max(1),
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });
        self.subscribers.insert(id, queue.clone());
        Subscription {
            id,
            queue,
            subscribers: Arc::downgrade(&self.subscribers),
        }
    }

    /// Deliver to every subscriber whose filter matches
    pub fn publish(&self, event: &ConditionEvent) {
        for entry in self.subscribers.iter() {
            let queue = entry.value();
            if queue.filter.matches(event) {
                queue.push(*entry.key(), FeedItem::Event(event.clone()));
            }
        }
    }

    /// Deliver to one subscriber, honouring its filter for condition events
    pub fn deliver_to(&self, subscriber: u64, item: FeedItem) -> bool {
        let Some(queue) = self.subscribers.get(&subscriber).map(|q| q.value().clone()) else {
            return false;
        };
        if let FeedItem::Refresh(event) | FeedItem::Event(event) = &item {
            if !queue.filter.matches(event) {
                return true;
            }
        }
        queue.push(subscriber, item);
        true
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl Drop for EventHub {
    fn drop(&mut self) {
        for entry in self.subscribers.iter() {
            entry.value().close();
        }
    }
}

/// Receiving end of the notification feed; unsubscribes on drop
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    queue: Arc<SubscriberQueue>,
    subscribers: std::sync::Weak<SubscriberMap>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next item; `None` once the hub is gone and the queue
    /// is drained
    pub async fn recv(&mut self) -> Option<FeedItem> {
        loop {
            if let Some(item) = self.try_recv() {
                return Some(item);
            }
            if self.queue.closed.load(Ordering::Acquire) {
                return None;
            }
            self.queue.notify.notified().await;
        }
    }

    pub fn try_recv(&mut self) -> Option<FeedItem> {
        self.queue.items.lock().pop_front()
    }

    /// Drain everything currently queued
    pub fn drain(&mut self) -> Vec<FeedItem> {
        self.queue.items.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Notifications discarded because the queue was full
    pub fn dropped(&self) -> u64 {
        self.queue.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            subscribers.remove(&self.id);
        }
    }
}
