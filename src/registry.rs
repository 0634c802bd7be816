// src/registry.rs - Routes commands to condition workers
use crate::{
    attributes::AttributeStore,
    condition::{Condition, ConditionDefinition, ConditionId, ConditionView, MethodCall, Outcome},
    dispatcher::{Command, Dispatcher},
    error::{ConditionError, Result},
    events::{EventHub, FeedItem},
    limits::LimitConfiguration,
    metrics::AlarmMetricsAggregator,
    snapshot::ConditionSnapshot,
    value::Sample,
};
use chrono::Utc;
use dashmap::{mapref::entry::Entry, DashMap};
use futures::future::join_all;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct WorkerHandle {
    tx: mpsc::Sender<Command>,
    join: JoinHandle<()>,
}

/// All live conditions, each behind its own worker task
pub struct ConditionRegistry {
    workers: DashMap<ConditionId, WorkerHandle>,
    dispatcher: Arc<Dispatcher>,
    queue_capacity: usize,
    next_refresh: AtomicU64,
}

impl ConditionRegistry {
    pub fn new(
        hub: Arc<EventHub>,
        metrics: Arc<AlarmMetricsAggregator>,
        attributes: Option<Arc<dyn AttributeStore>>,
        queue_capacity: usize,
    ) -> Self {
        Self {
            workers: DashMap::new(),
            dispatcher: Arc::new(Dispatcher {
                hub,
                metrics,
                attributes,
            }),
            queue_capacity,
            next_refresh: AtomicU64::new(1),
        }
    }

    /// Register a condition in its initial state
    pub fn register(&self, definition: ConditionDefinition) -> Result<()> {
        definition.validate()?;
        let condition = Condition::new(definition, Utc::now());
        self.insert(condition, 0, Outcome::default())
    }

    /// Register a condition rebuilt from a persisted snapshot
    pub fn restore(&self, definition: ConditionDefinition, snapshot: ConditionSnapshot) -> Result<()> {
        definition.validate()?;
        if definition.id != snapshot.id {
            return Err(ConditionError::InvalidArgument(format!(
                "snapshot of '{}' does not belong to '{}'",
                snapshot.id, definition.id
            )));
        }
        let sequence = snapshot.sequence;
        let (condition, outcome) = Condition::restore(definition, snapshot, Utc::now());
        self.insert(condition, sequence, outcome)
    }

    fn insert(&self, condition: Condition, sequence: u64, initial: Outcome) -> Result<()> {
        let id = condition.id().clone();
        match self.workers.entry(id.clone()) {
            Entry::Occupied(_) => Err(ConditionError::AlreadyExists(id.to_string())),
            Entry::Vacant(slot) => {
                if let Some(area) = &condition.definition().area {
                    self.dispatcher.metrics.ensure_area(area);
                }
                let (tx, join) =
                    self.dispatcher
                        .spawn(condition, sequence, initial, self.queue_capacity);
                slot.insert(WorkerHandle { tx, join });
                debug!("Registered condition '{}'", id);
                Ok(())
            }
        }
    }

    /// Stop a condition's worker and forget it
    pub async fn unregister(&self, id: &ConditionId) -> Result<()> {
        let (_, handle) = self
            .workers
            .remove(id)
            .ok_or_else(|| ConditionError::NotFound(id.to_string()))?;
        stop(id, handle).await;
        info!("Removed condition '{}'", id);
        Ok(())
    }

    fn sender(&self, id: &ConditionId) -> Result<mpsc::Sender<Command>> {
        self.workers
            .get(id)
            .map(|h| h.tx.clone())
            .ok_or_else(|| ConditionError::NotFound(id.to_string()))
    }

    fn senders(&self) -> Vec<(ConditionId, mpsc::Sender<Command>)> {
        self.workers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().tx.clone()))
            .collect()
    }

    async fn request<T>(
        &self,
        id: &ConditionId,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T> {
        let tx = self.sender(id)?;
        ask(id, &tx, make).await
    }

    /// Invoke a method; resolves once the outcome has been published
    pub async fn invoke(&self, id: &ConditionId, call: MethodCall) -> Result<()> {
        self.request(id, |reply| Command::Method { call, reply }).await?
    }

    /// Queue a sample, waiting for room in the condition's queue
    pub async fn submit(&self, id: &ConditionId, sample: Sample) -> Result<()> {
        let tx = self.sender(id)?;
        tx.send(Command::Sample(sample))
            .await
            .map_err(|_| ConditionError::WorkerUnavailable(id.to_string()))
    }

    /// Queue a sample without waiting; a full queue drops it
    pub fn offer(&self, id: &ConditionId, sample: Sample) -> Result<()> {
        let tx = self.sender(id)?;
        tx.try_send(Command::Sample(sample)).map_err(|e| match e {
            TrySendError::Full(_) => ConditionError::QueueFull(id.to_string()),
            TrySendError::Closed(_) => ConditionError::WorkerUnavailable(id.to_string()),
        })
    }

    pub async fn submit_holds(&self, id: &ConditionId, holds: bool) -> Result<()> {
        self.request(id, |reply| Command::Holds { holds, reply }).await?
    }

    pub async fn reconfigure(&self, id: &ConditionId, limits: LimitConfiguration) -> Result<()> {
        self.request(id, |reply| Command::Reconfigure { limits, reply }).await?
    }

    pub async fn view(&self, id: &ConditionId) -> Result<ConditionView> {
        self.request(id, |reply| Command::View { reply }).await
    }

    pub async fn views(&self) -> Vec<ConditionView> {
        let requests = self
            .senders()
            .into_iter()
            .map(|(id, tx)| async move { ask(&id, &tx, |reply| Command::View { reply }).await });
        let mut views: Vec<_> = join_all(requests).await.into_iter().flatten().collect();
        views.sort_by(|a, b| a.id.cmp(&b.id));
        views
    }

    pub async fn snapshot(&self, id: &ConditionId) -> Result<ConditionSnapshot> {
        self.request(id, |reply| Command::Snapshot { reply }).await
    }

    pub async fn snapshots(&self) -> Vec<ConditionSnapshot> {
        let requests = self
            .senders()
            .into_iter()
            .map(|(id, tx)| async move { ask(&id, &tx, |reply| Command::Snapshot { reply }).await });
        let mut snapshots: Vec<_> = join_all(requests).await.into_iter().flatten().collect();
        snapshots.sort_by(|a, b| a.id.cmp(&b.id));
        snapshots
    }

    /// Replay every retained condition to one subscriber, bracketed by
    /// RefreshStart/RefreshEnd
    pub async fn refresh(&self, subscriber: u64) -> Result<u64> {
        let request = self.next_refresh.fetch_add(1, Ordering::Relaxed);
        let hub = &self.dispatcher.hub;
        if !hub.deliver_to(subscriber, FeedItem::RefreshStart { request }) {
            return Err(ConditionError::NotFound(format!("subscription {}", subscriber)));
        }
        let requests = self.senders().into_iter().map(|(id, tx)| async move {
            ask(&id, &tx, |done| Command::Refresh { subscriber, done }).await
        });
        for result in join_all(requests).await {
            if let Err(e) = result {
                warn!("Refresh {} skipped a condition: {}", request, e);
            }
        }
        hub.deliver_to(subscriber, FeedItem::RefreshEnd { request });
        debug!("Refresh {} for subscriber {} complete", request, subscriber);
        Ok(request)
    }

    pub fn ids(&self) -> Vec<ConditionId> {
        let mut ids: Vec<_> = self.workers.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn contains(&self, id: &ConditionId) -> bool {
        self.workers.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Stop every worker
    pub async fn shutdown(&self) {
        for id in self.ids() {
            if let Some((id, handle)) = self.workers.remove(&id) {
                stop(&id, handle).await;
            }
        }
    }
}

async fn ask<T>(
    id: &ConditionId,
    tx: &mpsc::Sender<Command>,
    make: impl FnOnce(oneshot::Sender<T>) -> Command,
) -> Result<T> {
    let (reply, rx) = oneshot::channel();
    tx.send(make(reply))
        .await
        .map_err(|_| ConditionError::WorkerUnavailable(id.to_string()))?;
    rx.await
        .map_err(|_| ConditionError::WorkerUnavailable(id.to_string()))
}

async fn stop(id: &ConditionId, handle: WorkerHandle) {
    if handle.tx.send(Command::Shutdown).await.is_err() {
        debug!("Worker for '{}' already gone", id);
    }
    if let Err(e) = handle.join.await {
        warn!("Worker for '{}' ended abnormally: {}", id, e);
    }
}
