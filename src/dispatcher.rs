// src/dispatcher.rs - Per-condition worker tasks
//
// Each condition is owned by exactly one task. Commands for a condition are
// applied in arrival order, so its notifications carry strictly increasing,
// gap-free sequence numbers without any cross-condition locking.

use crate::{
    attributes::{self, AttributeStore},
    condition::{Condition, ConditionView, EventKind, MethodCall, Outcome, TimerRequest},
    error::Result,
    events::{ConditionEvent, EventHub, FeedItem},
    limits::LimitConfiguration,
    metrics::{AlarmMetricsAggregator, MetricsView},
    snapshot::ConditionSnapshot,
    value::Sample,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

pub(crate) enum Command {
    Sample(Sample),
    Holds {
        holds: bool,
        reply: oneshot::Sender<Result<()>>,
    },
    Method {
        call: MethodCall,
        reply: oneshot::Sender<Result<()>>,
    },
    ShelvingExpired {
        generation: u64,
    },
    DelayElapsed {
        generation: u64,
    },
    ReAlarm {
        generation: u64,
    },
    Reconfigure {
        limits: LimitConfiguration,
        reply: oneshot::Sender<Result<()>>,
    },
    Snapshot {
        reply: oneshot::Sender<ConditionSnapshot>,
    },
    View {
        reply: oneshot::Sender<ConditionView>,
    },
    Refresh {
        subscriber: u64,
        done: oneshot::Sender<()>,
    },
    Shutdown,
}

/// Shared sinks every worker publishes into
pub(crate) struct Dispatcher {
    pub hub: Arc<EventHub>,
    pub metrics: Arc<AlarmMetricsAggregator>,
    pub attributes: Option<Arc<dyn AttributeStore>>,
}

impl Dispatcher {
    /// Start the worker owning `condition`
    ///
    /// `sequence` is the last number already assigned; `initial` is applied
    /// right after start-up (pending effects of a restore).
    pub fn spawn(
        self: &Arc<Self>,
        condition: Condition,
        sequence: u64,
        initial: Outcome,
        queue_capacity: usize,
    ) -> (mpsc::Sender<Command>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let worker = Worker {
            last_view: condition.view(),
            condition,
            sequence,
            dispatcher: self.clone(),
            tx: tx.downgrade(),
            shelving_timer: None,
            delay_timer: None,
            re_alarm_timer: None,
        };
        let join = tokio::spawn(worker.run(rx, initial));
        (tx, join)
    }
}

struct Worker {
    condition: Condition,
    sequence: u64,
    last_view: ConditionView,
    dispatcher: Arc<Dispatcher>,
    tx: mpsc::WeakSender<Command>,
    shelving_timer: Option<AbortHandle>,
    delay_timer: Option<AbortHandle>,
    re_alarm_timer: Option<AbortHandle>,
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>, initial: Outcome) {
        let id = self.condition.id().clone();
        debug!("Worker for condition '{}' started at sequence {}", id, self.sequence);

        self.dispatcher.metrics.record(
            self.condition.definition().area.as_deref(),
            MetricsView::default(),
            self.condition.metrics_view(),
            0,
        );
        if let Some(store) = &self.dispatcher.attributes {
            if let Err(e) = attributes::sync_view(store.as_ref(), None, &self.last_view) {
                warn!("Failed to write attributes of '{}': {}", id, e);
            }
        }
        let before = self.condition.metrics_view();
        self.commit(before, initial);

        while let Some(command) = rx.recv().await {
            match command {
                Command::Sample(sample) => {
                    let before = self.condition.metrics_view();
                    let outcome = self.condition.observe(&sample, Utc::now());
                    self.commit(before, outcome);
                }
                Command::Holds { holds, reply } => {
                    let before = self.condition.metrics_view();
                    let result = self
                        .condition
                        .observe_holds(holds, Utc::now())
                        .map(|outcome| self.commit(before, outcome));
                    let _ = reply.send(result);
                }
                Command::Method { call, reply } => {
                    let name = call.name();
                    let before = self.condition.metrics_view();
                    let result = match self.condition.apply(call, Utc::now()) {
                        Ok(outcome) => {
                            self.commit(before, outcome);
                            Ok(())
                        }
                        Err(e) => {
                            debug!("{} rejected on '{}': {}", name, id, e);
                            Err(e)
                        }
                    };
                    let _ = reply.send(result);
                }
                Command::ShelvingExpired { generation } => {
                    let before = self.condition.metrics_view();
                    let outcome = self.condition.shelving_expired(generation);
                    self.commit(before, outcome);
                }
                Command::DelayElapsed { generation } => {
                    let before = self.condition.metrics_view();
                    let outcome = self.condition.delay_elapsed(generation, Utc::now());
                    self.commit(before, outcome);
                }
                Command::ReAlarm { generation } => {
                    let before = self.condition.metrics_view();
                    let outcome = self.condition.re_alarm_elapsed(generation);
                    self.commit(before, outcome);
                }
                Command::Reconfigure { limits, reply } => {
                    let result = self.condition.reconfigure(limits);
                    if result.is_ok() {
                        info!("Limits of '{}' reconfigured", id);
                    }
                    let _ = reply.send(result);
                }
                Command::Snapshot { reply } => {
                    let _ = reply.send(self.condition.snapshot(self.sequence, Utc::now()));
                }
                Command::View { reply } => {
                    let _ = reply.send(self.condition.view());
                }
                Command::Refresh { subscriber, done } => {
                    if self.condition.retain() {
                        let event = ConditionEvent::from_view(
                            &self.last_view,
                            EventKind::Refresh,
                            self.sequence,
                            Utc::now(),
                        );
                        self.dispatcher.hub.deliver_to(subscriber, FeedItem::Refresh(event));
                    }
                    let _ = done.send(());
                }
                Command::Shutdown => break,
            }
        }

        self.retire();
        debug!("Worker for condition '{}' stopped", id);
    }

    /// Publish, account and mirror one committed outcome
    fn commit(&mut self, before: MetricsView, outcome: Outcome) {
        let view = self.condition.view();
        if outcome.is_empty() && view == self.last_view {
            return;
        }
        let now = Utc::now();

        for kind in outcome.published() {
            self.sequence += 1;
            let event = ConditionEvent::from_view(&view, kind, self.sequence, now);
            match kind {
                EventKind::Activated | EventKind::Deactivated | EventKind::Reset | EventKind::ReAlarmed => info!(
                    "Condition '{}' {:?} (severity {}, seq {})",
                    view.id, kind, view.severity, self.sequence
                ),
                _ => debug!("Condition '{}' {:?} (seq {})", view.id, kind, self.sequence),
            }
            self.dispatcher.hub.publish(&event);
        }

        self.dispatcher.metrics.record(
            view.area.as_deref(),
            before,
            self.condition.metrics_view(),
            outcome.activations(),
        );

        if let Some(store) = &self.dispatcher.attributes {
            if let Err(e) = attributes::sync_view(store.as_ref(), Some(&self.last_view), &view) {
                warn!("Failed to write attributes of '{}': {}", view.id, e);
            }
        }
        self.last_view = view;

        for timer in outcome.timers {
            self.apply_timer(timer);
        }
    }

    fn apply_timer(&mut self, request: TimerRequest) {
        match request {
            TimerRequest::Shelving { generation, after } => {
                let handle = self.arm(after, Command::ShelvingExpired { generation });
                if let Some(old) = self.shelving_timer.replace(handle) {
                    old.abort();
                }
            }
            TimerRequest::CancelShelving => {
                if let Some(old) = self.shelving_timer.take() {
                    old.abort();
                }
            }
            TimerRequest::Delay { generation, after } => {
                let handle = self.arm(after, Command::DelayElapsed { generation });
                if let Some(old) = self.delay_timer.replace(handle) {
                    old.abort();
                }
            }
            TimerRequest::CancelDelay => {
                if let Some(old) = self.delay_timer.take() {
                    old.abort();
                }
            }
            TimerRequest::ReAlarm { generation, after } => {
                let handle = self.arm(after, Command::ReAlarm { generation });
                if let Some(old) = self.re_alarm_timer.replace(handle) {
                    old.abort();
                }
            }
            TimerRequest::CancelReAlarm => {
                if let Some(old) = self.re_alarm_timer.take() {
                    old.abort();
                }
            }
        }
    }

    /// Timer task that feeds `command` back into this worker's queue
    fn arm(&self, after: Duration, command: Command) -> AbortHandle {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(command).await;
            }
        })
        .abort_handle()
    }

    fn retire(&mut self) {
        let timers = [
            self.shelving_timer.take(),
            self.delay_timer.take(),
            self.re_alarm_timer.take(),
        ];
        for timer in timers.into_iter().flatten() {
            timer.abort();
        }
        self.dispatcher.metrics.record(
            self.condition.definition().area.as_deref(),
            self.condition.metrics_view(),
            MetricsView::default(),
            0,
        );
        if let Some(store) = &self.dispatcher.attributes {
            if let Err(e) = store.remove_condition(self.condition.id()) {
                warn!("Failed to remove attributes of '{}': {}", self.condition.id(), e);
            }
        }
    }
}
