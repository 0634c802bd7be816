use chrono::Duration as ChronoDuration;
use petra_conditions::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

const TANKS: &str = r#"
engine:
  scan_time_ms: 10
conditions:
  - id: tank.high
    source: tank.level
    area: tanks
    kind: exclusive_limit
    limits: { high: 10.0, high_high: 20.0, deadband: 1.0 }
    boundary_severities: { high_high: 900 }
    requires_confirm: true
  - id: pump.trip
    source: pump.running
    area: pumps
    kind: off_normal
    normal_state: true
"#;

async fn engine(yaml: &str) -> Arc<AlarmEngine> {
    let config = Config::from_yaml(yaml).unwrap();
    Arc::new(AlarmEngine::new(config).await.unwrap())
}

fn events(feed: &mut Subscription) -> Vec<ConditionEvent> {
    feed.drain()
        .into_iter()
        .filter_map(|item| match item {
            FeedItem::Event(e) => Some(e),
            _ => None,
        })
        .collect()
}

fn kinds(feed: &mut Subscription) -> Vec<EventKind> {
    events(feed).into_iter().map(|e| e.kind).collect()
}

fn tank() -> ConditionId {
    ConditionId::from("tank.high")
}

#[tokio::test]
async fn test_limit_alarm_full_lifecycle() {
    let engine = engine(TANKS).await;
    let mut feed = engine.subscribe(SubscriptionFilter::conditions(["tank.high"]));

    engine.submit(&tank(), Sample::new(12.0)).await.unwrap();
    let view = engine.condition(&tank()).await.unwrap();
    assert_eq!(
        view.activation,
        ActivationState::Active(ActiveSubState::Exclusive(Boundary::High))
    );
    assert_eq!(view.ack, AckState::Unacknowledged);
    assert!(view.retain);

    // Inside the deadband: still active
    engine.submit(&tank(), Sample::new(9.5)).await.unwrap();
    assert!(engine.condition(&tank()).await.unwrap().is_active());

    engine.submit(&tank(), Sample::new(25.0)).await.unwrap();
    let view = engine.condition(&tank()).await.unwrap();
    assert_eq!(view.severity, 900);

    assert_ok!(engine.acknowledge(&tank(), view.event_id, Some("seen".into())).await);
    assert_ok!(engine.confirm(&tank(), view.event_id, None).await);
    engine.submit(&tank(), Sample::new(5.0)).await.unwrap();

    let view = engine.condition(&tank()).await.unwrap();
    assert!(!view.is_active());
    assert!(!view.retain);
    assert_eq!(view.ack, AckState::Confirmed);

    let received: Vec<(u64, EventKind)> = events(&mut feed).iter().map(|e| (e.sequence, e.kind)).collect();
    assert_eq!(
        received,
        vec![
            (1, EventKind::Activated),
            (2, EventKind::SubStateChanged),
            (3, EventKind::Acknowledged),
            (4, EventKind::Confirmed),
            (5, EventKind::Deactivated),
        ]
    );
    engine.shutdown().await;
}

#[tokio::test]
async fn test_acknowledge_is_idempotent_and_checks_event_id() {
    let engine = engine(TANKS).await;
    engine.submit(&tank(), Sample::new(12.0)).await.unwrap();
    let first = engine.condition(&tank()).await.unwrap().event_id;

    let mut feed = engine.subscribe(SubscriptionFilter::all());
    assert_ok!(engine.acknowledge(&tank(), first, None).await);
    assert_ok!(engine.acknowledge(&tank(), first, None).await);
    assert_eq!(kinds(&mut feed), vec![EventKind::Acknowledged]);

    engine.submit(&tank(), Sample::new(5.0)).await.unwrap();
    engine.submit(&tank(), Sample::new(12.0)).await.unwrap();
    let err = assert_err!(engine.acknowledge(&tank(), first, None).await);
    assert!(matches!(err, ConditionError::InvalidEventId(_)));
    assert_eq!(err.status_code(), "Bad_EventIdUnknown");
    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_manual_unshelve_cancels_expiry() {
    let engine = engine(TANKS).await;
    let mut feed = engine.subscribe(SubscriptionFilter::all());

    assert_ok!(engine.timed_shelve(&tank(), ChronoDuration::seconds(5)).await);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_ok!(engine.unshelve(&tank()).await);
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(
        kinds(&mut feed),
        vec![EventKind::Shelved, EventKind::Unshelved(UnshelveCause::Manual)]
    );
    let view = engine.condition(&tank()).await.unwrap();
    assert_eq!(view.shelving, ShelvingState::Unshelved);

    let err = assert_err!(engine.unshelve(&tank()).await);
    assert!(matches!(err, ConditionError::InvalidState(_)));
    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_timed_shelve_expires_and_limits_duration() {
    let engine = engine(TANKS).await;
    let mut feed = engine.subscribe(SubscriptionFilter::all());

    assert!(matches!(
        engine.timed_shelve(&tank(), ChronoDuration::hours(9)).await,
        Err(ConditionError::InvalidArgument(_))
    ));
    assert!(matches!(
        engine.timed_shelve(&tank(), ChronoDuration::seconds(-1)).await,
        Err(ConditionError::InvalidArgument(_))
    ));

    assert_ok!(engine.timed_shelve(&tank(), ChronoDuration::seconds(5)).await);
    engine.submit(&tank(), Sample::new(12.0)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(6)).await;

    assert_eq!(
        kinds(&mut feed),
        vec![EventKind::Shelved, EventKind::Unshelved(UnshelveCause::Expired)]
    );
    let view = engine.condition(&tank()).await.unwrap();
    assert!(view.is_active(), "shelving hides notifications, not state");
    engine.shutdown().await;
}

#[tokio::test]
async fn test_one_shot_shelve_through_engine() {
    let engine = engine(TANKS).await;
    let mut feed = engine.subscribe(SubscriptionFilter::all());

    assert_ok!(engine.one_shot_shelve(&tank()).await);
    assert_ok!(engine.one_shot_shelve(&tank()).await);
    engine.submit(&tank(), Sample::new(12.0)).await.unwrap();

    assert_eq!(
        kinds(&mut feed),
        vec![
            EventKind::Shelved,
            EventKind::Unshelved(UnshelveCause::OneShotConsumed),
            EventKind::Activated,
        ]
    );
    engine.shutdown().await;
}

#[tokio::test]
async fn test_disable_and_enable() {
    let engine = engine(TANKS).await;
    engine.submit(&tank(), Sample::new(12.0)).await.unwrap();
    let event_id = engine.condition(&tank()).await.unwrap().event_id;

    let mut feed = engine.subscribe(SubscriptionFilter::all());
    assert_ok!(engine.disable(&tank()).await);
    assert_ok!(engine.disable(&tank()).await);
    let view = engine.condition(&tank()).await.unwrap();
    assert!(!view.enabled && !view.is_active() && !view.retain);

    let err = assert_err!(engine.acknowledge(&tank(), event_id, None).await);
    assert!(matches!(err, ConditionError::ConditionDisabled(_)));
    assert_eq!(err.status_code(), "Bad_ConditionDisabled");

    // Samples while disabled are remembered for re-evaluation
    engine.submit(&tank(), Sample::new(13.0)).await.unwrap();
    assert_ok!(engine.enable(&tank()).await);
    assert_eq!(
        kinds(&mut feed),
        vec![EventKind::Disabled, EventKind::Enabled, EventKind::Activated]
    );
    engine.shutdown().await;
}

#[tokio::test]
async fn test_off_normal_from_signal_bus() {
    let engine = engine(TANKS).await;
    let pump = ConditionId::from("pump.trip");
    let mut feed = engine.subscribe(SubscriptionFilter::areas(["pumps"]));

    engine.signal_bus().set("pump.running", Value::Bool(true)).unwrap();
    engine.scan_once().await;
    engine.signal_bus().set("pump.running", Value::Bool(false)).unwrap();
    engine.scan_once().await;

    let view = engine.condition(&pump).await.unwrap();
    assert!(view.is_active());
    assert_eq!(kinds(&mut feed), vec![EventKind::Activated]);
    engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sequences_gap_free_under_concurrency() {
    let engine = engine(TANKS).await;
    let mut feed = engine.subscribe(SubscriptionFilter::all());
    let pump = ConditionId::from("pump.trip");

    let mut tasks = Vec::new();
    for i in 0..40 {
        let engine = engine.clone();
        let pump = pump.clone();
        tasks.push(tokio::spawn(async move {
            let level = if i % 2 == 0 { 15.0 } else { 2.0 };
            engine.submit(&tank(), Sample::new(level)).await.unwrap();
            engine.set_condition(&pump, i % 3 == 0).await.unwrap();
            if i % 5 == 0 {
                let _ = engine.suppress(&pump).await;
            } else {
                let _ = engine.unsuppress(&pump).await;
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    // Drain both workers before reading the feed
    engine.conditions().await;

    let mut by_condition: HashMap<ConditionId, Vec<u64>> = HashMap::new();
    for event in events(&mut feed) {
        by_condition.entry(event.condition_id).or_default().push(event.sequence);
    }
    assert!(!by_condition.is_empty());
    for (id, sequences) in by_condition {
        let expected: Vec<u64> = (1..=sequences.len() as u64).collect();
        assert_eq!(sequences, expected, "sequence of {}", id);
    }
    assert_eq!(feed.dropped(), 0);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_area_metrics() {
    let engine = engine(TANKS).await;
    let pump = ConditionId::from("pump.trip");

    engine.submit(&tank(), Sample::new(12.0)).await.unwrap();
    engine.set_condition(&pump, false).await.unwrap();
    engine.conditions().await;

    let server = engine.metrics(&Scope::Server).unwrap();
    assert_eq!(server.active_count, 2);
    assert_eq!(server.unacknowledged_count, 2);
    assert_eq!(server.alarm_count, 2);

    let tanks = engine.metrics(&Scope::Area("tanks".into())).unwrap();
    assert_eq!((tanks.active_count, tanks.alarm_count), (1, 1));

    let event_id = engine.condition(&tank()).await.unwrap().event_id;
    assert_ok!(engine.acknowledge(&tank(), event_id, None).await);
    let tanks = engine.metrics(&Scope::Area("tanks".into())).unwrap();
    assert_eq!(tanks.unacknowledged_count, 0);
    assert_eq!(tanks.maximum_unacknowledged, 1);

    assert_ok!(engine.reset_metrics(Some(&Scope::Area("tanks".into()))));
    let tanks = engine.metrics(&Scope::Area("tanks".into())).unwrap();
    assert_eq!((tanks.alarm_count, tanks.active_count), (0, 1));
    engine.shutdown().await;
}

#[tokio::test]
async fn test_refresh_replays_retained_conditions() {
    let engine = engine(TANKS).await;
    engine.submit(&tank(), Sample::new(12.0)).await.unwrap();

    let mut feed = engine.subscribe(SubscriptionFilter::all());
    let request = engine.refresh(&feed).await.unwrap();
    let items = feed.drain();
    assert_eq!(items.first(), Some(&FeedItem::RefreshStart { request }));
    assert_eq!(items.last(), Some(&FeedItem::RefreshEnd { request }));
    let refreshed: Vec<&ConditionEvent> = items
        .iter()
        .filter_map(|item| match item {
            FeedItem::Refresh(e) => Some(e),
            _ => None,
        })
        .collect();
    assert_eq!(refreshed.len(), 1);
    assert_eq!(refreshed[0].condition_id, tank());
    assert_eq!(refreshed[0].kind, EventKind::Refresh);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("conditions.json");
    let yaml = format!("{}persistence:\n  path: {}\n", TANKS, path.display());

    let engine = engine(&yaml).await;
    engine.submit(&tank(), Sample::new(12.0)).await.unwrap();
    assert_ok!(engine.suppress(&tank()).await);
    let before = engine.condition(&tank()).await.unwrap();
    engine.save_snapshot().await.unwrap();
    engine.shutdown().await;

    let engine = self::engine(&yaml).await;
    let after = engine.condition(&tank()).await.unwrap();
    assert_eq!(after.event_id, before.event_id);
    assert_eq!(after.activation, before.activation);
    assert_eq!(after.ack, AckState::Unacknowledged);
    assert!(after.suppressed);

    let mut feed = engine.subscribe(SubscriptionFilter::all());
    assert_ok!(engine.acknowledge(&tank(), after.event_id, None).await);
    let events = events(&mut feed);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].sequence, 3, "numbering continues after restart");
    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_timed_shelve_expires_once_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("conditions.json");
    let yaml = format!("{}persistence:\n  path: {}\n", TANKS, path.display());

    let engine = engine(&yaml).await;
    assert_ok!(engine.timed_shelve(&tank(), ChronoDuration::seconds(5)).await);
    engine.save_snapshot().await.unwrap();
    engine.shutdown().await;

    let engine = self::engine(&yaml).await;
    let mut feed = engine.subscribe(SubscriptionFilter::all());
    let restored = engine.condition(&tank()).await.unwrap();
    assert!(restored.shelving.unshelve_time().is_some());

    tokio::time::sleep(Duration::from_secs(10)).await;
    tokio::time::sleep(Duration::from_secs(30)).await;

    let events = events(&mut feed);
    assert_eq!(events.len(), 1, "{:?}", events);
    assert_eq!(events[0].kind, EventKind::Unshelved(UnshelveCause::Expired));
    assert_eq!(events[0].sequence, 2);
    assert!(!engine.condition(&tank()).await.unwrap().shelving.is_shelved());
    engine.shutdown().await;
}
