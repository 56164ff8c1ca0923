//! Engine integration tests over the in-memory message bus.
//!
//! Covers the trigger scenarios end to end: ingestion, detection, command
//! dispatch, per-topic serialization and outcome reporting.

#![allow(clippy::unwrap_used)] // Test code can use unwrap
#![allow(clippy::expect_used)] // Test code can use expect
#![allow(clippy::panic)] // Test code can panic on unexpected variants
#![allow(missing_docs)]

use mq_listener_core::environment::Clock;
use mq_listener_core::{
    DispatchResult, FieldType, FieldValue, Listener, MessageBus, MessageBusError, OutcomeReport,
    Position, Record,
};
use mq_listener_runtime::{Engine, EngineError, Handled, Reporter};
use mq_listener_testing::helpers::{init_tracing, json_record};
use mq_listener_testing::{InMemoryMessageBus, ListenerBuilder, MockRunner, test_clock};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

const REPORT_TOPIC: &str = "MQ_LISTENER";
const REPORT_KEY: &str = "MQ_LISTENER_EDGE";

fn engine_with(
    listeners: Vec<Listener>,
    runner: &MockRunner,
) -> (Engine, Arc<InMemoryMessageBus>) {
    init_tracing();
    let bus = Arc::new(InMemoryMessageBus::new());
    let reporter = Reporter::new(
        Arc::clone(&bus) as Arc<dyn MessageBus>,
        REPORT_TOPIC,
        REPORT_KEY,
    );
    let engine = Engine::new(
        listeners,
        Arc::new(runner.clone()),
        reporter,
        Arc::new(test_clock()),
    );
    (engine, bus)
}

fn sensor_listener() -> Listener {
    ListenerBuilder::new("sensor")
        .by_value("temp")
        .field("temp", FieldType::Float)
        .field("unit", FieldType::String)
        .cmd("notify.sh --celsius")
        .build()
}

async fn outcome(handled: Handled) -> OutcomeReport {
    match handled {
        Handled::Dispatched(handle) => handle.await.expect("dispatch task panicked"),
        other => panic!("expected a dispatch, got {other:?}"),
    }
}

#[tokio::test]
async fn field_changes_trigger_with_typed_argument() {
    let runner = MockRunner::new();
    let (engine, _bus) = engine_with(vec![sensor_listener()], &runner);

    let first = engine
        .handle(json_record("sensor", "dev-1", &json!({"temp": 20.0})))
        .await;
    let report = outcome(first).await;
    assert_eq!(report.cmd, "notify.sh --celsius 20");

    let repeat = engine
        .handle(json_record("sensor", "dev-1", &json!({"temp": 20.0, "unit": "C"})))
        .await;
    assert!(matches!(repeat, Handled::Idle));

    let change = engine
        .handle(json_record("sensor", "dev-1", &json!({"temp": 21.5})))
        .await;
    let report = outcome(change).await;
    assert_eq!(report.cmd, "notify.sh --celsius 21.5");

    assert_eq!(
        runner.rendered_calls(),
        vec!["notify.sh --celsius 20", "notify.sh --celsius 21.5"]
    );
}

#[tokio::test]
async fn key_rule_fires_on_key_change_only() {
    let runner = MockRunner::new();
    let listener = ListenerBuilder::new("devices").by_key().cmd("on-device").build();
    let (engine, _bus) = engine_with(vec![listener], &runner);

    let report = outcome(engine.handle(Record::new("devices", "a", b"x".to_vec())).await).await;
    assert_eq!(report.cmd, "on-device a");

    let same = engine.handle(Record::new("devices", "a", b"y".to_vec())).await;
    assert!(matches!(same, Handled::Idle));

    let report = outcome(engine.handle(Record::new("devices", "b", b"y".to_vec())).await).await;
    assert_eq!(report.cmd, "on-device b");
}

#[tokio::test]
async fn received_rule_fires_even_when_decode_fails() {
    let runner = MockRunner::new();
    let listener = ListenerBuilder::new("sensor")
        .by_value("temp")
        .on_received()
        .field("temp", FieldType::Float)
        .cmd("log.sh")
        .build();
    let (engine, _bus) = engine_with(vec![listener], &runner);

    let report = outcome(
        engine
            .handle(json_record("sensor", "k", &json!({"temp": 3.5})))
            .await,
    )
    .await;
    assert_eq!(report.cmd, "log.sh 3.5");

    // The previously merged value is used for the argument.
    let report = outcome(
        engine
            .handle(Record::new("sensor", "k", b"not json".to_vec()))
            .await,
    )
    .await;
    assert_eq!(report.cmd, "log.sh 3.5");
    assert_eq!(runner.call_count(), 2);
}

#[tokio::test]
async fn decode_failure_does_not_trigger_field_rule() {
    let runner = MockRunner::new();
    let (engine, _bus) = engine_with(vec![sensor_listener()], &runner);

    let _ = outcome(
        engine
            .handle(json_record("sensor", "k", &json!({"temp": 5.0})))
            .await,
    )
    .await;

    let bad = engine
        .handle(json_record("sensor", "k", &json!({"temp": "hot"})))
        .await;
    assert!(matches!(bad, Handled::Idle));

    let temp = engine
        .topic_state("sensor", |state| state.current_field("temp").cloned())
        .await
        .flatten();
    assert_eq!(temp, Some(FieldValue::Float(5.0)));
}

#[tokio::test]
async fn raw_topics_trigger_on_payload_change() {
    let runner = MockRunner::new();
    let listener = ListenerBuilder::new("blob").by_raw_value().raw().cmd("sync.sh").build();
    let (engine, _bus) = engine_with(vec![listener], &runner);

    let report = outcome(engine.handle(Record::new("blob", "k", b"v1".to_vec())).await).await;
    // No field configured: the argument is empty.
    assert_eq!(report.cmd, "sync.sh ");
    assert_eq!(report.field_name, "");

    let same = engine.handle(Record::new("blob", "other", b"v1".to_vec())).await;
    assert!(matches!(same, Handled::Idle));

    let _ = outcome(engine.handle(Record::new("blob", "k", b"v2".to_vec())).await).await;
    assert_eq!(runner.call_count(), 2);
}

#[tokio::test]
async fn unconfigured_topics_are_ignored() {
    let runner = MockRunner::new();
    let (engine, _bus) = engine_with(vec![sensor_listener()], &runner);

    let handled = engine
        .handle(json_record("unknown", "k", &json!({"temp": 1.0})))
        .await;
    assert!(matches!(handled, Handled::Ignored));
    assert!(engine.topic_state("unknown", |_| ()).await.is_none());
    assert_eq!(runner.call_count(), 0);
}

#[tokio::test]
async fn redelivered_positions_are_dropped() {
    let runner = MockRunner::new();
    let listener = ListenerBuilder::new("devices").by_key().on_received().build();
    let (engine, _bus) = engine_with(vec![listener], &runner);

    let record = Record::new("devices", "a", Vec::new()).with_position(Position::new(0, 7));
    let _ = outcome(engine.handle(record.clone()).await).await;

    let again = engine.handle(record).await;
    assert!(matches!(again, Handled::Duplicate));

    let older = Record::new("devices", "a", Vec::new()).with_position(Position::new(0, 3));
    assert!(matches!(engine.handle(older).await, Handled::Duplicate));

    let other_partition = Record::new("devices", "a", Vec::new()).with_position(Position::new(1, 0));
    let _ = outcome(engine.handle(other_partition).await).await;
    assert_eq!(runner.call_count(), 2);
}

#[tokio::test]
async fn dispatches_for_one_topic_are_serialized() {
    let runner = MockRunner::new().with_delay(Duration::from_millis(30));
    let listener = ListenerBuilder::new("devices").by_key().on_received().cmd("slow").build();
    let (engine, _bus) = engine_with(vec![listener], &runner);

    let mut handles = Vec::new();
    for key in ["a", "b", "c", "d"] {
        if let Handled::Dispatched(handle) = engine.handle(Record::new("devices", key, Vec::new())).await {
            handles.push(handle);
        }
    }
    assert_eq!(handles.len(), 4);
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(runner.call_count(), 4);
    assert_eq!(runner.max_concurrency(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn dispatches_for_one_topic_run_in_ingestion_order() {
    for _ in 0..50 {
        let runner = MockRunner::new().with_delay(Duration::from_millis(1));
        let listener = ListenerBuilder::new("devices").by_key().on_received().cmd("run").build();
        let (engine, _bus) = engine_with(vec![listener], &runner);

        let mut handles = Vec::new();
        for key in 1..=6 {
            if let Handled::Dispatched(handle) =
                engine.handle(Record::new("devices", key.to_string(), Vec::new())).await
            {
                handles.push(handle);
            }
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let expected: Vec<String> = (1..=6).map(|key| format!("run {key}")).collect();
        assert_eq!(runner.rendered_calls(), expected);
        assert_eq!(runner.max_concurrency(), 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn last_field_value_is_dispatched_last() {
    let runner = MockRunner::new().with_delay(Duration::from_millis(2));
    let (engine, _bus) = engine_with(vec![sensor_listener()], &runner);

    let mut handles = Vec::new();
    for temp in [20.0, 21.5, 23.0, 19.5] {
        let record = json_record("sensor", "probe-1", &json!({ "temp": temp }));
        if let Handled::Dispatched(handle) = engine.handle(record).await {
            handles.push(handle);
        }
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(
        runner.rendered_calls(),
        vec![
            "notify.sh --celsius 20",
            "notify.sh --celsius 21.5",
            "notify.sh --celsius 23",
            "notify.sh --celsius 19.5",
        ]
    );
}

#[tokio::test]
async fn dispatches_for_different_topics_run_concurrently() {
    let runner = MockRunner::new().with_delay(Duration::from_millis(50));
    let listeners = vec![
        ListenerBuilder::new("one").by_key().on_received().cmd("slow").build(),
        ListenerBuilder::new("two").by_key().on_received().cmd("slow").build(),
    ];
    let (engine, _bus) = engine_with(listeners, &runner);

    let first = engine.handle(Record::new("one", "k", Vec::new())).await;
    let second = engine.handle(Record::new("two", "k", Vec::new())).await;
    let _ = outcome(first).await;
    let _ = outcome(second).await;

    assert_eq!(runner.max_concurrency(), 2);
}

#[tokio::test]
async fn outcomes_are_published_to_the_reporting_topic() {
    let runner = MockRunner::new().failing("alarm.sh");
    let listener = ListenerBuilder::new("tank")
        .by_value("level")
        .field("level", FieldType::Int)
        .cmd("alarm.sh")
        .build();
    let (engine, bus) = engine_with(vec![listener], &runner);

    let report = outcome(
        engine
            .handle(json_record("tank", "t1", &json!({"level": 9})))
            .await,
    )
    .await;
    assert_eq!(report.result, DispatchResult::Failed);
    assert_eq!(report.finished_at, test_clock().now());

    let published = bus.published(REPORT_TOPIC);
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].key, REPORT_KEY);

    let json: serde_json::Value = serde_json::from_slice(&published[0].value).unwrap();
    assert_eq!(json["listen_topic"], "tank");
    assert_eq!(json["on_event"], "updated");
    assert_eq!(json["where"], "value");
    assert_eq!(json["field_name"], "level");
    assert_eq!(json["cmd"], "alarm.sh 9");
    assert_eq!(json["result"], "FAILED");
    assert_eq!(json["exit_code"], 1);
}

#[tokio::test]
async fn report_publish_failures_are_dropped() {
    let runner = MockRunner::new();
    let (engine, bus) = engine_with(vec![sensor_listener()], &runner);
    bus.fail_publishes(true);

    let report = outcome(
        engine
            .handle(json_record("sensor", "k", &json!({"temp": 1.0})))
            .await,
    )
    .await;
    assert_eq!(report.result, DispatchResult::Succeed);
    assert!(bus.published(REPORT_TOPIC).is_empty());

    // Ingestion keeps working after a failed report.
    bus.fail_publishes(false);
    let _ = outcome(
        engine
            .handle(json_record("sensor", "k", &json!({"temp": 2.0})))
            .await,
    )
    .await;
    assert_eq!(bus.published(REPORT_TOPIC).len(), 1);
}

#[tokio::test]
async fn run_consumes_until_shutdown() {
    let runner = MockRunner::new();
    let listeners = vec![
        sensor_listener(),
        ListenerBuilder::new(REPORT_TOPIC).on_received().build(),
    ];
    let (engine, bus) = engine_with(listeners, &runner);
    assert_eq!(engine.subscribed_topics(), vec!["sensor"]);

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let task = {
        let engine = engine.clone();
        let bus = Arc::clone(&bus);
        tokio::spawn(async move {
            engine
                .run(bus.as_ref(), async {
                    let _ = stop_rx.await;
                })
                .await
        })
    };

    bus.wait_for_subscribers(1).await;
    bus.publish("sensor", "k", br#"{"temp": 10.0}"#).await.unwrap();
    bus.inject_error(MessageBusError::TransportError("connection reset".to_string()));
    bus.publish("sensor", "k", br#"{"temp": 11.0}"#).await.unwrap();

    let reports = tokio::time::timeout(
        Duration::from_secs(5),
        bus.wait_for_published(REPORT_TOPIC, 2),
    )
    .await
    .expect("reports were not published");
    assert_eq!(reports.len(), 2);

    stop_tx.send(()).unwrap();
    task.await.unwrap().unwrap();

    // The reporting topic is never consumed, so reports do not loop back.
    assert_eq!(runner.call_count(), 2);
    engine.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn run_stops_when_stream_ends() {
    let runner = MockRunner::new();
    let (engine, bus) = engine_with(vec![sensor_listener()], &runner);

    let task = {
        let engine = engine.clone();
        let bus = Arc::clone(&bus);
        tokio::spawn(async move { engine.run(bus.as_ref(), std::future::pending()).await })
    };

    bus.wait_for_subscribers(1).await;
    bus.close();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn run_reports_subscription_failure() {
    let runner = MockRunner::new();
    let (engine, bus) = engine_with(vec![sensor_listener()], &runner);
    bus.fail_subscriptions(true);

    let result = engine.run(bus.as_ref(), std::future::pending()).await;
    assert!(matches!(result, Err(EngineError::Subscribe(_))));
}

#[tokio::test]
async fn shutdown_times_out_on_slow_dispatches() {
    let runner = MockRunner::new().with_delay(Duration::from_millis(500));
    let listener = ListenerBuilder::new("devices").by_key().on_received().build();
    let (engine, _bus) = engine_with(vec![listener], &runner);

    let handled = engine.handle(Record::new("devices", "a", Vec::new())).await;
    assert!(matches!(handled, Handled::Dispatched(_)));
    assert_eq!(engine.in_flight(), 1);

    let result = engine.shutdown(Duration::from_millis(10)).await;
    assert!(matches!(result, Err(EngineError::ShutdownTimeout(1))));

    engine.shutdown(Duration::from_secs(5)).await.unwrap();
    assert_eq!(engine.in_flight(), 0);
}
