//! Console actor tests
//!
//! Run the tokio console against an auto-acknowledging mock broker and observe
//! the notification stream end to end.


use mqtt_console::config::ConfigSource;
use mqtt_console::console::{Console, ConsoleHandle};
use mqtt_console::error::{ActionError, ConnectionError, ConsoleError};
use mqtt_console::session::{ConnectionState, ConsoleNotification, Timings};
use mqtt_console::testing::{BrokerCall, MockConnector};
use mqtt_console::transport::BrokerEvent;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinHandle;

type Notifications = UnboundedReceiver<ConsoleNotification>;

fn sample_file() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{}", test_helpers::SAMPLE_DOC).unwrap();
    file
}

fn spawn_console(broker: MockConnector) -> (ConsoleHandle, JoinHandle<()>, Notifications) {
    let (notifications, rx) = mpsc::unbounded_channel();
    let (handle, task) = Console::spawn(broker, notifications, Timings::default());
    (handle, task, rx)
}

/// Collect notifications up to and including the first one matching `predicate`
async fn wait_for(
    rx: &mut Notifications,
    predicate: impl Fn(&ConsoleNotification) -> bool,
) -> Vec<ConsoleNotification> {
    let mut seen = Vec::new();
    loop {
        let notification = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("notification within timeout")
            .expect("console still running");
        let done = predicate(&notification);
        seen.push(notification);
        if done {
            return seen;
        }
    }
}

async fn load_and_connect(
    console: &ConsoleHandle,
    rx: &mut Notifications,
    file: &NamedTempFile,
) {
    console
        .load(ConfigSource::File(file.path().to_path_buf()))
        .await
        .unwrap();
    wait_for(rx, |n| matches!(n, ConsoleNotification::ConfigLoaded { .. })).await;
    console.connect().await.unwrap();
    wait_for(rx, |n| matches!(n, ConsoleNotification::Connected)).await;
}

#[tokio::test]
async fn test_load_reports_items_and_broker_summary() {
    let file = sample_file();
    let (console, _task, mut rx) = spawn_console(MockConnector::new());

    console
        .load(ConfigSource::File(file.path().to_path_buf()))
        .await
        .unwrap();
    let seen = wait_for(&mut rx, |n| matches!(n, ConsoleNotification::ConfigLoaded { .. })).await;

    match seen.last() {
        Some(ConsoleNotification::ConfigLoaded { items, broker }) => {
            assert_eq!(*items, 2);
            assert!(broker.starts_with("mqtt://localhost:9001"));
            assert!(broker.contains("clientId c1"));
        }
        other => panic!("unexpected notification: {other:?}"),
    }
}

#[tokio::test]
async fn test_missing_file_reports_load_failure() {
    let (console, _task, mut rx) = spawn_console(MockConnector::new());

    console
        .load(ConfigSource::parse("/nonexistent/ui_setup.json"))
        .await
        .unwrap();
    let seen = wait_for(&mut rx, |n| matches!(n, ConsoleNotification::ConfigFailed(_))).await;

    match seen.last() {
        Some(ConsoleNotification::ConfigFailed(reason)) => {
            assert!(reason.starts_with("Load failed: /nonexistent/ui_setup.json"));
        }
        other => panic!("unexpected notification: {other:?}"),
    }
    assert!(console.snapshot().await.unwrap().broker.is_none());
}

#[tokio::test]
async fn test_connect_before_load_is_rejected() {
    let (console, _task, _rx) = spawn_console(MockConnector::new());

    let error = console.connect().await.unwrap_err();
    assert!(matches!(
        error,
        ConsoleError::Connection(ConnectionError::NoConfiguration)
    ));
}

#[tokio::test]
async fn test_publish_round_trip() {
    let file = sample_file();
    let broker = MockConnector::new().auto_connect().auto_ack();
    let (console, _task, mut rx) = spawn_console(broker.clone());
    load_and_connect(&console, &mut rx, &file).await;

    console.trigger(1).await.unwrap();
    let seen = wait_for(&mut rx, |n| matches!(n, ConsoleNotification::ItemReady(1))).await;

    assert_eq!(
        seen,
        vec![
            ConsoleNotification::ItemPublished(1),
            ConsoleNotification::ItemFlashCleared(1),
            ConsoleNotification::ItemReady(1)
        ]
    );
    assert!(matches!(
        broker.calls().as_slice(),
        [BrokerCall::Publish { topic, payload, .. }] if topic == "room/ac" && payload == "cool"
    ));
}

#[tokio::test]
async fn test_burst_of_triggers_publishes_once() {
    let file = sample_file();
    let broker = MockConnector::new().auto_connect();
    let (console, _task, mut rx) = spawn_console(broker.clone());
    load_and_connect(&console, &mut rx, &file).await;

    for _ in 0..5 {
        console.trigger(1).await.unwrap();
    }
    assert_eq!(broker.calls().len(), 1);

    let snapshot = console.snapshot().await.unwrap();
    assert!(snapshot.items[1].processing);
}

#[tokio::test]
async fn test_subscribe_then_receive_message() {
    let file = sample_file();
    let broker = MockConnector::new().auto_connect().auto_ack();
    let (console, _task, mut rx) = spawn_console(broker.clone());
    load_and_connect(&console, &mut rx, &file).await;

    console.trigger(0).await.unwrap();
    wait_for(&mut rx, |n| matches!(n, ConsoleNotification::ItemSubscribed(0))).await;

    let link = broker.last_link().unwrap();
    assert!(broker.emit(
        link,
        BrokerEvent::Message {
            topic: "room/temp".to_string(),
            payload: "22.5".into(),
        }
    ));
    let seen = wait_for(&mut rx, |n| matches!(n, ConsoleNotification::ItemMessage { .. })).await;
    assert_eq!(
        seen.last(),
        Some(&ConsoleNotification::ItemMessage {
            index: 0,
            payload: "22.5".to_string()
        })
    );

    wait_for(&mut rx, |n| matches!(n, ConsoleNotification::ItemMessageCleared(0))).await;

    let snapshot = console.snapshot().await.unwrap();
    assert_eq!(snapshot.state, ConnectionState::Connected);
    assert!(snapshot.items[0].subscribed);
}

#[tokio::test]
async fn test_trigger_while_disconnected_returns_error() {
    let file = sample_file();
    let (console, _task, mut rx) = spawn_console(MockConnector::new());
    console
        .load(ConfigSource::File(file.path().to_path_buf()))
        .await
        .unwrap();
    wait_for(&mut rx, |n| matches!(n, ConsoleNotification::ConfigLoaded { .. })).await;

    let error = console.trigger(1).await.unwrap_err();
    assert!(matches!(
        error,
        ConsoleError::Action(ActionError::NotConnected {
            state: ConnectionState::Idle
        })
    ));
}

#[tokio::test]
async fn test_toggle_connects_then_disconnects() {
    let file = sample_file();
    let broker = MockConnector::new().auto_connect();
    let (console, _task, mut rx) = spawn_console(broker.clone());
    console
        .load(ConfigSource::File(file.path().to_path_buf()))
        .await
        .unwrap();
    wait_for(&mut rx, |n| matches!(n, ConsoleNotification::ConfigLoaded { .. })).await;

    console.toggle_connection().await.unwrap();
    wait_for(&mut rx, |n| matches!(n, ConsoleNotification::Connected)).await;

    // Let the guard window pass
    tokio::time::sleep(Duration::from_millis(600)).await;
    console.toggle_connection().await.unwrap();
    wait_for(&mut rx, |n| matches!(n, ConsoleNotification::Disconnected)).await;

    assert_eq!(broker.ended().len(), 1);
}

#[tokio::test]
async fn test_shutdown_closes_link_and_stops() {
    let file = sample_file();
    let broker = MockConnector::new().auto_connect();
    let (console, task, mut rx) = spawn_console(broker.clone());
    load_and_connect(&console, &mut rx, &file).await;

    console.shutdown().await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("console stops")
        .unwrap();

    assert_eq!(broker.ended().len(), 1);
    assert!(matches!(
        console.snapshot().await,
        Err(ConsoleError::ConsoleClosed)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_idle_cue_fires_after_timeout() {
    let file = sample_file();
    let broker = MockConnector::new().auto_connect();
    let (console, _task, mut rx) = spawn_console(broker.clone());
    load_and_connect(&console, &mut rx, &file).await;

    let started = tokio::time::Instant::now();
    let link = broker.last_link().unwrap();
    assert!(broker.emit(link, BrokerEvent::Reconnecting));
    let seen = wait_for(&mut rx, |n| matches!(n, ConsoleNotification::ReconnectIdle)).await;

    assert_eq!(seen.first(), Some(&ConsoleNotification::Reconnecting));
    assert!(started.elapsed() >= Duration::from_millis(500));
    assert_eq!(
        console.snapshot().await.unwrap().state,
        ConnectionState::Reconnecting
    );
}
