//! Per-channel FIFO delivery for every transport the factory creates.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use url::Url;

use scenelink_transport::{Channel, ContextFactory, ContextKind, ContextOptions, MockChannel, ScriptCatalog};

const COUNT: i64 = 50;

/// A tool that sends `0..COUNT` on connect and echoes everything it
/// receives. Messages carry the tool's `channel` parameter, since every frame
/// channel hears all posts to the host window.
fn echo_catalog() -> ScriptCatalog {
    ScriptCatalog::new().with_entry("/echo.js", |launch| {
        let name = launch.query_param("channel").unwrap_or_default();
        let globals = launch.globals.clone();
        let channel = Arc::new(launch.connect("*").unwrap());
        for i in 0..COUNT {
            channel.send(json!({ "from": name, "hello": i })).unwrap();
        }
        let replier = Arc::downgrade(&channel);
        channel
            .on_message(move |message| {
                if let Some(replier) = replier.upgrade() {
                    let _ = replier.send(json!({ "from": name, "echo": message }));
                }
            })
            .unwrap();
        globals.keep(channel);
    })
}

fn factory() -> ContextFactory {
    ContextFactory::new(Url::parse("http://localhost:8080/").unwrap(), echo_catalog())
}

fn options(name: &str) -> ContextOptions {
    ContextOptions::new(format!("/echo.js?channel={name}"))
}

fn expected(name: &str) -> Vec<Value> {
    (0..COUNT)
        .map(|i| json!({ "from": name, "hello": i }))
        .chain((0..COUNT).map(|i| json!({ "from": name, "echo": i })))
        .collect()
}

async fn collect(rx: &mut mpsc::UnboundedReceiver<Value>, count: usize) -> Vec<Value> {
    let mut received = Vec::with_capacity(count);
    while received.len() < count {
        match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
            Ok(Some(message)) => received.push(message),
            _ => break,
        }
    }
    received
}

/// Send `0..COUNT` and collect what `name` sent back, in arrival order.
async fn round_trip(channel: Channel, name: String) -> Vec<Value> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let own = name.clone();
    channel
        .on_message(move |message| {
            if message["from"] == own.as_str() {
                let _ = tx.send(message);
            }
        })
        .unwrap();
    for i in 0..COUNT {
        channel.send(json!(i)).unwrap();
    }
    collect(&mut rx, expected(&name).len()).await
}

/// Launch `count` echo tools of `kind` at once and round-trip all of them
/// concurrently.
async fn round_trip_many(kind: ContextKind, count: usize) {
    let factory = factory();
    let names: Vec<String> = (0..count).map(|i| format!("echo{i}")).collect();
    let channels: Vec<Channel> = names
        .iter()
        .map(|name| factory.create(kind, &options(name)).unwrap())
        .collect();

    let tasks: Vec<_> = channels
        .into_iter()
        .zip(names.iter().cloned())
        .map(|(channel, name)| tokio::spawn(round_trip(channel, name)))
        .collect();
    for (task, name) in tasks.into_iter().zip(&names) {
        assert_eq!(task.await.unwrap(), expected(name), "{kind} {name}");
    }
}

#[tokio::test]
async fn test_worker_is_fifo() {
    let factory = factory();
    let channel = factory
        .create(ContextKind::Worker, &options("echo"))
        .unwrap();
    assert_eq!(round_trip(channel, "echo".into()).await, expected("echo"));
}

#[tokio::test]
async fn test_frame_is_fifo() {
    let factory = factory();
    let channel = factory
        .create(ContextKind::Frame, &options("echo"))
        .unwrap();
    assert_eq!(round_trip(channel, "echo".into()).await, expected("echo"));
}

#[tokio::test]
async fn test_dynamic_script_is_fifo() {
    let factory = factory();
    let channel = factory
        .create(ContextKind::DynamicScript, &options("echo"))
        .unwrap();
    assert_eq!(round_trip(channel, "echo".into()).await, expected("echo"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_workers_are_fifo_on_worker_threads() {
    round_trip_many(ContextKind::Worker, 8).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_frames_are_fifo_on_worker_threads() {
    round_trip_many(ContextKind::Frame, 8).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_dynamic_scripts_are_fifo_on_worker_threads() {
    round_trip_many(ContextKind::DynamicScript, 8).await;
}

#[test]
fn test_linked_mocks_are_fifo() {
    let (host, tool) = MockChannel::linked();
    let (host, tool) = (Channel::Mock(host), Arc::new(Channel::Mock(tool)));
    let replier = Arc::clone(&tool);
    tool.on_message(move |message| {
        let _ = replier.send(json!({ "echo": message }));
    })
    .unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    host.on_message(move |message| sink.lock().unwrap().push(message))
        .unwrap();
    for i in 0..COUNT {
        host.send(json!(i)).unwrap();
    }

    let seen = seen.lock().unwrap();
    assert_eq!(*seen, (0..COUNT).map(|i| json!({ "echo": i })).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_detached_frame_reports_missing_window() {
    let factory = factory();
    let channel = factory
        .create(ContextKind::Frame, &options("echo"))
        .unwrap();
    let Channel::Embedded(embedded) = &channel else {
        panic!("expected an embedded channel, got {channel:?}");
    };
    embedded.frame().detach();
    assert!(matches!(
        channel.send(json!("late")),
        Err(scenelink_transport::TransportError::NoContentWindow)
    ));
}
