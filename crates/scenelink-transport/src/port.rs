//! Inbound message queue of a single execution context.
//!
//! A `MessagePort` is the Rust stand-in for the `message` event target of a
//! thread or document: other contexts post into it, and a pump task running on
//! the owning context's runtime hands each message to the installed handlers.
//! Messages posted before the first handler exists stay queued.

use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::TransportError;

/// Handler invoked for every message delivered to a context.
pub type Callback = Arc<dyn Fn(Value) + Send + Sync>;

/// Identifies a listener added with [`MessagePort::add_listener`].
pub type ListenerId = u64;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct Handlers {
    /// The single `onmessage` slot.
    onmessage: Option<Callback>,
    /// Additional listeners, in registration order.
    listeners: Vec<(ListenerId, Callback)>,
    next_listener: ListenerId,
}

impl Handlers {
    fn targets(&self) -> Vec<Callback> {
        self.onmessage
            .iter()
            .cloned()
            .chain(self.listeners.iter().map(|(_, cb)| Arc::clone(cb)))
            .collect()
    }
}

/// Inbox of one execution context.
pub struct MessagePort {
    label: String,
    sender: mpsc::UnboundedSender<Value>,
    /// Taken by the pump task once the first handler is installed. The pump
    /// never runs without a handler until the port is cleared.
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Value>>>,
    handlers: Arc<RwLock<Handlers>>,
}

impl MessagePort {
    pub fn new(label: impl Into<String>) -> Arc<Self> {
        let (sender, receiver) = mpsc::unbounded_channel();
        Arc::new(Self {
            label: label.into(),
            sender,
            receiver: Mutex::new(Some(receiver)),
            handlers: Arc::new(RwLock::new(Handlers::default())),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Queue a message for this context.
    ///
    /// Fails only when the context's runtime has shut down and dropped the
    /// pump.
    pub fn post(&self, message: Value) -> Result<(), TransportError> {
        self.sender
            .send(message)
            .map_err(|_| TransportError::PeerGone)
    }

    /// Replace the `onmessage` handler, returning the previous one.
    ///
    /// The handler is in place before the pump starts, so messages queued
    /// earlier are delivered to it.
    pub fn set_onmessage(&self, callback: Callback) -> Result<Option<Callback>, TransportError> {
        let previous = write(&self.handlers).onmessage.replace(callback);
        if let Err(e) = self.start() {
            write(&self.handlers).onmessage = previous;
            return Err(e);
        }
        Ok(previous)
    }

    /// Add a listener next to the `onmessage` handler.
    pub fn add_listener(&self, callback: Callback) -> Result<ListenerId, TransportError> {
        let id = self.register_listener(callback);
        if let Err(e) = self.start() {
            self.remove_listener(id);
            return Err(e);
        }
        Ok(id)
    }

    /// Add a listener without starting the pump. Messages stay queued until
    /// [`MessagePort::start`] runs.
    pub(crate) fn register_listener(&self, callback: Callback) -> ListenerId {
        let mut handlers = write(&self.handlers);
        let id = handlers.next_listener;
        handlers.next_listener += 1;
        handlers.listeners.push((id, callback));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) {
        write(&self.handlers).listeners.retain(|(listener, _)| *listener != id);
    }

    /// Drop every handler. Called when the owning context is torn down, which
    /// also releases whatever the handlers captured.
    pub fn clear(&self) {
        let mut handlers = write(&self.handlers);
        handlers.onmessage = None;
        handlers.listeners.clear();
        debug!(port = %self.label, "Cleared message handlers");
    }

    /// Start the pump on the caller's runtime if it is not running yet.
    pub(crate) fn start(&self) -> Result<(), TransportError> {
        let mut slot = lock(&self.receiver);
        if slot.is_none() {
            return Ok(());
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| TransportError::NoRuntime(self.label.clone()))?;
        let Some(mut receiver) = slot.take() else {
            return Ok(());
        };

        let handlers = Arc::clone(&self.handlers);
        let label = self.label.clone();
        runtime.spawn(async move {
            while let Some(message) = receiver.recv().await {
                let targets = read(&handlers).targets();
                if targets.is_empty() {
                    trace!(port = %label, "Handlers cleared, message dropped");
                }
                for target in targets {
                    target(message.clone());
                }
            }
            debug!(port = %label, "Message port closed");
        });
        debug!(port = %self.label, "Started message pump");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn collector() -> (Callback, mpsc::UnboundedReceiver<Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(move |message| { let _ = tx.send(message); }), rx)
    }

    #[tokio::test]
    async fn test_messages_posted_before_handler_are_kept() {
        let port = MessagePort::new("test");
        port.post(json!(1)).unwrap();
        port.post(json!(2)).unwrap();

        let (callback, mut rx) = collector();
        assert!(port.set_onmessage(callback).unwrap().is_none());
        port.post(json!(3)).unwrap();

        for expected in 1..=3 {
            let received = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
            assert_eq!(received, Some(json!(expected)));
        }
    }

    #[tokio::test]
    async fn test_listeners_and_onmessage_both_receive() {
        let port = MessagePort::new("test");
        let (first, mut first_rx) = collector();
        let (second, mut second_rx) = collector();
        port.set_onmessage(first).unwrap();
        let id = port.add_listener(second).unwrap();

        port.post(json!("hello")).unwrap();
        assert_eq!(first_rx.recv().await, Some(json!("hello")));
        assert_eq!(second_rx.recv().await, Some(json!("hello")));

        port.remove_listener(id);
        port.post(json!("again")).unwrap();
        assert_eq!(first_rx.recv().await, Some(json!("again")));
        assert!(second_rx.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_queued_messages_reach_first_handler_on_worker_threads() {
        for round in 0..50 {
            let port = MessagePort::new(format!("round {round}"));
            for i in 0..20 {
                port.post(json!(i)).unwrap();
            }
            let (callback, mut rx) = collector();
            port.set_onmessage(callback).unwrap();

            for expected in 0..20 {
                let received = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
                assert_eq!(received, Some(json!(expected)), "round {round}");
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_queued_messages_reach_first_listener_on_worker_threads() {
        for round in 0..50 {
            let port = MessagePort::new(format!("round {round}"));
            port.post(json!("early")).unwrap();
            let (callback, mut rx) = collector();
            port.add_listener(callback).unwrap();

            let received = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
            assert_eq!(received, Some(json!("early")), "round {round}");
        }
    }

    #[tokio::test]
    async fn test_registered_listener_waits_for_start() {
        let port = MessagePort::new("deferred");
        let (callback, mut rx) = collector();
        port.register_listener(callback);
        port.post(json!("queued")).unwrap();
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());

        port.start().unwrap();
        assert_eq!(rx.recv().await, Some(json!("queued")));
    }

    #[test]
    fn test_failed_wiring_leaves_no_handler() {
        let port = MessagePort::new("orphan");
        let (callback, _rx) = collector();
        assert!(port.add_listener(callback).is_err());
        assert!(read(&port.handlers).targets().is_empty());
    }

    #[test]
    fn test_handler_outside_runtime_fails() {
        let port = MessagePort::new("orphan");
        let (callback, _rx) = collector();
        let result = port.set_onmessage(callback);
        assert!(matches!(result, Err(TransportError::NoRuntime(label)) if label == "orphan"));
    }
}
