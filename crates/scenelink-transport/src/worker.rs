//! Background-thread channels.
//!
//! [`WorkerChannel`] is the host's handle on a worker thread;
//! [`WorkerScopeChannel`] is what code running inside the thread uses to talk
//! back. Both directions are asynchronous: a send queues into the other
//! context's inbox and returns immediately.

use serde_json::Value;
use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::context::{spawn_context, Globals};
use crate::error::TransportError;
use crate::port::{lock, Callback, MessagePort};

/// Host side of a worker thread.
pub struct WorkerChannel {
    name: String,
    /// Messages posted by the worker land here.
    inbox: Arc<MessagePort>,
    /// The worker's own scope, owned by the worker thread.
    scope: Weak<MessagePort>,
    shutdown: CancellationToken,
    thread: Mutex<Option<JoinHandle<()>>>,
}

/// Worker side of a worker thread.
pub struct WorkerScopeChannel {
    scope: Arc<MessagePort>,
    host: Weak<MessagePort>,
}

impl WorkerChannel {
    /// Start a worker thread and run `setup` inside it with the worker side
    /// of the channel and the thread's globals.
    pub fn spawn<F>(name: impl Into<String>, setup: F) -> Result<Self, TransportError>
    where
        F: FnOnce(WorkerScopeChannel, Globals) + Send + 'static,
    {
        let name = name.into();
        let inbox = MessagePort::new(format!("worker {} (host side)", name));
        let scope = MessagePort::new(format!("worker {}", name));
        let shutdown = CancellationToken::new();

        let worker_side = WorkerScopeChannel {
            scope: Arc::clone(&scope),
            host: Arc::downgrade(&inbox),
        };
        let weak_scope = Arc::downgrade(&scope);

        let thread = spawn_context(
            format!("worker-{}", name),
            shutdown.clone(),
            vec![scope],
            move |globals| setup(worker_side, globals),
        )?;
        debug!(worker = %name, "Spawned worker thread");

        Ok(Self {
            name,
            inbox,
            scope: weak_scope,
            shutdown,
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn send(&self, message: Value) -> Result<(), TransportError> {
        let scope = self.scope.upgrade().ok_or(TransportError::PeerGone)?;
        scope.post(message)
    }

    pub fn set_receive_callback(&self, callback: Callback) -> Result<(), TransportError> {
        if self.inbox.set_onmessage(callback)?.is_some() {
            warn!(worker = %self.name, "Changing receive callback");
        }
        Ok(())
    }

    /// Stop the worker thread. Further sends fail with `PeerGone` once the
    /// thread has exited.
    pub fn terminate(&self) {
        self.shutdown.cancel();
    }

    /// Stop the worker thread and wait for it to exit.
    pub fn join(&self) {
        self.terminate();
        if let Some(thread) = lock(&self.thread).take() {
            if thread.join().is_err() {
                warn!(worker = %self.name, "Worker thread panicked");
            }
        }
    }
}

impl Drop for WorkerChannel {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl WorkerScopeChannel {
    pub fn send(&self, message: Value) -> Result<(), TransportError> {
        let host = self.host.upgrade().ok_or(TransportError::PeerGone)?;
        host.post(message)
    }

    pub fn set_receive_callback(&self, callback: Callback) -> Result<(), TransportError> {
        if self.scope.set_onmessage(callback)?.is_some() {
            warn!(port = %self.scope.label(), "Changing receive callback");
        }
        Ok(())
    }
}
