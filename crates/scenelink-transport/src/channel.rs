//! The channel abstraction.
//!
//! A [`Channel`] is a point-to-point, ordered message pipe with one local
//! receive callback and one remote peer. The set of transports is closed, so
//! it is modelled as an enum rather than a trait object.

use serde_json::Value;
use std::fmt;
use std::sync::{Arc, RwLock};
use tracing::warn;

use crate::dynamic::{ScriptChannel, ScriptHostChannel};
use crate::error::TransportError;
use crate::frame::{EmbeddedChannel, ParentChannel};
use crate::port::{read, write, Callback};
use crate::worker::{WorkerChannel, WorkerScopeChannel};

/// Every transport a host or tool can be wired with.
pub enum Channel {
    /// Discards everything.
    Null(NullChannel),
    /// Calls a provided function on send; used in tests.
    Mock(MockChannel),
    /// Host side of a background thread.
    Worker(WorkerChannel),
    /// Thread side of a background thread.
    WorkerScope(WorkerScopeChannel),
    /// Host side of an embedded document.
    Embedded(EmbeddedChannel),
    /// Embedded document talking to its parent.
    Parent(ParentChannel),
    /// Host half of a dynamically loaded script.
    ScriptHost(ScriptHostChannel),
    /// Script half of a dynamically loaded script.
    Script(ScriptChannel),
}

/// Short name of a channel variant, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Null,
    Mock,
    Worker,
    WorkerScope,
    Embedded,
    Parent,
    ScriptHost,
    Script,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChannelKind::Null => "null",
            ChannelKind::Mock => "mock",
            ChannelKind::Worker => "worker",
            ChannelKind::WorkerScope => "worker-scope",
            ChannelKind::Embedded => "embedded",
            ChannelKind::Parent => "parent",
            ChannelKind::ScriptHost => "script-host",
            ChannelKind::Script => "script",
        };
        f.write_str(name)
    }
}

impl Channel {
    /// Queue `message` for the remote callback. Never blocks on the remote
    /// side; there is no acknowledgment.
    pub fn send(&self, message: Value) -> Result<(), TransportError> {
        match self {
            Channel::Null(_) => Ok(()),
            Channel::Mock(c) => {
                c.send(message);
                Ok(())
            }
            Channel::Worker(c) => c.send(message),
            Channel::WorkerScope(c) => c.send(message),
            Channel::Embedded(c) => c.send(message),
            Channel::Parent(c) => c.send(message),
            Channel::ScriptHost(c) => c.send(message),
            Channel::Script(c) => c.send(message),
        }
    }

    /// Install the local receive callback. A second call warns and replaces
    /// the first.
    pub fn set_receive_callback(&self, callback: Callback) -> Result<(), TransportError> {
        match self {
            Channel::Null(_) => Ok(()),
            Channel::Mock(c) => {
                c.set_receive_callback(callback);
                Ok(())
            }
            Channel::Worker(c) => c.set_receive_callback(callback),
            Channel::WorkerScope(c) => c.set_receive_callback(callback),
            Channel::Embedded(c) => c.set_receive_callback(callback),
            Channel::Parent(c) => c.set_receive_callback(callback),
            Channel::ScriptHost(c) => c.set_receive_callback(callback),
            Channel::Script(c) => c.set_receive_callback(callback),
        }
    }

    /// Convenience wrapper around [`Channel::set_receive_callback`].
    pub fn on_message<F>(&self, f: F) -> Result<(), TransportError>
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.set_receive_callback(Arc::new(f))
    }

    pub fn kind(&self) -> ChannelKind {
        match self {
            Channel::Null(_) => ChannelKind::Null,
            Channel::Mock(_) => ChannelKind::Mock,
            Channel::Worker(_) => ChannelKind::Worker,
            Channel::WorkerScope(_) => ChannelKind::WorkerScope,
            Channel::Embedded(_) => ChannelKind::Embedded,
            Channel::Parent(_) => ChannelKind::Parent,
            Channel::ScriptHost(_) => ChannelKind::ScriptHost,
            Channel::Script(_) => ChannelKind::Script,
        }
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Channel").field(&self.kind()).finish()
    }
}

/// Channel that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullChannel;

type CallbackSlot = Arc<RwLock<Option<Callback>>>;

fn deliver(slot: &CallbackSlot, message: Value) {
    let callback = read(slot).clone();
    if let Some(callback) = callback {
        callback(message);
    }
}

/// Channel that hands sent messages to a function and lets the test inject
/// inbound messages with [`MockChannel::deliver`].
pub struct MockChannel {
    send_fn: Callback,
    receive: CallbackSlot,
}

impl MockChannel {
    pub fn new<F>(send_fn: F) -> Self
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        Self {
            send_fn: Arc::new(send_fn),
            receive: Arc::new(RwLock::new(None)),
        }
    }

    /// Two mock channels wired to each other with synchronous delivery.
    pub fn linked() -> (Self, Self) {
        let left: CallbackSlot = Arc::new(RwLock::new(None));
        let right: CallbackSlot = Arc::new(RwLock::new(None));
        let to_right = Arc::clone(&right);
        let to_left = Arc::clone(&left);
        (
            Self {
                send_fn: Arc::new(move |m| deliver(&to_right, m)),
                receive: left,
            },
            Self {
                send_fn: Arc::new(move |m| deliver(&to_left, m)),
                receive: right,
            },
        )
    }

    pub fn send(&self, message: Value) {
        (self.send_fn)(message)
    }

    /// Feed an inbound message to the receive callback. Dropped if none is
    /// installed.
    pub fn deliver(&self, message: Value) {
        deliver(&self.receive, message)
    }

    pub fn set_receive_callback(&self, callback: Callback) {
        if write(&self.receive).replace(callback).is_some() {
            warn!("Changing receive callback");
        }
    }
}
