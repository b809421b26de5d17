//! Channel pair for scripts loaded into the host's own context.
//!
//! A dynamically loaded script runs in the same context as the host, but it
//! starts before the host has finished wiring its half of the channel. Each
//! half therefore keeps two FIFO buffers:
//!
//! - a send buffer for messages sent before the other half exists, flushed
//!   into the other half when the two are paired;
//! - a receive buffer for messages that arrive before a callback is
//!   installed, drained when the callback is set.
//!
//! Pairing goes through a [`PairingRegistry`]: the host half is registered
//! under a fresh id, the id is handed to the script at launch, and the script
//! half looks it up exactly once. The halves only hold weak references to each
//! other, so either side can be dropped independently.
//!
//! Once paired, delivery is synchronous: `send` runs the remote callback
//! before returning.

use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, warn};

use crate::context::Globals;
use crate::error::TransportError;
use crate::port::{lock, Callback};

#[derive(Default)]
struct Inbound {
    callback: Option<Callback>,
    pending: VecDeque<Value>,
    /// Set while `pending` is being handed to the callback.
    draining: bool,
}

#[derive(Default)]
struct Outbound {
    peer: Option<Weak<Half>>,
    pending: VecDeque<Value>,
    /// Set while `pending` is being flushed into the peer.
    flushing: bool,
}

struct Half {
    label: &'static str,
    inbound: Mutex<Inbound>,
    outbound: Mutex<Outbound>,
}

impl Half {
    fn new(label: &'static str) -> Arc<Self> {
        Arc::new(Self {
            label,
            inbound: Mutex::new(Inbound::default()),
            outbound: Mutex::new(Outbound::default()),
        })
    }

    fn receive(&self, message: Value) {
        let callback = {
            let mut inbound = lock(&self.inbound);
            match &inbound.callback {
                // Not draining implies the buffer is empty.
                Some(callback) if !inbound.draining => Arc::clone(callback),
                _ => {
                    inbound.pending.push_back(message);
                    return;
                }
            }
        };
        callback(message);
    }

    fn set_callback(&self, callback: Callback) {
        {
            let mut inbound = lock(&self.inbound);
            if inbound.callback.replace(callback).is_some() {
                warn!(half = self.label, "Changing receive callback");
            }
            if inbound.draining {
                return;
            }
            inbound.draining = true;
        }

        loop {
            let next = {
                let mut inbound = lock(&self.inbound);
                match (inbound.pending.pop_front(), inbound.callback.clone()) {
                    (Some(message), Some(callback)) => Some((message, callback)),
                    _ => {
                        inbound.draining = false;
                        None
                    }
                }
            };
            let Some((message, callback)) = next else {
                break;
            };
            callback(message);
        }
    }

    fn send(&self, message: Value) -> Result<(), TransportError> {
        let peer = {
            let mut outbound = lock(&self.outbound);
            match &outbound.peer {
                Some(peer) if !outbound.flushing => Weak::clone(peer),
                _ => {
                    outbound.pending.push_back(message);
                    return Ok(());
                }
            }
        };
        let peer = peer.upgrade().ok_or(TransportError::PeerGone)?;
        peer.receive(message);
        Ok(())
    }

    fn attach(&self, peer: &Arc<Half>) {
        {
            let mut outbound = lock(&self.outbound);
            if outbound.peer.replace(Arc::downgrade(peer)).is_some() {
                warn!(half = self.label, "Changing paired half");
            }
            if outbound.flushing {
                return;
            }
            outbound.flushing = true;
        }

        let mut flushed = 0usize;
        loop {
            let next = {
                let mut outbound = lock(&self.outbound);
                let next = outbound.pending.pop_front();
                if next.is_none() {
                    outbound.flushing = false;
                }
                next
            };
            let Some(message) = next else {
                break;
            };
            peer.receive(message);
            flushed += 1;
        }
        debug!(half = self.label, flushed, "Paired dynamic script channel");
    }

    fn is_paired(&self) -> bool {
        lock(&self.outbound).peer.is_some()
    }
}

/// Host half of a dynamic script channel. Dropping it withdraws its pairing
/// id if the script never connected, and drops the script's globals.
pub struct ScriptHostChannel {
    id: u64,
    half: Arc<Half>,
    registry: Weak<Mutex<RegistryState>>,
    globals: Globals,
}

/// Script half of a dynamic script channel.
pub struct ScriptChannel {
    id: u64,
    half: Arc<Half>,
}

impl ScriptHostChannel {
    pub fn pairing_id(&self) -> u64 {
        self.id
    }

    pub fn is_paired(&self) -> bool {
        self.half.is_paired()
    }

    /// Send to the script. Buffered until the script half exists.
    pub fn send(&self, message: Value) -> Result<(), TransportError> {
        self.half.send(message)
    }

    pub fn set_receive_callback(&self, callback: Callback) -> Result<(), TransportError> {
        self.half.set_callback(callback);
        Ok(())
    }

    /// What the script keeps alive. The script shares the host's context,
    /// so its globals live as long as this half.
    pub fn globals(&self) -> &Globals {
        &self.globals
    }
}

impl Drop for ScriptHostChannel {
    fn drop(&mut self) {
        if let Some(state) = self.registry.upgrade() {
            if lock(&state).halves.remove(&self.id).is_some() {
                debug!(id = self.id, "Withdrew unpaired dynamic script channel");
            }
        }
        self.globals.clear();
    }
}

impl ScriptChannel {
    /// Construct the script half and pair it with the host half registered
    /// under `id`. Messages the host sent so far are moved into this half's
    /// receive buffer.
    pub fn connect(registry: &PairingRegistry, id: u64) -> Result<Self, TransportError> {
        let host = registry.take(id).ok_or(TransportError::PairingNotFound(id))?;
        let half = Half::new("script");
        host.attach(&half);
        half.attach(&host);
        Ok(Self { id, half })
    }

    pub fn pairing_id(&self) -> u64 {
        self.id
    }

    /// Send to the host. Fails once the host half is dropped.
    pub fn send(&self, message: Value) -> Result<(), TransportError> {
        self.half.send(message)
    }

    pub fn set_receive_callback(&self, callback: Callback) -> Result<(), TransportError> {
        self.half.set_callback(callback);
        Ok(())
    }
}

struct RegistryState {
    next_id: u64,
    halves: HashMap<u64, Weak<Half>>,
}

/// Non-owning lookup from pairing id to waiting host half.
#[derive(Clone)]
pub struct PairingRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl Default for PairingRegistry {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(RegistryState {
                next_id: 1,
                halves: HashMap::new(),
            })),
        }
    }
}

impl PairingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a host half under a fresh id.
    pub fn register(&self) -> ScriptHostChannel {
        let half = Half::new("host");
        let mut state = lock(&self.state);
        let id = state.next_id;
        state.next_id += 1;
        state.halves.insert(id, Arc::downgrade(&half));
        debug!(id, "Registered dynamic script channel");
        ScriptHostChannel {
            id,
            half,
            registry: Arc::downgrade(&self.state),
            globals: Globals::default(),
        }
    }

    /// Remove and return the host half for `id`, if it is still alive.
    fn take(&self, id: u64) -> Option<Arc<Half>> {
        lock(&self.state).halves.remove(&id).and_then(|half| half.upgrade())
    }

    /// Number of host halves still waiting for their script.
    pub fn pending(&self) -> usize {
        lock(&self.state).halves.len()
    }
}
