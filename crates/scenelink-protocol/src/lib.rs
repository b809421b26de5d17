//! Scene-state synchronization between a host renderer and its tools.
//!
//! Each tool holds a working copy of its part of the scene tree, and the host
//! holds the canonical copy. A tool asks for a snapshot once it is wired
//! (`forceUpdate`), adopts the first `update` it receives, and pushes changes
//! back with `write`. The host merges only the fields it understands and tells
//! a [`SceneRenderer`] what changed.
//!
//! ```
//! use std::sync::Arc;
//! use scenelink_protocol::{HostEngine, NullRenderer, ToolHooks, ToolSession, World};
//! use scenelink_transport::{Channel, MockChannel};
//!
//! # fn main() -> Result<(), scenelink_protocol::ProtocolError> {
//! let (host_end, tool_end) = MockChannel::linked();
//! let mut engine = HostEngine::new(World::new(), Arc::new(NullRenderer));
//! engine.add_tool("BuoyA", Channel::Mock(host_end))?;
//!
//! let tool = ToolSession::connect("BuoyA", Channel::Mock(tool_end), ToolHooks::new())?;
//! assert!(tool.is_initialized());
//! # Ok(())
//! # }
//! ```

use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub mod engine;
pub mod envelope;
pub mod error;
pub mod host;
pub mod merge;
pub mod renderer;
pub mod tool;
pub mod tree;
pub mod world;

pub use engine::HostEngine;
pub use envelope::{accept, Command, Envelope, Origin, ParticipantKind};
pub use error::ProtocolError;
pub use host::{CanonicalState, HostAction, HostSession};
pub use merge::{merge_write, MergeReport};
pub use renderer::{MeshMaterial, ModelLayout, NullRenderer, SceneRenderer, SubMesh};
pub use tool::{ToolEvent, ToolHooks, ToolPhase, ToolReplica, ToolSession};
pub use tree::{Meta, Property, PropertyNode, Section, ToolData};
pub use world::{with_channel_param, World, WorldTool};

/// Sees every raw inbound message of a session.
pub type Observer = Arc<dyn Fn(&Value) + Send + Sync>;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
