//! Tool side of the protocol.

use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, info, trace, warn};

use scenelink_transport::Channel;

use crate::envelope::{accept, Command, Envelope, ParticipantKind};
use crate::error::ProtocolError;
use crate::tree::ToolData;
use crate::{lock, Observer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolPhase {
    /// Waiting for the first `update`.
    Uninitialized,
    /// Holding a copy of the host's state.
    Initialized,
}

impl fmt::Display for ToolPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ToolPhase::Uninitialized => "uninitialized",
            ToolPhase::Initialized => "initialized",
        })
    }
}

/// Outcome of handling one command on the tool side.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolEvent {
    /// The first snapshot was adopted.
    Initialized,
    /// A later snapshot arrived and was dropped.
    UpdateIgnored,
    /// A host notification for the application.
    Lifecycle(Command),
    Ignored,
}

/// A tool's working copy of its tree.
#[derive(Debug, Clone)]
pub struct ToolReplica {
    name: String,
    data: Option<ToolData>,
}

impl ToolReplica {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn phase(&self) -> ToolPhase {
        match self.data {
            Some(_) => ToolPhase::Initialized,
            None => ToolPhase::Uninitialized,
        }
    }

    pub fn data(&self) -> Option<&ToolData> {
        self.data.as_ref()
    }

    pub fn data_mut(&mut self) -> Option<&mut ToolData> {
        self.data.as_mut()
    }

    /// Only the first `update` is adopted; the copy is the tool's from then on.
    pub fn handle(&mut self, command: Command) -> ToolEvent {
        match command {
            Command::Update { tool_data } => {
                if self.data.is_some() {
                    info!(tool = %self.name, "update ignored");
                    return ToolEvent::UpdateIgnored;
                }
                self.data = Some(tool_data);
                debug!(tool = %self.name, "Initialized from host snapshot");
                ToolEvent::Initialized
            }
            command if command.is_lifecycle() => ToolEvent::Lifecycle(command),
            other => {
                trace!(tool = %self.name, command = other.name(), "Ignoring command");
                ToolEvent::Ignored
            }
        }
    }
}

type SessionHook = Arc<dyn Fn(&ToolSession) + Send + Sync>;
type LifecycleHook = Arc<dyn Fn(&ToolSession, &Command) + Send + Sync>;

/// Application callbacks of a [`ToolSession`].
#[derive(Clone, Default)]
pub struct ToolHooks {
    on_initialized: Option<SessionHook>,
    on_lifecycle: Option<LifecycleHook>,
    observer: Option<Observer>,
}

impl ToolHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run once, right after the first snapshot is adopted.
    pub fn on_initialized<F>(mut self, f: F) -> Self
    where
        F: Fn(&ToolSession) + Send + Sync + 'static,
    {
        self.on_initialized = Some(Arc::new(f));
        self
    }

    pub fn on_lifecycle<F>(mut self, f: F) -> Self
    where
        F: Fn(&ToolSession, &Command) + Send + Sync + 'static,
    {
        self.on_lifecycle = Some(Arc::new(f));
        self
    }

    /// Sees every inbound message, including ones for other participants.
    pub fn observer<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(f));
        self
    }
}

struct ToolInner {
    replica: Mutex<ToolReplica>,
    name: String,
    channel: Channel,
    hooks: ToolHooks,
}

impl ToolInner {
    fn on_message(self: &Arc<Self>, message: Value) {
        if let Some(command) = accept(&message, ParticipantKind::Engine3D, &self.name) {
            let event = lock(&self.replica).handle(command);
            let session = ToolSession {
                inner: Arc::clone(self),
            };
            match event {
                ToolEvent::Initialized => {
                    if let Some(hook) = &self.hooks.on_initialized {
                        hook(&session);
                    }
                }
                ToolEvent::Lifecycle(command) => {
                    if let Some(hook) = &self.hooks.on_lifecycle {
                        hook(&session, &command);
                    }
                }
                ToolEvent::UpdateIgnored | ToolEvent::Ignored => {}
            }
        }

        if let Some(observer) = &self.hooks.observer {
            observer(&message);
        }
    }

    fn send(&self, command: Command) -> Result<(), ProtocolError> {
        let message = Envelope::new(ParticipantKind::Tool3D, self.name.as_str(), command).to_value()?;
        self.channel.send(message)?;
        Ok(())
    }
}

/// A tool's connection to the host.
///
/// Cloning is cheap; every clone talks over the same channel.
#[derive(Clone)]
pub struct ToolSession {
    inner: Arc<ToolInner>,
}

impl ToolSession {
    /// Install the receive callback on `channel` and ask the host for a
    /// snapshot.
    ///
    /// The channel only refers back to the session weakly: once every clone
    /// is dropped, incoming messages are ignored. Tools launched in a context
    /// keep their session in the launch's globals.
    pub fn connect(name: impl Into<String>, channel: Channel, hooks: ToolHooks) -> Result<Self, ProtocolError> {
        let name = name.into();
        let inner = Arc::new(ToolInner {
            replica: Mutex::new(ToolReplica::new(name.clone())),
            name,
            channel,
            hooks,
        });
        // The channel lives inside `inner`, so the callback must not own it.
        let weak: Weak<ToolInner> = Arc::downgrade(&inner);
        inner.channel.on_message(move |message| {
            if let Some(inner) = weak.upgrade() {
                inner.on_message(message);
            }
        })?;

        debug!(tool = %inner.name, channel = %inner.channel.kind(), "Requesting snapshot");
        inner.send(Command::ForceUpdate)?;
        Ok(Self { inner })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn phase(&self) -> ToolPhase {
        lock(&self.inner.replica).phase()
    }

    pub fn is_initialized(&self) -> bool {
        self.phase() == ToolPhase::Initialized
    }

    /// Copy of the local tree, once initialized.
    pub fn snapshot(&self) -> Option<ToolData> {
        lock(&self.inner.replica).data().cloned()
    }

    /// Mutate the local tree. Nothing is sent.
    pub fn edit<R>(&self, f: impl FnOnce(&mut ToolData) -> R) -> Result<R, ProtocolError> {
        let mut replica = lock(&self.inner.replica);
        let data = replica
            .data_mut()
            .ok_or_else(|| ProtocolError::NotInitialized(self.inner.name.clone()))?;
        Ok(f(data))
    }

    /// Push the whole local tree to the host.
    pub fn write(&self) -> Result<(), ProtocolError> {
        let tool_data = self
            .snapshot()
            .ok_or_else(|| ProtocolError::NotInitialized(self.inner.name.clone()))?;
        self.inner.send(Command::Write { tool_data })
    }

    /// Push `partial` as-is. The local copy is not touched.
    pub fn write_partial(&self, partial: ToolData) -> Result<(), ProtocolError> {
        if !self.is_initialized() {
            return Err(ProtocolError::NotInitialized(self.inner.name.clone()));
        }
        self.inner.send(Command::Write { tool_data: partial })
    }

    /// Send any command under this tool's name.
    pub fn send(&self, command: Command) -> Result<(), ProtocolError> {
        if matches!(command, Command::Update { .. }) || command.is_lifecycle() {
            warn!(tool = %self.inner.name, command = command.name(), "Sending a host command from a tool");
        }
        self.inner.send(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{node_type, PropertyNode, Section};
    use scenelink_transport::MockChannel;
    use serde_json::json;

    fn update(name: &str, data: ToolData) -> Value {
        Envelope::new(ParticipantKind::Engine3D, name, Command::Update { tool_data: data })
            .to_value()
            .unwrap()
    }

    #[test]
    fn test_only_first_update_is_adopted() {
        let mut replica = ToolReplica::new("t");
        assert_eq!(replica.phase(), ToolPhase::Uninitialized);

        let first = ToolData::with_empty_scene();
        let mut second = ToolData::with_empty_scene();
        second.set_entry(Section::Scene, "X", PropertyNode::asset(node_type::OBJECT_GLTF, "/x.glb"));

        assert_eq!(replica.handle(Command::Update { tool_data: first.clone() }), ToolEvent::Initialized);
        assert_eq!(replica.handle(Command::Update { tool_data: second }), ToolEvent::UpdateIgnored);
        assert_eq!(replica.phase(), ToolPhase::Initialized);
        assert_eq!(replica.data(), Some(&first));
    }

    #[test]
    fn test_lifecycle_and_unknown() {
        let mut replica = ToolReplica::new("t");
        assert_eq!(
            replica.handle(Command::OnWindowResized { width: 3, height: 4 }),
            ToolEvent::Lifecycle(Command::OnWindowResized { width: 3, height: 4 })
        );
        assert_eq!(replica.handle(Command::Unknown), ToolEvent::Ignored);
        assert_eq!(replica.handle(Command::ForceUpdate), ToolEvent::Ignored);
        assert_eq!(replica.phase(), ToolPhase::Uninitialized);
    }

    #[test]
    fn test_connect_sends_force_update() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&sent);
        let session = ToolSession::connect(
            "BuoyA",
            Channel::Mock(MockChannel::new(move |m| lock(&sink).push(m))),
            ToolHooks::new(),
        )
        .unwrap();

        assert!(!session.is_initialized());
        assert_eq!(
            *lock(&sent),
            vec![json!({"origin": {"type": "Tool3D", "name": "BuoyA"}, "content": {"command": "forceUpdate"}})]
        );
        assert!(matches!(session.write(), Err(ProtocolError::NotInitialized(_))));
        assert!(matches!(session.edit(|_| ()), Err(ProtocolError::NotInitialized(_))));
    }

    #[test]
    fn test_hooks_run_once_and_observer_sees_everything() {
        let (host_end, tool_end) = MockChannel::linked();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let inits = Arc::new(Mutex::new(0));
        let lifecycle = Arc::new(Mutex::new(Vec::new()));

        let (seen_sink, init_sink, lifecycle_sink) = (Arc::clone(&seen), Arc::clone(&inits), Arc::clone(&lifecycle));
        let hooks = ToolHooks::new()
            .on_initialized(move |_| *lock(&init_sink) += 1)
            .on_lifecycle(move |_, command| lock(&lifecycle_sink).push(command.clone()))
            .observer(move |m| lock(&seen_sink).push(m.clone()));
        let session = ToolSession::connect("t", Channel::Mock(tool_end), hooks).unwrap();

        host_end.send(update("other", ToolData::with_empty_scene()));
        assert!(!session.is_initialized());

        host_end.send(update("t", ToolData::with_empty_scene()));
        host_end.send(update("t", ToolData::default()));
        host_end.send(
            Envelope::new(ParticipantKind::Engine3D, "t", Command::OnContextLost)
                .to_value()
                .unwrap(),
        );

        assert!(session.is_initialized());
        assert_eq!(session.snapshot(), Some(ToolData::with_empty_scene()));
        assert_eq!(*lock(&inits), 1);
        assert_eq!(*lock(&lifecycle), vec![Command::OnContextLost]);
        assert_eq!(lock(&seen).len(), 4);
    }

    #[test]
    fn test_dropped_session_is_released() {
        let (host_end, tool_end) = MockChannel::linked();
        let seen = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&seen);
        let hooks = ToolHooks::new().observer(move |_| *lock(&sink) += 1);
        let session = ToolSession::connect("t", Channel::Mock(tool_end), hooks).unwrap();
        host_end.send(update("t", ToolData::with_empty_scene()));
        assert_eq!(*lock(&seen), 1);

        let weak = Arc::downgrade(&session.inner);
        drop(session);
        assert!(weak.upgrade().is_none());
        // The hooks went with the session.
        assert_eq!(Arc::strong_count(&seen), 1);

        host_end.send(update("t", ToolData::with_empty_scene()));
        assert_eq!(*lock(&seen), 1);
    }

    #[test]
    fn test_edit_then_write_sends_local_copy() {
        let (host_end, tool_end) = MockChannel::linked();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&sent);
        host_end.set_receive_callback(Arc::new(move |m| lock(&sink).push(m)));

        let session = ToolSession::connect("t", Channel::Mock(tool_end), ToolHooks::new()).unwrap();
        host_end.send(update("t", ToolData::with_empty_scene()));

        session
            .edit(|data| data.set_entry(Section::Scene, "Buoy", PropertyNode::asset(node_type::OBJECT_GLTF, "/b.glb")))
            .unwrap();
        session.write().unwrap();

        let sent = lock(&sent);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1]["content"]["command"], "write");
        assert_eq!(
            sent[1]["content"]["toolData"]["Scene"]["Properties"]["Buoy"]["Meta"]["Url"],
            "/b.glb"
        );
    }
}
