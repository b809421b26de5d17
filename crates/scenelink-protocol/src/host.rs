//! Host side of the protocol.
//!
//! [`CanonicalState`] is the sans-IO core: it owns the canonical tree for one
//! tool and turns inbound commands into actions. [`HostSession`] wires it to a
//! [`Channel`] and a [`SceneRenderer`].

use serde_json::Value;
use std::sync::{Arc, Mutex, RwLock, Weak};
use tracing::{debug, trace, warn};

use scenelink_transport::Channel;

use crate::envelope::{accept, Command, Envelope, ParticipantKind};
use crate::error::ProtocolError;
use crate::merge::{merge_write, set_color_texture, MergeReport};
use crate::renderer::{ModelLayout, SceneRenderer};
use crate::tree::{node_type, property, Property, PropertyNode, Section, ToolData, MATRIX_LEN};
use crate::{lock, read, write, Observer};

/// Property of a model's color texture slot that names the material field it
/// maps to.
const COLOR_MAP: &str = "map";

/// What the host should do after handling a command.
#[derive(Debug, Clone, PartialEq)]
pub enum HostAction {
    /// Send this command back to the tool.
    Reply(Command),
    Merged(MergeReport),
    Ignored,
}

/// The canonical tree of one tool.
#[derive(Debug, Clone)]
pub struct CanonicalState {
    name: String,
    data: ToolData,
}

impl CanonicalState {
    /// A tool the host has never seen: an empty scene.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: ToolData::with_empty_scene(),
        }
    }

    /// Seed from persisted state. The state is replayed as a write so the
    /// renderer hears about every persisted asset; entries the merge does not
    /// take over (sub-mesh materials, internal textures) are then copied as
    /// they were saved.
    pub fn restore(name: impl Into<String>, persisted: &ToolData, renderer: &dyn SceneRenderer) -> Self {
        let mut state = Self::new(name);
        let report = merge_write(&state.name, &mut state.data, persisted, renderer);
        debug!(tool = %state.name, models = report.models_added.len(), "Restored tool state");

        for section in [Section::Materials, Section::Textures] {
            let Some(saved) = persisted.section(section) else {
                continue;
            };
            for (entry, node) in &saved.properties {
                let Property::Node(node) = node else {
                    continue;
                };
                if state.data.entry(section, entry).is_none() {
                    state.data.set_entry(section, entry.clone(), node.clone());
                }
            }
        }
        state
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &ToolData {
        &self.data
    }

    pub fn handle(&mut self, command: Command, renderer: &dyn SceneRenderer) -> HostAction {
        match command {
            Command::ForceUpdate => HostAction::Reply(Command::Update {
                tool_data: self.data.clone(),
            }),
            Command::Write { tool_data } => {
                HostAction::Merged(merge_write(&self.name, &mut self.data, &tool_data, renderer))
            }
            other => {
                trace!(tool = %self.name, command = other.name(), "Ignoring command");
                HostAction::Ignored
            }
        }
    }

    /// Record the layout of a model the renderer finished loading.
    ///
    /// Every sub-mesh with a material gets a material named
    /// `<model>.<mesh>`, and embedded color maps are registered as internal
    /// textures. A texture assignment already saved for that material wins
    /// over the embedded one and is pushed to the renderer. Returns `false`
    /// if `model` is no longer a glTF entry of this tool.
    pub fn model_loaded(&mut self, model: &str, layout: &ModelLayout, renderer: &dyn SceneRenderer) -> bool {
        if !self
            .data
            .entry(Section::Scene, model)
            .is_some_and(|e| e.is_type(node_type::OBJECT_GLTF))
        {
            debug!(tool = %self.name, model, "Dropping layout of a model that is gone");
            return false;
        }

        let mut children = PropertyNode::object();
        for mesh in &layout.meshes {
            let mut sub_mesh = PropertyNode::object();
            if let Some(material) = &mesh.material {
                let material_name = format!("{model}.{}", mesh.name);
                let embedded = material.color_texture.as_ref().map(|map| {
                    let texture = format!("{material_name}.{map}");
                    self.data.set_entry(
                        Section::Textures,
                        texture.clone(),
                        PropertyNode::typed(node_type::TEXTURE_INTERNAL),
                    );
                    texture
                });
                self.load_material(&material_name, embedded, renderer);
                sub_mesh = sub_mesh.with(property::MATERIAL, material_name);
            }
            children.properties.insert(mesh.name.clone(), sub_mesh.into());
        }

        if let Some(entry) = self.data.entry_mut(Section::Scene, model) {
            entry.children = Some(Box::new(children));
        }
        true
    }

    fn load_material(&mut self, name: &str, embedded: Option<String>, renderer: &dyn SceneRenderer) {
        let saved = self
            .data
            .entry(Section::Materials, name)
            .and_then(|m| m.child(property::COLOR_TEXTURE))
            .and_then(|slot| slot.properties.get(property::TEXTURE))
            .cloned();

        let mut material = PropertyNode::object().with(
            property::COLOR_TEXTURE,
            PropertyNode::object()
                .with(property::INTERNAL_NAME, COLOR_MAP)
                .with(property::TEXTURE, embedded),
        );
        if let Some(saved) = &saved {
            set_color_texture(&mut material, saved);
        }
        self.data.set_entry(Section::Materials, name, material);

        if let (Some(Property::Reference(_)), Some(material)) = (&saved, self.data.entry(Section::Materials, name)) {
            renderer.update_material(&self.name, name, material);
        }
    }
}

/// Renderer calls made while the state lock is held, replayed after it is
/// released.
#[derive(Default)]
struct Deferred {
    calls: Mutex<Vec<Notification>>,
}

enum Notification {
    Gltf(String, String),
    Texture(String, String),
    Material(String, PropertyNode),
    Matrix(String, [f64; MATRIX_LEN]),
}

impl SceneRenderer for Deferred {
    fn add_gltf(&self, _tool: &str, name: &str, url: &str) {
        lock(&self.calls).push(Notification::Gltf(name.into(), url.into()));
    }

    fn add_texture(&self, _tool: &str, name: &str, url: &str) {
        lock(&self.calls).push(Notification::Texture(name.into(), url.into()));
    }

    fn update_material(&self, _tool: &str, name: &str, material: &PropertyNode) {
        lock(&self.calls).push(Notification::Material(name.into(), material.clone()));
    }

    fn set_local_matrix(&self, _tool: &str, name: &str, matrix: &[f64; MATRIX_LEN]) {
        lock(&self.calls).push(Notification::Matrix(name.into(), *matrix));
    }
}

impl Deferred {
    fn replay(self, tool: &str, renderer: &dyn SceneRenderer) {
        let calls = self.calls.into_inner().unwrap_or_else(|e| e.into_inner());
        for call in calls {
            match call {
                Notification::Gltf(name, url) => renderer.add_gltf(tool, &name, &url),
                Notification::Texture(name, url) => renderer.add_texture(tool, &name, &url),
                Notification::Material(name, node) => renderer.update_material(tool, &name, &node),
                Notification::Matrix(name, matrix) => renderer.set_local_matrix(tool, &name, &matrix),
            }
        }
    }
}

struct HostInner {
    name: String,
    state: Mutex<CanonicalState>,
    channel: Channel,
    renderer: Arc<dyn SceneRenderer>,
    observer: RwLock<Option<Observer>>,
}

impl HostInner {
    fn on_message(&self, message: Value) {
        if let Some(command) = accept(&message, ParticipantKind::Tool3D, &self.name) {
            debug!(tool = %self.name, command = command.name(), "Received command");
            let deferred = Deferred::default();
            let action = lock(&self.state).handle(command, &deferred);
            deferred.replay(&self.name, self.renderer.as_ref());

            match action {
                HostAction::Reply(reply) => {
                    if let Err(e) = self.send(reply) {
                        warn!(tool = %self.name, error = %e, "Failed to reply to tool");
                    }
                }
                HostAction::Merged(report) => {
                    debug!(
                        tool = %self.name,
                        changed = report.changed(),
                        rejected = report.rejected.len(),
                        "Merged write"
                    );
                }
                HostAction::Ignored => {}
            }
        }

        let observer = read(&self.observer).clone();
        if let Some(observer) = observer {
            observer(&message);
        }
    }

    fn send(&self, command: Command) -> Result<(), ProtocolError> {
        let message = Envelope::new(ParticipantKind::Engine3D, self.name.as_str(), command).to_value()?;
        self.channel.send(message)?;
        Ok(())
    }
}

/// The host's end of one tool connection.
#[derive(Clone)]
pub struct HostSession {
    inner: Arc<HostInner>,
}

impl HostSession {
    /// Take ownership of `channel` and start answering the tool on it.
    pub fn attach(
        state: CanonicalState,
        channel: Channel,
        renderer: Arc<dyn SceneRenderer>,
    ) -> Result<Self, ProtocolError> {
        let inner = Arc::new(HostInner {
            name: state.name.clone(),
            state: Mutex::new(state),
            channel,
            renderer,
            observer: RwLock::new(None),
        });
        let weak: Weak<HostInner> = Arc::downgrade(&inner);
        inner.channel.on_message(move |message| {
            if let Some(inner) = weak.upgrade() {
                inner.on_message(message);
            }
        })?;
        debug!(tool = %inner.name, channel = %inner.channel.kind(), "Attached tool");
        Ok(Self { inner })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn channel(&self) -> &Channel {
        &self.inner.channel
    }

    /// Copy of the canonical tree.
    pub fn snapshot(&self) -> ToolData {
        lock(&self.inner.state).data().clone()
    }

    /// Send the canonical tree unprompted. Initialized tools ignore it.
    pub fn push_update(&self) -> Result<(), ProtocolError> {
        let tool_data = self.snapshot();
        self.inner.send(Command::Update { tool_data })
    }

    /// Forward a lifecycle notification.
    pub fn notify(&self, command: Command) -> Result<(), ProtocolError> {
        self.inner.send(command)
    }

    pub fn model_loaded(&self, model: &str, layout: &ModelLayout) -> bool {
        let deferred = Deferred::default();
        let loaded = lock(&self.inner.state).model_loaded(model, layout, &deferred);
        deferred.replay(&self.inner.name, self.inner.renderer.as_ref());
        loaded
    }

    /// Called with every inbound message, addressed to this tool or not.
    pub fn set_observer<F>(&self, observer: F)
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        if write(&self.inner.observer).replace(Arc::new(observer)).is_some() {
            warn!(tool = %self.inner.name, "Changing observer");
        }
    }
}
