//! The host engine: one [`HostSession`] per connected tool, seeded from the
//! world document.

use indexmap::IndexMap;
use std::sync::Arc;
use tracing::{info, warn};

use scenelink_transport::Channel;

use crate::envelope::Command;
use crate::error::ProtocolError;
use crate::host::{CanonicalState, HostSession};
use crate::renderer::{ModelLayout, SceneRenderer};
use crate::tree::{node_type, Meta, ToolData};
use crate::world::World;

pub struct HostEngine {
    world: World,
    renderer: Arc<dyn SceneRenderer>,
    tools: IndexMap<String, HostSession>,
}

impl HostEngine {
    pub fn new(world: World, renderer: Arc<dyn SceneRenderer>) -> Self {
        Self {
            world,
            renderer,
            tools: IndexMap::new(),
        }
    }

    /// Register a tool's channel under `name`.
    ///
    /// A tool the world knows starts from its persisted state, which is
    /// replayed to the renderer. Unknown tools get an empty scene and a new
    /// world entry.
    pub fn add_tool(&mut self, name: &str, channel: Channel) -> Result<&HostSession, ProtocolError> {
        if self.tools.contains_key(name) {
            return Err(ProtocolError::DuplicateTool(name.to_string()));
        }

        let state = match self.world.tool_data(name) {
            Some(persisted) => CanonicalState::restore(name, persisted, self.renderer.as_ref()),
            None => {
                self.world
                    .insert_tool(name, Meta::new(node_type::TOOL), ToolData::with_empty_scene());
                CanonicalState::new(name)
            }
        };
        let session = HostSession::attach(state, channel, Arc::clone(&self.renderer))?;
        info!(tool = name, channel = %session.channel().kind(), "Added tool");

        let index = self.tools.insert_full(name.to_string(), session).0;
        Ok(&self.tools[index])
    }

    /// [`HostEngine::add_tool`] for a tool started from `location`. The
    /// location is recorded in the tool's world entry unless it already has
    /// one, so a saved world can launch the tool again.
    pub fn add_launched_tool(
        &mut self,
        name: &str,
        location: &str,
        channel: Channel,
    ) -> Result<&HostSession, ProtocolError> {
        if self.tools.contains_key(name) {
            return Err(ProtocolError::DuplicateTool(name.to_string()));
        }
        if let Some(entry) = self.world.body.tools.get_mut(name) {
            entry.meta.url.get_or_insert_with(|| location.to_string());
        } else {
            self.world.insert_tool(
                name,
                Meta::new(node_type::TOOL).with_url(location),
                ToolData::with_empty_scene(),
            );
        }
        self.add_tool(name, channel)
    }

    pub fn tool(&self, name: &str) -> Option<&HostSession> {
        self.tools.get(name)
    }

    /// Connected tools in the order they were added.
    pub fn tools(&self) -> impl Iterator<Item = &HostSession> {
        self.tools.values()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Disconnect a tool. Its state stays in the world snapshot as it was
    /// last persisted.
    pub fn remove_tool(&mut self, name: &str) -> Option<HostSession> {
        let session = self.tools.shift_remove(name)?;
        let meta = self
            .world
            .body
            .tools
            .get(name)
            .map(|tool| tool.meta.clone())
            .unwrap_or_else(|| Meta::new(node_type::TOOL));
        self.world.insert_tool(name, meta, session.snapshot());
        info!(tool = name, "Removed tool");
        Some(session)
    }

    pub fn on_window_resized(&self, width: u32, height: u32) {
        self.broadcast(Command::OnWindowResized { width, height });
    }

    pub fn on_context_lost(&self) {
        self.broadcast(Command::OnContextLost);
    }

    pub fn on_context_restored(&self) {
        self.broadcast(Command::OnContextRestored);
    }

    fn broadcast(&self, command: Command) {
        for session in self.tools.values() {
            if let Err(e) = session.notify(command.clone()) {
                warn!(tool = session.name(), command = command.name(), error = %e, "Failed to notify tool");
            }
        }
    }

    /// Hand a finished model load to the tool that asked for it.
    pub fn model_loaded(&self, tool: &str, model: &str, layout: &ModelLayout) -> Result<bool, ProtocolError> {
        let session = self
            .tools
            .get(tool)
            .ok_or_else(|| ProtocolError::UnknownTool(tool.to_string()))?;
        Ok(session.model_loaded(model, layout))
    }

    /// The world with every connected tool's current canonical state.
    pub fn world_snapshot(&self) -> World {
        let mut world = self.world.clone();
        for (name, session) in &self.tools {
            match world.body.tools.get_mut(name) {
                Some(entry) => entry.properties = session.snapshot(),
                None => world.insert_tool(name.as_str(), Meta::new(node_type::TOOL), session.snapshot()),
            }
        }
        world
    }
}
