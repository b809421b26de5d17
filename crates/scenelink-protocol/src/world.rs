//! Persisted world document.
//!
//! ```json
//! { "World": { "Tools": { "BuoyA": {
//!     "Meta": { "Type": "Tool", "Url": "/tool_buoy/tool_buoy.html?letter=a" },
//!     "Properties": { "Scene": { ... } } } } } }
//! ```

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::error::ProtocolError;
use crate::tree::{node_type, Meta, ToolData};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct World {
    #[serde(rename = "World", default)]
    pub body: WorldBody,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldBody {
    #[serde(rename = "Tools", default)]
    pub tools: IndexMap<String, WorldTool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldTool {
    #[serde(rename = "Meta")]
    pub meta: Meta,
    #[serde(rename = "Properties", default)]
    pub properties: ToolData,
}

impl WorldTool {
    /// Whether the entry describes a tool. Any `Type` starting with `Tool`
    /// counts.
    pub fn is_tool(&self) -> bool {
        self.meta.kind.starts_with(node_type::TOOL)
    }
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ProtocolError> {
        let path = path.as_ref();
        let world = Self::from_json(&fs::read_to_string(path)?)?;
        info!(path = %path.display(), tools = world.body.tools.len(), "Loaded world");
        Ok(world)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ProtocolError> {
        let path = path.as_ref();
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        debug!(path = %path.display(), "Saved world");
        Ok(())
    }

    /// Persisted state of a tool entry.
    pub fn tool_data(&self, name: &str) -> Option<&ToolData> {
        self.body
            .tools
            .get(name)
            .filter(|tool| tool.is_tool())
            .map(|tool| &tool.properties)
    }

    /// Add or replace a tool entry.
    pub fn insert_tool(&mut self, name: impl Into<String>, meta: Meta, properties: ToolData) {
        self.body.tools.insert(name.into(), WorldTool { meta, properties });
    }

    /// Name and location of every tool entry that has a `Url`.
    pub fn launches(&self) -> impl Iterator<Item = (&str, &str)> {
        self.body.tools.iter().filter_map(|(name, tool)| {
            let url = tool.meta.url.as_deref()?;
            tool.is_tool().then_some((name.as_str(), url))
        })
    }
}

/// Append `channel=<name>` to a tool location so the tool knows which name
/// to talk under.
pub fn with_channel_param(location: &str, channel: &str) -> String {
    let separator = if location.contains('?') { '&' } else { '?' };
    format!("{location}{separator}channel={channel}")
}
