//! Message envelope and command set.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::trace;

use crate::error::ProtocolError;
use crate::tree::ToolData;

/// Which side of the protocol sent a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParticipantKind {
    Engine3D,
    Tool3D,
}

impl ParticipantKind {
    /// The kind a participant of this kind talks to.
    pub fn counterpart(self) -> Self {
        match self {
            ParticipantKind::Engine3D => ParticipantKind::Tool3D,
            ParticipantKind::Tool3D => ParticipantKind::Engine3D,
        }
    }
}

impl fmt::Display for ParticipantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ParticipantKind::Engine3D => "Engine3D",
            ParticipantKind::Tool3D => "Tool3D",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    #[serde(rename = "type")]
    pub kind: ParticipantKind,
    pub name: String,
}

/// Content of an envelope, tagged by `command`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum Command {
    /// Tool asks for the host's current state.
    ForceUpdate,
    /// Host snapshot for the tool.
    Update {
        #[serde(rename = "toolData")]
        tool_data: ToolData,
    },
    /// Tool pushes its state, possibly partial.
    Write {
        #[serde(rename = "toolData")]
        tool_data: ToolData,
    },
    OnWindowResized {
        width: u32,
        height: u32,
    },
    OnContextLost,
    OnContextRestored,
    /// Any command this crate does not know.
    #[serde(other)]
    Unknown,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::ForceUpdate => "forceUpdate",
            Command::Update { .. } => "update",
            Command::Write { .. } => "write",
            Command::OnWindowResized { .. } => "onWindowResized",
            Command::OnContextLost => "onContextLost",
            Command::OnContextRestored => "onContextRestored",
            Command::Unknown => "unknown",
        }
    }

    /// Host-to-tool notifications that carry no state.
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            Command::OnWindowResized { .. } | Command::OnContextLost | Command::OnContextRestored
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub origin: Origin,
    pub content: Command,
}

impl Envelope {
    pub fn new(kind: ParticipantKind, name: impl Into<String>, content: Command) -> Self {
        Self {
            origin: Origin {
                kind,
                name: name.into(),
            },
            content,
        }
    }

    pub fn to_value(&self) -> Result<Value, ProtocolError> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Decode `message` if it is addressed to the participant `name` by a sender
/// of kind `from`. Anything else, malformed content included, yields `None`.
pub fn accept(message: &Value, from: ParticipantKind, name: &str) -> Option<Command> {
    let envelope = match Envelope::deserialize(message) {
        Ok(envelope) => envelope,
        Err(e) => {
            trace!(error = %e, "Ignoring message that is not an envelope");
            return None;
        }
    };
    if envelope.origin.kind != from || envelope.origin.name != name {
        trace!(
            origin = %envelope.origin.kind,
            sender = %envelope.origin.name,
            expected = name,
            "Ignoring message for another participant"
        );
        return None;
    }
    Some(envelope.content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shape() {
        let message = Envelope::new(ParticipantKind::Tool3D, "BuoyA", Command::ForceUpdate)
            .to_value()
            .unwrap();
        assert_eq!(
            message,
            json!({"origin": {"type": "Tool3D", "name": "BuoyA"}, "content": {"command": "forceUpdate"}})
        );

        let resize = Envelope::new(
            ParticipantKind::Engine3D,
            "BuoyA",
            Command::OnWindowResized { width: 800, height: 600 },
        )
        .to_value()
        .unwrap();
        assert_eq!(
            resize["content"],
            json!({"command": "onWindowResized", "width": 800, "height": 600})
        );
    }

    #[test]
    fn test_update_carries_tool_data() {
        let message = Envelope::new(
            ParticipantKind::Engine3D,
            "BuoyA",
            Command::Update { tool_data: ToolData::with_empty_scene() },
        )
        .to_value()
        .unwrap();
        assert_eq!(
            message["content"],
            json!({"command": "update", "toolData": {"Scene": {"Meta": {"Type": "Object"}, "Properties": {}}}})
        );
    }

    #[test]
    fn test_accept_filters_kind_and_name() {
        let message = json!({"origin": {"type": "Tool3D", "name": "BuoyA"}, "content": {"command": "forceUpdate"}});
        assert_eq!(accept(&message, ParticipantKind::Tool3D, "BuoyA"), Some(Command::ForceUpdate));
        assert_eq!(accept(&message, ParticipantKind::Tool3D, "BuoyB"), None);
        assert_eq!(accept(&message, ParticipantKind::Engine3D, "BuoyA"), None);
    }

    #[test]
    fn test_write_with_scalar_properties_is_accepted() {
        let message = json!({"origin": {"type": "Tool3D", "name": "BuoyA"}, "content": {"command": "write", "toolData": {
            "Scene": {"Properties": {
                "Buoy": {"Meta": {"Type": "Object.GLTF", "Url": "/models/flagab.glb"}},
                "Lamp": {"Properties": {"Intensity": 0.8, "Visible": true}}
            }}
        }}});
        let Some(Command::Write { tool_data }) = accept(&message, ParticipantKind::Tool3D, "BuoyA") else {
            panic!("write was not accepted");
        };
        let scene = tool_data.section(crate::tree::Section::Scene).unwrap();
        assert!(scene.properties.contains_key("Buoy"));
        assert!(scene.properties.contains_key("Lamp"));
    }

    #[test]
    fn test_unknown_command() {
        let message = json!({"origin": {"type": "Engine3D", "name": "t"}, "content": {"command": "selectObject", "id": 3}});
        assert_eq!(accept(&message, ParticipantKind::Engine3D, "t"), Some(Command::Unknown));
    }

    #[test]
    fn test_malformed_messages_are_rejected() {
        for message in [
            json!("hello"),
            json!({"origin": {"type": "Tool3D"}, "content": {"command": "forceUpdate"}}),
            json!({"origin": {"type": "Robot", "name": "t"}, "content": {"command": "forceUpdate"}}),
            json!({"origin": {"type": "Tool3D", "name": "t"}}),
            json!({"origin": {"type": "Tool3D", "name": "t"}, "content": {"command": "write", "toolData": 7}}),
        ] {
            assert_eq!(accept(&message, ParticipantKind::Tool3D, "t"), None, "{message}");
        }
    }

    #[test]
    fn test_counterpart() {
        assert_eq!(ParticipantKind::Engine3D.counterpart(), ParticipantKind::Tool3D);
        assert_eq!(ParticipantKind::Tool3D.counterpart(), ParticipantKind::Engine3D);
    }
}
