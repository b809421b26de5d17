//! The shared property tree.
//!
//! Wire keys are PascalCase (`Meta`, `Type`, `Url`, `Properties`, `Values`,
//! `Children`), matching what tools put on the wire. Property maps keep
//! insertion order, which is the order the merge walks them in.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Well-known values of `Meta.Type`.
pub mod node_type {
    pub const OBJECT: &str = "Object";
    pub const ARRAY: &str = "Array";
    pub const TEXTURE_PNG: &str = "Texture.PNG";
    pub const TEXTURE_INTERNAL: &str = "Texture.Internal";
    pub const OBJECT_GLTF: &str = "Object.GLTF";
    pub const TOOL: &str = "Tool";
}

/// Well-known property names.
pub mod property {
    pub const MODEL_MATRIX: &str = "ModelMatrix";
    pub const MATERIAL: &str = "Material";
    pub const COLOR_TEXTURE: &str = "colorTexture";
    pub const TEXTURE: &str = "texture";
    pub const INTERNAL_NAME: &str = "internalName";
}

/// Number of values in a 4x4 transform.
pub const MATRIX_LEN: usize = 16;

/// Type tag of a node, plus any type-specific fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    #[serde(rename = "Type")]
    pub kind: String,

    #[serde(rename = "Url", default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Fields this crate does not interpret, kept verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Meta {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            url: None,
            extra: Map::new(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

/// A node of the shared tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyNode {
    #[serde(rename = "Meta", default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,

    #[serde(rename = "Properties", default)]
    pub properties: IndexMap<String, Property>,

    #[serde(rename = "Values", default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<f64>>,

    /// Sub-meshes of a loaded model, filled in by the host.
    #[serde(rename = "Children", default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Box<PropertyNode>>,
}

/// A child slot: a nested node, a reference to another entry by name, or
/// `null`. Any other JSON value a tool puts there (flags, numbers, arrays) is
/// carried as `Other` so one unfamiliar field does not spoil the whole tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Property {
    Node(PropertyNode),
    Reference(String),
    Empty,
    Other(Value),
}

impl From<PropertyNode> for Property {
    fn from(node: PropertyNode) -> Self {
        Property::Node(node)
    }
}

impl From<&str> for Property {
    fn from(name: &str) -> Self {
        Property::Reference(name.to_string())
    }
}

impl From<String> for Property {
    fn from(name: String) -> Self {
        Property::Reference(name)
    }
}

impl From<Option<String>> for Property {
    fn from(name: Option<String>) -> Self {
        name.map_or(Property::Empty, Property::Reference)
    }
}

impl Property {
    pub fn as_node(&self) -> Option<&PropertyNode> {
        match self {
            Property::Node(node) => Some(node),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<&str> {
        match self {
            Property::Reference(name) => Some(name),
            _ => None,
        }
    }
}

impl PropertyNode {
    /// An empty `"Object"` node.
    pub fn object() -> Self {
        Self::typed(node_type::OBJECT)
    }

    pub fn typed(kind: impl Into<String>) -> Self {
        Self {
            meta: Some(Meta::new(kind)),
            ..Self::default()
        }
    }

    /// A node of type `kind` pointing at `url`.
    pub fn asset(kind: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            meta: Some(Meta::new(kind).with_url(url)),
            ..Self::default()
        }
    }

    /// An `"Array"` node.
    pub fn array(values: impl Into<Vec<f64>>) -> Self {
        Self {
            values: Some(values.into()),
            ..Self::typed(node_type::ARRAY)
        }
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, property: impl Into<Property>) -> Self {
        self.properties.insert(name.into(), property.into());
        self
    }

    pub fn node_type(&self) -> Option<&str> {
        self.meta.as_ref().map(|meta| meta.kind.as_str())
    }

    pub fn is_type(&self, kind: &str) -> bool {
        self.node_type() == Some(kind)
    }

    pub fn url(&self) -> Option<&str> {
        self.meta.as_ref().and_then(|meta| meta.url.as_deref())
    }

    pub fn child(&self, name: &str) -> Option<&PropertyNode> {
        self.properties.get(name).and_then(Property::as_node)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut PropertyNode> {
        match self.properties.get_mut(name) {
            Some(Property::Node(node)) => Some(node),
            _ => None,
        }
    }

    pub fn reference(&self, name: &str) -> Option<&str> {
        self.properties.get(name).and_then(Property::as_reference)
    }

    /// The `ModelMatrix` child, if it is an `"Array"` of exactly 16 values.
    pub fn model_matrix(&self) -> Option<[f64; MATRIX_LEN]> {
        let matrix = self.child(property::MODEL_MATRIX)?;
        if !matrix.is_type(node_type::ARRAY) {
            return None;
        }
        matrix.values.as_deref()?.try_into().ok()
    }
}

/// Top-level sections of a tool's tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Scene,
    Materials,
    Textures,
}

impl Section {
    pub fn as_str(self) -> &'static str {
        match self {
            Section::Scene => "Scene",
            Section::Materials => "Materials",
            Section::Textures => "Textures",
        }
    }
}

/// The full tree owned per tool. Absent sections are empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolData {
    #[serde(rename = "Scene", default, skip_serializing_if = "Option::is_none")]
    pub scene: Option<PropertyNode>,

    #[serde(rename = "Materials", default, skip_serializing_if = "Option::is_none")]
    pub materials: Option<PropertyNode>,

    #[serde(rename = "Textures", default, skip_serializing_if = "Option::is_none")]
    pub textures: Option<PropertyNode>,
}

impl ToolData {
    /// The state a host starts a new tool with: an empty Scene.
    pub fn with_empty_scene() -> Self {
        Self {
            scene: Some(PropertyNode::object()),
            ..Self::default()
        }
    }

    pub fn section(&self, section: Section) -> Option<&PropertyNode> {
        match section {
            Section::Scene => self.scene.as_ref(),
            Section::Materials => self.materials.as_ref(),
            Section::Textures => self.textures.as_ref(),
        }
    }

    fn slot(&mut self, section: Section) -> &mut Option<PropertyNode> {
        match section {
            Section::Scene => &mut self.scene,
            Section::Materials => &mut self.materials,
            Section::Textures => &mut self.textures,
        }
    }

    /// The section, created as an empty `"Object"` if absent.
    pub fn ensure_section(&mut self, section: Section) -> &mut PropertyNode {
        self.slot(section).get_or_insert_with(PropertyNode::object)
    }

    pub fn entry(&self, section: Section, name: &str) -> Option<&PropertyNode> {
        self.section(section)?.child(name)
    }

    pub fn entry_mut(&mut self, section: Section, name: &str) -> Option<&mut PropertyNode> {
        self.slot(section).as_mut()?.child_mut(name)
    }

    /// Insert or replace an entry, creating the section if needed.
    pub fn set_entry(&mut self, section: Section, name: impl Into<String>, node: PropertyNode) {
        self.ensure_section(section)
            .properties
            .insert(name.into(), Property::Node(node));
    }

    pub fn is_empty(&self) -> bool {
        [Section::Scene, Section::Materials, Section::Textures]
            .into_iter()
            .all(|s| self.section(s).map_or(true, |n| n.properties.is_empty()))
    }
}
