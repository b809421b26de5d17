//! Selective merge of a tool's write into the host's canonical state.
//!
//! Only shapes the host understands are taken over: PNG textures, glTF scene
//! entries, their model matrices and the color texture of their materials.
//! Everything else is dropped without telling the tool. Textures are applied
//! before the scene so that materials can refer to textures from the same
//! write.

use tracing::debug;

use crate::renderer::SceneRenderer;
use crate::tree::{node_type, property, Property, PropertyNode, Section, ToolData};

/// What a merge changed, in the order it happened.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeReport {
    pub textures_added: Vec<String>,
    pub models_added: Vec<String>,
    pub matrices_set: Vec<String>,
    pub materials_updated: Vec<String>,
    pub materials_adopted: Vec<String>,
    /// Submitted entries that were dropped.
    pub rejected: Vec<String>,
}

impl MergeReport {
    /// Whether the canonical state was modified.
    pub fn changed(&self) -> bool {
        !(self.textures_added.is_empty()
            && self.models_added.is_empty()
            && self.matrices_set.is_empty()
            && self.materials_updated.is_empty()
            && self.materials_adopted.is_empty())
    }
}

/// Merge `submitted` into `canonical`, notifying `renderer` of every change.
pub fn merge_write(
    tool: &str,
    canonical: &mut ToolData,
    submitted: &ToolData,
    renderer: &dyn SceneRenderer,
) -> MergeReport {
    let mut report = MergeReport::default();
    merge_textures(tool, canonical, submitted, renderer, &mut report);
    merge_scene(tool, canonical, submitted, renderer, &mut report);
    if !report.rejected.is_empty() {
        debug!(tool, rejected = ?report.rejected, "Dropped unrecognized entries from write");
    }
    report
}

fn merge_textures(
    tool: &str,
    canonical: &mut ToolData,
    submitted: &ToolData,
    renderer: &dyn SceneRenderer,
    report: &mut MergeReport,
) {
    let Some(textures) = submitted.section(Section::Textures) else {
        return;
    };
    for (name, texture) in &textures.properties {
        let Some(node) = texture.as_node().filter(|n| n.is_type(node_type::TEXTURE_PNG)) else {
            report.rejected.push(format!("Textures.{name}"));
            continue;
        };
        let Some(url) = node.url() else {
            report.rejected.push(format!("Textures.{name}"));
            continue;
        };
        if canonical.entry(Section::Textures, name).is_some() {
            continue;
        }
        canonical.set_entry(Section::Textures, name.clone(), node.clone());
        renderer.add_texture(tool, name, url);
        report.textures_added.push(name.clone());
    }
}

fn merge_scene(
    tool: &str,
    canonical: &mut ToolData,
    submitted: &ToolData,
    renderer: &dyn SceneRenderer,
    report: &mut MergeReport,
) {
    let Some(scene) = submitted.section(Section::Scene) else {
        return;
    };
    for (name, entry) in &scene.properties {
        let Some(node) = entry.as_node() else {
            report.rejected.push(format!("Scene.{name}"));
            continue;
        };

        if let Some(kind) = node.node_type() {
            if kind != node_type::OBJECT_GLTF {
                report.rejected.push(format!("Scene.{name}"));
                continue;
            }
            let Some(url) = node.url() else {
                report.rejected.push(format!("Scene.{name}"));
                continue;
            };
            if adopt_model(canonical, name, node) {
                renderer.add_gltf(tool, name, url);
                report.models_added.push(name.clone());
            }
        }

        if canonical.entry(Section::Scene, name).is_none() {
            report.rejected.push(format!("Scene.{name}"));
            continue;
        }
        merge_matrix(tool, canonical, name, node, renderer, report);
        merge_material(tool, canonical, submitted, name, node, renderer, report);
    }
}

/// Take over the model's `Meta` when the entry is new or points at another
/// model. Properties already in the canonical entry are kept; the submitted
/// ones are merged field by field afterwards.
fn adopt_model(canonical: &mut ToolData, name: &str, node: &PropertyNode) -> bool {
    let existing = canonical.entry(Section::Scene, name);
    let unchanged = existing.is_some_and(|e| e.is_type(node_type::OBJECT_GLTF) && e.url() == node.url());
    if unchanged {
        return false;
    }
    let properties = existing.map(|e| e.properties.clone()).unwrap_or_default();
    canonical.set_entry(
        Section::Scene,
        name,
        PropertyNode {
            meta: node.meta.clone(),
            properties,
            values: None,
            children: None,
        },
    );
    true
}

fn merge_matrix(
    tool: &str,
    canonical: &mut ToolData,
    name: &str,
    node: &PropertyNode,
    renderer: &dyn SceneRenderer,
    report: &mut MergeReport,
) {
    if !node.properties.contains_key(property::MODEL_MATRIX) {
        return;
    }
    let Some(matrix) = node.model_matrix() else {
        report.rejected.push(format!("Scene.{name}.{}", property::MODEL_MATRIX));
        return;
    };
    let Some(entry) = canonical.entry_mut(Section::Scene, name) else {
        return;
    };
    if entry.model_matrix() == Some(matrix) {
        return;
    }
    entry
        .properties
        .insert(property::MODEL_MATRIX.to_string(), PropertyNode::array(matrix.to_vec()).into());
    renderer.set_local_matrix(tool, name, &matrix);
    report.matrices_set.push(name.to_string());
}

fn merge_material(
    tool: &str,
    canonical: &mut ToolData,
    submitted: &ToolData,
    name: &str,
    node: &PropertyNode,
    renderer: &dyn SceneRenderer,
    report: &mut MergeReport,
) {
    let Some(material) = node.reference(property::MATERIAL) else {
        return;
    };
    let Some(definition) = submitted.entry(Section::Materials, material) else {
        report.rejected.push(format!("Scene.{name}.{}", property::MATERIAL));
        return;
    };
    if let Some(entry) = canonical.entry_mut(Section::Scene, name) {
        entry
            .properties
            .insert(property::MATERIAL.to_string(), Property::from(material));
    }

    let Some(existing) = canonical.entry_mut(Section::Materials, material) else {
        canonical.set_entry(Section::Materials, material, definition.clone());
        report.materials_adopted.push(material.to_string());
        return;
    };
    let Some(texture) = definition
        .child(property::COLOR_TEXTURE)
        .and_then(|slot| slot.properties.get(property::TEXTURE))
    else {
        return;
    };
    if let Property::Other(_) = texture {
        report.rejected.push(format!("Materials.{material}.{}", property::COLOR_TEXTURE));
        return;
    }
    if !set_color_texture(existing, texture) {
        return;
    }
    renderer.update_material(tool, material, existing);
    report.materials_updated.push(material.to_string());
}

/// Point `material`'s color texture at `texture`. Returns whether it changed.
pub(crate) fn set_color_texture(material: &mut PropertyNode, texture: &Property) -> bool {
    let slot = material
        .properties
        .entry(property::COLOR_TEXTURE.to_string())
        .or_insert_with(|| PropertyNode::object().into());
    match slot {
        Property::Node(node) => {
            if node.properties.get(property::TEXTURE) == Some(texture) {
                return false;
            }
            node.properties.insert(property::TEXTURE.to_string(), texture.clone());
            true
        }
        other => {
            *other = PropertyNode::object().with(property::TEXTURE, texture.clone()).into();
            true
        }
    }
}
