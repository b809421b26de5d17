//! The rendering collaborator the host drives.
//!
//! The host never loads assets itself. It tells a [`SceneRenderer`] what
//! changed and the renderer reports finished model loads back through
//! [`crate::HostEngine::model_loaded`].

use crate::tree::{PropertyNode, MATRIX_LEN};

pub trait SceneRenderer: Send + Sync {
    /// Start loading the glTF model at `url` as `name` under `tool`'s origin.
    fn add_gltf(&self, tool: &str, name: &str, url: &str);

    fn add_texture(&self, tool: &str, name: &str, url: &str);

    /// A material's texture assignment changed.
    fn update_material(&self, tool: &str, name: &str, material: &PropertyNode);

    /// Row-major 4x4 transform of a scene entry.
    fn set_local_matrix(&self, tool: &str, name: &str, matrix: &[f64; MATRIX_LEN]);
}

/// Renderer that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRenderer;

impl SceneRenderer for NullRenderer {
    fn add_gltf(&self, _tool: &str, _name: &str, _url: &str) {}

    fn add_texture(&self, _tool: &str, _name: &str, _url: &str) {}

    fn update_material(&self, _tool: &str, _name: &str, _material: &PropertyNode) {}

    fn set_local_matrix(&self, _tool: &str, _name: &str, _matrix: &[f64; MATRIX_LEN]) {}
}

/// What a finished model load looks like to the host.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelLayout {
    pub meshes: Vec<SubMesh>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubMesh {
    pub name: String,
    pub material: Option<MeshMaterial>,
}

/// Material embedded in the model file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshMaterial {
    /// Name of the embedded color map, if the material has one.
    pub color_texture: Option<String>,
}

impl ModelLayout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mesh(mut self, name: impl Into<String>, material: Option<MeshMaterial>) -> Self {
        self.meshes.push(SubMesh {
            name: name.into(),
            material,
        });
        self
    }
}
