//! A headless renderer that logs what it is asked to do.
//!
//! Model loads are "completed" by the host loop: `add_gltf` queues a
//! [`LoadRequest`], and the loop answers it with [`simulated_layout`].

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use scenelink_protocol::tree::{property, MATRIX_LEN};
use scenelink_protocol::{MeshMaterial, ModelLayout, PropertyNode, SceneRenderer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    pub tool: String,
    pub model: String,
    pub url: String,
}

pub struct LoggingRenderer {
    loads: mpsc::UnboundedSender<LoadRequest>,
}

impl LoggingRenderer {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LoadRequest>) {
        let (loads, requests) = mpsc::unbounded_channel();
        (Self { loads }, requests)
    }
}

impl SceneRenderer for LoggingRenderer {
    fn add_gltf(&self, tool: &str, name: &str, url: &str) {
        info!(tool, model = name, url, "Loading model");
        let request = LoadRequest {
            tool: tool.to_string(),
            model: name.to_string(),
            url: url.to_string(),
        };
        if self.loads.send(request).is_err() {
            warn!(tool, model = name, "Host loop is gone, model load dropped");
        }
    }

    fn add_texture(&self, tool: &str, name: &str, url: &str) {
        info!(tool, texture = name, url, "Loading texture");
    }

    fn update_material(&self, tool: &str, name: &str, material: &PropertyNode) {
        let texture = material
            .child(property::COLOR_TEXTURE)
            .and_then(|slot| slot.reference(property::TEXTURE));
        info!(tool, material = name, texture = ?texture, "Updating material");
    }

    fn set_local_matrix(&self, tool: &str, name: &str, matrix: &[f64; MATRIX_LEN]) {
        debug!(tool, object = name, ?matrix, "Setting local matrix");
        info!(
            tool,
            object = name,
            x = matrix[12],
            y = matrix[13],
            z = matrix[14],
            "Moved object"
        );
    }
}

/// Layout of the models the demo knows about. The flag buoys have a flag
/// plane without a texture and a hull with an embedded one.
pub fn simulated_layout(url: &str) -> ModelLayout {
    if url.ends_with("/flagab.glb") || url.ends_with("/flagcz.glb") {
        ModelLayout::new()
            .with_mesh("Plane001", Some(MeshMaterial::default()))
            .with_mesh(
                "Hull",
                Some(MeshMaterial {
                    color_texture: Some("hull_baseColor".to_string()),
                }),
            )
    } else {
        ModelLayout::new().with_mesh("Mesh", None)
    }
}
