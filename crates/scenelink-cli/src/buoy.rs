//! The buoy tool.
//!
//! Places one flag buoy per tool: a glTF model at a random spot on the water,
//! with the signal flag of its letter as the texture of the flag plane. The
//! tool reads its name from the `channel` query parameter and its letter from
//! `letter`.

use rand::Rng;
use tracing::{error, info, warn};

use scenelink_protocol::tree::{node_type, property};
use scenelink_protocol::{PropertyNode, Section, ToolData, ToolHooks, ToolSession};
use scenelink_transport::{ContextKind, ScriptCatalog, ToolLaunch, ANY_ORIGIN};

pub const SCRIPT_PATH: &str = "/tool_buoy/tool_buoy.js";
pub const DOCUMENT_PATH: &str = "/tool_buoy/tool_buoy.html";

/// Scene entry the tool owns.
pub const BUOY: &str = "Buoy";
/// Material of the flag plane inside the buoy models.
pub const FLAG_MATERIAL: &str = "Buoy.Plane001";

const FLAG_TEXTURES: [(char, &str); 26] = [
    ('a', "ICS_Alfa.png"),
    ('b', "ICS_Bravo.png"),
    ('c', "ICS_Charlie.png"),
    ('d', "ICS_Delta.png"),
    ('e', "ICS_Echo.png"),
    ('f', "ICS_Foxtrot.png"),
    ('g', "ICS_Golf.png"),
    ('h', "ICS_Hotel.png"),
    ('i', "ICS_India.png"),
    ('j', "ICS_Juliett.png"),
    ('k', "ICS_Kilo.png"),
    ('l', "ICS_Lima.png"),
    ('m', "ICS_Mike.png"),
    ('n', "ICS_November.png"),
    ('o', "ICS_Oscar.png"),
    ('p', "ICS_Papa.png"),
    ('q', "ICS_Quebec.png"),
    ('r', "ICS_Romeo.png"),
    ('s', "ICS_Sierra.png"),
    ('t', "ICS_Tango.png"),
    ('u', "ICS_Uniform.png"),
    ('v', "ICS_Victor.png"),
    ('w', "ICS_Whiskey.png"),
    ('x', "ICS_X-ray.png"),
    ('y', "ICS_Yankee.png"),
    ('z', "ICS_Zulu.png"),
];

/// Texture file of the signal flag for `letter`.
pub fn flag_texture(letter: char) -> Option<&'static str> {
    let letter = letter.to_ascii_lowercase();
    FLAG_TEXTURES
        .iter()
        .find(|(l, _)| *l == letter)
        .map(|(_, file)| *file)
}

/// The A and B flags are swallow-tailed and use their own model.
pub fn model_url(letter: char) -> &'static str {
    match letter.to_ascii_lowercase() {
        'a' | 'b' => "/models/flagab.glb",
        _ => "/models/flagcz.glb",
    }
}

/// Tool name for a letter, e.g. `BuoyA`.
pub fn tool_name(letter: char) -> String {
    format!("{BUOY}{}", letter.to_ascii_uppercase())
}

/// Where to load a buoy tool from for a context kind.
pub fn location(kind: ContextKind, letter: char) -> String {
    let path = match kind {
        ContextKind::Frame => DOCUMENT_PATH,
        ContextKind::Worker | ContextKind::DynamicScript => SCRIPT_PATH,
    };
    format!("{path}?letter={}", letter.to_ascii_lowercase())
}

/// Register the tool under both its script and document paths.
pub fn register(catalog: &mut ScriptCatalog) {
    catalog.register(SCRIPT_PATH, launch);
    catalog.register(DOCUMENT_PATH, launch);
}

fn launch(launch: ToolLaunch) {
    let Some(name) = launch.query_param("channel") else {
        warn!(location = %launch.location, "Buoy tool launched without a channel");
        return;
    };
    let letter = launch
        .query_param("letter")
        .and_then(|l| l.chars().next())
        .unwrap_or('a');
    info!(tool = %name, letter = %letter, "BuoyTool using channel");

    let globals = launch.globals.clone();
    let channel = match launch.connect(ANY_ORIGIN) {
        Ok(channel) => channel,
        Err(e) => {
            error!(tool = %name, error = %e, "Failed to connect buoy tool");
            return;
        }
    };
    let hooks = ToolHooks::new()
        .on_initialized(move |session| start(session, letter))
        .on_lifecycle(|session, command| {
            info!(tool = session.name(), command = command.name(), "Host notification");
        });
    match ToolSession::connect(name.as_str(), channel, hooks) {
        Ok(session) => globals.keep(session),
        Err(e) => error!(tool = %name, error = %e, "Failed to start buoy tool"),
    }
}

fn start(session: &ToolSession, letter: char) {
    let placed = session.edit(|data| {
        if data.entry(Section::Scene, BUOY).is_some() {
            return false;
        }
        place_buoy(data, letter, &mut rand::thread_rng());
        true
    });
    match placed {
        Ok(true) => {
            if let Err(e) = session.write() {
                error!(tool = session.name(), error = %e, "Failed to write buoy");
            }
        }
        Ok(false) => info!(tool = session.name(), "Buoy already placed"),
        Err(e) => error!(tool = session.name(), error = %e, "Failed to place buoy"),
    }
}

/// Add the buoy for `letter` to `data`: the model at a random position, its
/// flag texture and the flag plane's material.
pub fn place_buoy(data: &mut ToolData, letter: char, rng: &mut impl Rng) {
    let x: f64 = rng.gen_range(-5.0..5.0);
    let z: f64 = rng.gen_range(-5.0..5.0);
    let matrix = vec![1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, x, -1.0, z, 1.0];

    let mut buoy = PropertyNode::asset(node_type::OBJECT_GLTF, model_url(letter))
        .with(property::MODEL_MATRIX, PropertyNode::array(matrix));

    if let Some(texture) = flag_texture(letter) {
        data.set_entry(
            Section::Textures,
            texture,
            PropertyNode::asset(node_type::TEXTURE_PNG, format!("/textures/{texture}")),
        );
        data.set_entry(
            Section::Materials,
            FLAG_MATERIAL,
            PropertyNode::default().with(
                property::COLOR_TEXTURE,
                PropertyNode::default().with(property::TEXTURE, texture),
            ),
        );
        buoy = buoy.with(property::MATERIAL, FLAG_MATERIAL);
    }
    data.set_entry(Section::Scene, BUOY, buoy);
}
