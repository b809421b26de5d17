//! End-to-end runs of the host with buoy tools.

use clap::Parser;
use tempfile::TempDir;

use scenelink_cli::buoy::{flag_texture, tool_name, BUOY, FLAG_MATERIAL};
use scenelink_cli::{run_host, Cli};
use scenelink_config::SceneLinkConfig;
use scenelink_protocol::tree::property;
use scenelink_protocol::{Section, World};

fn cli(args: &[&str]) -> Cli {
    Cli::parse_from(std::iter::once("scenelink").chain(args.iter().copied()))
}

fn assert_buoy(world: &World, tool: &str, texture: &str) {
    let data = world.tool_data(tool).unwrap_or_else(|| panic!("{tool} missing from world"));

    let buoy = data.entry(Section::Scene, BUOY).unwrap();
    assert_eq!(buoy.reference(property::MATERIAL), Some(FLAG_MATERIAL));
    assert!(buoy.model_matrix().is_some());
    let children = buoy.children.as_ref().expect("model layout recorded");
    assert!(children.properties.contains_key("Plane001"));
    assert!(children.properties.contains_key("Hull"));

    let flag = data
        .entry(Section::Materials, FLAG_MATERIAL)
        .and_then(|m| m.child(property::COLOR_TEXTURE))
        .unwrap();
    assert_eq!(flag.reference(property::TEXTURE), Some(texture));
    assert!(data.entry(Section::Textures, texture).is_some());
    assert!(data.entry(Section::Textures, "Buoy.Hull.hull_baseColor").is_some());
}

#[tokio::test]
async fn test_script_buoys() {
    let world = run_host(&cli(&["--kind", "script", "--buoys", "ab", "--settle-ms", "300"]), &SceneLinkConfig::default())
        .await
        .unwrap();

    assert_eq!(world.body.tools.len(), 2);
    assert_buoy(&world, "BuoyA", "ICS_Alfa.png");
    assert_buoy(&world, "BuoyB", "ICS_Bravo.png");
}

#[tokio::test]
async fn test_frame_buoys() {
    let world = run_host(&cli(&["--buoys", "c", "--settle-ms", "800"]), &SceneLinkConfig::default())
        .await
        .unwrap();

    assert_buoy(&world, "BuoyC", "ICS_Charlie.png");
    let launches: Vec<_> = world.launches().collect();
    assert_eq!(launches, [("BuoyC", "/tool_buoy/tool_buoy.html?letter=c")]);
}

/// Eight buoys of `kind` on a multi-threaded host; every one of them must
/// finish its handshake and placement.
async fn run_eight_buoys(kind: &str) {
    const LETTERS: &str = "abcdefgh";
    let world = run_host(
        &cli(&["--kind", kind, "--buoys", LETTERS, "--settle-ms", "1500"]),
        &SceneLinkConfig::default(),
    )
    .await
    .unwrap();

    assert_eq!(world.body.tools.len(), LETTERS.len());
    for letter in LETTERS.chars() {
        assert_buoy(&world, &tool_name(letter), flag_texture(letter).unwrap());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_frame_buoys_on_worker_threads() {
    run_eight_buoys("frame").await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_worker_buoys_on_worker_threads() {
    run_eight_buoys("worker").await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_script_buoys_on_worker_threads() {
    run_eight_buoys("script").await;
}

#[tokio::test]
async fn test_saved_world_is_relaunched() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("world.json");

    let first = run_host(&cli(&["--kind", "script", "--buoys", "d", "--settle-ms", "200"]), &SceneLinkConfig::default())
        .await
        .unwrap();
    first.save(&path).unwrap();
    let placed = first.tool_data("BuoyD").unwrap().entry(Section::Scene, BUOY).unwrap().clone();

    let world_arg = path.to_string_lossy().into_owned();
    let second = run_host(
        &cli(&["--kind", "script", "--world", &world_arg, "--settle-ms", "200"]),
        &SceneLinkConfig::default(),
    )
    .await
    .unwrap();

    assert_buoy(&second, "BuoyD", "ICS_Delta.png");
    let restored = second.tool_data("BuoyD").unwrap().entry(Section::Scene, BUOY).unwrap();
    assert_eq!(restored.model_matrix(), placed.model_matrix());
}

#[tokio::test]
async fn test_missing_world_file() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("nope.json").to_string_lossy().into_owned();
    let result = run_host(&cli(&["--world", &missing, "--settle-ms", "0"]), &SceneLinkConfig::default()).await;
    assert!(result.is_err());
}
