//! SceneLink command-line host.
//!
//! Starts a host engine, launches buoy tools in the requested kind of
//! execution context, lets them synchronize for a while and prints the
//! resulting world document.

pub mod buoy;
pub mod renderer;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use scenelink_config::SceneLinkConfig;
use scenelink_protocol::{with_channel_param, HostEngine, World};
use scenelink_transport::{ContextFactory, ContextKind, ContextOptions, ScriptCatalog};

use crate::renderer::{simulated_layout, LoadRequest, LoggingRenderer};

/// Initial size of the host window, sent to every tool once it is attached.
const WINDOW_SIZE: (u32, u32) = (1280, 720);

#[derive(Parser, Debug)]
#[command(name = "scenelink", version, about = "Run a SceneLink host with buoy tools")]
pub struct Cli {
    /// Configuration file (defaults to ./scenelink.toml if present)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// World document to start from, overriding the configured one
    #[arg(long, value_name = "PATH")]
    pub world: Option<PathBuf>,

    /// Execution context for tools launched from --buoys and the world
    #[arg(long, value_enum, default_value_t = ToolKind::Frame)]
    pub kind: ToolKind,

    /// One buoy tool per letter, e.g. "abc"
    #[arg(long, value_name = "LETTERS")]
    pub buoys: Option<String>,

    /// How long to let tools synchronize before printing the world
    #[arg(long, value_name = "MS", default_value_t = 500)]
    pub settle_ms: u64,

    /// Also write the resulting world document here
    #[arg(long, value_name = "PATH")]
    pub save: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ToolKind {
    Worker,
    Frame,
    Script,
}

impl From<ToolKind> for ContextKind {
    fn from(kind: ToolKind) -> Self {
        match kind {
            ToolKind::Worker => ContextKind::Worker,
            ToolKind::Frame => ContextKind::Frame,
            ToolKind::Script => ContextKind::DynamicScript,
        }
    }
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = SceneLinkConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    init_logging(&config.log_filter);

    let world = run_host(&cli, &config).await?;
    println!("{}", serde_json::to_string_pretty(&world)?);

    if let Some(path) = &cli.save {
        world
            .save(path)
            .with_context(|| format!("Failed to save world to {}", path.display()))?;
    }
    Ok(())
}

/// `RUST_LOG` wins over the configured filter.
fn init_logging(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// A tool to start. `location` is where it lives without the channel
/// parameter, as recorded in the world.
#[derive(Debug, Clone)]
struct Launch {
    name: String,
    location: String,
    options: ContextOptions,
    kind: ContextKind,
}

/// Tools from the configuration first, then the world document, then
/// `--buoys`. A name is launched once.
fn plan_launches(cli: &Cli, config: &SceneLinkConfig, world: &World) -> Vec<Launch> {
    let kind = ContextKind::from(cli.kind);
    let mut launches: Vec<Launch> = Vec::new();
    let mut push = |launch: Launch| {
        if launches.iter().any(|l| l.name == launch.name) {
            debug!(tool = %launch.name, "Tool already planned");
        } else {
            launches.push(launch);
        }
    };

    for tool in &config.tools {
        push(Launch {
            name: tool.name.clone(),
            location: tool.location.clone(),
            options: ContextOptions::new(with_channel_param(&tool.location, &tool.name))
                .with_module(tool.module)
                .with_target_origin(config.target_origin_for(tool)),
            kind: tool.kind,
        });
    }
    for (name, location) in world.launches() {
        push(Launch {
            name: name.to_string(),
            location: location.to_string(),
            options: ContextOptions::new(with_channel_param(location, name))
                .with_target_origin(config.default_target_origin.as_str()),
            kind,
        });
    }
    for letter in cli.buoys.as_deref().unwrap_or_default().chars() {
        let name = buoy::tool_name(letter);
        let location = buoy::location(kind, letter);
        push(Launch {
            options: ContextOptions::new(with_channel_param(&location, &name))
                .with_target_origin(config.default_target_origin.as_str()),
            name,
            location,
            kind,
        });
    }
    launches
}

/// Run the host until the tools have had `--settle-ms` to synchronize and
/// return the resulting world.
pub async fn run_host(cli: &Cli, config: &SceneLinkConfig) -> Result<World> {
    let world = match cli.world.as_ref().or(config.world_path.as_ref()) {
        Some(path) => World::load(path).with_context(|| format!("Failed to load world from {}", path.display()))?,
        None => World::new(),
    };
    let launches = plan_launches(cli, config, &world);

    let mut catalog = ScriptCatalog::new();
    buoy::register(&mut catalog);
    let factory = ContextFactory::new(config.base_url()?, catalog);

    let (renderer, mut loads) = LoggingRenderer::new();
    let mut engine = HostEngine::new(world, Arc::new(renderer));

    for launch in &launches {
        let channel = factory
            .create(launch.kind, &launch.options)
            .with_context(|| format!("Failed to launch {}", launch.name))?;
        engine.add_launched_tool(&launch.name, &launch.location, channel)?;
    }
    info!(tools = engine.len(), kind = %ContextKind::from(cli.kind), "Host started");
    engine.on_window_resized(WINDOW_SIZE.0, WINDOW_SIZE.1);

    settle(&engine, &mut loads, Duration::from_millis(cli.settle_ms)).await?;
    Ok(engine.world_snapshot())
}

/// Complete model loads until `period` has passed.
async fn settle(
    engine: &HostEngine,
    loads: &mut mpsc::UnboundedReceiver<LoadRequest>,
    period: Duration,
) -> Result<()> {
    let deadline = tokio::time::sleep(period);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            Some(load) = loads.recv() => {
                let layout = simulated_layout(&load.url);
                if !engine.model_loaded(&load.tool, &load.model, &layout)? {
                    warn!(tool = %load.tool, model = %load.model, "Loaded model is no longer in the scene");
                }
            }
        }
    }
    debug!("Settled");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use scenelink_config::ToolSpec;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("scenelink").chain(args.iter().copied()))
    }

    #[test]
    fn test_defaults() {
        let cli = cli(&[]);
        assert_eq!(cli.kind, ToolKind::Frame);
        assert_eq!(cli.settle_ms, 500);
        assert!(cli.buoys.is_none());
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(ContextKind::from(cli(&["--kind", "script"]).kind), ContextKind::DynamicScript);
        assert_eq!(ContextKind::from(cli(&["--kind", "worker"]).kind), ContextKind::Worker);
    }

    #[test]
    fn test_plan_launches_deduplicates() {
        let config = SceneLinkConfig {
            tools: vec![ToolSpec {
                name: "BuoyA".into(),
                location: "/tool_buoy/tool_buoy.js?letter=a".into(),
                kind: ContextKind::Worker,
                module: true,
                target_origin: None,
            }],
            ..SceneLinkConfig::default()
        };
        let world = World::from_json(
            r#"{"World": {"Tools": {"BuoyC": {"Meta": {"Type": "Tool", "Url": "/tool_buoy/tool_buoy.html?letter=c"}}}}}"#,
        )
        .unwrap();

        let launches = plan_launches(&cli(&["--buoys", "abc"]), &config, &world);
        let names: Vec<&str> = launches.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, ["BuoyA", "BuoyC", "BuoyB"]);

        assert_eq!(launches[0].kind, ContextKind::Worker);
        assert!(launches[0].options.module);
        assert_eq!(launches[0].options.location, "/tool_buoy/tool_buoy.js?letter=a&channel=BuoyA");
        assert_eq!(launches[1].options.location, "/tool_buoy/tool_buoy.html?letter=c&channel=BuoyC");
        assert_eq!(launches[1].location, "/tool_buoy/tool_buoy.html?letter=c");
        assert_eq!(launches[2].kind, ContextKind::Frame);
        assert_eq!(launches[2].options.location, "/tool_buoy/tool_buoy.html?letter=b&channel=BuoyB");
    }
}
