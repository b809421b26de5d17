//! Creation of tool execution contexts.
//!
//! The [`ContextFactory`] resolves a location against the host's base URL,
//! looks up the entry point registered for its path in the [`ScriptCatalog`],
//! starts a context of the requested [`ContextKind`] running that entry, and
//! returns the host side of the channel to it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

use crate::channel::Channel;
use crate::context::Globals;
use crate::dynamic::{PairingRegistry, ScriptChannel};
use crate::error::TransportError;
use crate::frame::{EmbeddedChannel, ParentChannel};
use crate::window::{Window, ANY_ORIGIN};
use crate::worker::{WorkerChannel, WorkerScopeChannel};

/// The kind of execution context a tool runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    /// A background thread.
    Worker,
    /// An embedded document.
    Frame,
    /// A script run inside the host's own context.
    DynamicScript,
}

impl fmt::Display for ContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ContextKind::Worker => "worker",
            ContextKind::Frame => "frame",
            ContextKind::DynamicScript => "dynamic_script",
        })
    }
}

/// Options for [`ContextFactory::create`].
#[derive(Debug, Clone)]
pub struct ContextOptions {
    /// Path or URL of the script/document, resolved against the base URL.
    pub location: String,
    /// Whether the script is loaded as a module rather than a classic script.
    pub module: bool,
    /// Origins the embedded document may exchange messages with.
    pub target_origin: String,
}

impl ContextOptions {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            module: false,
            target_origin: ANY_ORIGIN.to_string(),
        }
    }

    pub fn with_module(mut self, module: bool) -> Self {
        self.module = module;
        self
    }

    pub fn with_target_origin(mut self, target_origin: impl Into<String>) -> Self {
        self.target_origin = target_origin.into();
        self
    }
}

/// What a launched entry point gets to build its side of the channel.
pub enum LaunchScope {
    Worker(WorkerScopeChannel),
    Document(Arc<Window>),
    Script {
        registry: PairingRegistry,
        pairing_id: u64,
    },
}

/// Handed to an entry point when its context starts.
pub struct ToolLaunch {
    pub location: Url,
    pub module: bool,
    pub scope: LaunchScope,
    /// Store the tool's session here to keep it running.
    pub globals: Globals,
}

impl ToolLaunch {
    /// First value of a query parameter of the launch location.
    pub fn query_param(&self, key: &str) -> Option<String> {
        self.location
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    /// Build the tool side of the channel. `target_origin` only matters for
    /// documents, where it restricts who receives what the tool posts.
    pub fn connect(self, target_origin: &str) -> Result<Channel, TransportError> {
        match self.scope {
            LaunchScope::Worker(scope) => Ok(Channel::WorkerScope(scope)),
            LaunchScope::Document(window) => {
                Ok(Channel::Parent(ParentChannel::new(window, target_origin)))
            }
            LaunchScope::Script {
                registry,
                pairing_id,
            } => Ok(Channel::Script(ScriptChannel::connect(&registry, pairing_id)?)),
        }
    }
}

/// Entry point run inside a newly created context.
pub type ToolEntry = Arc<dyn Fn(ToolLaunch) + Send + Sync>;

/// Maps location paths to entry points.
#[derive(Clone, Default)]
pub struct ScriptCatalog {
    entries: HashMap<String, ToolEntry>,
}

impl ScriptCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `entry` for a path such as `/tool_buoy/tool_buoy.js`.
    pub fn register<F>(&mut self, path: impl Into<String>, entry: F)
    where
        F: Fn(ToolLaunch) + Send + Sync + 'static,
    {
        self.entries.insert(path.into(), Arc::new(entry));
    }

    pub fn with_entry<F>(mut self, path: impl Into<String>, entry: F) -> Self
    where
        F: Fn(ToolLaunch) + Send + Sync + 'static,
    {
        self.register(path, entry);
        self
    }

    pub fn resolve(&self, location: &Url) -> Option<ToolEntry> {
        self.entries.get(location.path()).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Creates tool contexts on behalf of the host.
pub struct ContextFactory {
    host: Arc<Window>,
    catalog: ScriptCatalog,
    registry: PairingRegistry,
}

impl ContextFactory {
    /// Create a factory whose host document lives at `base`.
    pub fn new(base: Url, catalog: ScriptCatalog) -> Self {
        Self {
            host: Window::top_level(base),
            catalog,
            registry: PairingRegistry::new(),
        }
    }

    pub fn host_window(&self) -> &Arc<Window> {
        &self.host
    }

    pub fn registry(&self) -> &PairingRegistry {
        &self.registry
    }

    /// Resolve a location against the host document's URL.
    pub fn resolve(&self, location: &str) -> Result<Url, TransportError> {
        self.host
            .location()
            .join(location)
            .map_err(|source| TransportError::InvalidLocation {
                location: location.to_string(),
                source,
            })
    }

    /// Start a context of `kind` and return the host side of its channel.
    ///
    /// Worker and frame contexts need a Tokio runtime on the calling thread
    /// once their channel gets a receive callback. Dynamic scripts run
    /// synchronously before this returns, so anything they send is waiting in
    /// the returned channel's receive buffer.
    pub fn create(&self, kind: ContextKind, options: &ContextOptions) -> Result<Channel, TransportError> {
        let location = self.resolve(&options.location)?;
        let entry = self
            .catalog
            .resolve(&location)
            .ok_or_else(|| TransportError::UnknownLocation(location.to_string()))?;
        info!(kind = %kind, location = %location, module = options.module, "Creating tool context");

        let module = options.module;
        match kind {
            ContextKind::Worker => {
                let launch_location = location.clone();
                let worker = WorkerChannel::spawn(location.path().to_string(), move |scope, globals| {
                    entry(ToolLaunch {
                        location: launch_location,
                        module,
                        scope: LaunchScope::Worker(scope),
                        globals,
                    })
                })?;
                Ok(Channel::Worker(worker))
            }
            ContextKind::Frame => {
                let launch_location = location.clone();
                let embedded = EmbeddedChannel::spawn(
                    &self.host,
                    location,
                    options.target_origin.clone(),
                    move |window, globals| {
                        entry(ToolLaunch {
                            location: launch_location,
                            module,
                            scope: LaunchScope::Document(window),
                            globals,
                        })
                    },
                )?;
                Ok(Channel::Embedded(embedded))
            }
            ContextKind::DynamicScript => {
                let host_half = self.registry.register();
                let pairing_id = host_half.pairing_id();
                entry(ToolLaunch {
                    location,
                    module,
                    scope: LaunchScope::Script {
                        registry: self.registry.clone(),
                        pairing_id,
                    },
                    globals: host_half.globals().clone(),
                });
                debug!(id = pairing_id, paired = host_half.is_paired(), "Dynamic script loaded");
                Ok(Channel::ScriptHost(host_half))
            }
        }
    }
}
