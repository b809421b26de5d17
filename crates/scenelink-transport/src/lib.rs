//! Message transport between a SceneLink host and its tools.
//!
//! Every tool runs in its own execution context and talks to the host over a
//! [`Channel`]: a point-to-point, ordered pipe of JSON messages with a single
//! receive callback on each end. The variants differ in how they are wired:
//!
//! - `Null` / `Mock`: no-op and direct-call channels for tests.
//! - `Worker` / `WorkerScope`: a background thread with its own runtime.
//! - `Embedded` / `Parent`: an embedded document and its parent page,
//!   with target-origin restrictions on posting.
//! - `ScriptHost` / `Script`: a script run inside the host's own context,
//!   paired through a [`PairingRegistry`] with buffering on both sides.
//!
//! # Example
//!
//! ```
//! use scenelink_transport::{ContextFactory, ContextKind, ContextOptions, ScriptCatalog};
//! use url::Url;
//!
//! # fn example() -> Result<(), scenelink_transport::TransportError> {
//! let catalog = ScriptCatalog::new().with_entry("/hello.js", |launch| {
//!     let channel = launch.connect("*").expect("pairing");
//!     channel.send(serde_json::json!("hello")).expect("send");
//! });
//! let factory = ContextFactory::new(Url::parse("http://localhost/").unwrap(), catalog);
//! let channel = factory.create(ContextKind::DynamicScript, &ContextOptions::new("/hello.js"))?;
//! channel.on_message(|message| println!("{message}"))?;
//! # Ok(())
//! # }
//! ```

pub mod channel;
mod context;
pub mod dynamic;
pub mod error;
pub mod factory;
pub mod frame;
pub mod port;
pub mod window;
pub mod worker;

pub use channel::{Channel, ChannelKind, MockChannel, NullChannel};
pub use context::Globals;
pub use dynamic::{PairingRegistry, ScriptChannel, ScriptHostChannel};
pub use error::TransportError;
pub use factory::{ContextFactory, ContextKind, ContextOptions, LaunchScope, ScriptCatalog, ToolEntry, ToolLaunch};
pub use frame::{EmbeddedChannel, ParentChannel};
pub use port::{Callback, ListenerId, MessagePort};
pub use window::{origin_of, Frame, Window, ANY_ORIGIN};
pub use worker::{WorkerChannel, WorkerScopeChannel};
