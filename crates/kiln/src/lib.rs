//! # kiln
//!
//! Server-side rendering of React routes.
//!
//! A render compiles the route's root component twice, once for the server
//! and once for the browser, runs the server build in a pooled script engine
//! and returns the markup together with the client script that hydrates it.
//! Builds are cached per root file and invalidated through the dependency
//! graph the bundler reports, so an edit to a shared component only rebuilds
//! the routes that import it.
//!
//! The moving parts:
//!
//! - [`kiln_cache`]: the build cache, in process or shared through Redis
//! - [`kiln_runtime`]: the engine pool
//! - [`Kiln`]: the renderer tying both to a [`Bundler`]
//!
//! ## Example
//!
//! ```no_run
//! use kiln::{Kiln, KilnConfig, RenderConfig};
//! use serde_json::json;
//!
//! # async fn run() -> kiln::Result<()> {
//! let mut config = KilnConfig::new("frontend");
//! config.layout_file = Some("Layout.tsx".into());
//!
//! let kiln = Kiln::new(config).await?;
//! let route = kiln
//!     .render_route(RenderConfig::new("pages/Home.tsx").with_props(json!({"user": "ada"})))
//!     .await?;
//! println!("{}", route.markup);
//! # Ok(()) }
//! ```
//!
//! ## Logging
//!
//! kiln emits `tracing` events. Install a subscriber yourself, or enable the
//! `logging` feature and call [`logging::init_logging`].

mod app;
pub mod bundler;
pub mod config;
pub mod contents;
mod error;
pub mod invalidate;
pub mod page;
pub mod render;
pub mod route;
pub mod watch;

#[cfg(feature = "logging")]
pub mod logging;

pub use app::{Kiln, LAYOUT_CSS_OUTPUT, SpaBundle};
pub use bundler::{BuildRequest, Bundler, EsbuildBundler};
pub use config::{AppEnv, KilnConfig, SpaMode, WatchConfig};
pub use error::{BuildError, ConfigError, Error, Result};
pub use invalidate::{Invalidator, ReloadEvent};
pub use render::{BuildSettings, RenderOutput};
pub use route::{RenderConfig, RenderedRoute, inject_props, props_to_json, route_id};
pub use watch::{FileWatcher, WatchHandle};

pub use kiln_cache::{BuildArtifact, BuildCache, BuildKind, CacheBackend, CacheConfig, LocalCache};
pub use kiln_runtime::{EngineError, EnginePool, PoolConfig, PoolStats};
