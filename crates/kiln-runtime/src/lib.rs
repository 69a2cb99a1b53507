//! # kiln-runtime
//!
//! Script engines for executing server render bundles, and the pool that
//! shares them between concurrent requests.
//!
//! ```no_run
//! use kiln_runtime::{BoaEngineFactory, EnginePool, PoolConfig};
//!
//! # fn main() -> kiln_runtime::Result<()> {
//! let pool = EnginePool::new(BoaEngineFactory::new(), PoolConfig::with_capacity(4))?;
//! let markup = pool.execute(r#"var props = {"name":"kiln"}; "<h1>" + props.name + "</h1>""#)?;
//! assert_eq!(markup, "<h1>kiln</h1>");
//! pool.close();
//! # Ok(()) }
//! ```
//!
//! Engine calls block. Async callers run them under
//! `tokio::task::spawn_blocking`.

mod engine;
mod error;
mod pool;

#[cfg(feature = "boa")]
mod boa;

pub use engine::{EngineFactory, ScriptEngine};
pub use error::{EngineError, Result};
pub use pool::{EnginePool, PoolConfig, PoolStats, PooledEngine};

#[cfg(feature = "boa")]
pub use boa::{BoaEngine, BoaEngineFactory, SSR_PRELUDE};
