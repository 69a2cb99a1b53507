//! # kiln-cache
//!
//! Build cache for server-rendered routes.
//!
//! The cache stores one [`BuildArtifact`] per (kind, root file) pair and keeps
//! the bookkeeping that invalidation needs:
//!
//! - route ids mapped to the root file they render
//! - each root's dependency list, with a reverse index from dependency to roots
//!
//! Two backends implement [`BuildCache`] with the same semantics:
//! [`LocalCache`] for a single process and [`RedisCache`] (feature `redis`)
//! for instances that share builds.
//!
//! ```no_run
//! use kiln_cache::{BuildArtifact, BuildCache, BuildKind, LocalCache};
//!
//! # #[tokio::main]
//! # async fn main() -> kiln_cache::Result<()> {
//! let cache = LocalCache::new();
//! cache
//!     .set_build(BuildKind::Server, "/app/pages/home.tsx", BuildArtifact::new("render()", ""))
//!     .await?;
//! cache
//!     .set_dependencies("/app/pages/home.tsx", &["/app/components/nav.tsx".to_string()])
//!     .await?;
//!
//! let parents = cache.parent_files("/app/components/nav.tsx").await?;
//! assert_eq!(parents, vec!["/app/pages/home.tsx"]);
//! # Ok(()) }
//! ```

use std::sync::Arc;

use async_trait::async_trait;

mod artifact;
mod config;
mod error;
mod index;
mod local;
#[cfg(feature = "redis")]
mod redis_cache;

pub use artifact::{BuildArtifact, BuildKind};
pub use config::{CacheBackend, CacheConfig};
pub use error::{CacheError, Result};
pub use index::DependencyIndex;
pub use local::{LocalCache, LocalCacheStats};
#[cfg(feature = "redis")]
pub use redis_cache::RedisCache;

/// Storage for compiled builds and the dependency graph used to invalidate them.
///
/// Lookups of absent entries return `Ok(None)` or an empty list. Errors are
/// reserved for backend failures.
#[async_trait]
pub trait BuildCache: Send + Sync {
    /// Fetch the cached build of `path`.
    async fn get_build(&self, kind: BuildKind, path: &str) -> Result<Option<BuildArtifact>>;

    /// Store a build, replacing any previous one. Last writer wins.
    async fn set_build(&self, kind: BuildKind, path: &str, artifact: BuildArtifact) -> Result<()>;

    /// Drop a build. Absent entries are not an error.
    async fn remove_build(&self, kind: BuildKind, path: &str) -> Result<()>;

    /// Map `route_id` to the root file it renders, replacing a prior mapping.
    async fn set_parent_file(&self, route_id: &str, path: &str) -> Result<()>;

    /// Route ids whose root file is `path`.
    async fn route_ids_for_file(&self, path: &str) -> Result<Vec<String>>;

    /// Every registered route id.
    async fn all_route_ids(&self) -> Result<Vec<String>>;

    /// Route ids affected by a change to `path`.
    ///
    /// Resolves the roots that depend on `path`; when nothing does, `path`
    /// itself is treated as the root.
    async fn route_ids_with_file(&self, path: &str) -> Result<Vec<String>> {
        let mut roots = self.parent_files(path).await?;
        if roots.is_empty() {
            roots.push(path.to_string());
        }

        let mut ids = Vec::new();
        for root in &roots {
            ids.extend(self.route_ids_for_file(root).await?);
        }
        Ok(ids)
    }

    /// Replace the dependency list of root `path` and its reverse entries as
    /// one atomic step.
    async fn set_dependencies(&self, path: &str, dependencies: &[String]) -> Result<()>;

    /// Roots whose last build read `dependency`.
    async fn parent_files(&self, dependency: &str) -> Result<Vec<String>>;

    /// Drop every build, route and dependency record. Idempotent.
    async fn clear(&self) -> Result<()>;

    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;
}

/// Build the cache backend selected by `config`.
pub async fn new_cache(config: &CacheConfig) -> Result<Arc<dyn BuildCache>> {
    match config.backend {
        CacheBackend::Local => Ok(Arc::new(LocalCache::new())),
        #[cfg(feature = "redis")]
        CacheBackend::Redis => Ok(Arc::new(RedisCache::connect(config).await?)),
        #[cfg(not(feature = "redis"))]
        CacheBackend::Redis => Err(CacheError::InvalidConfig(
            "redis backend requires the `redis` feature".to_string(),
        )),
    }
}
