//! In-process build cache.

use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::FxHashMap as HashMap;

use crate::artifact::{BuildArtifact, BuildKind};
use crate::error::Result;
use crate::index::DependencyIndex;
use crate::BuildCache;

/// Build cache held in process memory.
///
/// Each map sits behind its own `parking_lot::RwLock`, which queues new
/// readers behind a waiting writer. The dependency index is a single
/// structure under one lock, so forward and reverse edges change together.
#[derive(Debug, Default)]
pub struct LocalCache {
    server_builds: RwLock<HashMap<String, BuildArtifact>>,
    client_builds: RwLock<HashMap<String, BuildArtifact>>,
    /// route id -> root file
    routes: RwLock<HashMap<String, String>>,
    dependencies: RwLock<DependencyIndex>,
}

/// Entry counts for a [`LocalCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalCacheStats {
    pub server_builds: usize,
    pub client_builds: usize,
    pub routes: usize,
    pub tracked_roots: usize,
}

impl LocalCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn builds(&self, kind: BuildKind) -> &RwLock<HashMap<String, BuildArtifact>> {
        match kind {
            BuildKind::Server => &self.server_builds,
            BuildKind::Client => &self.client_builds,
        }
    }

    pub fn stats(&self) -> LocalCacheStats {
        LocalCacheStats {
            server_builds: self.server_builds.read().len(),
            client_builds: self.client_builds.read().len(),
            routes: self.routes.read().len(),
            tracked_roots: self.dependencies.read().root_count(),
        }
    }

    /// Dependencies recorded for `root` by the last write-back.
    pub fn dependencies_of(&self, root: &str) -> Option<Vec<String>> {
        self.dependencies.read().dependencies(root).map(<[String]>::to_vec)
    }

    /// Checks that the reverse index is the transpose of the forward index.
    pub fn index_is_consistent(&self) -> bool {
        self.dependencies.read().is_consistent()
    }
}

#[async_trait]
impl BuildCache for LocalCache {
    async fn get_build(&self, kind: BuildKind, path: &str) -> Result<Option<BuildArtifact>> {
        Ok(self.builds(kind).read().get(path).cloned())
    }

    async fn set_build(&self, kind: BuildKind, path: &str, artifact: BuildArtifact) -> Result<()> {
        self.builds(kind).write().insert(path.to_string(), artifact);
        Ok(())
    }

    async fn remove_build(&self, kind: BuildKind, path: &str) -> Result<()> {
        self.builds(kind).write().remove(path);
        Ok(())
    }

    async fn set_parent_file(&self, route_id: &str, path: &str) -> Result<()> {
        self.routes
            .write()
            .insert(route_id.to_string(), path.to_string());
        Ok(())
    }

    async fn route_ids_for_file(&self, path: &str) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .routes
            .read()
            .iter()
            .filter(|(_, file)| file.as_str() == path)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn all_route_ids(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.routes.read().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn set_dependencies(&self, path: &str, dependencies: &[String]) -> Result<()> {
        self.dependencies.write().replace(path, dependencies);
        Ok(())
    }

    async fn parent_files(&self, dependency: &str) -> Result<Vec<String>> {
        Ok(self.dependencies.read().parents(dependency))
    }

    async fn clear(&self) -> Result<()> {
        self.server_builds.write().clear();
        self.client_builds.write().clear();
        self.routes.write().clear();
        self.dependencies.write().clear();
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}
