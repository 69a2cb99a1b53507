//! One render: a server branch and a client branch run concurrently against
//! the shared build cache, then join.
//!
//! Each branch is its own tokio task reporting through a oneshot channel.
//! A branch that finishes after the other one has already failed the render
//! sends into a dropped receiver and never blocks.

use std::path::PathBuf;
use std::sync::Arc;

use kiln_cache::{BuildArtifact, BuildCache, BuildKind};
use kiln_runtime::EnginePool;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::bundler::{BuildRequest, Bundler};
use crate::config::SpaMode;
use crate::contents;
use crate::error::{BuildError, Error, Result};
use crate::route::inject_props;

/// Build inputs shared by every render of one [`crate::Kiln`].
#[derive(Debug, Clone)]
pub struct BuildSettings {
    /// Imports prepended to every entry.
    pub imports: Vec<String>,
    /// Wrap routes in the `Layout` component.
    pub use_layout: bool,
    pub frontend_dir: PathBuf,
    pub asset_route: String,
    pub production: bool,
    /// Single-page app entry and mode, when configured.
    pub spa_app: Option<(String, SpaMode)>,
}

impl BuildSettings {
    /// Entry source for rendering `path` as `kind`.
    ///
    /// In router mode the app entry itself renders through a static router so
    /// its markup matches what the shared client bundle hydrates.
    pub fn contents(&self, kind: BuildKind, path: &str) -> Result<String, BuildError> {
        if let (BuildKind::Server, Some((app, mode))) = (kind, &self.spa_app) {
            if app == path {
                let spa =
                    contents::server_spa_contents(&self.imports, app, *mode, &self.frontend_dir)?;
                if let Some(contents) = spa {
                    return Ok(contents);
                }
            }
        }

        let contents = match kind {
            BuildKind::Server => contents::server_contents(&self.imports, path, self.use_layout)?,
            BuildKind::Client => contents::client_contents(&self.imports, path, self.use_layout)?,
        };
        Ok(contents)
    }

    pub fn request(&self, kind: BuildKind, contents: String) -> BuildRequest {
        BuildRequest {
            contents,
            base_dir: self.frontend_dir.clone(),
            asset_route: self.asset_route.clone(),
            kind,
            production: self.production,
        }
    }
}

/// Joined result of both branches.
#[derive(Debug, Clone)]
pub struct RenderOutput {
    pub markup: String,
    pub stylesheet: String,
    pub script: String,
}

struct ServerResult {
    markup: String,
    stylesheet: String,
    dependencies: Vec<String>,
}

struct ClientResult {
    script: String,
    /// `None` when the shared single-page bundle was used.
    dependencies: Option<Vec<String>>,
}

pub(crate) struct RenderTask {
    pub route_id: String,
    pub file_path: String,
    pub props_json: String,
    pub cache: Arc<dyn BuildCache>,
    pub pool: EnginePool,
    pub bundler: Arc<dyn Bundler>,
    pub settings: Arc<BuildSettings>,
    /// Precompiled single-page client bundle.
    pub spa_script: Option<Arc<str>>,
}

impl RenderTask {
    pub async fn run(self) -> Result<RenderOutput> {
        let task = Arc::new(self);

        if let Err(e) = task
            .cache
            .set_parent_file(&task.route_id, &task.file_path)
            .await
        {
            warn!(route_id = %task.route_id, path = %task.file_path, error = %e, "Failed to register route");
        }

        let (server_tx, server_rx) = oneshot::channel();
        let (client_tx, client_rx) = oneshot::channel();

        let server = Arc::clone(&task);
        tokio::spawn(async move {
            let _ = server_tx.send(server.render_server().await);
        });
        let client = Arc::clone(&task);
        tokio::spawn(async move {
            let _ = client_tx.send(client.render_client().await);
        });

        let server = server_rx
            .await
            .map_err(|_| Error::Task("server branch ended without a result".to_string()))?
            .inspect_err(|e| {
                error!(route_id = %task.route_id, error = %e, "Failed to render for server");
            })?;
        let client = client_rx
            .await
            .map_err(|_| Error::Task("client branch ended without a result".to_string()))?
            .inspect_err(|e| {
                error!(route_id = %task.route_id, error = %e, "Failed to build for client");
            })?;

        let dependencies = client.dependencies.unwrap_or(server.dependencies);
        let cache = Arc::clone(&task.cache);
        let file_path = task.file_path.clone();
        tokio::spawn(async move {
            if let Err(e) = cache.set_dependencies(&file_path, &dependencies).await {
                error!(path = %file_path, error = %e, "Failed to record dependencies");
            }
        });

        Ok(RenderOutput {
            markup: server.markup,
            stylesheet: server.stylesheet,
            script: client.script,
        })
    }

    async fn render_server(&self) -> Result<ServerResult> {
        let artifact = self.artifact(BuildKind::Server).await?;
        let code = inject_props(&self.props_json, &artifact.code);

        let pool = self.pool.clone();
        let markup = tokio::task::spawn_blocking(move || pool.execute(&code))
            .await
            .map_err(|e| Error::Task(e.to_string()))??;

        Ok(ServerResult {
            markup,
            stylesheet: artifact.stylesheet,
            dependencies: artifact.dependencies,
        })
    }

    async fn render_client(&self) -> Result<ClientResult> {
        if let Some(script) = &self.spa_script {
            return Ok(ClientResult {
                script: script.to_string(),
                dependencies: None,
            });
        }

        let artifact = self.artifact(BuildKind::Client).await?;
        Ok(ClientResult {
            script: inject_props(&self.props_json, &artifact.code),
            dependencies: Some(artifact.dependencies),
        })
    }

    /// Cached build of the root file, building and storing it on a miss.
    /// Read failures count as misses; write failures are logged.
    async fn artifact(&self, kind: BuildKind) -> Result<BuildArtifact> {
        match self.cache.get_build(kind, &self.file_path).await {
            Ok(Some(artifact)) => {
                debug!(route_id = %self.route_id, %kind, "Build cache hit");
                return Ok(artifact);
            }
            Ok(None) => debug!(route_id = %self.route_id, %kind, "Build cache miss"),
            Err(e) => {
                warn!(route_id = %self.route_id, %kind, error = %e, "Build cache read failed, rebuilding")
            }
        }

        let contents = self.settings.contents(kind, &self.file_path)?;
        let artifact = self
            .bundler
            .build(self.settings.request(kind, contents))
            .await?;

        if let Err(e) = self
            .cache
            .set_build(kind, &self.file_path, artifact.clone())
            .await
        {
            warn!(route_id = %self.route_id, %kind, error = %e, "Failed to store build");
        }
        Ok(artifact)
    }
}
