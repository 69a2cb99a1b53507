//! The [`Kiln`] renderer: owns the build cache, the engine pool and the
//! bundler, and renders routes against them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use kiln_cache::{BuildCache, BuildKind, new_cache};
use kiln_runtime::{BoaEngineFactory, EnginePool, PoolConfig};
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::bundler::{BuildRequest, Bundler, EsbuildBundler, compile_tailwind};
use crate::config::{KilnConfig, slash_path};
use crate::contents;
use crate::error::{BuildError, ConfigError, Result};
use crate::invalidate::{Invalidator, ReloadEvent};
use crate::page::{self, PageParams};
use crate::render::{BuildSettings, RenderTask};
use crate::route::{RenderConfig, RenderedRoute, props_to_json, route_id};
use crate::watch::{FileWatcher, WatchHandle};

const RELOAD_CHANNEL_CAPACITY: usize = 64;

/// Name of the compiled layout stylesheet inside the build directory.
pub const LAYOUT_CSS_OUTPUT: &str = "layout.css";

/// Client bundle shared by every route of a single-page app.
#[derive(Debug, Clone)]
pub struct SpaBundle {
    pub script: Arc<str>,
    pub dependencies: Vec<String>,
}

struct Shared {
    config: KilnConfig,
    cache: Arc<dyn BuildCache>,
    pool: EnginePool,
    bundler: Arc<dyn Bundler>,
    settings: Arc<BuildSettings>,
    spa: RwLock<Option<SpaBundle>>,
    reloads: broadcast::Sender<ReloadEvent>,
}

/// Server-side renderer for React routes.
///
/// Cheap to clone; clones share the cache, pool and bundler.
///
/// ```no_run
/// use kiln::{Kiln, KilnConfig, RenderConfig};
///
/// # async fn run() -> kiln::Result<()> {
/// let kiln = Kiln::new(KilnConfig::load(None)?).await?;
/// let html = kiln
///     .render_page(RenderConfig::new("pages/Home.tsx").with_title("Home"))
///     .await;
/// # let _ = html;
/// kiln.shutdown().await;
/// # Ok(()) }
/// ```
#[derive(Clone)]
pub struct Kiln {
    shared: Arc<Shared>,
}

impl Kiln {
    /// Validate `config`, connect the configured cache, warm a Boa engine
    /// pool and use the esbuild CLI for builds.
    pub async fn new(mut config: KilnConfig) -> Result<Self> {
        config.validate()?;

        let cache = new_cache(&config.cache).await?;
        let pool = EnginePool::new(
            BoaEngineFactory::new(),
            PoolConfig::with_capacity(config.pool_size),
        )?;
        let bundler = Arc::new(EsbuildBundler::new(
            config.bundler_bin.clone(),
            config.build_dir(),
        ));

        Self::assemble(config, cache, pool, bundler).await
    }

    /// Build a renderer from explicit parts.
    pub async fn with_parts(
        mut config: KilnConfig,
        cache: Arc<dyn BuildCache>,
        pool: EnginePool,
        bundler: Arc<dyn Bundler>,
    ) -> Result<Self> {
        config.validate()?;
        Self::assemble(config, cache, pool, bundler).await
    }

    async fn assemble(
        config: KilnConfig,
        cache: Arc<dyn BuildCache>,
        pool: EnginePool,
        bundler: Arc<dyn Bundler>,
    ) -> Result<Self> {
        let layout_css = match &config.layout_css_file {
            Some(_) => Some(build_layout_css(&config, bundler.as_ref()).await?),
            None => None,
        };

        let layout = config.layout_file.as_deref().map(slash_path);
        let imports = contents::entry_imports(
            layout_css.as_deref().map(slash_path).as_deref(),
            layout.as_deref(),
        );
        let settings = Arc::new(BuildSettings {
            imports,
            use_layout: layout.is_some(),
            frontend_dir: config.frontend_dir.clone(),
            asset_route: config.asset_route.clone(),
            production: config.is_production(),
            spa_app: config
                .client_app_path
                .as_deref()
                .map(slash_path)
                .zip(config.spa_mode()),
        });

        let spa = build_spa(&settings, bundler.as_ref()).await?;
        let (reloads, _) = broadcast::channel(RELOAD_CHANNEL_CAPACITY);

        let stats = pool.stats();
        info!(
            cache = cache.backend_name(),
            engine = stats.engine,
            pool_size = stats.capacity,
            bundler = bundler.name(),
            spa = spa.is_some(),
            "kiln ready"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                cache,
                pool,
                bundler,
                settings,
                spa: RwLock::new(spa),
                reloads,
            }),
        })
    }

    pub fn config(&self) -> &KilnConfig {
        &self.shared.config
    }

    pub fn cache(&self) -> &Arc<dyn BuildCache> {
        &self.shared.cache
    }

    pub fn pool(&self) -> &EnginePool {
        &self.shared.pool
    }

    /// The precompiled single-page client bundle, if any.
    pub fn spa_bundle(&self) -> Option<SpaBundle> {
        self.shared.spa.read().clone()
    }

    /// Absolute forward-slash path of a route file. Relative paths resolve
    /// against `frontend_dir`.
    pub fn resolve_file(&self, file: &Path) -> String {
        let path = self.shared.config.frontend_dir.join(file);
        let path = std::fs::canonicalize(&path).unwrap_or(path);
        slash_path(&path)
    }

    /// Render one route to markup, stylesheet and client script.
    pub async fn render_route(&self, request: RenderConfig) -> Result<RenderedRoute> {
        let file_path = self.resolve_file(&request.file);
        let route_id = route_id(&file_path);
        let props_json = props_to_json(request.props.as_ref(), request.request_path.as_deref())?;

        let task = RenderTask {
            route_id: route_id.clone(),
            file_path,
            props_json: props_json.clone(),
            cache: Arc::clone(&self.shared.cache),
            pool: self.shared.pool.clone(),
            bundler: Arc::clone(&self.shared.bundler),
            settings: Arc::clone(&self.shared.settings),
            spa_script: self
                .shared
                .spa
                .read()
                .as_ref()
                .map(|spa| Arc::clone(&spa.script)),
        };
        let output = task.run().await?;

        Ok(RenderedRoute {
            route_id,
            markup: output.markup,
            stylesheet: output.stylesheet,
            script: output.script,
            props_json,
        })
    }

    /// Render one route to a complete HTML document. Failures produce an
    /// error page for the route instead.
    pub async fn render_page(&self, request: RenderConfig) -> String {
        let reload_port = self.reload_port();
        let route_id = route_id(&self.resolve_file(&request.file));
        let title = request.title.clone();
        let meta_tags = request.meta_tags.clone();

        let route = match self.render_route(request).await {
            Ok(route) => route,
            Err(e) => return page::render_error(&e.to_string(), &route_id, reload_port),
        };

        let script_src = match &self.shared.config.static_js_dir {
            Some(_) => match self.write_static_js(&route.script, &route.route_id).await {
                Ok(url) => Some(url),
                Err(e) => {
                    error!(route_id = %route.route_id, error = %e, "Failed to write static script, inlining");
                    None
                }
            },
            None => None,
        };

        let params = PageParams {
            title: &title,
            meta_tags: Some(&meta_tags),
            route_id: &route.route_id,
            markup: &route.markup,
            stylesheet: &route.stylesheet,
            script: &route.script,
            script_src: script_src.as_deref(),
            props_json: &route.props_json,
            reload_port,
        };
        page::render_document(&params)
            .unwrap_or_else(|e| page::render_error(&e.to_string(), &route.route_id, reload_port))
    }

    fn reload_port(&self) -> Option<u16> {
        self.shared
            .config
            .watch_enabled()
            .then_some(self.shared.config.hot_reload_port)
    }

    /// Write a client script into `static_js_dir` under a content-hashed name
    /// and return its URL. Existing files are left untouched.
    pub async fn write_static_js(&self, js: &str, route_id: &str) -> Result<String> {
        let config = &self.shared.config;
        let dir = config
            .static_js_dir
            .as_ref()
            .ok_or_else(|| ConfigError::MissingField {
                field: "static_js_dir",
                hint: "Set static_js_dir to serve scripts as files".to_string(),
            })?;

        let mut hasher = Sha256::new();
        hasher.update(js.as_bytes());
        let hash = format!("{:x}", hasher.finalize());
        let route_prefix = route_id.get(..8).unwrap_or(route_id);
        let filename = format!("app-{}.{}.js", route_prefix, &hash[..16]);

        let path = dir.join(&filename);
        if !tokio::fs::try_exists(&path).await? {
            tokio::fs::write(&path, js).await?;
            info!(path = %path.display(), size = js.len(), "Wrote static script");
        }

        Ok(format!(
            "{}/{}",
            config.asset_route.trim_end_matches('/'),
            filename
        ))
    }

    /// Recompile the layout stylesheet into the build directory.
    pub async fn build_layout_css(&self) -> Result<PathBuf> {
        build_layout_css(&self.shared.config, self.shared.bundler.as_ref()).await
    }

    /// Path of the compiled layout stylesheet, when one is configured.
    pub fn layout_css_output(&self) -> Option<PathBuf> {
        self.shared
            .config
            .layout_css_file
            .as_ref()
            .map(|_| self.shared.config.build_dir().join(LAYOUT_CSS_OUTPUT))
    }

    /// Rebuild the single-page client bundle. No-op without `client_app_path`.
    pub async fn rebuild_spa(&self) -> Result<()> {
        let spa = build_spa(&self.shared.settings, self.shared.bundler.as_ref()).await?;
        *self.shared.spa.write() = spa;
        Ok(())
    }

    pub fn invalidator(&self) -> Invalidator {
        Invalidator::new(self.clone())
    }

    pub(crate) fn publish_reload(&self, event: ReloadEvent) {
        // No receivers is fine: nobody is connected yet.
        let _ = self.shared.reloads.send(event);
    }

    /// Reload notifications published after invalidation.
    pub fn subscribe_reloads(&self) -> broadcast::Receiver<ReloadEvent> {
        self.shared.reloads.subscribe()
    }

    /// Watch `frontend_dir` and invalidate on changes until the handle drops.
    pub fn watch(&self) -> Result<WatchHandle> {
        let config = &self.shared.config;
        let mut ignore = config.watch.ignore.clone();
        if let Ok(relative) = config.build_dir().strip_prefix(&config.frontend_dir) {
            ignore.push(slash_path(relative));
        }

        let (watcher, changes) =
            FileWatcher::new(config.frontend_dir.clone(), ignore, config.watch.debounce_ms)?;
        info!(root = %watcher.root().display(), "Watching for changes");
        Ok(WatchHandle::spawn(watcher, changes, self.invalidator()))
    }

    /// Close the engine pool, then clear the build cache. Errors are logged.
    pub async fn shutdown(&self) {
        info!("Shutting down kiln");
        self.shared.pool.close();
        debug!("Engine pool closed");

        match self.shared.cache.clear().await {
            Ok(()) => debug!("Build cache cleared"),
            Err(e) => error!(error = %e, "Failed to clear build cache"),
        }
        info!("kiln shutdown complete");
    }
}

async fn build_layout_css(config: &KilnConfig, bundler: &dyn Bundler) -> Result<PathBuf> {
    let source = config
        .layout_css_file
        .as_ref()
        .ok_or_else(|| ConfigError::MissingField {
            field: "layout_css_file",
            hint: "A layout stylesheet is required to build one".to_string(),
        })?;
    let output = config.build_dir().join(LAYOUT_CSS_OUTPUT);

    if let Some(tailwind) = &config.tailwind_config {
        compile_tailwind(
            &config.tailwind_bin,
            tailwind,
            source,
            &output,
            &config.frontend_dir,
            config.is_production(),
        )
        .await?;
    } else {
        let request = BuildRequest {
            contents: format!(r#"import "{}";"#, slash_path(source)),
            base_dir: config.frontend_dir.clone(),
            asset_route: config.asset_route.clone(),
            kind: BuildKind::Client,
            production: config.is_production(),
        };
        let artifact = bundler.build(request).await?;
        tokio::fs::write(&output, artifact.stylesheet)
            .await
            .map_err(BuildError::from)?;
    }

    debug!(path = %output.display(), "Built layout stylesheet");
    Ok(output)
}

async fn build_spa(settings: &BuildSettings, bundler: &dyn Bundler) -> Result<Option<SpaBundle>> {
    let Some((app, mode)) = &settings.spa_app else {
        return Ok(None);
    };

    let contents = contents::client_spa_contents(&settings.imports, app, *mode)
        .map_err(BuildError::from)?;
    let artifact = bundler
        .build(settings.request(BuildKind::Client, contents))
        .await?;

    info!(app = %app, mode = ?mode, bytes = artifact.code.len(), "Built single-page client bundle");
    Ok(Some(SpaBundle {
        script: Arc::from(artifact.code),
        dependencies: artifact.dependencies,
    }))
}
