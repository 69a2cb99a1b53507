//! Turning file changes into cache invalidation and reload notifications.

use std::path::Path;

use kiln_cache::BuildKind;
use tracing::{error, info, warn};

use crate::app::Kiln;
use crate::config::slash_path;
use crate::error::Result;

/// Extensions whose edits can change the set of Tailwind classes in use.
const TAILWIND_SOURCE_EXTENSIONS: &[&str] = &[".tsx", ".ts", ".jsx", ".js"];

/// Routes to reload after a change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadEvent {
    /// The changed file, absolute with forward slashes.
    pub changed: String,
    pub route_ids: Vec<String>,
}

/// Applies file changes to a [`Kiln`]'s cache.
#[derive(Clone)]
pub struct Invalidator {
    kiln: Kiln,
}

impl Invalidator {
    pub fn new(kiln: Kiln) -> Self {
        Self { kiln }
    }

    /// Invalidate everything affected by a change to `path` and return the
    /// route ids to reload.
    ///
    /// - layout component: every route
    /// - layout stylesheet: rebuild it, then every route
    /// - with Tailwind, a script source: rebuild the stylesheet, then the
    ///   routes depending on the file
    /// - anything else: the routes depending on the file, or rendered from it
    ///
    /// Server and client builds are removed for every root depending on the
    /// file and for the file itself. A [`ReloadEvent`] is published when any
    /// route is affected.
    pub async fn handle_change(&self, path: &Path) -> Result<Vec<String>> {
        let path = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let file = slash_path(&path);
        let config = self.kiln.config();
        let cache = self.kiln.cache();

        let is_configured = |configured: &Option<std::path::PathBuf>| {
            configured
                .as_deref()
                .is_some_and(|configured| slash_path(configured) == file)
        };

        let mut css_rebuilt = false;
        let mut route_ids = if is_configured(&config.layout_file) {
            cache.all_route_ids().await?
        } else if is_configured(&config.layout_css_file) {
            self.kiln.build_layout_css().await?;
            css_rebuilt = true;
            cache.all_route_ids().await?
        } else {
            if config.tailwind_config.is_some() && is_tailwind_source(&file) {
                self.kiln.build_layout_css().await?;
                css_rebuilt = true;
            }
            cache.route_ids_with_file(&file).await?
        };

        let mut stale = match cache.parent_files(&file).await {
            Ok(parents) => parents,
            Err(e) => {
                error!(path = %file, error = %e, "Failed to look up dependent files");
                Vec::new()
            }
        };
        if css_rebuilt {
            if let Some(output) = self.kiln.layout_css_output() {
                match cache.parent_files(&slash_path(&output)).await {
                    Ok(parents) => stale.extend(parents),
                    Err(e) => error!(error = %e, "Failed to look up stylesheet dependents"),
                }
            }
        }
        stale.push(file.clone());
        stale.sort();
        stale.dedup();

        for root in &stale {
            for kind in BuildKind::ALL {
                if let Err(e) = cache.remove_build(kind, root).await {
                    error!(path = %root, %kind, error = %e, "Failed to remove build");
                }
            }
        }

        if self.spa_depends_on(&file) || css_rebuilt {
            if let Err(e) = self.kiln.rebuild_spa().await {
                warn!(error = %e, "Failed to rebuild single-page bundle");
            }
        }

        route_ids.sort();
        route_ids.dedup();
        if !route_ids.is_empty() {
            info!(path = %file, routes = route_ids.len(), "File changed, reloading");
            self.kiln.publish_reload(ReloadEvent {
                changed: file,
                route_ids: route_ids.clone(),
            });
        }
        Ok(route_ids)
    }

    fn spa_depends_on(&self, file: &str) -> bool {
        self.kiln
            .spa_bundle()
            .is_some_and(|spa| spa.dependencies.iter().any(|dep| dep == file))
    }
}

fn is_tailwind_source(file: &str) -> bool {
    TAILWIND_SOURCE_EXTENSIONS
        .iter()
        .any(|ext| file.ends_with(ext))
}
