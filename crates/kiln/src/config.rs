//! Renderer configuration.
//!
//! Loaded from defaults, then `kiln.toml` or `kiln.json`, then `KILN_*`
//! environment variables (nested fields use a double underscore, e.g.
//! `KILN_CACHE__BACKEND=redis`). [`KilnConfig::validate`] must succeed before
//! the config is used; it checks paths, fills in derived defaults and makes
//! every path absolute.

use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format as _, Json, Serialized, Toml},
};
use kiln_cache::CacheConfig;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Deployment environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppEnv {
    #[default]
    Development,
    Production,
}

/// How the client bundle of a single-page app takes over server markup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpaMode {
    /// Hydrate inside a router so server and client trees match.
    #[default]
    Router,
    /// Discard server markup and mount from scratch.
    Replace,
}

/// File watching for development.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Defaults to on in development, off in production.
    #[serde(default)]
    pub enabled: Option<bool>,

    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    #[serde(default = "default_ignore")]
    pub ignore: Vec<String>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: None,
            debounce_ms: default_debounce_ms(),
            ignore: default_ignore(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KilnConfig {
    #[serde(default)]
    pub app_env: AppEnv,

    /// Directory holding the React sources.
    #[serde(default = "default_frontend_dir")]
    pub frontend_dir: PathBuf,

    /// URL prefix assets are served from.
    #[serde(default = "default_asset_route")]
    pub asset_route: String,

    /// Layout component wrapping every route, relative to `frontend_dir`.
    #[serde(default)]
    pub layout_file: Option<PathBuf>,

    /// Global stylesheet imported by every route, relative to `frontend_dir`.
    #[serde(default)]
    pub layout_css_file: Option<PathBuf>,

    /// Tailwind config. Requires `layout_css_file`.
    #[serde(default)]
    pub tailwind_config: Option<PathBuf>,

    /// Single-page app entry, relative to `frontend_dir`. When set, one
    /// client bundle is built at startup and shared by every route.
    #[serde(default)]
    pub client_app_path: Option<PathBuf>,

    /// Only meaningful with `client_app_path`. Defaults to `router`.
    #[serde(default)]
    pub spa_hydration_mode: Option<SpaMode>,

    /// Idle script engines kept warm.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Write client scripts here and reference them by URL instead of inlining.
    #[serde(default)]
    pub static_js_dir: Option<PathBuf>,

    /// Scratch space for bundler output and the built layout stylesheet.
    /// Defaults to `.kiln` inside `frontend_dir`.
    #[serde(default)]
    pub build_dir: Option<PathBuf>,

    #[serde(default = "default_bundler_bin")]
    pub bundler_bin: String,

    #[serde(default = "default_tailwind_bin")]
    pub tailwind_bin: String,

    /// Port of the reload notification server pages connect to in development.
    #[serde(default = "default_hot_reload_port")]
    pub hot_reload_port: u16,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub watch: WatchConfig,
}

impl Default for KilnConfig {
    fn default() -> Self {
        Self {
            app_env: AppEnv::default(),
            frontend_dir: default_frontend_dir(),
            asset_route: default_asset_route(),
            layout_file: None,
            layout_css_file: None,
            tailwind_config: None,
            client_app_path: None,
            spa_hydration_mode: None,
            pool_size: default_pool_size(),
            static_js_dir: None,
            build_dir: None,
            bundler_bin: default_bundler_bin(),
            tailwind_bin: default_tailwind_bin(),
            hot_reload_port: default_hot_reload_port(),
            cache: CacheConfig::default(),
            watch: WatchConfig::default(),
        }
    }
}

impl KilnConfig {
    /// A development config rooted at `frontend_dir`.
    pub fn new(frontend_dir: impl Into<PathBuf>) -> Self {
        Self {
            frontend_dir: frontend_dir.into(),
            ..Self::default()
        }
    }

    /// Load configuration from multiple sources.
    /// Priority: environment variables > config file > defaults
    ///
    /// Without an explicit path, `kiln.toml` then `kiln.json` in the working
    /// directory are used when present.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));

        let config_file = config_path.map(Path::to_path_buf).or_else(|| {
            ["kiln.toml", "kiln.json"]
                .iter()
                .map(PathBuf::from)
                .find(|p| p.exists())
        });

        if let Some(path) = config_file {
            if path.extension().is_some_and(|ext| ext == "json") {
                figment = figment.merge(Json::file(path));
            } else {
                figment = figment.merge(Toml::file(path));
            }
        }

        figment = figment.merge(Env::prefixed("KILN_").split("__"));

        figment.extract().map_err(|e| ConfigError::InvalidValue {
            field: "configuration".to_string(),
            value: e.to_string(),
            hint: "Check kiln.toml syntax and field types".to_string(),
        })
    }

    /// Check paths, apply derived defaults and make every path absolute.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if !self.frontend_dir.exists() {
            return Err(ConfigError::NotFound {
                field: "frontend_dir",
                path: self.frontend_dir.clone(),
            });
        }
        self.frontend_dir = absolute(&self.frontend_dir);

        self.layout_file = self.resolve_existing("layout_file", self.layout_file.as_deref())?;
        self.layout_css_file =
            self.resolve_existing("layout_css_file", self.layout_css_file.as_deref())?;
        self.client_app_path =
            self.resolve_existing("client_app_path", self.client_app_path.as_deref())?;

        if let Some(tailwind) = &self.tailwind_config {
            if self.layout_css_file.is_none() {
                return Err(ConfigError::MissingField {
                    field: "layout_css_file",
                    hint: "Tailwind needs a layout stylesheet to compile into".to_string(),
                });
            }
            self.tailwind_config = Some(absolute(tailwind));
        }

        if self.pool_size == 0 {
            self.pool_size = default_pool_size();
        }
        if self.client_app_path.is_some() && self.spa_hydration_mode.is_none() {
            self.spa_hydration_mode = Some(SpaMode::Router);
        }
        if self.cache.prefix.is_empty() {
            self.cache.prefix = CacheConfig::default().prefix;
        }

        if let Some(dir) = &self.static_js_dir {
            let dir = absolute(dir);
            create_dir(&dir)?;
            self.static_js_dir = Some(dir);
        }

        let build_dir = match &self.build_dir {
            Some(dir) => absolute(dir),
            None => self.frontend_dir.join(".kiln"),
        };
        create_dir(&build_dir)?;
        self.build_dir = Some(build_dir);

        Ok(())
    }

    fn resolve_existing(
        &self,
        field: &'static str,
        relative: Option<&Path>,
    ) -> Result<Option<PathBuf>, ConfigError> {
        let Some(relative) = relative else {
            return Ok(None);
        };
        let path = self.frontend_dir.join(relative);
        if !path.exists() {
            return Err(ConfigError::NotFound { field, path });
        }
        Ok(Some(absolute(&path)))
    }

    pub fn is_production(&self) -> bool {
        self.app_env == AppEnv::Production
    }

    pub fn watch_enabled(&self) -> bool {
        self.watch.enabled.unwrap_or(!self.is_production())
    }

    /// Scratch directory, falling back to `.kiln` under the frontend dir
    /// before validation has filled it in.
    pub fn build_dir(&self) -> PathBuf {
        self.build_dir
            .clone()
            .unwrap_or_else(|| self.frontend_dir.join(".kiln"))
    }

    /// SPA mode in effect, if a client app is configured.
    pub fn spa_mode(&self) -> Option<SpaMode> {
        self.client_app_path
            .as_ref()
            .map(|_| self.spa_hydration_mode.unwrap_or_default())
    }
}

/// Absolute form of `path`, resolving symlinks when the path exists.
fn absolute(path: &Path) -> PathBuf {
    std::fs::canonicalize(path)
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

fn create_dir(path: &Path) -> Result<(), ConfigError> {
    std::fs::create_dir_all(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Path as a forward-slash string, the form used for cache keys and imports.
pub fn slash_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn default_frontend_dir() -> PathBuf {
    PathBuf::from("frontend")
}

fn default_asset_route() -> String {
    "/assets".to_string()
}

fn default_pool_size() -> usize {
    10
}

fn default_bundler_bin() -> String {
    "esbuild".to_string()
}

fn default_tailwind_bin() -> String {
    "tailwindcss".to_string()
}

fn default_hot_reload_port() -> u16 {
    3001
}

fn default_debounce_ms() -> u64 {
    100
}

fn default_ignore() -> Vec<String> {
    vec!["node_modules".to_string(), "dist".to_string()]
}
