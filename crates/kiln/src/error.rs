//! Error handling for kiln.
//!
//! [`Error`] is the type every public operation returns. It wraps the
//! domain errors of this crate ([`ConfigError`], [`BuildError`]) and of the
//! foundation crates ([`CacheError`], [`EngineError`]) through `#[from]`
//! conversions, and implements [`miette::Diagnostic`] with a stable code and
//! a hint for each category.

use std::path::PathBuf;

use kiln_cache::CacheError;
use kiln_runtime::EngineError;
use thiserror::Error;

/// Top-level kiln error.
#[derive(Debug, Error)]
pub enum Error {
    /// Startup configuration is unusable
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The bundler could not produce a build
    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    /// Server render execution failed
    #[error("Render error: {0}")]
    Engine(#[from] EngineError),

    /// The build cache failed
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Props could not be serialized
    #[error("Invalid props: {0}")]
    Props(#[from] serde_json::Error),

    /// Template rendering failed
    #[error("Template error: {0}")]
    Template(#[from] minijinja::Error),

    /// File watching errors
    #[error("File watcher error: {0}")]
    Watch(#[from] notify::Error),

    /// I/O errors from file system operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A render branch ended without reporting a result
    #[error("Render task failed: {0}")]
    Task(String),
}

/// Configuration errors. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configured path does not exist
    #[error("{field} at {} does not exist\n\nHint: Paths other than frontend_dir are relative to frontend_dir", .path.display())]
    NotFound {
        /// Name of the config field
        field: &'static str,
        /// The resolved path that was checked
        path: PathBuf,
    },

    /// A field is required by another field
    #[error("Missing required field: {field}\n\nHint: {hint}")]
    MissingField {
        /// Name of the missing field
        field: &'static str,
        /// Helpful hint for providing the field
        hint: String,
    },

    /// Invalid value for a configuration option
    #[error("Invalid value for '{field}': {value}\n\nHint: {hint}")]
    InvalidValue {
        /// Name of the field with invalid value
        field: String,
        /// The invalid value
        value: String,
        /// Helpful hint for correct values
        hint: String,
    },

    /// I/O error while preparing configured directories
    #[error("Failed to prepare {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Bundling errors.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The bundler executable could not be started
    #[error("Bundler '{program}' could not be started: {source}\n\nHint: Install esbuild or set bundler_bin")]
    BundlerNotFound {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The bundler ran and reported errors
    #[error("{tool} failed:\n{message}")]
    Failed {
        tool: &'static str,
        message: String,
    },

    /// The tool did not finish in time
    #[error("{tool} timed out after {secs}s")]
    Timeout { tool: &'static str, secs: u64 },

    /// The bundler exited cleanly but an expected output file is missing
    #[error("Bundler produced no output at {}", .0.display())]
    MissingOutput(PathBuf),

    /// The build metafile could not be parsed
    #[error("Invalid bundler metafile: {0}")]
    Metafile(#[from] serde_json::Error),

    /// Entry contents could not be generated
    #[error("Failed to generate entry contents: {0}")]
    Contents(#[from] minijinja::Error),

    /// I/O error around the bundler run
    #[error("I/O error during build: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for kiln operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl miette::Diagnostic for Error {
    fn code(&self) -> Option<Box<dyn std::fmt::Display + '_>> {
        Some(Box::new(match self {
            Error::Config(_) => "CONFIG_ERROR",
            Error::Build(_) => "BUILD_ERROR",
            Error::Engine(_) => "RENDER_ERROR",
            Error::Cache(_) => "CACHE_ERROR",
            Error::Props(_) => "INVALID_PROPS",
            Error::Template(_) => "TEMPLATE_ERROR",
            Error::Watch(_) => "WATCH_ERROR",
            Error::Io(_) => "IO_ERROR",
            Error::Task(_) => "TASK_ERROR",
        }))
    }

    fn severity(&self) -> Option<miette::Severity> {
        Some(miette::Severity::Error)
    }

    fn help(&self) -> Option<Box<dyn std::fmt::Display + '_>> {
        match self {
            Error::Engine(EngineError::Execution(_)) => Some(Box::new(
                "The server bundle threw while rendering. Check the component for browser-only APIs used during render.",
            )),
            Error::Engine(EngineError::PoolClosed) => {
                Some(Box::new("The renderer has been shut down."))
            }
            Error::Cache(CacheError::Unavailable(_)) => Some(Box::new(
                "The cache server could not be reached. Check cache.url and that the server is running.",
            )),
            Error::Props(_) => Some(Box::new(
                "Props must serialize to JSON. Map keys must be strings.",
            )),
            Error::Build(BuildError::BundlerNotFound { .. }) => Some(Box::new(
                "Install esbuild (npm i -D esbuild) or point bundler_bin at the binary.",
            )),
            _ => None,
        }
    }
}
