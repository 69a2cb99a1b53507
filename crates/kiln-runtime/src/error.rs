/// Error types for engines and the pool.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// The factory could not bring up a new engine.
    #[error("failed to start script engine: {0}")]
    Startup(String),

    /// The script threw or could not be parsed.
    #[error("script execution failed: {0}")]
    Execution(String),

    /// The engine was disposed, or its host thread is gone.
    #[error("script engine has been disposed")]
    Disposed,

    /// The pool was closed before the engine was requested.
    #[error("engine pool is closed")]
    PoolClosed,
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
