//! The engine contract the pool manages.

use crate::error::Result;

/// A stateful, single-threaded script execution context.
///
/// Implementations keep global state between [`run`](ScriptEngine::run)
/// calls until [`reset`](ScriptEngine::reset). After
/// [`dispose`](ScriptEngine::dispose) every call fails with
/// [`EngineError::Disposed`](crate::EngineError::Disposed).
pub trait ScriptEngine: Send {
    /// Evaluate `code` and return the string coercion of its completion value.
    fn run(&mut self, code: &str) -> Result<String>;

    /// Discard all global state, leaving a fresh context.
    fn reset(&mut self) -> Result<()>;

    /// Release the engine's resources. Calling it again does nothing.
    fn dispose(&mut self);
}

/// Creates engines for an [`EnginePool`](crate::EnginePool).
pub trait EngineFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn ScriptEngine>>;

    /// Engine name reported in pool statistics.
    fn name(&self) -> &'static str;
}

impl<F> EngineFactory for F
where
    F: Fn() -> Result<Box<dyn ScriptEngine>> + Send + Sync,
{
    fn create(&self) -> Result<Box<dyn ScriptEngine>> {
        self()
    }

    fn name(&self) -> &'static str {
        "custom"
    }
}
