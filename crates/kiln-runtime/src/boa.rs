//! Boa engines, each hosted on its own OS thread.
//!
//! A `boa_engine::Context` is neither `Send` nor `Sync`, so each engine owns
//! a thread that creates the context and executes commands sequentially.
//! [`BoaEngine`] is the `Send` handle the pool moves between request threads.

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;

use boa_engine::{Context, Source};
use tracing::{debug, warn};

use crate::engine::{EngineFactory, ScriptEngine};
use crate::error::{EngineError, Result};

/// Stack size for engine threads. Rendering deep component trees recurses a lot.
const ENGINE_STACK_SIZE: usize = 8 * 1024 * 1024;

/// Globals a bundled server render expects to exist.
///
/// Installed on every fresh context, including after a reset.
pub const SSR_PRELUDE: &str = r#"
if (typeof globalThis.console === "undefined") {
  const noop = function () {};
  globalThis.console = { log: noop, info: noop, warn: noop, error: noop, debug: noop };
}
globalThis.__ssr_errors = [];
if (typeof globalThis.TextEncoder === "undefined") {
  globalThis.TextEncoder = class TextEncoder {
    get encoding() { return "utf-8"; }
    encode(input) {
      const out = [];
      for (const ch of String(input === undefined ? "" : input)) {
        const c = ch.codePointAt(0);
        if (c < 0x80) {
          out.push(c);
        } else if (c < 0x800) {
          out.push(0xc0 | (c >> 6), 0x80 | (c & 63));
        } else if (c < 0x10000) {
          out.push(0xe0 | (c >> 12), 0x80 | ((c >> 6) & 63), 0x80 | (c & 63));
        } else {
          out.push(0xf0 | (c >> 18), 0x80 | ((c >> 12) & 63), 0x80 | ((c >> 6) & 63), 0x80 | (c & 63));
        }
      }
      return new Uint8Array(out);
    }
  };
}
"#;

enum Command {
    Run {
        code: String,
        reply: Sender<std::result::Result<String, String>>,
    },
    Reset {
        reply: Sender<std::result::Result<(), String>>,
    },
    Shutdown,
}

/// Handle to a Boa context running on a dedicated thread.
pub struct BoaEngine {
    commands: Option<Sender<Command>>,
    thread: Option<JoinHandle<()>>,
}

impl BoaEngine {
    /// Start an engine thread and wait until its context is ready.
    pub fn spawn(name: impl Into<String>, prelude: Arc<str>) -> Result<Self> {
        let (commands, rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();

        let thread = std::thread::Builder::new()
            .name(name.into())
            .stack_size(ENGINE_STACK_SIZE)
            .spawn(move || engine_thread(rx, ready_tx, prelude))
            .map_err(|e| EngineError::Startup(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                commands: Some(commands),
                thread: Some(thread),
            }),
            Ok(Err(message)) => {
                let _ = thread.join();
                Err(EngineError::Startup(message))
            }
            Err(_) => {
                let _ = thread.join();
                Err(EngineError::Startup("engine thread exited during startup".to_string()))
            }
        }
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .as_ref()
            .ok_or(EngineError::Disposed)?
            .send(command)
            .map_err(|_| EngineError::Disposed)
    }
}

impl ScriptEngine for BoaEngine {
    fn run(&mut self, code: &str) -> Result<String> {
        let (reply, response) = mpsc::channel();
        self.send(Command::Run {
            code: code.to_string(),
            reply,
        })?;
        response
            .recv()
            .map_err(|_| EngineError::Disposed)?
            .map_err(EngineError::Execution)
    }

    fn reset(&mut self) -> Result<()> {
        let (reply, response) = mpsc::channel();
        self.send(Command::Reset { reply })?;
        response
            .recv()
            .map_err(|_| EngineError::Disposed)?
            .map_err(EngineError::Startup)
    }

    fn dispose(&mut self) {
        if let Some(commands) = self.commands.take() {
            let _ = commands.send(Command::Shutdown);
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("script engine thread panicked");
            }
        }
    }
}

impl Drop for BoaEngine {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn fresh_context(prelude: &str) -> std::result::Result<Context, String> {
    let mut context = Context::default();
    if !prelude.is_empty() {
        context
            .eval(Source::from_bytes(prelude))
            .map_err(|e| format!("prelude failed: {}", e))?;
    }
    Ok(context)
}

fn evaluate(context: &mut Context, code: &str) -> std::result::Result<String, String> {
    let value = context
        .eval(Source::from_bytes(code))
        .map_err(|e| e.to_string())?;
    let text = value.to_string(context).map_err(|e| e.to_string())?;
    Ok(text.to_std_string_escaped())
}

fn engine_thread(
    commands: Receiver<Command>,
    ready: Sender<std::result::Result<(), String>>,
    prelude: Arc<str>,
) {
    let mut context = match fresh_context(&prelude) {
        Ok(context) => context,
        Err(message) => {
            let _ = ready.send(Err(message));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    for command in commands {
        match command {
            Command::Run { code, reply } => {
                let _ = reply.send(evaluate(&mut context, &code));
            }
            Command::Reset { reply } => {
                let result = fresh_context(&prelude).map(|fresh| context = fresh);
                let _ = reply.send(result);
            }
            Command::Shutdown => break,
        }
    }
    debug!("script engine thread stopped");
}

/// Creates [`BoaEngine`]s with a shared prelude.
#[derive(Debug, Clone)]
pub struct BoaEngineFactory {
    prelude: Arc<str>,
}

impl Default for BoaEngineFactory {
    fn default() -> Self {
        Self {
            prelude: Arc::from(SSR_PRELUDE),
        }
    }
}

impl BoaEngineFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the prelude run on every fresh context. Empty means none.
    pub fn with_prelude(mut self, prelude: impl Into<String>) -> Self {
        self.prelude = Arc::from(prelude.into());
        self
    }
}

impl EngineFactory for BoaEngineFactory {
    fn create(&self) -> Result<Box<dyn ScriptEngine>> {
        Ok(Box::new(BoaEngine::spawn(
            "kiln-script-engine",
            self.prelude.clone(),
        )?))
    }

    fn name(&self) -> &'static str {
        "boa"
    }
}
