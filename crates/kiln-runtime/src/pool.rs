//! Elastic pool of script engines.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;
use rustc_hash::FxHashMap as HashMap;
use tracing::{debug, info, warn};

use crate::engine::{EngineFactory, ScriptEngine};
use crate::error::{EngineError, Result};

type SharedEngine = Arc<Mutex<Box<dyn ScriptEngine>>>;

/// Pool sizing.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Idle engines kept for reuse. Engines created above this under burst
    /// load are disposed when returned.
    pub capacity: usize,
    /// Create `capacity` engines up front.
    pub warm: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            warm: true,
        }
    }
}

impl PoolConfig {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }
}

/// Pool statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub engine: &'static str,
    /// Engines created over the pool's lifetime.
    pub total_created: usize,
    /// Engines created and not yet disposed, idle or checked out.
    pub live: usize,
    pub idle: usize,
    pub capacity: usize,
    pub closed: bool,
}

struct Slot {
    id: u64,
    engine: SharedEngine,
}

struct PoolInner {
    factory: Arc<dyn EngineFactory>,
    capacity: usize,
    idle: Mutex<VecDeque<Slot>>,
    /// Every live engine, so close can reach checked-out ones too
    tracked: Mutex<HashMap<u64, SharedEngine>>,
    next_id: AtomicU64,
    created: AtomicUsize,
    closed: AtomicBool,
}

impl PoolInner {
    fn create(&self) -> Result<Slot> {
        let engine: SharedEngine = Arc::new(Mutex::new(self.factory.create()?));
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.tracked.lock().insert(id, engine.clone());
        let created = self.created.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(engine = self.factory.name(), id, created, "created script engine");
        Ok(Slot { id, engine })
    }

    fn dispose(&self, slot: Slot) {
        slot.engine.lock().dispose();
        self.tracked.lock().remove(&slot.id);
    }

    /// Return an engine after use.
    fn put_back(&self, slot: Slot) {
        if self.closed.load(Ordering::SeqCst) {
            self.dispose(slot);
            return;
        }

        let reset = slot.engine.lock().reset();
        if let Err(e) = reset {
            warn!(id = slot.id, error = %e, "script engine reset failed, disposing");
            self.dispose(slot);
            return;
        }

        let mut idle = self.idle.lock();
        // Checked under the idle lock so a concurrent close drains whatever lands here.
        if self.closed.load(Ordering::SeqCst) || idle.len() >= self.capacity {
            drop(idle);
            self.dispose(slot);
        } else {
            idle.push_back(slot);
        }
    }
}

/// A bounded, elastic set of reusable [`ScriptEngine`]s.
///
/// [`acquire`](EnginePool::acquire) never waits: it hands out an idle engine
/// or creates a new one. Returned engines are reset and kept while the idle
/// queue has room, otherwise disposed, so the pool settles back to its
/// capacity after a burst. Cloning shares the pool.
#[derive(Clone)]
pub struct EnginePool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for EnginePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnginePool")
            .field("stats", &self.stats())
            .finish()
    }
}

impl EnginePool {
    /// Create a pool, warming it to capacity when configured.
    pub fn new(factory: impl EngineFactory + 'static, config: PoolConfig) -> Result<Self> {
        Self::with_factory(Arc::new(factory), config)
    }

    pub fn with_factory(factory: Arc<dyn EngineFactory>, config: PoolConfig) -> Result<Self> {
        let capacity = if config.capacity == 0 {
            PoolConfig::default().capacity
        } else {
            config.capacity
        };

        let pool = Self {
            inner: Arc::new(PoolInner {
                factory,
                capacity,
                idle: Mutex::new(VecDeque::with_capacity(capacity)),
                tracked: Mutex::new(HashMap::default()),
                next_id: AtomicU64::new(0),
                created: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }),
        };

        if config.warm {
            for _ in 0..capacity {
                let slot = pool.inner.create()?;
                pool.inner.idle.lock().push_back(slot);
            }
        }

        info!(
            engine = pool.inner.factory.name(),
            capacity,
            warm = config.warm,
            "initialized script engine pool"
        );
        Ok(pool)
    }

    /// Check out an engine, creating one if none is idle.
    pub fn acquire(&self) -> Result<PooledEngine> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(EngineError::PoolClosed);
        }

        let idle = self.inner.idle.lock().pop_front();
        let slot = match idle {
            Some(slot) => slot,
            None => {
                debug!("no idle script engine, growing pool");
                self.inner.create()?
            }
        };

        Ok(PooledEngine {
            slot: Some(slot),
            pool: self.inner.clone(),
        })
    }

    /// Return an engine. Dropping the handle does the same.
    pub fn release(&self, engine: PooledEngine) {
        drop(engine);
    }

    /// Run `code` on a pooled engine. The engine goes back to the pool even
    /// when the script fails.
    pub fn execute(&self, code: &str) -> Result<String> {
        let engine = self.acquire()?;
        engine.run(code)
    }

    /// Close the pool and dispose every engine it created, checked out or not.
    ///
    /// Blocks until engines that are mid-run finish. Idempotent.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let drained: Vec<Slot> = self.inner.idle.lock().drain(..).collect();
        for slot in drained {
            self.inner.dispose(slot);
        }

        let remaining: Vec<SharedEngine> = self
            .inner
            .tracked
            .lock()
            .drain()
            .map(|(_, engine)| engine)
            .collect();
        for engine in remaining {
            engine.lock().dispose();
        }

        info!(
            total_created = self.inner.created.load(Ordering::Relaxed),
            "closed script engine pool"
        );
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            engine: self.inner.factory.name(),
            total_created: self.inner.created.load(Ordering::Relaxed),
            live: self.inner.tracked.lock().len(),
            idle: self.inner.idle.lock().len(),
            capacity: self.inner.capacity,
            closed: self.is_closed(),
        }
    }
}

/// An engine checked out of an [`EnginePool`].
///
/// Returned to the pool on drop.
pub struct PooledEngine {
    slot: Option<Slot>,
    pool: Arc<PoolInner>,
}

impl PooledEngine {
    pub fn run(&self, code: &str) -> Result<String> {
        match &self.slot {
            Some(slot) => slot.engine.lock().run(code),
            None => Err(EngineError::Disposed),
        }
    }

    /// Pool-assigned engine id.
    pub fn id(&self) -> Option<u64> {
        self.slot.as_ref().map(|slot| slot.id)
    }
}

impl Drop for PooledEngine {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            self.pool.put_back(slot);
        }
    }
}
