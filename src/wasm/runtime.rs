//! WASM Runtime — shared engine, epoch ticker, compiled-module cache.
//!
//! Modules are compiled once per tool version (expensive) and instantiated
//! per call (cheap). Compiled code is immutable and safe to share; instances
//! and stores never are.
//!
//! Deadlines use epoch interruption: a background thread bumps the engine
//! epoch every tick, and each store checks its own deadline on every bump.
//! Guests run as async calls, so a guest parked in a host call (a WASI sleep,
//! an HTTP request) is torn down by dropping its future.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::debug;
use wasmtime::{Engine, Module};

use super::error::WasmError;
use crate::registry::ToolKey;

pub struct WasmRuntime {
    engine: Engine,
    modules: RwLock<HashMap<ToolKey, Module>>,
    stop: Arc<AtomicBool>,
    ticker: Option<JoinHandle<()>>,
}

impl WasmRuntime {
    /// Create the engine and start the epoch ticker.
    pub fn new(tick: Duration) -> Result<Self, WasmError> {
        let mut config = wasmtime::Config::new();
        config.epoch_interruption(true);
        config.async_support(true);
        let engine =
            Engine::new(&config).map_err(|e| WasmError::EngineCreation(e.to_string()))?;

        let stop = Arc::new(AtomicBool::new(false));
        let ticker = {
            let engine = engine.clone();
            let stop = Arc::clone(&stop);
            std::thread::Builder::new()
                .name("wasm-epoch".into())
                .spawn(move || {
                    while !stop.load(Ordering::Relaxed) {
                        std::thread::sleep(tick);
                        engine.increment_epoch();
                    }
                })
                .map_err(|e| WasmError::EngineCreation(format!("epoch ticker: {e}")))?
        };

        Ok(Self {
            engine,
            modules: RwLock::new(HashMap::new()),
            stop,
            ticker: Some(ticker),
        })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Compile module bytes (binary or text format).
    pub fn compile(&self, bytes: &[u8]) -> Result<Module, WasmError> {
        Module::new(&self.engine, bytes).map_err(|e| WasmError::Compilation(e.to_string()))
    }

    /// A previously compiled module for this tool version.
    pub fn cached(&self, key: &ToolKey) -> Option<Module> {
        self.modules
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned()
    }

    pub fn insert(&self, key: ToolKey, module: Module) {
        debug!(tool = %key, "module cached");
        self.modules
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key, module);
    }

    /// Drop a cached module so the next call recompiles from the catalog.
    pub fn evict(&self, key: &ToolKey) -> bool {
        self.modules
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(key)
            .is_some()
    }

    pub fn cached_count(&self) -> usize {
        self.modules
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

impl Drop for WasmRuntime {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(ticker) = self.ticker.take() {
            let _ = ticker.join();
        }
    }
}
