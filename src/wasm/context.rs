//! Execution context — one store, one instance, one invocation.
//!
//! Lifecycle: `create` → `load` → `invoke` → `destroy`. A context is never
//! reused; the pool slot it holds is released when it is destroyed or dropped,
//! whichever comes first.
//!
//! `load` and `invoke` are async. The epoch callback yields on every tick, so
//! the caller can race them against its deadline and drop them mid-call; the
//! store stays intact for `destroy`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::debug;
use wasmtime::{Instance, Linker, Memory, Module, Store, Trap, TypedFunc, UpdateDeadline};

use super::capabilities::build_wasi_ctx;
use super::error::WasmError;
use super::host::{self, Breach, Egress, HostLimits, HostState, Interrupt};
use super::limits::MemoryGuard;
use super::runtime::WasmRuntime;
use crate::policy::PolicyDecision;
use crate::registry::ToolKey;
use crate::sandbox::pool::SlotPermit;

/// Where the code for `load` comes from.
pub enum ModuleSource {
    Compiled(Module),
    /// Untrusted artifact bytes; compiled and cached on success.
    Artifact(Vec<u8>),
}

/// Per-invocation settings that are not part of the capability decision.
pub struct ContextOptions {
    pub deadline: Instant,
    pub cancel: Arc<AtomicBool>,
    pub max_output_bytes: usize,
    pub max_log_lines: usize,
    pub egress: Option<Egress>,
}

/// What came out of the guest, before normalization.
#[derive(Debug)]
pub enum RawOutcome {
    /// Entry returned 0 and the guest produced output bytes.
    Returned(Vec<u8>),
    /// Entry returned non-zero, called `fail`, or produced no output.
    Faulted { payload: Option<Vec<u8>>, code: i32 },
    /// The guest trapped on its own (unreachable, bad memory access, ...).
    Trapped(String),
    /// The host trapped the guest for crossing a capability boundary.
    Breached(Breach),
    Interrupted(Interrupt),
    LoadFailed(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ResourceUsage {
    #[serde(with = "millis")]
    pub elapsed: Duration,
    pub memory_high_water_bytes: usize,
}

mod millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

struct Bound {
    memory: Memory,
    alloc: TypedFunc<i32, i32>,
    entry: TypedFunc<(i32, i32), i32>,
}

pub struct ExecutionContext {
    runtime: Arc<WasmRuntime>,
    store: Store<HostState>,
    linker: Linker<HostState>,
    bound: Option<Bound>,
    label: String,
    started: Instant,
    _slot: SlotPermit,
}

impl ExecutionContext {
    /// Provision an empty context for `key` under `policy`.
    pub fn create(
        runtime: Arc<WasmRuntime>,
        key: &ToolKey,
        policy: &PolicyDecision,
        options: ContextOptions,
        slot: SlotPermit,
    ) -> Result<Self, WasmError> {
        let label = key.to_string();
        let wasi = build_wasi_ctx(policy)?;
        let state = HostState::new(
            wasi,
            MemoryGuard::new(policy.max_memory.bytes()),
            label.clone(),
            options.deadline,
            policy.network.clone(),
            options.egress,
            HostLimits {
                max_output_bytes: options.max_output_bytes,
                max_log_lines: options.max_log_lines,
            },
        );

        let mut store = Store::new(runtime.engine(), state);
        store.limiter(|s| &mut s.guard);

        // Armed before instantiation so start functions are bounded too.
        store.set_epoch_deadline(1);
        let deadline = options.deadline;
        let cancel = options.cancel;
        store.epoch_deadline_callback(move |mut ctx| {
            let interrupt = if cancel.load(Ordering::Acquire) {
                Interrupt::Cancelled
            } else if Instant::now() >= deadline {
                Interrupt::Deadline
            } else {
                return Ok(UpdateDeadline::Yield(1));
            };
            ctx.data_mut().interrupt = Some(interrupt);
            Err(wasmtime::Error::msg(interrupt.to_string()))
        });

        let mut linker = Linker::new(runtime.engine());
        wasmtime_wasi::p1::add_to_linker_async(&mut linker, |s: &mut HostState| &mut s.wasi)
            .map_err(|e| WasmError::Link(format!("WASI: {e}")))?;
        host::link(&mut linker)?;

        debug!(tool = %label, "context created");
        Ok(Self {
            runtime,
            store,
            linker,
            bound: None,
            label,
            started: Instant::now(),
            _slot: slot,
        })
    }

    /// Compile (if needed), instantiate and bind the ABI exports.
    ///
    /// Compilation runs on a blocking thread; it is the one CPU-heavy step
    /// not bounded by epoch ticks.
    pub async fn load(
        &mut self,
        key: &ToolKey,
        source: ModuleSource,
        entry: &str,
    ) -> Result<(), WasmError> {
        let module = match source {
            ModuleSource::Compiled(module) => module,
            ModuleSource::Artifact(bytes) => {
                let runtime = Arc::clone(&self.runtime);
                let module = tokio::task::spawn_blocking(move || runtime.compile(&bytes))
                    .await
                    .map_err(|e| WasmError::Compilation(format!("compiler thread: {e}")))??;
                self.runtime.insert(key.clone(), module.clone());
                module
            }
        };

        let instance: Instance = self
            .linker
            .instantiate_async(&mut self.store, &module)
            .await
            .map_err(|e| WasmError::Instantiation(describe(&e)))?;

        let memory = instance
            .get_memory(&mut self.store, "memory")
            .ok_or_else(|| WasmError::MissingExport("memory".into()))?;
        let alloc = instance
            .get_typed_func::<i32, i32>(&mut self.store, "alloc")
            .map_err(|e| WasmError::MissingExport(format!("alloc: {e}")))?;
        let entry = instance
            .get_typed_func::<(i32, i32), i32>(&mut self.store, entry)
            .map_err(|e| WasmError::MissingExport(format!("{entry}: {e}")))?;

        self.bound = Some(Bound {
            memory,
            alloc,
            entry,
        });
        Ok(())
    }

    /// Convert a `load` failure, giving precedence to host-side causes.
    ///
    /// A start function that runs past the deadline or an initial memory
    /// larger than the limit surfaces as an instantiation error.
    pub fn load_failure(&mut self, error: WasmError) -> RawOutcome {
        self.host_signal()
            .unwrap_or_else(|| RawOutcome::LoadFailed(error.to_string()))
    }

    /// Hand the input to the guest and run the entry point to completion,
    /// trap, or interruption.
    pub async fn invoke(&mut self, input: &Value) -> RawOutcome {
        let Some(bound) = &self.bound else {
            return RawOutcome::LoadFailed("invoke called before load".into());
        };
        let (memory, alloc, entry) = (bound.memory, bound.alloc.clone(), bound.entry.clone());

        let bytes = match serde_json::to_vec(input) {
            Ok(bytes) => bytes,
            Err(e) => return RawOutcome::Trapped(format!("input encoding: {e}")),
        };
        let Ok(len) = i32::try_from(bytes.len()) else {
            return RawOutcome::Trapped("input too large for guest memory".into());
        };

        let ptr = match alloc.call_async(&mut self.store, len).await {
            Ok(ptr) => ptr,
            Err(e) => return self.trap_outcome(e),
        };
        if ptr < 0 || memory.write(&mut self.store, ptr as usize, &bytes).is_err() {
            return RawOutcome::Trapped(format!("alloc returned invalid pointer {ptr}"));
        }

        let code = match entry.call_async(&mut self.store, (ptr, len)).await {
            Ok(code) => code,
            Err(e) => return self.trap_outcome(e),
        };

        let state = self.store.data_mut();
        if let Some(breach) = state.take_breach() {
            return RawOutcome::Breached(breach);
        }
        let failure = state.take_failure();
        if code != 0 || failure.is_some() {
            return RawOutcome::Faulted {
                payload: failure,
                code,
            };
        }
        match state.take_output() {
            Some(output) => RawOutcome::Returned(output),
            None => RawOutcome::Faulted {
                payload: Some(b"tool returned without calling sandbox.output".to_vec()),
                code,
            },
        }
    }

    /// Tear down the store and instance and release the slot.
    pub fn destroy(self) -> ResourceUsage {
        let usage = ResourceUsage {
            elapsed: self.started.elapsed(),
            memory_high_water_bytes: self.store.data().guard.high_water(),
        };
        debug!(
            tool = %self.label,
            elapsed_ms = usage.elapsed.as_millis() as u64,
            memory_bytes = usage.memory_high_water_bytes,
            "context destroyed"
        );
        usage
    }

    fn host_signal(&mut self) -> Option<RawOutcome> {
        let state = self.store.data_mut();
        if let Some(interrupt) = state.interrupt {
            return Some(RawOutcome::Interrupted(interrupt));
        }
        state.take_breach().map(RawOutcome::Breached)
    }

    fn trap_outcome(&mut self, error: wasmtime::Error) -> RawOutcome {
        self.host_signal()
            .unwrap_or_else(|| RawOutcome::Trapped(describe(&error)))
    }
}

/// The trap code when there is one; wasm backtraces stay out of tool-facing text.
fn describe(error: &wasmtime::Error) -> String {
    match error.downcast_ref::<Trap>() {
        Some(trap) => trap.to_string(),
        None => error.to_string(),
    }
}
