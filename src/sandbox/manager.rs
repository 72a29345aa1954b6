//! SandboxManager — runs one tool invocation from request to result.
//!
//! Each call walks `Pending → Validating → Provisioning → Executing →
//! Finalizing → Done`. Every failure is converted to an `ExecutionResult` at
//! the stage where it happens; nothing escapes as an error or a panic.
//!
//! The guest runs as an async wasmtime call raced against the deadline and
//! the caller's cancellation. Losing that race drops the call, so the
//! context and its pool slot are released before `execute` returns.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::pool::{AcquireError, SlotPool};
use super::request::{deadline_after, InvocationRequest};
use super::result::{normalize, ExecutionResult, ValidationPhase};
use super::state::{ExecutionState, Lifecycle};
use crate::config::ExecutorConfig;
use crate::policy::{self, NetworkAccess};
use crate::registry::{RegistryError, ToolCatalog, ToolKey};
use crate::schema::validate;
use crate::wasm::context::{
    ContextOptions, ExecutionContext, ModuleSource, RawOutcome, ResourceUsage,
};
use crate::wasm::host::{Egress, Interrupt};
use crate::wasm::{WasmError, WasmRuntime};

/// Full account of one invocation.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub trace_id: Uuid,
    pub tool: ToolKey,
    pub transitions: Vec<ExecutionState>,
    pub result: ExecutionResult,
    /// Present when an execution context was created.
    pub usage: Option<ResourceUsage>,
}

pub struct SandboxManager {
    config: Arc<ExecutorConfig>,
    catalog: Arc<dyn ToolCatalog>,
    runtime: Arc<WasmRuntime>,
    pool: Arc<SlotPool>,
    http: reqwest::Client,
    invocations: AtomicU64,
}

impl SandboxManager {
    pub fn new(config: ExecutorConfig, catalog: Arc<dyn ToolCatalog>) -> Result<Self, WasmError> {
        let runtime = WasmRuntime::new(Duration::from_millis(config.epoch_tick_ms))?;
        let pool = SlotPool::new(config.pool_size, config.saturation.clone());
        Ok(Self {
            config: Arc::new(config),
            catalog,
            runtime: Arc::new(runtime),
            pool: Arc::new(pool),
            http: Egress::build_client()?,
            invocations: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn pool(&self) -> &SlotPool {
        &self.pool
    }

    pub fn runtime(&self) -> &WasmRuntime {
        &self.runtime
    }

    /// How many times a tool entry point has been called.
    pub fn invocation_attempts(&self) -> u64 {
        self.invocations.load(Ordering::SeqCst)
    }

    /// Run `name@version` on `input` within `deadline`.
    pub async fn execute(
        &self,
        name: &str,
        version: &str,
        input: Value,
        deadline: Duration,
    ) -> ExecutionResult {
        self.execute_request(InvocationRequest::new(name, version, input, deadline))
            .await
    }

    pub async fn execute_request(&self, request: InvocationRequest) -> ExecutionResult {
        self.execute_with_report(request).await.result
    }

    /// Run a request and return the result with its lifecycle and usage.
    pub async fn execute_with_report(&self, request: InvocationRequest) -> ExecutionReport {
        let span = info_span!(
            "execute",
            trace_id = %request.trace_id,
            tool = %request.tool.name,
            version = %request.tool.version,
            caller = request.caller.as_deref().unwrap_or("-"),
        );
        self.run(request).instrument(span).await
    }

    async fn run(&self, request: InvocationRequest) -> ExecutionReport {
        let submitted = Instant::now();
        let mut life = Lifecycle::new();
        let mut usage = None;

        let result = self
            .drive(&request, submitted, &mut life, &mut usage)
            .await;
        life.finish();

        let elapsed_ms = submitted.elapsed().as_millis() as u64;
        match &result {
            ExecutionResult::PolicyViolation { kind, detail } => warn!(
                status = result.status(),
                kind = %kind,
                detail = %detail,
                elapsed_ms,
                "policy violation, possible abuse"
            ),
            _ => info!(status = result.status(), elapsed_ms, "invocation finished"),
        }

        ExecutionReport {
            trace_id: request.trace_id,
            tool: request.tool,
            transitions: life.into_states(),
            result,
            usage,
        }
    }

    async fn drive(
        &self,
        request: &InvocationRequest,
        submitted: Instant,
        life: &mut Lifecycle,
        usage: &mut Option<ResourceUsage>,
    ) -> ExecutionResult {
        let caller_deadline = deadline_after(submitted, request.deadline);
        let key = &request.tool;

        // Pending: resolve the descriptor.
        let descriptor = match self.catalog.get_descriptor(&key.name, &key.version).await {
            Ok(d) => d,
            Err(RegistryError::NotFound { name, version }) => {
                return ExecutionResult::NotFound { name, version }
            }
            Err(e) => {
                return ExecutionResult::LoadError {
                    message: e.to_string(),
                }
            }
        };

        life.advance(ExecutionState::Validating);
        if let Err(failure) = validate(&descriptor.input_schema, &request.input, "input") {
            debug!(violations = failure.violations.len(), "input rejected");
            return ExecutionResult::ValidationError {
                phase: ValidationPhase::Input,
                details: failure.violations,
            };
        }

        let decision = match policy::resolve(&descriptor.capabilities, &self.config) {
            Ok(d) => d,
            Err(failure) => {
                return ExecutionResult::ValidationError {
                    phase: ValidationPhase::Policy,
                    details: failure.violations,
                }
            }
        };

        let slot = match self.pool.acquire(caller_deadline, &request.cancel).await {
            Ok(slot) => slot,
            Err(AcquireError::Cancelled) => return ExecutionResult::cancelled(submitted.elapsed()),
            Err(e) => {
                return ExecutionResult::ResourceExhausted {
                    reason: e.to_string(),
                }
            }
        };

        life.advance(ExecutionState::Provisioning);
        let source = match self.runtime.cached(key) {
            Some(module) => ModuleSource::Compiled(module),
            None => {
                let fetch = self.catalog.fetch_artifact(&descriptor);
                tokio::select! {
                    fetched = tokio::time::timeout_at(caller_deadline.into(), fetch) => match fetched {
                        Ok(Ok(bytes)) => ModuleSource::Artifact(bytes),
                        Ok(Err(e)) => {
                            return ExecutionResult::LoadError {
                                message: e.to_string(),
                            }
                        }
                        Err(_) => return ExecutionResult::timeout(submitted.elapsed()),
                    },
                    _ = request.cancel.cancelled() => {
                        return ExecutionResult::cancelled(submitted.elapsed())
                    }
                }
            }
        };

        // The context deadline starts now: queueing and fetching count
        // against the caller, not against the tool's own wall clock.
        let granted = deadline_after(Instant::now(), decision.max_wall_clock());
        let deadline = caller_deadline.min(granted);
        let egress = match decision.network {
            NetworkAccess::None => None,
            NetworkAccess::AllowList(_) => Some(Egress::new(self.http.clone())),
        };
        let options = ContextOptions {
            deadline,
            cancel: request.cancel.flag(),
            max_output_bytes: self.config.max_output_bytes,
            max_log_lines: self.config.max_log_lines,
            egress,
        };

        let mut ctx =
            match ExecutionContext::create(Arc::clone(&self.runtime), key, &decision, options, slot) {
                Ok(ctx) => ctx,
                Err(e) => {
                    return ExecutionResult::LoadError {
                        message: e.to_string(),
                    }
                }
            };

        let run = async {
            if let Err(e) = ctx.load(key, source, &descriptor.entry).await {
                return ctx.load_failure(e);
            }
            life.advance(ExecutionState::Executing);
            self.invocations.fetch_add(1, Ordering::SeqCst);
            ctx.invoke(&request.input).await
        };

        // Whichever ends first. Losing branches are dropped, and with them any
        // guest call still parked in a host function.
        let raw = tokio::select! {
            raw = run => raw,
            _ = tokio::time::sleep_until(deadline.into()) => {
                debug!("deadline reached, guest call dropped");
                RawOutcome::Interrupted(Interrupt::Deadline)
            }
            _ = request.cancel.cancelled() => RawOutcome::Interrupted(Interrupt::Cancelled),
        };
        let returned_at = Instant::now();

        let executed = life.current() == ExecutionState::Executing;
        let spent = ctx.destroy();
        *usage = Some(spent);
        if executed {
            life.advance(ExecutionState::Finalizing);
        }

        let raw = discard_late(raw, returned_at, deadline);
        match normalize(raw, spent.elapsed) {
            ExecutionResult::Success { value } => {
                match validate(&descriptor.output_schema, &value, "output") {
                    Ok(_) => ExecutionResult::Success { value },
                    Err(failure) => ExecutionResult::ValidationError {
                        phase: ValidationPhase::Output,
                        details: failure.violations,
                    },
                }
            }
            other => other,
        }
    }
}

/// A guest that finishes after its deadline still timed out; whatever it
/// produced is dropped.
fn discard_late(raw: RawOutcome, returned_at: Instant, deadline: Instant) -> RawOutcome {
    match raw {
        RawOutcome::Interrupted(_) | RawOutcome::Breached(_) | RawOutcome::LoadFailed(_) => raw,
        _ if returned_at >= deadline => {
            debug!("late return after deadline discarded");
            RawOutcome::Interrupted(Interrupt::Deadline)
        }
        _ => raw,
    }
}
