//! WASM execution layer — tools run as WebAssembly core modules.
//!
//! Tools can't do harm because they literally can't express harmful
//! operations: a capability that was not granted has no import and no
//! handle in the guest, not a policy check that might be skipped.
//!
//! Architecture:
//! - `runtime.rs` — WasmRuntime: engine, epoch ticker, compiled-module cache
//! - `context.rs` — ExecutionContext: one store + instance per invocation
//! - `host.rs` — store data and the `sandbox` import module
//! - `capabilities.rs` — WASI context built from a policy decision
//! - `limits.rs` — MemoryGuard store limiter
//! - `error.rs` — WasmError types

pub mod capabilities;
pub mod context;
pub mod error;
pub mod host;
pub mod limits;
pub mod runtime;

pub use context::{ExecutionContext, RawOutcome, ResourceUsage};
pub use error::WasmError;
pub use runtime::WasmRuntime;
