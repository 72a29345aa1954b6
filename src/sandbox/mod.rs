//! Sandbox — orchestration of tool invocations.
//!
//! - `manager.rs` — `SandboxManager`: the lifecycle state machine
//! - `pool.rs` — `SlotPool`: bounded isolation slots, reject or bounded queue
//! - `request.rs` — `InvocationRequest`, `CancellationHandle`
//! - `result.rs` — `ExecutionResult` and the normalizer
//! - `state.rs` — `ExecutionState`, `Lifecycle`

pub mod manager;
pub mod pool;
pub mod request;
pub mod result;
pub mod state;

pub use manager::{ExecutionReport, SandboxManager};
pub use pool::{AcquireError, SlotPool};
pub use request::{CancellationHandle, InvocationRequest};
pub use result::{ExecutionResult, ValidationPhase};
pub use state::ExecutionState;
