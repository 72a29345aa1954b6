//! tool-sandbox — package executor for registry tools.
//!
//! Loads a tool by name and version, validates input against its schema,
//! runs it in a fresh resource-bounded WebAssembly context, and returns one
//! typed `ExecutionResult`.

pub mod config;
pub mod policy;
pub mod registry;
pub mod sandbox;
pub mod schema;
pub mod wasm;

pub use config::ExecutorConfig;
pub use registry::{InMemoryCatalog, ManifestCatalog, ToolCatalog, ToolDescriptor, ToolKey};
pub use sandbox::{
    CancellationHandle, ExecutionReport, ExecutionResult, InvocationRequest, SandboxManager,
};
