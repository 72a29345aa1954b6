//! Error types for the WASM execution layer.

#[derive(Debug, thiserror::Error)]
pub enum WasmError {
    #[error("engine creation failed: {0}")]
    EngineCreation(String),
    #[error("module compilation failed: {0}")]
    Compilation(String),
    #[error("instantiation failed: {0}")]
    Instantiation(String),
    #[error("missing or mistyped export: {0}")]
    MissingExport(String),
    #[error("capability error: {0}")]
    Capability(String),
    #[error("linking failed: {0}")]
    Link(String),
}
