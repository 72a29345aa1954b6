//! Tool registry boundary — descriptors and artifacts.
//!
//! The executor never owns tool storage. It asks a `ToolCatalog` for a
//! descriptor (schemas, entry point, declared capabilities) and, on a
//! compile-cache miss, for the artifact bytes.
//!
//! - `mod.rs` — `ToolKey`, `ToolDescriptor`, `ToolCatalog`, `InMemoryCatalog`
//! - `manifest.rs` — `ManifestCatalog`: tools listed in a YAML manifest

pub mod manifest;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::policy::CapabilityRequirements;
use crate::schema::Schema;

pub use manifest::ManifestCatalog;

/// Default name of the exported function a tool is invoked through.
pub const DEFAULT_ENTRY: &str = "invoke";

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("tool not found: {name}@{version}")]
    NotFound { name: String, version: String },
    #[error("artifact unavailable: {0}")]
    Artifact(String),
    #[error("manifest error: {0}")]
    Manifest(String),
}

/// Identifies one published version of a tool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ToolKey {
    pub name: String,
    pub version: String,
}

impl ToolKey {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for ToolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// Everything the executor needs to know about a tool, short of its code.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub key: ToolKey,
    pub entry: String,
    pub description: String,
    pub input_schema: Schema,
    pub output_schema: Schema,
    pub capabilities: CapabilityRequirements,
}

impl ToolDescriptor {
    /// A descriptor that accepts any input, declares nothing, and uses the default entry.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            key: ToolKey::new(name, version),
            entry: DEFAULT_ENTRY.to_string(),
            description: String::new(),
            input_schema: Schema::any(),
            output_schema: Schema::any(),
            capabilities: CapabilityRequirements::default(),
        }
    }

    pub fn with_entry(mut self, entry: impl Into<String>) -> Self {
        self.entry = entry.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_input_schema(mut self, schema: Schema) -> Self {
        self.input_schema = schema;
        self
    }

    pub fn with_output_schema(mut self, schema: Schema) -> Self {
        self.output_schema = schema;
        self
    }

    pub fn with_capabilities(mut self, capabilities: CapabilityRequirements) -> Self {
        self.capabilities = capabilities;
        self
    }
}

/// Source of tool descriptors and artifacts.
#[async_trait]
pub trait ToolCatalog: Send + Sync {
    async fn get_descriptor(
        &self,
        name: &str,
        version: &str,
    ) -> Result<Arc<ToolDescriptor>, RegistryError>;

    /// Raw module bytes (binary wasm or text format).
    async fn fetch_artifact(&self, descriptor: &ToolDescriptor) -> Result<Vec<u8>, RegistryError>;

    /// Every tool this catalog knows about, sorted by key.
    async fn list(&self) -> Vec<ToolKey>;
}

struct CatalogEntry {
    descriptor: Arc<ToolDescriptor>,
    artifact: Arc<Vec<u8>>,
}

/// Catalog held entirely in memory. Counts artifact fetches.
#[derive(Default)]
pub struct InMemoryCatalog {
    tools: HashMap<ToolKey, CatalogEntry>,
    fetches: AtomicUsize,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, descriptor: ToolDescriptor, artifact: impl Into<Vec<u8>>) {
        self.tools.insert(
            descriptor.key.clone(),
            CatalogEntry {
                descriptor: Arc::new(descriptor),
                artifact: Arc::new(artifact.into()),
            },
        );
    }

    pub fn with_tool(mut self, descriptor: ToolDescriptor, artifact: impl Into<Vec<u8>>) -> Self {
        self.insert(descriptor, artifact);
        self
    }

    /// How many times `fetch_artifact` succeeded.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ToolCatalog for InMemoryCatalog {
    async fn get_descriptor(
        &self,
        name: &str,
        version: &str,
    ) -> Result<Arc<ToolDescriptor>, RegistryError> {
        self.tools
            .get(&ToolKey::new(name, version))
            .map(|entry| Arc::clone(&entry.descriptor))
            .ok_or_else(|| RegistryError::NotFound {
                name: name.to_string(),
                version: version.to_string(),
            })
    }

    async fn fetch_artifact(&self, descriptor: &ToolDescriptor) -> Result<Vec<u8>, RegistryError> {
        let entry = self
            .tools
            .get(&descriptor.key)
            .ok_or_else(|| RegistryError::Artifact(format!("no artifact for {}", descriptor.key)))?;
        self.fetches.fetch_add(1, Ordering::Relaxed);
        Ok(entry.artifact.as_ref().clone())
    }

    async fn list(&self) -> Vec<ToolKey> {
        let mut keys: Vec<ToolKey> = self.tools.keys().cloned().collect();
        keys.sort();
        keys
    }
}
