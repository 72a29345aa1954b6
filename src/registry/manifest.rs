//! YAML tool manifest — a directory-backed catalog.
//!
//! ```yaml
//! tools:
//!   - name: echo
//!     version: 1.0.0
//!     module: echo.wat          # relative to the manifest file
//!     entry: invoke             # optional
//!     description: Echoes its input
//!     input_schema: { type: object, required: [message] }
//!     output_schema: { type: object }
//!     capabilities:
//!       timeout_ms: 1000
//!       network: none
//! ```

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{RegistryError, ToolCatalog, ToolDescriptor, ToolKey, DEFAULT_ENTRY};
use crate::policy::CapabilityRequirements;
use crate::schema::Schema;

#[derive(Debug, Deserialize)]
struct ManifestYaml {
    #[serde(default)]
    tools: Vec<ToolYaml>,
}

#[derive(Debug, Deserialize)]
struct ToolYaml {
    name: String,
    version: String,
    module: PathBuf,
    #[serde(default)]
    entry: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    input_schema: Option<serde_json::Value>,
    #[serde(default)]
    output_schema: Option<serde_json::Value>,
    #[serde(default)]
    capabilities: CapabilityRequirements,
}

struct ManifestEntry {
    descriptor: Arc<ToolDescriptor>,
    module_path: PathBuf,
}

/// Catalog backed by a manifest file and module files beside it.
pub struct ManifestCatalog {
    tools: HashMap<ToolKey, ManifestEntry>,
}

impl ManifestCatalog {
    /// Load a manifest; module paths resolve relative to its directory.
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RegistryError::Manifest(format!("{}: {e}", path.display())))?;
        let base = path.parent().unwrap_or(Path::new("."));
        Self::parse(&content, base)
    }

    /// Parse manifest text with an explicit base directory.
    pub fn parse(yaml: &str, base: &Path) -> Result<Self, RegistryError> {
        let manifest: ManifestYaml = serde_yaml::from_str(yaml)
            .map_err(|e| RegistryError::Manifest(format!("YAML parse error: {e}")))?;

        let mut seen = HashSet::new();
        let mut tools = HashMap::new();
        for tool in manifest.tools {
            let key = ToolKey::new(&tool.name, &tool.version);
            if tool.name.trim().is_empty() || tool.version.trim().is_empty() {
                return Err(RegistryError::Manifest(
                    "tool name and version must be non-empty".into(),
                ));
            }
            if !seen.insert(key.clone()) {
                return Err(RegistryError::Manifest(format!("duplicate tool: {key}")));
            }

            let input_schema = parse_schema(&key, "input_schema", tool.input_schema)?;
            let output_schema = parse_schema(&key, "output_schema", tool.output_schema)?;
            let module_path = if tool.module.is_absolute() {
                tool.module
            } else {
                base.join(tool.module)
            };

            let descriptor = ToolDescriptor {
                key: key.clone(),
                entry: tool.entry.unwrap_or_else(|| DEFAULT_ENTRY.to_string()),
                description: tool.description,
                input_schema,
                output_schema,
                capabilities: tool.capabilities,
            };
            debug!(tool = %key, module = %module_path.display(), "manifest entry");
            tools.insert(
                key,
                ManifestEntry {
                    descriptor: Arc::new(descriptor),
                    module_path,
                },
            );
        }

        Ok(Self { tools })
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

fn parse_schema(
    key: &ToolKey,
    field: &str,
    value: Option<serde_json::Value>,
) -> Result<Schema, RegistryError> {
    match value {
        None => Ok(Schema::any()),
        Some(v) => Schema::from_json(&v)
            .map_err(|e| RegistryError::Manifest(format!("{key}: {field}: {e}"))),
    }
}

#[async_trait]
impl ToolCatalog for ManifestCatalog {
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
            .ok_or_else(|| RegistryError::Artifact(format!("no module for {}", descriptor.key)))?;
        tokio::fs::read(&entry.module_path).await.map_err(|e| {
            RegistryError::Artifact(format!("{}: {e}", entry.module_path.display()))
        })
    }

    async fn list(&self) -> Vec<ToolKey> {
        let mut keys: Vec<ToolKey> = self.tools.keys().cloned().collect();
        keys.sort();
        keys
    }
}
