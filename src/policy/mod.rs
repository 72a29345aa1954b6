//! Capability policy — what a tool declares vs. what the platform grants.
//!
//! A tool gets the smaller of what it asks for and what the platform ceiling
//! allows. Anything it does not ask for, it does not get: no network, no
//! filesystem, no environment, default time and memory budgets.
//!
//! - `mod.rs` — declarations, decisions, `resolve()`
//! - `hosts.rs` — `HostPattern` (glob matching for egress allow-lists)

pub mod hosts;

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ExecutorConfig;
use crate::schema::{ValidationFailure, Violation};

pub use hosts::HostPattern;

// ── Declarations (what a tool asks for) ──

/// `memory: 1048576` or `memory: unbounded`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MemoryRequirement {
    Bytes(i64),
    Keyword(MemoryKeyword),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKeyword {
    Unbounded,
}

/// `network: none` or `network: { allow: [api.example.com] }`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "NetworkYaml", into = "NetworkYaml")]
pub enum NetworkRequirement {
    #[default]
    None,
    Allow(Vec<String>),
}

/// `filesystem: none` or `filesystem: { readonly: [/srv/data] }`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "FilesystemYaml", into = "FilesystemYaml")]
pub enum FilesystemRequirement {
    #[default]
    None,
    Readonly(Vec<PathBuf>),
}

// Declaration shapes: a bare `none` keyword or a single-key map.

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum NoneKeyword {
    None,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum NetworkYaml {
    Keyword(NoneKeyword),
    Allow { allow: Vec<String> },
}

impl From<NetworkYaml> for NetworkRequirement {
    fn from(yaml: NetworkYaml) -> Self {
        match yaml {
            NetworkYaml::Keyword(NoneKeyword::None) => Self::None,
            NetworkYaml::Allow { allow } => Self::Allow(allow),
        }
    }
}

impl From<NetworkRequirement> for NetworkYaml {
    fn from(req: NetworkRequirement) -> Self {
        match req {
            NetworkRequirement::None => Self::Keyword(NoneKeyword::None),
            NetworkRequirement::Allow(allow) => Self::Allow { allow },
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum FilesystemYaml {
    Keyword(NoneKeyword),
    Readonly { readonly: Vec<PathBuf> },
}

impl From<FilesystemYaml> for FilesystemRequirement {
    fn from(yaml: FilesystemYaml) -> Self {
        match yaml {
            FilesystemYaml::Keyword(NoneKeyword::None) => Self::None,
            FilesystemYaml::Readonly { readonly } => Self::Readonly(readonly),
        }
    }
}

impl From<FilesystemRequirement> for FilesystemYaml {
    fn from(req: FilesystemRequirement) -> Self {
        match req {
            FilesystemRequirement::None => Self::Keyword(NoneKeyword::None),
            FilesystemRequirement::Readonly(readonly) => Self::Readonly { readonly },
        }
    }
}

/// Capabilities declared by a tool package.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityRequirements {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryRequirement>,
    #[serde(default)]
    pub network: NetworkRequirement,
    #[serde(default)]
    pub filesystem: FilesystemRequirement,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
}

/// A capability boundary a running tool tried to cross.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// Egress to a host outside the granted allow-list.
    NetworkEgress,
    /// Linear memory growth past the granted limit.
    MemoryLimit,
    /// Result payload larger than the platform accepts.
    OutputTooLarge,
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ViolationKind::NetworkEgress => "network_egress",
            ViolationKind::MemoryLimit => "memory_limit",
            ViolationKind::OutputTooLarge => "output_too_large",
        })
    }
}

// ── Decisions (what a tool gets) ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryLimit {
    Bounded(u64),
    Unbounded,
}

impl MemoryLimit {
    pub fn bytes(self) -> Option<u64> {
        match self {
            MemoryLimit::Bounded(b) => Some(b),
            MemoryLimit::Unbounded => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkAccess {
    #[default]
    None,
    AllowList(Vec<HostPattern>),
}

impl NetworkAccess {
    /// Whether an egress request to `host` is permitted.
    pub fn allows(&self, host: &str) -> bool {
        match self {
            NetworkAccess::None => false,
            NetworkAccess::AllowList(patterns) => patterns.iter().any(|p| p.matches(host)),
        }
    }
}

/// A readonly directory made visible to the guest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathGrant {
    pub host_path: PathBuf,
    pub guest_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FilesystemAccess {
    #[default]
    None,
    ReadOnly(Vec<PathGrant>),
}

/// The concrete permission set one invocation runs under.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyDecision {
    pub max_wall_clock_ms: u64,
    pub max_memory: MemoryLimit,
    pub network: NetworkAccess,
    pub filesystem: FilesystemAccess,
    pub environment: BTreeSet<String>,
}

impl PolicyDecision {
    /// The platform defaults for a tool that declares nothing.
    pub fn conservative(config: &ExecutorConfig) -> Self {
        Self {
            max_wall_clock_ms: config.default_timeout_ms,
            max_memory: MemoryLimit::Bounded(bounded_default(config)),
            network: NetworkAccess::None,
            filesystem: FilesystemAccess::None,
            environment: BTreeSet::new(),
        }
    }

    pub fn max_wall_clock(&self) -> Duration {
        Duration::from_millis(self.max_wall_clock_ms)
    }
}

fn bounded_default(config: &ExecutorConfig) -> u64 {
    match config.max_memory_bytes {
        Some(max) => config.default_memory_bytes.min(max),
        None => config.default_memory_bytes,
    }
}

/// Resolve a tool's declared requirements against the platform ceilings.
///
/// Malformed or self-contradictory declarations fail with every problem
/// listed; nothing is provisioned for them.
pub fn resolve(
    req: &CapabilityRequirements,
    config: &ExecutorConfig,
) -> Result<PolicyDecision, ValidationFailure> {
    let mut violations = Vec::new();
    let mut decision = PolicyDecision::conservative(config);

    if let Some(ms) = req.timeout_ms {
        if ms <= 0 {
            violations.push(Violation::new(
                "capabilities.timeout_ms",
                format!("timeout must be positive, got {ms}"),
            ));
        } else {
            let ms = ms as u64;
            if ms > config.max_timeout_ms {
                debug!(
                    declared = ms,
                    ceiling = config.max_timeout_ms,
                    "timeout clamped to platform ceiling"
                );
            }
            decision.max_wall_clock_ms = ms.min(config.max_timeout_ms);
        }
    }

    match &req.memory {
        None => {}
        Some(MemoryRequirement::Bytes(b)) if *b <= 0 => violations.push(Violation::new(
            "capabilities.memory",
            format!("memory limit must be positive, got {b}"),
        )),
        Some(MemoryRequirement::Bytes(b)) => {
            let declared = *b as u64;
            decision.max_memory = MemoryLimit::Bounded(match config.max_memory_bytes {
                Some(max) => declared.min(max),
                None => declared,
            });
        }
        Some(MemoryRequirement::Keyword(MemoryKeyword::Unbounded)) => {
            decision.max_memory = match config.max_memory_bytes {
                Some(max) => MemoryLimit::Bounded(max),
                None => MemoryLimit::Unbounded,
            };
        }
    }

    match &req.network {
        NetworkRequirement::None => {}
        NetworkRequirement::Allow(hosts) if hosts.is_empty() => violations.push(Violation::new(
            "capabilities.network.allow",
            "allow-list is empty; declare `network: none` instead",
        )),
        NetworkRequirement::Allow(hosts) => {
            let ceiling: Vec<HostPattern> = config
                .network
                .allowed_hosts
                .iter()
                .filter_map(|h| HostPattern::parse(h).ok())
                .collect();
            let mut granted = Vec::new();
            for (i, raw) in hosts.iter().enumerate() {
                match HostPattern::parse(raw) {
                    Err(reason) => violations.push(Violation::new(
                        format!("capabilities.network.allow[{i}]"),
                        reason,
                    )),
                    Ok(pattern) if ceiling.iter().any(|c| c.covers(&pattern)) => {
                        granted.push(pattern)
                    }
                    Ok(pattern) => {
                        warn!(host = %pattern, "declared host outside platform ceiling, not granted")
                    }
                }
            }
            if !granted.is_empty() {
                decision.network = NetworkAccess::AllowList(granted);
            }
        }
    }

    match &req.filesystem {
        FilesystemRequirement::None => {}
        FilesystemRequirement::Readonly(paths) if paths.is_empty() => {
            violations.push(Violation::new(
                "capabilities.filesystem.readonly",
                "readonly list is empty; declare `filesystem: none` instead",
            ))
        }
        FilesystemRequirement::Readonly(paths) => {
            let mut granted = Vec::new();
            for (i, path) in paths.iter().enumerate() {
                let at = format!("capabilities.filesystem.readonly[{i}]");
                if !path.is_absolute() {
                    violations.push(Violation::new(at, "path must be absolute"));
                    continue;
                }
                if path.components().any(|c| matches!(c, Component::ParentDir)) {
                    violations.push(Violation::new(at, "path must not contain '..'"));
                    continue;
                }
                if within_roots(path, &config.filesystem.readonly_roots) {
                    granted.push(PathGrant {
                        host_path: path.clone(),
                        guest_path: path.to_string_lossy().into_owned(),
                    });
                } else {
                    warn!(path = %path.display(), "declared path outside readonly roots, not granted");
                }
            }
            if !granted.is_empty() {
                decision.filesystem = FilesystemAccess::ReadOnly(granted);
            }
        }
    }

    for (i, name) in req.env.iter().enumerate() {
        if !valid_env_name(name) {
            violations.push(Violation::new(
                format!("capabilities.env[{i}]"),
                format!("'{name}' is not a valid environment variable name"),
            ));
        } else if config.env_passthrough.iter().any(|allowed| allowed == name) {
            decision.environment.insert(name.clone());
        } else {
            debug!(name = %name, "env var not in passthrough ceiling, not exposed");
        }
    }

    if violations.is_empty() {
        Ok(decision)
    } else {
        Err(ValidationFailure { violations })
    }
}

fn within_roots(path: &Path, roots: &[PathBuf]) -> bool {
    roots.iter().any(|root| path.starts_with(root))
}

fn valid_env_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FilesystemCeiling, NetworkCeiling};

    fn open_config() -> ExecutorConfig {
        ExecutorConfig {
            network: NetworkCeiling {
                allowed_hosts: vec!["*.example.com".into(), "api.weather.test".into()],
            },
            filesystem: FilesystemCeiling {
                readonly_roots: vec![PathBuf::from("/srv/tools")],
            },
            env_passthrough: vec!["LANG".into(), "TZ".into()],
            ..Default::default()
        }
    }

    #[test]
    fn empty_declaration_gets_conservative_defaults() {
        let config = open_config();
        let decision = resolve(&CapabilityRequirements::default(), &config).unwrap();
        assert_eq!(decision.max_wall_clock_ms, config.default_timeout_ms);
        assert_eq!(decision.network, NetworkAccess::None);
        assert_eq!(decision.filesystem, FilesystemAccess::None);
        assert!(decision.environment.is_empty());
        assert_eq!(
            decision.max_memory,
            MemoryLimit::Bounded(config.default_memory_bytes)
        );
    }

    #[test]
    fn timeout_clamped_to_ceiling() {
        let config = open_config();
        let req = CapabilityRequirements {
            timeout_ms: Some(10_000_000),
            ..Default::default()
        };
        let decision = resolve(&req, &config).unwrap();
        assert_eq!(decision.max_wall_clock_ms, config.max_timeout_ms);

        let req = CapabilityRequirements {
            timeout_ms: Some(250),
            ..Default::default()
        };
        assert_eq!(resolve(&req, &config).unwrap().max_wall_clock_ms, 250);
    }

    #[test]
    fn negative_timeout_fails_fast() {
        let req = CapabilityRequirements {
            timeout_ms: Some(-5),
            ..Default::default()
        };
        let failure = resolve(&req, &open_config()).unwrap_err();
        assert_eq!(failure.violations[0].path, "capabilities.timeout_ms");
    }

    #[test]
    fn memory_never_exceeds_ceiling() {
        let config = open_config();
        let ceiling = config.max_memory_bytes.unwrap();
        let req = CapabilityRequirements {
            memory: Some(MemoryRequirement::Bytes((ceiling * 4) as i64)),
            ..Default::default()
        };
        assert_eq!(
            resolve(&req, &config).unwrap().max_memory,
            MemoryLimit::Bounded(ceiling)
        );

        let req = CapabilityRequirements {
            memory: Some(MemoryRequirement::Keyword(MemoryKeyword::Unbounded)),
            ..Default::default()
        };
        assert_eq!(
            resolve(&req, &config).unwrap().max_memory,
            MemoryLimit::Bounded(ceiling)
        );
    }

    #[test]
    fn unbounded_memory_only_without_ceiling() {
        let config = ExecutorConfig {
            max_memory_bytes: None,
            ..open_config()
        };
        let req = CapabilityRequirements {
            memory: Some(MemoryRequirement::Keyword(MemoryKeyword::Unbounded)),
            ..Default::default()
        };
        assert_eq!(resolve(&req, &config).unwrap().max_memory, MemoryLimit::Unbounded);
    }

    #[test]
    fn network_is_intersection_with_ceiling() {
        let req = CapabilityRequirements {
            network: NetworkRequirement::Allow(vec![
                "api.example.com".into(),
                "evil.test".into(),
            ]),
            ..Default::default()
        };
        let decision = resolve(&req, &open_config()).unwrap();
        assert!(decision.network.allows("api.example.com"));
        assert!(!decision.network.allows("evil.test"));
        assert!(!decision.network.allows("other.example.com"));
    }

    #[test]
    fn network_denied_when_ceiling_empty() {
        let req = CapabilityRequirements {
            network: NetworkRequirement::Allow(vec!["api.example.com".into()]),
            ..Default::default()
        };
        let decision = resolve(&req, &ExecutorConfig::default()).unwrap();
        assert_eq!(decision.network, NetworkAccess::None);
    }

    #[test]
    fn contradictory_declarations_all_reported() {
        let req = CapabilityRequirements {
            timeout_ms: Some(0),
            memory: Some(MemoryRequirement::Bytes(-1)),
            network: NetworkRequirement::Allow(vec![]),
            filesystem: FilesystemRequirement::Readonly(vec![PathBuf::from("relative/dir")]),
            env: vec!["NOT-VALID".into()],
        };
        let failure = resolve(&req, &open_config()).unwrap_err();
        assert_eq!(failure.violations.len(), 5, "{failure}");
    }

    #[test]
    fn filesystem_grants_only_under_roots() {
        let req = CapabilityRequirements {
            filesystem: FilesystemRequirement::Readonly(vec![
                PathBuf::from("/srv/tools/data"),
                PathBuf::from("/etc"),
            ]),
            ..Default::default()
        };
        match resolve(&req, &open_config()).unwrap().filesystem {
            FilesystemAccess::ReadOnly(grants) => {
                assert_eq!(grants.len(), 1);
                assert_eq!(grants[0].host_path, PathBuf::from("/srv/tools/data"));
                assert_eq!(grants[0].guest_path, "/srv/tools/data");
            }
            other => panic!("expected ReadOnly, got {other:?}"),
        }
    }

    #[test]
    fn parent_dir_escape_rejected() {
        let req = CapabilityRequirements {
            filesystem: FilesystemRequirement::Readonly(vec![PathBuf::from(
                "/srv/tools/../../etc",
            )]),
            ..Default::default()
        };
        assert!(resolve(&req, &open_config()).is_err());
    }

    #[test]
    fn env_is_intersection_with_passthrough() {
        let req = CapabilityRequirements {
            env: vec!["LANG".into(), "AWS_SECRET_ACCESS_KEY".into()],
            ..Default::default()
        };
        let decision = resolve(&req, &open_config()).unwrap();
        assert_eq!(decision.environment.len(), 1);
        assert!(decision.environment.contains("LANG"));
    }

    #[test]
    fn declarations_parse_from_yaml() {
        let yaml = r#"
timeout_ms: 500
memory: unbounded
network:
  allow: ["api.example.com"]
filesystem:
  readonly: ["/srv/tools/data"]
env: [LANG]
"#;
        let req: CapabilityRequirements = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(req.timeout_ms, Some(500));
        assert_eq!(
            req.memory,
            Some(MemoryRequirement::Keyword(MemoryKeyword::Unbounded))
        );
        assert_eq!(
            req.network,
            NetworkRequirement::Allow(vec!["api.example.com".into()])
        );

        let none: CapabilityRequirements =
            serde_yaml::from_str("network: none\nmemory: 1048576\n").unwrap();
        assert_eq!(none.network, NetworkRequirement::None);
        assert_eq!(none.memory, Some(MemoryRequirement::Bytes(1_048_576)));
    }

    #[test]
    fn declarations_parse_from_json() {
        let req: CapabilityRequirements = serde_json::from_value(serde_json::json!({
            "network": "none",
            "filesystem": { "readonly": ["/srv/tools"] }
        }))
        .unwrap();
        assert_eq!(req.network, NetworkRequirement::None);
        assert_eq!(
            req.filesystem,
            FilesystemRequirement::Readonly(vec![PathBuf::from("/srv/tools")])
        );
        let back = serde_json::to_value(&req).unwrap();
        assert_eq!(back["network"], "none");
    }
}
