//! WASI capability grants — structural security for guest tools.
//!
//! Default = nothing. No filesystem, no env, no stdio, no sockets.
//! The WASI context is built from a resolved `PolicyDecision`, so a capability
//! that was not granted has no handle inside the guest at all.

use wasmtime_wasi::filesystem::{DirPerms, FilePerms};
use wasmtime_wasi::p1::WasiP1Ctx;
use wasmtime_wasi::WasiCtxBuilder;

use super::error::WasmError;
use crate::policy::{FilesystemAccess, PolicyDecision};

/// Build a preview-1 WASI context carrying exactly the granted capabilities.
///
/// Exposed env vars take their values from the host environment; a granted
/// name that is unset on the host is simply absent in the guest.
pub fn build_wasi_ctx(policy: &PolicyDecision) -> Result<WasiP1Ctx, WasmError> {
    let mut builder = WasiCtxBuilder::new();

    for name in &policy.environment {
        if let Ok(value) = std::env::var(name) {
            builder.env(name, &value);
        }
    }

    if let FilesystemAccess::ReadOnly(grants) = &policy.filesystem {
        for grant in grants {
            if !grant.host_path.is_dir() {
                return Err(WasmError::Capability(format!(
                    "host path does not exist: {}",
                    grant.host_path.display()
                )));
            }
            builder
                .preopened_dir(
                    &grant.host_path,
                    &grant.guest_path,
                    DirPerms::READ,
                    FilePerms::READ,
                )
                .map_err(|e| {
                    WasmError::Capability(format!(
                        "failed to preopen '{}' → '{}': {e}",
                        grant.host_path.display(),
                        grant.guest_path
                    ))
                })?;
        }
    }

    Ok(builder.build_p1())
}
