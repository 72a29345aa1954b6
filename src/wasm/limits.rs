//! Store limiter — caps linear memory and records the high-water mark.

use wasmtime::ResourceLimiter;

use crate::policy::ViolationKind;

use super::host::Breach;

/// Upper bound on table elements. Tables hold function references only.
const MAX_TABLE_ELEMENTS: usize = 100_000;

#[derive(Debug, Default)]
pub struct MemoryGuard {
    limit: Option<usize>,
    high_water: usize,
    breach: Option<Breach>,
}

impl MemoryGuard {
    pub fn new(limit: Option<u64>) -> Self {
        Self {
            limit: limit.map(|b| usize::try_from(b).unwrap_or(usize::MAX)),
            high_water: 0,
            breach: None,
        }
    }

    pub fn high_water(&self) -> usize {
        self.high_water
    }

    pub fn take_breach(&mut self) -> Option<Breach> {
        self.breach.take()
    }
}

impl ResourceLimiter for MemoryGuard {
    fn memory_growing(
        &mut self,
        current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> wasmtime::Result<bool> {
        if let Some(limit) = self.limit {
            if desired > limit {
                self.breach = Some(Breach::new(
                    ViolationKind::MemoryLimit,
                    format!("memory growth from {current} to {desired} bytes exceeds limit of {limit}"),
                ));
                return Err(wasmtime::Error::msg("memory limit exceeded"));
            }
        }
        self.high_water = self.high_water.max(desired);
        Ok(true)
    }

    fn table_growing(
        &mut self,
        _current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> wasmtime::Result<bool> {
        Ok(desired <= MAX_TABLE_ELEMENTS)
    }
}
