//! Store data and the `sandbox` import module.
//!
//! Guest ABI (all pointers are offsets into the exported `memory`):
//!
//! | import              | signature                          |
//! |---------------------|------------------------------------|
//! | `sandbox.output`    | `(ptr, len)`                       |
//! | `sandbox.fail`      | `(ptr, len)`                       |
//! | `sandbox.log`       | `(level, ptr, len)`                |
//! | `sandbox.http_get`  | `(url_ptr, url_len, out_ptr, out_cap) -> i32` |
//!
//! A policy breach records a `Breach` in the store and traps, so the guest
//! never observes the denied operation and never continues past it.

use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use tracing::{debug, trace};
use wasmtime::{Caller, Extern, Linker, Memory};
use wasmtime_wasi::p1::WasiP1Ctx;

use super::error::WasmError;
use super::limits::MemoryGuard;
use crate::policy::{NetworkAccess, ViolationKind};

/// Longest fault payload or log line read from the guest.
const MAX_MESSAGE_BYTES: usize = 4096;

/// A capability boundary the guest tried to cross.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breach {
    pub kind: ViolationKind,
    pub detail: String,
}

impl Breach {
    pub fn new(kind: ViolationKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

/// Why the host stopped a running guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    Deadline,
    Cancelled,
}

impl fmt::Display for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interrupt::Deadline => f.write_str("deadline exceeded"),
            Interrupt::Cancelled => f.write_str("cancelled by caller"),
        }
    }
}

/// HTTP client for granted egress. Requests run on the invoking task.
#[derive(Clone)]
pub struct Egress {
    client: reqwest::Client,
}

impl Egress {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// A client that never follows redirects and ignores proxy settings;
    /// either could carry a request somewhere the allow-list never saw.
    pub fn build_client() -> Result<reqwest::Client, WasmError> {
        reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .build()
            .map_err(|e| WasmError::Capability(format!("http client: {e}")))
    }

    async fn get(&self, url: reqwest::Url, timeout: Duration, cap: usize) -> Result<Vec<u8>, String> {
        let mut response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let mut body = Vec::new();
        while body.len() < cap {
            match response.chunk().await.map_err(|e| e.to_string())? {
                Some(chunk) => body.extend_from_slice(&chunk),
                None => break,
            }
        }
        body.truncate(cap);
        Ok(body)
    }
}

/// Everything a single guest instance can reach.
pub struct HostState {
    pub(crate) wasi: WasiP1Ctx,
    pub(crate) guard: MemoryGuard,
    pub(crate) interrupt: Option<Interrupt>,
    label: String,
    deadline: Instant,
    network: NetworkAccess,
    egress: Option<Egress>,
    max_output_bytes: usize,
    max_log_lines: usize,
    log_lines: usize,
    output: Option<Vec<u8>>,
    failure: Option<Vec<u8>>,
    breach: Option<Breach>,
}

pub(crate) struct HostLimits {
    pub max_output_bytes: usize,
    pub max_log_lines: usize,
}

impl HostState {
    pub(crate) fn new(
        wasi: WasiP1Ctx,
        guard: MemoryGuard,
        label: String,
        deadline: Instant,
        network: NetworkAccess,
        egress: Option<Egress>,
        limits: HostLimits,
    ) -> Self {
        Self {
            wasi,
            guard,
            interrupt: None,
            label,
            deadline,
            network,
            egress,
            max_output_bytes: limits.max_output_bytes,
            max_log_lines: limits.max_log_lines,
            log_lines: 0,
            output: None,
            failure: None,
            breach: None,
        }
    }

    /// The first recorded breach, from either the imports or the memory guard.
    pub(crate) fn take_breach(&mut self) -> Option<Breach> {
        self.breach.take().or_else(|| self.guard.take_breach())
    }

    pub(crate) fn take_output(&mut self) -> Option<Vec<u8>> {
        self.output.take()
    }

    pub(crate) fn take_failure(&mut self) -> Option<Vec<u8>> {
        self.failure.take()
    }

    fn record_breach(&mut self, breach: Breach) -> wasmtime::Error {
        let message = format!("{}: {}", breach.kind, breach.detail);
        if self.breach.is_none() {
            self.breach = Some(breach);
        }
        wasmtime::Error::msg(message)
    }
}

/// Register the `sandbox` module on a linker.
pub fn link(linker: &mut Linker<HostState>) -> Result<(), WasmError> {
    linker
        .func_wrap("sandbox", "output", output)
        .and_then(|l| l.func_wrap("sandbox", "fail", fail))
        .and_then(|l| l.func_wrap("sandbox", "log", log))
        .and_then(|l| l.func_wrap_async("sandbox", "http_get", http_get))
        .map_err(|e| WasmError::Link(e.to_string()))?;
    Ok(())
}

fn guest_memory(caller: &mut Caller<'_, HostState>) -> wasmtime::Result<Memory> {
    caller
        .get_export("memory")
        .and_then(Extern::into_memory)
        .ok_or_else(|| wasmtime::Error::msg("guest does not export `memory`"))
}

fn read_guest(
    caller: &mut Caller<'_, HostState>,
    ptr: i32,
    len: usize,
) -> wasmtime::Result<Vec<u8>> {
    if ptr < 0 {
        return Err(wasmtime::Error::msg("negative guest pointer"));
    }
    let memory = guest_memory(caller)?;
    let mut buf = vec![0u8; len];
    memory
        .read(&*caller, ptr as usize, &mut buf)
        .map_err(|e| wasmtime::Error::msg(format!("guest read out of bounds: {e}")))?;
    Ok(buf)
}

fn guest_len(len: i32) -> wasmtime::Result<usize> {
    usize::try_from(len).map_err(|_| wasmtime::Error::msg("negative guest length"))
}

fn output(mut caller: Caller<'_, HostState>, ptr: i32, len: i32) -> wasmtime::Result<()> {
    let len = guest_len(len)?;
    let limit = caller.data().max_output_bytes;
    if len > limit {
        let breach = Breach::new(
            ViolationKind::OutputTooLarge,
            format!("output of {len} bytes exceeds limit of {limit}"),
        );
        return Err(caller.data_mut().record_breach(breach));
    }
    let bytes = read_guest(&mut caller, ptr, len)?;
    caller.data_mut().output = Some(bytes);
    Ok(())
}

fn fail(mut caller: Caller<'_, HostState>, ptr: i32, len: i32) -> wasmtime::Result<()> {
    let len = guest_len(len)?.min(MAX_MESSAGE_BYTES);
    let bytes = read_guest(&mut caller, ptr, len)?;
    caller.data_mut().failure = Some(bytes);
    Ok(())
}

fn log(mut caller: Caller<'_, HostState>, level: i32, ptr: i32, len: i32) -> wasmtime::Result<()> {
    let state = caller.data_mut();
    if state.log_lines >= state.max_log_lines {
        return Ok(());
    }
    state.log_lines += 1;
    let len = guest_len(len)?.min(MAX_MESSAGE_BYTES);
    let bytes = read_guest(&mut caller, ptr, len)?;
    let line = String::from_utf8_lossy(&bytes);
    let tool = caller.data().label.as_str();
    match level {
        0 => trace!(tool, "{line}"),
        _ => debug!(tool, level, "{line}"),
    }
    Ok(())
}

/// Async so that a slow upstream never holds a context past its deadline:
/// dropping the guest call drops the request with it.
fn http_get<'a>(
    mut caller: Caller<'a, HostState>,
    (url_ptr, url_len, out_ptr, out_cap): (i32, i32, i32, i32),
) -> Box<dyn Future<Output = wasmtime::Result<i32>> + Send + 'a> {
    Box::new(async move {
        let url_len = guest_len(url_len)?.min(MAX_MESSAGE_BYTES);
        let out_cap = guest_len(out_cap)?;
        let raw = read_guest(&mut caller, url_ptr, url_len)?;
        let Ok(url) = std::str::from_utf8(&raw)
            .map_err(|e| e.to_string())
            .and_then(|s| reqwest::Url::parse(s).map_err(|e| e.to_string()))
        else {
            return Ok(-1);
        };
        let Some(host) = url.host_str().map(str::to_owned) else {
            return Ok(-1);
        };

        // Checked before any socket exists.
        if !matches!(url.scheme(), "http" | "https") || !caller.data().network.allows(&host) {
            let breach = Breach::new(
                ViolationKind::NetworkEgress,
                format!("egress to '{host}' is not granted"),
            );
            return Err(caller.data_mut().record_breach(breach));
        }

        let state = caller.data();
        let Some(egress) = state.egress.clone() else {
            return Ok(-1);
        };
        let remaining = state.deadline.saturating_duration_since(Instant::now());
        debug!(tool = %state.label, host = %host, "egress request");

        let body = match egress.get(url, remaining, out_cap).await {
            Ok(body) => body,
            Err(e) => {
                debug!(host = %host, error = %e, "egress request failed");
                return Ok(-1);
            }
        };
        if out_ptr < 0 {
            return Ok(-1);
        }
        let memory = guest_memory(&mut caller)?;
        memory
            .write(&mut caller, out_ptr as usize, &body)
            .map_err(|e| wasmtime::Error::msg(format!("guest write out of bounds: {e}")))?;
        Ok(body.len() as i32)
    })
}
