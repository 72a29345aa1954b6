//! Invocation requests and caller-side cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::registry::ToolKey;

/// Lets a caller abandon an in-flight invocation.
///
/// Cancelling interrupts a queued slot wait or a pending fetch immediately, and
/// a running guest at once, whether it is executing or parked in a host call.
/// The context is destroyed as for a timeout. Only the caller ever sets it, so
/// one handle can be shared by a whole session.
#[derive(Debug, Clone, Default)]
pub struct CancellationHandle {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancellationHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Resolves once `cancel` has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// The raw flag polled by the epoch callback.
    pub(crate) fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }
}

/// Budgets past this are treated as "no deadline".
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

/// `start + budget`, saturating instead of overflowing on huge budgets.
pub(crate) fn deadline_after(start: Instant, budget: Duration) -> Instant {
    start
        .checked_add(budget.min(FAR_FUTURE))
        .unwrap_or(start)
}

/// One call of one tool version.
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    pub tool: ToolKey,
    /// Untyped until validated against the tool's input schema.
    pub input: Value,
    pub caller: Option<String>,
    pub trace_id: Uuid,
    /// Budget from submission; the context deadline is the smaller of this
    /// and the tool's granted wall clock.
    pub deadline: Duration,
    pub cancel: CancellationHandle,
}

impl InvocationRequest {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        input: Value,
        deadline: Duration,
    ) -> Self {
        Self {
            tool: ToolKey::new(name, version),
            input,
            caller: None,
            trace_id: Uuid::new_v4(),
            deadline,
            cancel: CancellationHandle::new(),
        }
    }

    pub fn with_caller(mut self, caller: impl Into<String>) -> Self {
        self.caller = Some(caller.into());
        self
    }

    pub fn with_trace_id(mut self, trace_id: Uuid) -> Self {
        self.trace_id = trace_id;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationHandle) -> Self {
        self.cancel = cancel;
        self
    }
}
