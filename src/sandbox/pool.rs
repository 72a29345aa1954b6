//! Isolation slot pool — the one contended resource.
//!
//! A fixed number of slots, one per live execution context. A slot is held by
//! a `SlotPermit`, which the context owns; dropping the context frees the slot.
//! Saturation either rejects at once or waits in a bounded queue whose wait is
//! capped by both the configured limit and the caller deadline.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::debug;

use super::request::{deadline_after, CancellationHandle};
use crate::config::SaturationPolicy;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AcquireError {
    #[error("all {pool_size} isolation slots busy")]
    Saturated { pool_size: usize },
    #[error("wait queue full ({max_waiting} already waiting)")]
    QueueFull { max_waiting: usize },
    #[error("no isolation slot freed within {waited_ms}ms")]
    WaitTimedOut { waited_ms: u64 },
    #[error("cancelled while waiting for an isolation slot")]
    Cancelled,
    #[error("slot pool closed")]
    Closed,
}

#[derive(Debug, Default)]
struct Counters {
    active: AtomicUsize,
    peak: AtomicUsize,
    waiting: AtomicUsize,
}

/// Proof of a held slot. Releases on drop.
#[derive(Debug)]
pub struct SlotPermit {
    _permit: OwnedSemaphorePermit,
    counters: Arc<Counters>,
}

impl SlotPermit {
    fn new(permit: OwnedSemaphorePermit, counters: Arc<Counters>) -> Self {
        let active = counters.active.fetch_add(1, Ordering::SeqCst) + 1;
        counters.peak.fetch_max(active, Ordering::SeqCst);
        Self {
            _permit: permit,
            counters,
        }
    }
}

impl Drop for SlotPermit {
    fn drop(&mut self) {
        self.counters.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Decrements the waiting count however the wait ends.
struct Waiting<'a>(&'a AtomicUsize);

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct SlotPool {
    size: usize,
    semaphore: Arc<Semaphore>,
    saturation: SaturationPolicy,
    counters: Arc<Counters>,
}

impl SlotPool {
    pub fn new(size: usize, saturation: SaturationPolicy) -> Self {
        Self {
            size,
            semaphore: Arc::new(Semaphore::new(size)),
            saturation,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Take a slot, applying the saturation policy when none is free.
    pub async fn acquire(
        &self,
        deadline: Instant,
        cancel: &CancellationHandle,
    ) -> Result<SlotPermit, AcquireError> {
        if cancel.is_cancelled() {
            return Err(AcquireError::Cancelled);
        }
        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => return Ok(SlotPermit::new(permit, Arc::clone(&self.counters))),
            Err(TryAcquireError::Closed) => return Err(AcquireError::Closed),
            Err(TryAcquireError::NoPermits) => {}
        }

        let (max_waiting, max_wait) = match &self.saturation {
            SaturationPolicy::Reject => {
                debug!(pool_size = self.size, "pool saturated, rejecting");
                return Err(AcquireError::Saturated {
                    pool_size: self.size,
                });
            }
            SaturationPolicy::Queue {
                max_waiting,
                max_wait_ms,
            } => (*max_waiting, Duration::from_millis(*max_wait_ms)),
        };

        let ahead = self.counters.waiting.fetch_add(1, Ordering::SeqCst);
        let _waiting = Waiting(&self.counters.waiting);
        if ahead >= max_waiting {
            return Err(AcquireError::QueueFull { max_waiting });
        }

        let started = Instant::now();
        let until = deadline.min(deadline_after(started, max_wait));
        debug!(queued = ahead + 1, "pool saturated, queueing");

        tokio::select! {
            acquired = tokio::time::timeout_at(
                until.into(),
                Arc::clone(&self.semaphore).acquire_owned(),
            ) => match acquired {
                Ok(Ok(permit)) => Ok(SlotPermit::new(permit, Arc::clone(&self.counters))),
                Ok(Err(_)) => Err(AcquireError::Closed),
                Err(_) => Err(AcquireError::WaitTimedOut {
                    waited_ms: started.elapsed().as_millis() as u64,
                }),
            },
            _ = cancel.cancelled() => Err(AcquireError::Cancelled),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Slots free right now.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Slots held by live contexts.
    pub fn in_use(&self) -> usize {
        self.counters.active.load(Ordering::SeqCst)
    }

    /// Most slots ever held at once.
    pub fn peak(&self) -> usize {
        self.counters.peak.load(Ordering::SeqCst)
    }

    pub fn waiting(&self) -> usize {
        self.counters.waiting.load(Ordering::SeqCst)
    }
}
