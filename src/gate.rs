//! Process-wide limit on concurrent outbound requests.
//!
//! Every network operation (feed, article, image) holds a [`GatePermit`] for
//! the whole request, body read included. The permit is an RAII guard, so it
//! is released on success, on error, and when the owning future is dropped
//! because the run was cancelled.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Semaphore, SemaphorePermit};

/// Default number of simultaneous network operations.
pub const DEFAULT_CONCURRENT_REQUESTS: usize = 5;

/// Counting semaphore shared by every task of a run.
///
/// Cloning is cheap and yields a handle to the same permit pool.
#[derive(Debug, Clone)]
pub struct FetchGate {
    inner: Arc<GateInner>,
}

#[derive(Debug)]
struct GateInner {
    semaphore: Semaphore,
    limit: usize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

/// Proof of admission through a [`FetchGate`]. Dropping it frees the slot.
#[derive(Debug)]
pub struct GatePermit<'a> {
    _permit: SemaphorePermit<'a>,
    gate: &'a GateInner,
}

/// The gate was closed while a task was waiting for a permit.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("fetch gate closed")]
pub struct GateClosed;

impl FetchGate {
    /// Creates a gate admitting `limit` concurrent operations.
    ///
    /// The limit is clamped to `1..=Semaphore::MAX_PERMITS`: a configured
    /// value of 0 would otherwise deadlock every request.
    pub fn new(limit: usize) -> Self {
        let limit = limit.clamp(1, Semaphore::MAX_PERMITS);
        Self {
            inner: Arc::new(GateInner {
                semaphore: Semaphore::new(limit),
                limit,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }),
        }
    }

    /// Waits for a free slot.
    pub async fn acquire(&self) -> Result<GatePermit<'_>, GateClosed> {
        let permit = self.inner.semaphore.acquire().await.map_err(|_| GateClosed)?;

        let now = self.inner.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.inner.peak.fetch_max(now, Ordering::AcqRel);

        Ok(GatePermit {
            _permit: permit,
            gate: &self.inner,
        })
    }

    /// Configured upper bound on concurrent operations.
    pub fn limit(&self) -> usize {
        self.inner.limit
    }

    /// Permits currently free.
    pub fn available(&self) -> usize {
        self.inner.semaphore.available_permits()
    }

    /// Operations holding a permit right now.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// Highest number of simultaneously held permits since the gate was created.
    pub fn peak_in_flight(&self) -> usize {
        self.inner.peak.load(Ordering::Acquire)
    }
}

impl Default for FetchGate {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENT_REQUESTS)
    }
}

impl Drop for GatePermit<'_> {
    fn drop(&mut self) {
        self.gate.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Run-wide abort signal.
///
/// Triggered once (Ctrl-C, SIGTERM, or a caller) and observed by every
/// in-flight request, which then resolves to `FetchError::Cancelled`.
#[derive(Debug, Clone)]
pub struct Cancellation {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Cancellation {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Signals cancellation to every clone of this handle. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Completes once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // The sender lives as long as `self`, so `wait_for` only returns once the flag is set.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}
