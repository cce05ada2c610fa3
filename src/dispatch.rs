//! Ordered dispatch scheduler.
//!
//! Inbound handling must be able to preserve arrival order without one slow
//! handler blocking the reader. [`DispatchQueue`] is a double-buffering
//! queue: producers append to a pending buffer and return immediately; a
//! single drain loop swaps pending↔draining and executes the drained items
//! strictly in order, logging per-item failures so one failure never halts
//! the lane.
//!
//! [`Dispatcher`] selects between the ordered lane and plain `tokio::spawn`
//! based on the configured [`DispatchMode`].

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::config::DispatchMode;
use crate::error::Result;

/// A queued unit of inbound work.
pub type DispatchFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

struct Inner {
    /// Producers append here; the drain loop swaps it out wholesale.
    pending: Mutex<Vec<DispatchFuture>>,
    notify: Notify,
    closed: AtomicBool,
}

/// Single-concurrency lane executing items in submission order.
pub struct DispatchQueue {
    inner: Arc<Inner>,
}

impl DispatchQueue {
    /// Create the queue and spawn its drain loop.
    pub fn new() -> Self {
        let inner = Arc::new(Inner {
            pending: Mutex::new(Vec::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        });

        tokio::spawn(drain_loop(inner.clone()));

        Self { inner }
    }

    /// Append an item to the pending buffer; never blocks the producer.
    pub fn submit(&self, item: DispatchFuture) {
        if self.inner.closed.load(Ordering::Acquire) {
            tracing::warn!("dispatch item dropped: queue closed");
            return;
        }
        self.inner
            .pending
            .lock()
            .expect("dispatch queue lock poisoned")
            .push(item);
        self.inner.notify.notify_one();
    }

    /// Stop accepting items; the drain loop exits after the buffers empty.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.notify.notify_one();
    }

    /// Items currently waiting in the pending buffer.
    pub fn pending_count(&self) -> usize {
        self.inner
            .pending
            .lock()
            .expect("dispatch queue lock poisoned")
            .len()
    }
}

impl Default for DispatchQueue {
    fn default() -> Self {
        Self::new()
    }
}

async fn drain_loop(inner: Arc<Inner>) {
    loop {
        let draining = std::mem::take(
            &mut *inner.pending.lock().expect("dispatch queue lock poisoned"),
        );

        if draining.is_empty() {
            if inner.closed.load(Ordering::Acquire) {
                return;
            }
            inner.notify.notified().await;
            continue;
        }

        for item in draining {
            if let Err(e) = item.await {
                tracing::warn!("dispatch item failed: {}", e);
            }
        }
    }
}

/// Routes inbound work according to the configured ordering policy.
#[derive(Clone)]
pub struct Dispatcher {
    mode: DispatchMode,
    queue: Arc<DispatchQueue>,
}

impl Dispatcher {
    /// Create a dispatcher for the given mode.
    pub fn new(mode: DispatchMode) -> Self {
        Self {
            mode,
            queue: Arc::new(DispatchQueue::new()),
        }
    }

    /// Run an inbound work item under the configured policy.
    ///
    /// `Concurrent` spawns it freely; `Ordered` funnels it through the
    /// single-concurrency lane in submission order.
    pub fn dispatch<F>(&self, item: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        match self.mode {
            DispatchMode::Concurrent => {
                tokio::spawn(async move {
                    if let Err(e) = item.await {
                        tracing::warn!("dispatch item failed: {}", e);
                    }
                });
            }
            DispatchMode::Ordered => self.queue.submit(Box::pin(item)),
        }
    }

    /// Stop the ordered lane.
    pub fn close(&self) {
        self.queue.close();
    }
}
