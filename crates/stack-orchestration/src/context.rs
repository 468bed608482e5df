//! Operation context shared by every worker of one teardown.
//!
//! The context carries the cancellation signal, the progress sink and the
//! parallelism limiter. It is cheap to clone; all clones observe the same
//! cancellation.

use crate::config::EngineConfig;
use crate::progress::{Event, ProgressWriter};
use crate::runtime::RuntimeResult;
use crate::{Error, Result};
use smol::channel::{self, Receiver, Sender};
use smol::lock::{Semaphore, SemaphoreGuardArc};
use std::future::Future;
use std::sync::Arc;

/// Cancellation signal shared across tasks.
///
/// Cancelling closes an internal channel, which wakes every task waiting
/// in [`CancellationToken::cancelled`].
#[derive(Debug, Clone)]
pub struct CancellationToken {
    sender: Sender<()>,
    receiver: Receiver<()>,
}

impl CancellationToken {
    /// Create a token that is not cancelled
    pub fn new() -> Self {
        let (sender, receiver) = channel::bounded(1);
        Self { sender, receiver }
    }

    /// Cancel every holder of this token
    pub fn cancel(&self) {
        self.sender.close();
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.sender.is_closed()
    }

    /// Resolve once cancellation is requested
    pub async fn cancelled(&self) {
        // Nothing is ever sent: `recv` only returns once the channel closes.
        let _ = self.receiver.recv().await;
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Bounds the number of workers issuing remote calls at the same time
#[derive(Debug, Clone, Default)]
pub struct Limiter {
    semaphore: Option<Arc<Semaphore>>,
}

impl Limiter {
    /// Limit to `max` concurrent workers; `None` means unbounded
    pub fn new(max: Option<usize>) -> Self {
        match max {
            Some(permits) => Self {
                semaphore: Some(Arc::new(Semaphore::new(permits.max(1)))),
            },
            None => Self::unbounded(),
        }
    }

    /// No limit
    pub fn unbounded() -> Self {
        Self { semaphore: None }
    }

    /// Wait for a worker slot; the slot is released when the guard drops
    pub async fn acquire(&self) -> Option<SemaphoreGuardArc> {
        match &self.semaphore {
            Some(semaphore) => Some(semaphore.acquire_arc().await),
            None => None,
        }
    }
}

/// Context object for one teardown operation
#[derive(Clone)]
pub struct OperationContext {
    cancel: CancellationToken,
    progress: Arc<dyn ProgressWriter>,
    limiter: Limiter,
}

impl OperationContext {
    /// Create a context from the engine configuration
    pub fn new(progress: Arc<dyn ProgressWriter>, config: &EngineConfig) -> Self {
        Self {
            cancel: CancellationToken::new(),
            progress,
            limiter: Limiter::new(config.max_parallelism),
        }
    }

    /// Use an externally owned cancellation token
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// The cancellation token
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fail with [`Error::Cancelled`] once cancellation was requested
    pub fn ensure_active(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    /// The parallelism limiter
    pub fn limiter(&self) -> &Limiter {
        &self.limiter
    }

    /// Emit a progress event
    pub fn event(&self, event: Event) {
        self.progress.event(event);
    }

    /// Issue a remote call unless cancelled.
    ///
    /// The outer result is [`Error::Cancelled`] when the call was never issued
    /// or cancellation arrived while waiting; the inner result is the
    /// runtime's own answer, left for the caller to classify.
    pub async fn guard<T, F>(&self, call: F) -> Result<RuntimeResult<T>>
    where
        F: Future<Output = RuntimeResult<T>>,
    {
        self.ensure_active()?;
        smol::future::or(async { Ok(call.await) }, async {
            self.cancel.cancelled().await;
            Err(Error::Cancelled)
        })
        .await
    }
}
