//! Concurrent execution of independent operations.
//!
//! Teardown favours maximal cleanup over failing fast: every task runs to
//! completion, each outcome is reported exactly once into an
//! [`ErrorCollector`], and the first hard error observed is surfaced.

use crate::cleanup::Operation;
use crate::context::OperationContext;
use crate::runtime::RuntimeClient;
use crate::{Error, Result};
use futures::future::{BoxFuture, FutureExt};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Fan-in collector for the outcomes of concurrent workers
#[derive(Debug, Default)]
pub struct ErrorCollector {
    reported: Mutex<Reports>,
}

#[derive(Debug, Default)]
struct Reports {
    count: usize,
    errors: Vec<Error>,
}

impl ErrorCollector {
    /// Create an empty collector
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Reports> {
        // A poisoned lock only means a reporter panicked; the data is intact.
        self.reported
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Report the outcome of one worker
    pub fn report(&self, outcome: Result<()>) {
        let mut reports = self.lock();
        reports.count += 1;
        if let Err(e) = outcome {
            reports.errors.push(e);
        }
    }

    /// Number of outcomes reported so far
    pub fn reported(&self) -> usize {
        self.lock().count
    }

    /// Number of failures reported so far
    pub fn failures(&self) -> usize {
        self.lock().errors.len()
    }

    /// Take the first failure, leaving the others in place
    pub fn take_first(&self) -> Option<Error> {
        let mut reports = self.lock();
        if reports.errors.is_empty() {
            None
        } else {
            Some(reports.errors.remove(0))
        }
    }
}

/// Run tasks concurrently on the task pool, bounded by the context's limiter.
///
/// Every task runs to completion even when a sibling fails. Returns the first
/// error observed.
pub async fn run_all<I>(ctx: &OperationContext, tasks: I) -> Result<()>
where
    I: IntoIterator<Item = BoxFuture<'static, Result<()>>>,
{
    let collector = Arc::new(ErrorCollector::new());

    let handles: Vec<_> = tasks
        .into_iter()
        .map(|task| {
            let limiter = ctx.limiter().clone();
            let collector = collector.clone();
            smol::spawn(async move {
                let _permit = limiter.acquire().await;
                collector.report(task.await);
            })
        })
        .collect();

    let total = handles.len();
    for handle in handles {
        handle.await;
    }

    debug!(
        "{} tasks finished, {} failed",
        collector.reported(),
        collector.failures()
    );
    debug_assert_eq!(collector.reported(), total);

    match collector.take_first() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Run cleanup operations concurrently, see [`run_all`]
pub async fn run_operations(
    ctx: &OperationContext,
    client: Arc<dyn RuntimeClient>,
    operations: Vec<Operation>,
) -> Result<()> {
    let tasks = operations.into_iter().map(|operation| {
        let ctx = ctx.clone();
        let client = client.clone();
        async move { operation.run(&ctx, client.as_ref()).await }.boxed()
    });
    run_all(ctx, tasks).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::progress::TracingProgress;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn context(max_parallelism: Option<usize>) -> OperationContext {
        let config = EngineConfig {
            max_parallelism,
            ..Default::default()
        };
        OperationContext::new(Arc::new(TracingProgress), &config)
    }

    #[test]
    fn test_collector_keeps_first_error() {
        let collector = ErrorCollector::new();
        collector.report(Ok(()));
        collector.report(Err(Error::Other("first".to_string())));
        collector.report(Err(Error::Other("second".to_string())));

        assert_eq!(collector.reported(), 3);
        assert_eq!(collector.failures(), 2);
        assert!(matches!(collector.take_first(), Some(Error::Other(m)) if m == "first"));
        assert!(matches!(collector.take_first(), Some(Error::Other(m)) if m == "second"));
        assert!(collector.take_first().is_none());
    }

    #[smol_potat::test]
    async fn test_run_all_empty() {
        let tasks: Vec<BoxFuture<'static, Result<()>>> = Vec::new();
        assert!(run_all(&context(None), tasks).await.is_ok());
    }

    #[smol_potat::test]
    async fn test_run_all_lets_siblings_finish() {
        let finished = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<BoxFuture<'static, Result<()>>> = (0..3)
            .map(|i| {
                let finished = finished.clone();
                async move {
                    if i == 1 {
                        return Err(Error::Other("boom".to_string()));
                    }
                    smol::Timer::after(Duration::from_millis(30)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
                .boxed()
            })
            .collect();

        let result = run_all(&context(None), tasks).await;
        assert!(matches!(result, Err(Error::Other(m)) if m == "boom"));
        assert_eq!(finished.load(Ordering::SeqCst), 2);
    }

    #[smol_potat::test]
    async fn test_run_all_respects_limit() {
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<BoxFuture<'static, Result<()>>> = (0..6)
            .map(|_| {
                let current = current.clone();
                let peak = peak.clone();
                async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    smol::Timer::after(Duration::from_millis(10)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
                .boxed()
            })
            .collect();

        run_all(&context(Some(2)), tasks).await.unwrap();
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
