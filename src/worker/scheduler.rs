//! Bounded-concurrency task execution with per-block instrumentation.

use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use log::{debug, warn};

#[derive(Default)]
struct TimerInner {
    completed: usize,
    failed: usize,
    total: Duration,
    max: Duration,
    max_span: String,
    failures: Vec<String>,
}

/// Collects per-task spans for one block so the drain can be summarized in
/// a single log line.
#[derive(Default)]
pub struct TaskTimer {
    inner: Mutex<TimerInner>,
}

impl TaskTimer {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, span: &str, elapsed: Duration, error: Option<&anyhow::Error>) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };

        inner.completed += 1;
        inner.total += elapsed;
        if elapsed > inner.max {
            inner.max = elapsed;
            inner.max_span = span.to_string();
        }
        if let Some(e) = error {
            inner.failed += 1;
            inner.failures.push(format!("{}: {:#}", span, e));
        }
    }

    pub fn failed_count(&self) -> usize {
        self.inner.lock().map(|i| i.failed).unwrap_or(0)
    }

    /// One summary line per drain; failures are listed individually at warn.
    pub fn log_summary(&self, height: i64) {
        let Ok(inner) = self.inner.lock() else {
            return;
        };
        if inner.completed == 0 {
            return;
        }

        debug!(
            "Height {}: {} tasks in {:?} (slowest {} at {:?}, {} failed)",
            height, inner.completed, inner.total, inner.max_span, inner.max, inner.failed
        );
        for failure in &inner.failures {
            warn!("Height {}: task failed: {}", height, failure);
        }
    }
}

/// Run tasks with at most `limit` in flight, returning once all finish.
///
/// Tasks are independent: a failure is recorded in the timer and never
/// cancels its siblings.
pub async fn run_with_concurrency<F>(
    tasks: Vec<F>,
    limit: usize,
    timer: &TaskTimer,
    label: &str,
) where
    F: Future<Output = anyhow::Result<()>>,
{
    if tasks.is_empty() {
        return;
    }

    let limit = limit.max(1);
    stream::iter(tasks.into_iter().enumerate().map(|(idx, task)| {
        let span = format!("{}#{}", label, idx);
        async move {
            let started = Instant::now();
            let result = task.await;
            timer.record(&span, started.elapsed(), result.as_ref().err());
        }
    }))
    .buffer_unordered(limit)
    .collect::<Vec<()>>()
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn respects_the_concurrency_cap() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..20)
            .map(|_| {
                let running = running.clone();
                let peak = peak.clone();
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .collect();

        let timer = TaskTimer::new();
        run_with_concurrency(tasks, 4, &timer, "test").await;

        assert!(peak.load(Ordering::SeqCst) <= 4);
        assert_eq!(timer.failed_count(), 0);
    }

    #[tokio::test]
    async fn task_failure_does_not_cancel_siblings() {
        let finished = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for i in 0..6 {
            let finished = finished.clone();
            tasks.push(async move {
                if i == 2 {
                    anyhow::bail!("boom");
                }
                finished.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        let timer = TaskTimer::new();
        run_with_concurrency(tasks, 3, &timer, "test").await;

        assert_eq!(finished.load(Ordering::SeqCst), 5);
        assert_eq!(timer.failed_count(), 1);
    }
}
