//! Rate-limited task queue
//!
//! Every outbound marketplace request passes through one `ThrottledQueue`.
//! Exactly one task runs at a time; after a task settles the worker waits a
//! fixed gap derived from the requests-per-minute budget before starting the
//! next. Producers never coordinate with each other — overlapping cycles and
//! on-demand refreshes all enqueue into the same queue, so the outbound rate
//! stays bounded no matter how many of them there are.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Error returned when the queue worker has shut down.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("throttled queue is closed")]
pub struct QueueClosed;

/// Single-concurrency FIFO queue with a minimum inter-task delay.
pub struct ThrottledQueue {
    tx: mpsc::UnboundedSender<Job>,
    interval: Duration,
    executed: Arc<AtomicU64>,
}

impl ThrottledQueue {
    /// Create a queue budgeted at `safe_rpm` requests per minute.
    ///
    /// # Panics
    /// Panics if `safe_rpm` is zero.
    pub fn new(safe_rpm: u32) -> Self {
        let interval = Self::interval_for(safe_rpm);
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let executed = Arc::new(AtomicU64::new(0));

        let counter = Arc::clone(&executed);
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job.await;
                counter.fetch_add(1, Ordering::Relaxed);
                tokio::time::sleep(interval).await;
            }
            debug!("throttled queue worker stopped");
        });

        Self {
            tx,
            interval,
            executed,
        }
    }

    /// Minimum gap between task starts for a given budget.
    pub fn interval_for(safe_rpm: u32) -> Duration {
        assert!(safe_rpm > 0, "safe_rpm must be positive");
        Duration::from_millis(60_000u64.div_ceil(safe_rpm as u64))
    }

    /// The gap this queue enforces.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Tasks executed so far.
    pub fn executed(&self) -> u64 {
        self.executed.load(Ordering::Relaxed)
    }

    /// Enqueue a task and wait for its result.
    ///
    /// Tasks run FIFO. A task's failure is its own result value; it never
    /// blocks or poisons the tasks behind it.
    pub async fn enqueue<T, F>(&self, task: F) -> Result<T, QueueClosed>
    where
        T: Send + 'static,
        F: Future<Output = T> + Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let job: Job = Box::pin(async move {
            // Receiver may have been dropped; the task still counts against
            // the rate budget either way.
            let _ = done_tx.send(task.await);
        });
        self.tx.send(job).map_err(|_| QueueClosed)?;
        done_rx.await.map_err(|_| QueueClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_interval_rounds_up() {
        assert_eq!(
            ThrottledQueue::interval_for(7),
            Duration::from_millis(8572) // ceil(60000 / 7)
        );
        assert_eq!(ThrottledQueue::interval_for(60), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_tasks_run_fifo() {
        let queue = Arc::new(ThrottledQueue::new(60_000)); // 1ms gap
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for n in 0..5u32 {
            let queue = Arc::clone(&queue);
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                queue
                    .enqueue(async move {
                        order.lock().unwrap().push(n);
                    })
                    .await
                    .unwrap();
            }));
            // Give each enqueue a chance to land before the next.
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_failed_task_does_not_block_next() {
        let queue = ThrottledQueue::new(60_000);

        let failed: Result<(), &str> = queue.enqueue(async { Err("boom") }).await.unwrap();
        assert!(failed.is_err());

        let ok: Result<u32, &str> = queue.enqueue(async { Ok(7) }).await.unwrap();
        assert_eq!(ok, Ok(7));
        assert_eq!(queue.executed(), 2);
    }

    #[tokio::test]
    async fn test_minimum_gap_between_task_starts() {
        // 1200 rpm → 50ms gap; fast tasks make the gap dominate.
        let queue = Arc::new(ThrottledQueue::new(1200));
        let starts = Arc::new(std::sync::Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for _ in 0..3 {
            let queue = Arc::clone(&queue);
            let starts = Arc::clone(&starts);
            handles.push(tokio::spawn(async move {
                queue
                    .enqueue(async move {
                        starts.lock().unwrap().push(Instant::now());
                    })
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let starts = starts.lock().unwrap();
        assert_eq!(starts.len(), 3);
        let mut sorted = starts.clone();
        sorted.sort();
        for pair in sorted.windows(2) {
            let gap = pair[1].duration_since(pair[0]);
            assert!(
                gap >= Duration::from_millis(50),
                "tasks started {gap:?} apart, expected at least 50ms"
            );
        }
    }
}
