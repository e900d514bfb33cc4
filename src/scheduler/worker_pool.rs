use anyhow::Result;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};

/// Bounded pool shared by the periodic jobs. At most `size` submitted tasks
/// run at once across every batch drawn from the pool.
pub struct WorkerPool {
    name: String,
    size: usize,
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(name: &str, size: usize) -> Self {
        let size = size.max(1);
        log::info!("[POOL] {} started with {} workers", name, size);
        Self {
            name: name.to_string(),
            size,
            permits: Arc::new(Semaphore::new(size)),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Tasks still waiting for a worker are cancelled; running ones finish.
    pub fn close(&self) {
        if !self.permits.is_closed() {
            log::info!("[POOL] {} closed", self.name);
            self.permits.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }

    pub fn batch(&self) -> Batch {
        Batch {
            pool: self.name.clone(),
            permits: self.permits.clone(),
            tasks: JoinSet::new(),
            total: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Not started before the pool closed, or aborted at the deadline.
    pub cancelled: usize,
}

type TaskResult = (String, Option<Result<()>>);

/// One tick's worth of independent tasks.
pub struct Batch {
    pool: String,
    permits: Arc<Semaphore>,
    tasks: JoinSet<TaskResult>,
    total: usize,
}

impl Batch {
    pub fn submit<F>(&mut self, label: String, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let permits = self.permits.clone();
        self.total += 1;
        self.tasks.spawn(async move {
            match permits.acquire_owned().await {
                Ok(permit) => {
                    let result = task.await;
                    drop(permit);
                    (label, Some(result))
                }
                Err(_) => (label, None),
            }
        });
    }

    pub fn len(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Waits for every task until `deadline`, then aborts what is left.
    /// Task errors and panics are counted, never propagated.
    pub async fn drain(mut self, deadline: Instant) -> BatchReport {
        let mut report = BatchReport {
            total: self.total,
            ..BatchReport::default()
        };

        loop {
            match timeout_at(deadline, self.tasks.join_next()).await {
                Ok(Some(joined)) => tally(&self.pool, joined, &mut report),
                Ok(None) => break,
                Err(_) => {
                    log::warn!(
                        "[POOL] {} batch deadline reached with {} tasks outstanding",
                        self.pool,
                        self.tasks.len()
                    );
                    self.tasks.abort_all();
                    while let Some(joined) = self.tasks.join_next().await {
                        tally(&self.pool, joined, &mut report);
                    }
                    break;
                }
            }
        }
        report
    }
}

fn tally(
    pool: &str,
    joined: std::result::Result<TaskResult, tokio::task::JoinError>,
    report: &mut BatchReport,
) {
    match joined {
        Ok((_, Some(Ok(())))) => report.succeeded += 1,
        Ok((label, Some(Err(err)))) => {
            log::warn!("[POOL] {} task {} failed: {:#}", pool, label, err);
            report.failed += 1;
        }
        Ok((label, None)) => {
            log::debug!("[POOL] {} task {} dropped, pool closed", pool, label);
            report.cancelled += 1;
        }
        Err(err) if err.is_panic() => {
            log::error!("[POOL] {} task panicked: {}", pool, err);
            report.failed += 1;
        }
        Err(_) => report.cancelled += 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(3600)
    }

    #[tokio::test(start_paused = true)]
    async fn failures_and_panics_do_not_stop_the_batch() {
        let pool = WorkerPool::new("test", 2);
        let mut batch = pool.batch();
        for i in 0..5 {
            batch.submit(format!("ok-{}", i), async { Ok(()) });
        }
        batch.submit("err".to_string(), async { Err(anyhow!("exchange down")) });
        batch.submit("panic".to_string(), async { panic!("boom") });

        let report = batch.drain(far_deadline()).await;
        assert_eq!(
            report,
            BatchReport {
                total: 7,
                succeeded: 5,
                failed: 2,
                cancelled: 0,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn never_more_than_pool_size_in_flight() {
        let pool = WorkerPool::new("test", 3);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut batch = pool.batch();
        for i in 0..10 {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            batch.submit(format!("task-{}", i), async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            });
        }

        let report = batch.drain(far_deadline()).await;
        assert_eq!(report.succeeded, 10);
        assert_eq!(peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_cancels_outstanding_tasks() {
        let pool = WorkerPool::new("test", 4);
        let mut batch = pool.batch();
        batch.submit("fast".to_string(), async { Ok(()) });
        for i in 0..3 {
            batch.submit(format!("slow-{}", i), async {
                tokio::time::sleep(Duration::from_secs(600)).await;
                Ok(())
            });
        }

        let report = batch
            .drain(Instant::now() + Duration::from_secs(60))
            .await;
        assert_eq!(report.total, 4);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.cancelled, 3);
        assert_eq!(report.succeeded + report.failed + report.cancelled, report.total);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_pool_cancels_new_work() {
        let pool = WorkerPool::new("test", 2);
        pool.close();
        assert!(pool.is_closed());
        let mut batch = pool.batch();
        batch.submit("late".to_string(), async { Ok(()) });

        let report = batch.drain(far_deadline()).await;
        assert_eq!(report.cancelled, 1);
        assert_eq!(report.succeeded, 0);
    }
}
