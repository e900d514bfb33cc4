use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Single-flight flag for one periodic job.
pub trait RunGuard: Send + Sync {
    fn name(&self) -> &str;
    /// True when the caller now owns the run.
    fn try_acquire(&self) -> bool;
    fn release(&self);
    fn is_running(&self) -> bool;
    fn skipped(&self) -> u64;
    fn record_skip(&self);
}

#[derive(Debug)]
pub struct AtomicRunGuard {
    name: String,
    running: AtomicBool,
    skips: AtomicU64,
}

impl AtomicRunGuard {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            running: AtomicBool::new(false),
            skips: AtomicU64::new(0),
        }
    }
}

impl RunGuard for AtomicRunGuard {
    fn name(&self) -> &str {
        &self.name
    }

    fn try_acquire(&self) -> bool {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn release(&self) {
        self.running.store(false, Ordering::Release);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn skipped(&self) -> u64 {
        self.skips.load(Ordering::Relaxed)
    }

    fn record_skip(&self) {
        self.skips.fetch_add(1, Ordering::Relaxed);
    }
}

/// Held for the duration of one run; dropping it releases the guard even
/// when the run bails out early or panics.
pub struct RunPermit {
    guard: Arc<dyn RunGuard>,
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        self.guard.release();
    }
}

/// Takes `guard` unless it is already held or one of `peers` is running.
/// A refused entry is counted on `guard` and logged; nothing is queued.
pub fn try_enter(guard: &Arc<dyn RunGuard>, peers: &[Arc<dyn RunGuard>]) -> Option<RunPermit> {
    if !guard.try_acquire() {
        guard.record_skip();
        log::info!(
            "[SCHED] {} still running, tick skipped ({} skipped so far)",
            guard.name(),
            guard.skipped()
        );
        return None;
    }
    let permit = RunPermit {
        guard: guard.clone(),
    };
    if let Some(busy) = peers.iter().find(|peer| peer.is_running()) {
        guard.record_skip();
        log::info!(
            "[SCHED] {} yields to running {}",
            guard.name(),
            busy.name()
        );
        return None;
    }
    Some(permit)
}
