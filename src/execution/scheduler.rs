//! Run scheduler - bounds concurrent configurations and applies fail-fast

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Strategy for scheduling matrix configurations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulingStrategy {
    /// One configuration at a time, in matrix order
    #[default]
    Sequential,

    /// Every configuration at once
    Parallel,

    /// At most N configurations at once
    LimitedParallel(usize),
}

impl SchedulingStrategy {
    /// Number of configurations allowed to run at once
    pub fn permits(&self, total_runs: usize, max_parallel: Option<usize>) -> usize {
        let base = match self {
            SchedulingStrategy::Sequential => 1,
            SchedulingStrategy::Parallel => total_runs,
            SchedulingStrategy::LimitedParallel(n) => *n,
        };
        let bounded = match max_parallel {
            Some(limit) => base.min(limit),
            None => base,
        };
        bounded.max(1)
    }
}

/// Hands out run slots and tracks fail-fast cancellation
#[derive(Debug, Clone)]
pub struct RunScheduler {
    semaphore: Arc<Semaphore>,
    cancelled: Arc<AtomicBool>,
    fail_fast: bool,
}

impl RunScheduler {
    pub fn new(strategy: SchedulingStrategy, total_runs: usize, max_parallel: Option<usize>, fail_fast: bool) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(strategy.permits(total_runs, max_parallel))),
            cancelled: Arc::new(AtomicBool::new(false)),
            fail_fast,
        }
    }

    /// Wait for a free slot; `None` once fail-fast has cancelled the matrix
    pub async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        if self.is_cancelled() {
            return None;
        }
        let permit = self.semaphore.clone().acquire_owned().await.ok()?;
        if self.is_cancelled() {
            return None;
        }
        Some(permit)
    }

    /// Record a finished configuration; must be called before its permit drops
    pub fn report(&self, failed: bool) {
        if failed && self.fail_fast {
            self.cancelled.store(true, Ordering::SeqCst);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}
