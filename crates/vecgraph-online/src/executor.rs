//! Worker pool for evaluating independent nodes of one graph level.

use std::thread;

use tracing::trace;
use vecgraph_types::ConcurrencySettings;

/// Upper bound on worker threads.
pub const MAX_WORKER_COUNT: usize = 32;

/// Runs a closure over a batch of items, in parallel when enabled.
///
/// Results keep the order of the items. Batches of at most one item always
/// run on the calling thread.
#[derive(Debug, Clone, Copy)]
pub struct ConcurrentExecutor {
    enabled: bool,
    max_workers: usize,
}

impl Default for ConcurrentExecutor {
    fn default() -> Self {
        Self::sequential()
    }
}

impl ConcurrentExecutor {
    pub fn new(enabled: bool, max_workers: usize) -> Self {
        Self {
            enabled,
            max_workers: max_workers.clamp(1, MAX_WORKER_COUNT),
        }
    }

    pub fn sequential() -> Self {
        Self::new(false, 1)
    }

    pub fn from_settings(settings: &ConcurrencySettings) -> Self {
        Self::new(settings.enabled, settings.max_workers)
    }

    /// `min(32, 2 x cpu)`
    pub fn optimal_workers() -> usize {
        let cpus = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        (cpus * 2).min(MAX_WORKER_COUNT)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn execute<T, R, F>(&self, items: &[T], f: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync,
    {
        if !self.enabled || items.len() <= 1 || self.max_workers == 1 {
            return items.iter().map(f).collect();
        }
        let workers = self.max_workers.min(items.len());
        let chunk_size = items.len().div_ceil(workers);
        trace!(items = items.len(), workers, "Executing concurrently");
        let f = &f;
        thread::scope(|scope| {
            let handles: Vec<_> = items
                .chunks(chunk_size)
                .map(|chunk| scope.spawn(move || chunk.iter().map(f).collect::<Vec<R>>()))
                .collect();
            handles
                .into_iter()
                .flat_map(|handle| handle.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
                .collect()
        })
    }
}
