//! Independent tasks with progress reporting and cooperative cancellation.
//!
//! Cancellation only stops new tasks from starting; a task that has begun
//! runs to completion.

use crate::strategy::{ParallelStrategy, ProcessingMode};
use habitat_core::Result;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Shared flag checked before each task starts
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Called with (completed, total) after each task finishes
pub type Progress<'a> = &'a (dyn Fn(usize, usize) + Sync);

/// Progress callback that ignores updates
pub fn no_progress(_done: usize, _total: usize) {}

/// Run `f` over `items` under `mode`.
///
/// Results keep input order. A task skipped because `cancel` was set yields
/// `None`.
pub fn run_tasks<I, T, F>(
    items: &[I],
    mode: ProcessingMode,
    cancel: &CancelToken,
    progress: Progress<'_>,
    f: F,
) -> Result<Vec<Option<T>>>
where
    I: Sync,
    T: Send,
    F: Fn(&I) -> T + Sync + Send,
{
    let total = items.len();
    let done = AtomicUsize::new(0);
    mode.par_map(0..total, |i| {
        if cancel.is_cancelled() {
            return None;
        }
        let out = f(&items[i]);
        let finished = done.fetch_add(1, Ordering::SeqCst) + 1;
        progress(finished, total);
        Some(out)
    })
}
