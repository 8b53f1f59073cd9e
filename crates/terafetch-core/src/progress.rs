//! Progress reporting seam.
//!
//! The engine reports monotonic byte totals; rendering (progress bars, logs)
//! is entirely the caller's business. Quiet mode simply passes the no-op.

/// Called with the total number of bytes accounted for so far. Totals never
/// decrease within one engine run.
pub type ProgressFn = Box<dyn Fn(u64) + Send + Sync>;

/// A callback that ignores every update.
pub fn noop_progress() -> ProgressFn {
    Box::new(|_| {})
}
