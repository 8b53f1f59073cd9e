//! Progress bar adapter: engine byte totals -> indicatif.

use indicatif::{ProgressBar, ProgressStyle};

use terafetch_core::ProgressFn;

/// Build the engine progress callback and its bar. Quiet mode gets neither.
pub fn make(total_bytes: u64, quiet: bool) -> (Option<ProgressFn>, Option<ProgressBar>) {
    if quiet {
        return (None, None);
    }
    let bar = ProgressBar::new(total_bytes);
    bar.set_style(
        ProgressStyle::with_template(
            "{bytes}/{total_bytes} [{wide_bar}] {percent}% {bytes_per_sec} ETA {eta}",
        )
        .expect("static progress template")
        .progress_chars("=> "),
    );
    let sink = bar.clone();
    let callback: ProgressFn = Box::new(move |bytes| sink.set_position(bytes));
    (Some(callback), Some(bar))
}
