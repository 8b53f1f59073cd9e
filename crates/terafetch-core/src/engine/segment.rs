//! Single-segment download: ranged GET streamed into the part file at the
//! segment offset, rate-limited per chunk, with local retry for
//! network-class failures.

use std::time::Duration;

use crate::cancel::CancelToken;
use crate::error::{ErrorKind, FetchError};
use crate::ratelimit::TokenBucketLimiter;
use crate::storage::PartWriter;
use crate::transport::HttpTransport;

use super::pool::{DownloadJob, DownloadResult, WorkerTuning};

const MAX_WORKER_BACKOFF: Duration = Duration::from_secs(30);

/// Download one segment, retrying network-class errors up to the tuning's
/// attempt budget. Anything else (auth, 4xx, disk) is reported on the first
/// occurrence.
pub(super) fn download_segment(
    job: &DownloadJob,
    transport: &HttpTransport,
    limiter: &TokenBucketLimiter,
    writer: &PartWriter,
    cancel: &CancelToken,
    tuning: WorkerTuning,
) -> DownloadResult {
    let mut result = DownloadResult {
        segment_index: job.segment.index,
        bytes_written: 0,
        error: None,
        completed: false,
    };

    let mut attempt = 1u32;
    loop {
        match download_once(job, transport, limiter, writer, cancel) {
            Ok(bytes) => {
                result.bytes_written = bytes;
                result.completed = true;
                return result;
            }
            Err(e) => {
                if e.kind == ErrorKind::Cancelled {
                    result.error = Some(e);
                    return result;
                }
                let network_class = e.kind == ErrorKind::NetworkTimeout;
                if !network_class || attempt >= tuning.attempts {
                    result.error = Some(annotate(e, job));
                    return result;
                }
                let backoff = tuning
                    .backoff_base
                    .saturating_mul(1 << (attempt - 1).min(8))
                    .min(MAX_WORKER_BACKOFF);
                tracing::debug!(
                    segment = job.segment.index,
                    attempt,
                    ?backoff,
                    error = %e,
                    "segment attempt failed, backing off"
                );
                if !cancel.sleep(backoff) {
                    result.error = Some(FetchError::cancelled());
                    return result;
                }
                attempt += 1;
            }
        }
    }
}

/// One attempt: stream the byte range into the part file. Every chunk first
/// clears the rate limiter, then lands at `segment.start + offset`. The
/// transport guarantees full delivery or a typed error.
fn download_once(
    job: &DownloadJob,
    transport: &HttpTransport,
    limiter: &TokenBucketLimiter,
    writer: &PartWriter,
    cancel: &CancelToken,
) -> Result<u64, FetchError> {
    let segment = &job.segment;
    let base = segment.start;
    transport.get_range_to(
        &job.file_url,
        segment.start,
        segment.end,
        cancel,
        &mut |offset, chunk| {
            limiter.wait(cancel, chunk.len())?;
            writer.write_at(base + offset, chunk)
        },
    )
}

/// Attach segment context; a 429 without a server hint gets the standard
/// 60-second suggestion.
fn annotate(e: FetchError, job: &DownloadJob) -> FetchError {
    let e = if e.kind == ErrorKind::RateLimit && e.code == 429 && e.retry_after.is_none() {
        e.with_retry_after(60)
    } else {
        e
    };
    e.with_context("segment", job.segment.index.to_string())
}
