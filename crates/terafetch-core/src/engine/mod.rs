//! Download coordinator: resume detection, planning, pool execution, size
//! verification, and the final atomic rename.
//!
//! The coordinator owns the resume sidecar. Workers only return
//! `DownloadResult`s; every metadata update happens here, serially, so the
//! record on disk always reflects a state the download actually reached.

mod pool;
mod segment;

pub use pool::{DownloadJob, DownloadResult, WorkerTuning};

use std::path::{Path, PathBuf};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::AuthContext;
use crate::cancel::CancelToken;
use crate::config::DownloadConfig;
use crate::error::{ErrorKind, FetchError};
use crate::planner::{self, SegmentInfo, PART_SUFFIX};
use crate::progress::{noop_progress, ProgressFn};
use crate::ratelimit::TokenBucketLimiter;
use crate::resolver::FileMetadata;
use crate::storage::{self, PartFileBuilder, PartWriter};
use crate::transport::{HttpTransport, RetryConfig, TransportConfig};

/// Retry/backoff knobs for the engine. Production defaults follow the
/// transport's schedule; tests shrink the bases to keep wall time down.
#[derive(Debug, Clone, Copy)]
pub struct EngineTuning {
    /// Transport-level retry (per HTTP call).
    pub transport_retry: RetryConfig,
    /// Worker-local attempts per segment for network-class errors.
    pub worker_attempts: u32,
    pub worker_backoff_base: Duration,
    /// Whole-download attempts in the coordinator.
    pub global_attempts: u32,
    pub global_backoff_base: Duration,
    /// One "second" of the quadratic per-segment recovery backoff.
    pub recovery_backoff_unit: Duration,
}

impl Default for EngineTuning {
    fn default() -> Self {
        Self {
            transport_retry: RetryConfig::default(),
            worker_attempts: 3,
            worker_backoff_base: Duration::from_secs(1),
            global_attempts: 3,
            global_backoff_base: Duration::from_secs(1),
            recovery_backoff_unit: Duration::from_secs(1),
        }
    }
}

/// Post-rename hook, e.g. checksum verification. Receives the final path and
/// the checksum the resolver reported, if any.
pub type FinalizeHook = Box<dyn Fn(&Path, Option<&str>) -> Result<(), FetchError> + Send + Sync>;

/// Multi-threaded segmented download engine.
pub struct DownloadEngine {
    auth: Option<AuthContext>,
    tuning: EngineTuning,
    finalize_hook: Option<FinalizeHook>,
}

impl Default for DownloadEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DownloadEngine {
    pub fn new() -> Self {
        Self {
            auth: None,
            tuning: EngineTuning::default(),
            finalize_hook: None,
        }
    }

    pub fn with_auth(mut self, auth: AuthContext) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_tuning(mut self, tuning: EngineTuning) -> Self {
        self.tuning = tuning;
        self
    }

    /// Install a hook that runs after the atomic rename (content checks are
    /// otherwise out of the engine's hands; it verifies size only).
    pub fn with_finalize_hook(mut self, hook: FinalizeHook) -> Self {
        self.finalize_hook = Some(hook);
        self
    }

    /// Download `meta` according to `config`, with automatic resume
    /// detection. Blocks until completion, failure, or cancellation.
    pub fn download(&self, meta: &FileMetadata, config: &DownloadConfig) -> Result<(), FetchError> {
        self.download_with(meta, config, &CancelToken::new(), None)
    }

    pub fn download_with(
        &self,
        meta: &FileMetadata,
        config: &DownloadConfig,
        cancel: &CancelToken,
        progress: Option<ProgressFn>,
    ) -> Result<(), FetchError> {
        config.validate()?;
        let output = if config.output_path.as_os_str().is_empty() {
            PathBuf::from(&meta.filename)
        } else {
            config.output_path.clone()
        };
        storage::ensure_dir(&output)?;
        let part = storage::part_path(&output);

        // Resume detection. Auto-recovery errors never propagate on first
        // occurrence: the offending files were already removed, so fall
        // through to a fresh plan.
        let mut resume_data = config.resume_data.clone();
        if resume_data.is_none() {
            match planner::detect_resumable(&output) {
                Ok(found) => resume_data = found,
                Err(e) => tracing::warn!(error = %e, "discarded unusable resume state"),
            }
        }

        let mut resuming = false;
        let mut segments: Vec<SegmentInfo>;
        if let Some(resume) = resume_data {
            match planner::validate_resume_compatibility(&resume, meta) {
                Ok(()) => {
                    tracing::info!(
                        progress = %format!("{:.1}%", planner::resume_progress_percent(&resume.segments)),
                        "resuming download"
                    );
                    segments = resume.segments;
                    resuming = true;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "resume incompatible, starting fresh");
                    let _ = planner::cleanup_resume_metadata(&output);
                    let _ = std::fs::remove_file(&part);
                    segments = planner::plan(meta, &fresh_config(config))?;
                }
            }
        } else {
            segments = planner::plan(meta, &fresh_config(config))?;
        }

        // Part file: validate for a resumed run, falling back to a fresh
        // start when it cannot back the download (auto-recovery, not an
        // error on first occurrence).
        if resuming {
            if let Err(e) = storage::validate_partial_file(&part, meta.size) {
                tracing::warn!(error = %e, "partial file unusable, starting fresh");
                let _ = planner::cleanup_resume_metadata(&output);
                let _ = std::fs::remove_file(&part);
                resuming = false;
                segments = planner::plan(meta, &fresh_config(config))?;
            }
        }
        if !resuming {
            let mut builder = PartFileBuilder::create(&part)?;
            builder.preallocate(meta.size)?;
            drop(builder.build());
        }

        // Persist before the first byte moves: a crash right here still
        // leaves a valid resume record.
        planner::save_resume_metadata(&output, meta, &segments)?;

        let transport = Arc::new(HttpTransport::new(TransportConfig {
            proxy_url: config.proxy_url.clone(),
            retry: Some(self.tuning.transport_retry),
            auth: self.auth.clone(),
            ..TransportConfig::default()
        }));
        let limiter = Arc::new(TokenBucketLimiter::new(config.rate_limit_bps));
        let progress = progress.unwrap_or_else(noop_progress);

        let mut attempt = 1u32;
        loop {
            match self.execute(meta, &segments, &output, &part, config, &transport, &limiter, cancel, &progress) {
                Ok(()) => break,
                Err(e) => {
                    if e.kind == ErrorKind::Cancelled
                        || !globally_retryable(&e)
                        || attempt >= self.tuning.global_attempts
                    {
                        return Err(e);
                    }
                    tracing::warn!(attempt, error = %e, "download attempt failed, retrying");
                    // Pick up whatever the failed attempt completed.
                    match planner::load_resume_metadata(&output) {
                        Ok(record) => segments = record.segments,
                        Err(load_err) => {
                            tracing::warn!(error = %load_err, "could not reload segment state")
                        }
                    }
                    let delay = self
                        .tuning
                        .global_backoff_base
                        .saturating_mul(1 << (attempt - 1).min(8));
                    if !cancel.sleep(delay) {
                        return Err(FetchError::cancelled());
                    }
                    attempt += 1;
                }
            }
        }

        // Verify integrity by size, then make the result visible atomically.
        let actual = storage::file_size(&part)?;
        if actual != meta.size {
            return Err(FetchError::new(
                ErrorKind::DownloadFailed,
                0,
                format!("size mismatch: expected {} bytes, got {}", meta.size, actual),
            )
            .with_context("part_path", part.display().to_string()));
        }
        let writer = PartWriter::open_existing(&part)?;
        if let Err(e) = writer.sync() {
            tracing::warn!(error = %e, "sync before rename failed");
        }
        writer.finalize(&output)?;

        if let Err(e) = planner::cleanup_resume_metadata(&output) {
            tracing::warn!(error = %e, "failed to remove resume metadata");
        }
        if let Some(ref hook) = self.finalize_hook {
            hook(&output, meta.checksum.as_deref())?;
        }
        tracing::info!(path = %output.display(), size = meta.size, "download complete");
        Ok(())
    }

    /// Re-attach to an interrupted download from its `.part` (or output)
    /// path. The stored metadata supplies the file facts and segment state.
    pub fn resume(&self, partial_path: &Path, config: &DownloadConfig) -> Result<(), FetchError> {
        self.resume_with(partial_path, config, &CancelToken::new(), None)
    }

    pub fn resume_with(
        &self,
        partial_path: &Path,
        config: &DownloadConfig,
        cancel: &CancelToken,
        progress: Option<ProgressFn>,
    ) -> Result<(), FetchError> {
        let output = strip_part_suffix(partial_path);
        let record = planner::load_resume_metadata(&output)?;
        let meta = record.file_metadata.clone();
        let mut config = config.clone();
        config.output_path = output;
        config.resume_data = Some(record);
        self.download_with(&meta, &config, cancel, progress)
    }

    /// One pool run over the incomplete segments. Returns Ok when every
    /// segment is complete; the caller owns verification and rename.
    #[allow(clippy::too_many_arguments)]
    fn execute(
        &self,
        meta: &FileMetadata,
        segments: &[SegmentInfo],
        output: &Path,
        part: &Path,
        config: &DownloadConfig,
        transport: &Arc<HttpTransport>,
        limiter: &Arc<TokenBucketLimiter>,
        cancel: &CancelToken,
        progress: &ProgressFn,
    ) -> Result<(), FetchError> {
        let incomplete = planner::incomplete_segments(segments);
        let total = segments.len();
        let mut completed = total - incomplete.len();
        let mut total_bytes: u64 = segments
            .iter()
            .filter(|s| s.completed)
            .map(|s| s.len())
            .sum();
        progress(total_bytes);

        if incomplete.is_empty() {
            return Ok(());
        }

        let writer = PartWriter::open_existing(part)?;
        let workers = config.normalized_threads().min(incomplete.len());
        // The pool gets its own token: aborting one attempt must not look
        // like a user cancellation to the global retry loop. User cancels
        // propagate through the coordinator below.
        let pool_cancel = CancelToken::new();
        let mut pool = pool::WorkerPool::start(
            workers,
            Arc::clone(transport),
            Arc::clone(limiter),
            writer,
            pool_cancel.clone(),
            WorkerTuning {
                attempts: self.tuning.worker_attempts,
                backoff_base: self.tuning.worker_backoff_base,
            },
        );

        let job_tx = pool.take_sender();
        let feeder_cancel = pool_cancel.clone();
        let url = meta.direct_url.clone();
        let part_path = part.to_path_buf();
        let feeder = std::thread::spawn(move || {
            for segment in incomplete {
                if feeder_cancel.is_cancelled() {
                    break;
                }
                let job = DownloadJob {
                    segment,
                    file_url: url.clone(),
                    part_path: part_path.clone(),
                };
                if job_tx.send(job).is_err() {
                    break;
                }
            }
        });

        let mut failure: Option<(usize, FetchError)> = None;
        while completed < total {
            match pool.results().recv_timeout(Duration::from_millis(100)) {
                Ok(mut result) => {
                    if let Some(err) = result.error.take() {
                        failure = Some((result.segment_index, err));
                        break;
                    }
                    if result.completed {
                        if let Err(e) =
                            planner::update_segment_progress(output, result.segment_index, true)
                        {
                            tracing::warn!(error = %e, "failed to persist segment progress");
                        }
                        completed += 1;
                        total_bytes += result.bytes_written;
                        progress(total_bytes);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    if cancel.is_cancelled() {
                        failure = Some((usize::MAX, FetchError::cancelled()));
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    failure = Some((
                        usize::MAX,
                        FetchError::new(
                            ErrorKind::DownloadFailed,
                            0,
                            "workers exited before all segments completed",
                        ),
                    ));
                    break;
                }
            }
        }

        pool.cancel();
        pool.shutdown();
        if let Err(e) = feeder.join() {
            tracing::error!("job feeder panicked: {:?}", e);
        }

        match failure {
            None => Ok(()),
            Some((index, err)) => {
                if err.kind == ErrorKind::Cancelled {
                    tracing::info!("download cancelled; partial state kept for resume");
                    return Err(err);
                }
                tracing::warn!(segment = index, error = %err, "segment failed, aborting attempt");
                // Track the failure against the segment's retry budget; a
                // spent budget turns the error terminal.
                if index != usize::MAX && err.kind == ErrorKind::NetworkTimeout {
                    planner::recover_from_network_interruption(
                        output,
                        index,
                        cancel,
                        self.tuning.recovery_backoff_unit,
                    )?;
                }
                Err(err)
            }
        }
    }
}

/// The same config without resume state, for planning a fresh run.
fn fresh_config(config: &DownloadConfig) -> DownloadConfig {
    DownloadConfig {
        resume_data: None,
        ..config.clone()
    }
}

/// Coordinator-level retry covers transient network trouble. Rate limiting
/// is excluded: the server told us to back off, and hammering it with the
/// global retry cycle would only dig the hole deeper.
fn globally_retryable(e: &FetchError) -> bool {
    match e.kind {
        ErrorKind::NetworkTimeout => true,
        ErrorKind::InvalidResponse => e.code >= 500,
        _ => false,
    }
}

/// `<output>.part` -> `<output>`; anything else passes through.
fn strip_part_suffix(path: &Path) -> PathBuf {
    match path.to_str() {
        Some(s) if s.ends_with(PART_SUFFIX) => {
            PathBuf::from(&s[..s.len() - PART_SUFFIX.len()])
        }
        _ => path.to_path_buf(),
    }
}
