//! Bounded worker pool: N download threads fed through a job channel.

use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::error::FetchError;
use crate::planner::SegmentInfo;
use crate::ratelimit::TokenBucketLimiter;
use crate::storage::PartWriter;
use crate::transport::HttpTransport;

use super::segment;

/// One segment's worth of work handed to a worker.
#[derive(Debug, Clone)]
pub struct DownloadJob {
    pub segment: SegmentInfo,
    pub file_url: String,
    pub part_path: PathBuf,
}

/// What a worker reports back. Workers never touch the resume metadata; the
/// coordinator applies these serially.
#[derive(Debug)]
pub struct DownloadResult {
    pub segment_index: usize,
    pub bytes_written: u64,
    pub error: Option<FetchError>,
    pub completed: bool,
}

/// Per-worker retry knobs (local retries for network-class errors).
#[derive(Debug, Clone, Copy)]
pub struct WorkerTuning {
    pub attempts: u32,
    pub backoff_base: Duration,
}

impl Default for WorkerTuning {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_base: Duration::from_secs(1),
        }
    }
}

pub(super) struct WorkerPool {
    job_tx: Option<SyncSender<DownloadJob>>,
    results: Receiver<DownloadResult>,
    handles: Vec<JoinHandle<()>>,
    cancel: CancelToken,
}

impl WorkerPool {
    /// Spawn `workers` threads sharing one transport, limiter, and part
    /// writer. Channels are bounded at twice the worker count so the feeder
    /// cannot run far ahead of the pool.
    pub(super) fn start(
        workers: usize,
        transport: Arc<HttpTransport>,
        limiter: Arc<TokenBucketLimiter>,
        writer: PartWriter,
        cancel: CancelToken,
        tuning: WorkerTuning,
    ) -> Self {
        let workers = workers.max(1);
        let (job_tx, job_rx) = mpsc::sync_channel::<DownloadJob>(workers * 2);
        let (result_tx, results) = mpsc::sync_channel::<DownloadResult>(workers * 2);
        let job_rx = Arc::new(Mutex::new(job_rx));

        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            let job_rx = Arc::clone(&job_rx);
            let result_tx = result_tx.clone();
            let transport = Arc::clone(&transport);
            let limiter = Arc::clone(&limiter);
            let writer = writer.clone();
            let cancel = cancel.clone();
            handles.push(std::thread::spawn(move || {
                worker_loop(id, job_rx, result_tx, transport, limiter, writer, cancel, tuning);
            }));
        }

        Self {
            job_tx: Some(job_tx),
            results,
            handles,
            cancel,
        }
    }

    /// Hand the job sender to the feeder. Dropping it closes the channel,
    /// which is how workers learn there is no more work.
    pub(super) fn take_sender(&mut self) -> SyncSender<DownloadJob> {
        self.job_tx.take().expect("job sender already taken")
    }

    pub(super) fn results(&self) -> &Receiver<DownloadResult> {
        &self.results
    }

    pub(super) fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Drain outstanding results and join all workers. Draining first keeps a
    /// worker blocked on a full result channel from deadlocking the join.
    pub(super) fn shutdown(mut self) {
        drop(self.job_tx.take());
        loop {
            match self.results.recv_timeout(Duration::from_millis(200)) {
                Ok(_) => continue,
                Err(RecvTimeoutError::Timeout) => {
                    if self.handles.iter().all(|h| h.is_finished()) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.join() {
                tracing::error!("download worker panicked: {:?}", e);
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn worker_loop(
    id: usize,
    job_rx: Arc<Mutex<Receiver<DownloadJob>>>,
    result_tx: SyncSender<DownloadResult>,
    transport: Arc<HttpTransport>,
    limiter: Arc<TokenBucketLimiter>,
    writer: PartWriter,
    cancel: CancelToken,
    tuning: WorkerTuning,
) {
    limiter.register_thread();
    tracing::debug!(worker = id, "worker started");
    loop {
        if cancel.is_cancelled() {
            break;
        }
        let job = {
            let rx = job_rx.lock().unwrap();
            rx.recv_timeout(Duration::from_millis(100))
        };
        match job {
            Ok(job) => {
                let index = job.segment.index;
                let result =
                    segment::download_segment(&job, &transport, &limiter, &writer, &cancel, tuning);
                tracing::debug!(
                    worker = id,
                    segment = index,
                    completed = result.completed,
                    "segment finished"
                );
                if result_tx.send(result).is_err() {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    limiter.unregister_thread();
    tracing::debug!(worker = id, "worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::PartFileBuilder;
    use crate::transport::TransportConfig;

    fn test_pool(dir: &std::path::Path, workers: usize) -> (WorkerPool, CancelToken) {
        let part = dir.join("out.bin.part");
        let mut builder = PartFileBuilder::create(&part).unwrap();
        builder.preallocate(64).unwrap();
        let writer = builder.build();
        let cancel = CancelToken::new();
        let pool = WorkerPool::start(
            workers,
            Arc::new(HttpTransport::new(TransportConfig::default())),
            Arc::new(TokenBucketLimiter::new(0)),
            writer,
            cancel.clone(),
            WorkerTuning::default(),
        );
        (pool, cancel)
    }

    #[test]
    fn pool_workers_register_with_limiter_and_exit_on_close() {
        let dir = tempfile::tempdir().unwrap();
        let (mut pool, _cancel) = test_pool(dir.path(), 3);
        let tx = pool.take_sender();
        drop(tx);
        pool.shutdown();
    }

    #[test]
    fn cancel_stops_idle_workers() {
        let dir = tempfile::tempdir().unwrap();
        let (mut pool, cancel) = test_pool(dir.path(), 2);
        let _tx = pool.take_sender();
        cancel.cancel();
        pool.shutdown();
    }
}
