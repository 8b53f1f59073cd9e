//! End-to-end tests against a local range-capable fixture server: fresh
//! multi-segment downloads, resume after interruption, fault classification,
//! user-agent rotation, and cancellation.

mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use terafetch_core::engine::{DownloadEngine, EngineTuning};
use terafetch_core::planner;
use terafetch_core::transport::{HttpTransport, RetryConfig, TransportConfig};
use terafetch_core::{
    CancelToken, DirectResolver, DownloadConfig, ErrorKind, FileMetadata, LinkResolver,
};

use common::range_server::{self, RangeServerOptions};

/// The byte pattern served by the fixture in most tests.
fn pattern_body(len: usize) -> Vec<u8> {
    b"Integration Test Data! "
        .iter()
        .copied()
        .cycle()
        .take(len)
        .collect()
}

/// Millisecond-scale retry schedule so failure-path tests stay fast.
fn fast_tuning() -> EngineTuning {
    EngineTuning {
        transport_retry: RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            multiplier: 2.0,
            jitter: 0.1,
        },
        worker_attempts: 3,
        worker_backoff_base: Duration::from_millis(10),
        global_attempts: 3,
        global_backoff_base: Duration::from_millis(10),
        recovery_backoff_unit: Duration::from_millis(5),
    }
}

fn test_engine() -> DownloadEngine {
    DownloadEngine::new().with_tuning(fast_tuning())
}

fn meta_for(server_url: &str, filename: &str, size: u64) -> FileMetadata {
    FileMetadata {
        filename: filename.to_string(),
        size,
        direct_url: server_url.to_string(),
        share_id: "test-share".to_string(),
        timestamp: chrono::Utc::now(),
        checksum: None,
    }
}

fn config_for(output: &Path, threads: usize) -> DownloadConfig {
    DownloadConfig {
        output_path: output.to_path_buf(),
        threads,
        rate_limit_bps: 0,
        proxy_url: None,
        quiet: true,
        resume_data: None,
    }
}

#[test]
fn fresh_multi_thread_download_is_byte_exact() {
    let body = pattern_body(3_200_000);
    let server = range_server::start(body.clone());
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("data.bin");

    let meta = meta_for(&server.url, "data.bin", body.len() as u64);
    test_engine()
        .download(&meta, &config_for(&output, 4))
        .expect("download should succeed");

    assert_eq!(std::fs::read(&output).unwrap(), body);
    assert!(
        server.ranged_request_count() >= 2,
        "expected parallel range requests, saw {}",
        server.ranged_request_count()
    );
    assert!(!dir.path().join("data.bin.part").exists());
    assert!(!dir.path().join("data.bin.terafetch.json").exists());
}

#[test]
fn small_file_uses_a_single_segment_and_request() {
    let body = pattern_body(13_000);
    let server = range_server::start(body.clone());
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("small.bin");

    let meta = meta_for(&server.url, "small.bin", body.len() as u64);
    let segments = planner::calculate_segments(meta.size, 2);
    assert_eq!(segments.len(), 1, "files under 1 MiB plan one segment");

    test_engine()
        .download(&meta, &config_for(&output, 2))
        .expect("download should succeed");

    assert_eq!(std::fs::read(&output).unwrap(), body);
    assert_eq!(server.request_count(), 1);
}

#[test]
fn zero_byte_file_downloads_without_requests() {
    let server = range_server::start(Vec::new());
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("empty.bin");

    let meta = meta_for(&server.url, "empty.bin", 0);
    test_engine()
        .download(&meta, &config_for(&output, 4))
        .expect("zero-size download should succeed");

    assert_eq!(std::fs::metadata(&output).unwrap().len(), 0);
    assert_eq!(server.request_count(), 0);
    assert!(!dir.path().join("empty.bin.part").exists());
    assert!(!dir.path().join("empty.bin.terafetch.json").exists());
}

#[test]
fn interrupted_download_resumes_with_fewer_requests() {
    let body = pattern_body(3_200_000);
    let half = body.len() as u64 / 2;
    let server = range_server::start_with_options(
        body.clone(),
        RangeServerOptions {
            interrupt_at_or_after: Some(half),
            ..RangeServerOptions::default()
        },
    );
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("data.bin");
    let part = dir.path().join("data.bin.part");

    let meta = meta_for(&server.url, "data.bin", body.len() as u64);
    let engine = test_engine();
    let err = engine
        .download(&meta, &config_for(&output, 2))
        .expect_err("upper half is unreachable, download must fail");
    assert!(
        err.kind == ErrorKind::NetworkTimeout || err.kind == ErrorKind::DownloadFailed,
        "unexpected kind {:?}",
        err.kind
    );

    // Interrupted state stays on disk, ready for resume.
    assert!(part.exists());
    let record = planner::load_resume_metadata(&output).unwrap();
    assert!(record.segments.iter().any(|s| s.completed), "lower half finished");
    let first_run_requests = server.request_count();

    server.disable_interruption();
    engine
        .resume(&part, &config_for(&output, 2))
        .expect("resume should complete the download");

    assert_eq!(std::fs::read(&output).unwrap(), body);
    assert!(!part.exists());
    let resume_requests = server.request_count() - first_run_requests;
    assert!(
        resume_requests < first_run_requests,
        "resume ({}) should reuse completed segments from the first run ({})",
        resume_requests,
        first_run_requests
    );
    assert!(resume_requests >= 1);
}

#[test]
fn completed_metadata_short_circuits_without_requests() {
    let body = pattern_body(2_500_000);
    let server = range_server::start(body.clone());
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("done.bin");
    let part = dir.path().join("done.bin.part");

    // Simulate a run that finished every segment but crashed before rename.
    let meta = meta_for(&server.url, "done.bin", body.len() as u64);
    let mut segments = planner::calculate_segments(meta.size, 4);
    for s in &mut segments {
        s.completed = true;
    }
    std::fs::write(&part, &body).unwrap();
    planner::save_resume_metadata(&output, &meta, &segments).unwrap();

    test_engine()
        .download(&meta, &config_for(&output, 4))
        .expect("already-complete download should finalize");

    assert_eq!(std::fs::read(&output).unwrap(), body);
    assert_eq!(server.request_count(), 0, "no HTTP traffic for a complete plan");
    assert!(!part.exists());
    assert!(!dir.path().join("done.bin.terafetch.json").exists());
}

#[test]
fn oversized_part_file_triggers_fresh_start() {
    let body = pattern_body(1_500_000);
    let server = range_server::start(body.clone());
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("data.bin");
    let part = dir.path().join("data.bin.part");

    let meta = meta_for(&server.url, "data.bin", body.len() as u64);
    planner::save_resume_metadata(&output, &meta, &planner::calculate_segments(meta.size, 2))
        .unwrap();
    // Part file larger than the expected size: both files must be discarded.
    std::fs::write(&part, vec![0u8; body.len() + 100]).unwrap();

    test_engine()
        .download(&meta, &config_for(&output, 2))
        .expect("fresh download after cleanup");

    assert_eq!(std::fs::read(&output).unwrap(), body);
}

#[test]
fn forbidden_responses_rotate_the_user_agent() {
    let body = pattern_body(64);
    let server = range_server::start_with_options(
        body.clone(),
        RangeServerOptions {
            forbidden_first: 2,
            ..RangeServerOptions::default()
        },
    );

    let transport = HttpTransport::new(TransportConfig {
        retry: Some(fast_tuning().transport_retry),
        ..TransportConfig::default()
    });
    let ua_before = transport.current_user_agent();
    let resp = transport.get(&server.url, &[]).expect("third attempt succeeds");
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body, body);
    assert_ne!(
        transport.current_user_agent(),
        ua_before,
        "403 must advance the user agent"
    );
    assert_eq!(server.request_count(), 3);
}

#[test]
fn permanent_rate_limit_fails_after_transport_attempts() {
    let body = pattern_body(2_000_000);
    let server = range_server::start_with_options(
        body,
        RangeServerOptions {
            always_rate_limited: Some(60),
            ..RangeServerOptions::default()
        },
    );
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("data.bin");

    let meta = meta_for(&server.url, "data.bin", 2_000_000);
    let err = test_engine()
        .download(&meta, &config_for(&output, 1))
        .expect_err("permanent 429 cannot succeed");

    assert_eq!(err.kind, ErrorKind::RateLimit);
    assert_eq!(err.retry_after, Some(60));
    assert_eq!(
        server.request_count(),
        3,
        "transport retries exactly its attempt budget"
    );
}

#[test]
fn missing_file_fails_fast_without_retries() {
    let server = range_server::start_with_options(
        Vec::new(),
        RangeServerOptions {
            not_found: true,
            ..RangeServerOptions::default()
        },
    );
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("gone.bin");

    let meta = meta_for(&server.url, "gone.bin", 1_000_000);
    let err = test_engine()
        .download(&meta, &config_for(&output, 2))
        .expect_err("404 must fail");
    assert_eq!(err.kind, ErrorKind::FileNotFound);
    assert_eq!(server.request_count(), 1, "404 is not retried");
}

#[test]
fn cancellation_preserves_resumable_state() {
    let body = pattern_body(3_200_000);
    let server = range_server::start(body.clone());
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("data.bin");

    let meta = meta_for(&server.url, "data.bin", body.len() as u64);
    let mut config = config_for(&output, 2);
    // Slow the transfer down so cancellation lands mid-download.
    config.rate_limit_bps = 400_000;

    let cancel = CancelToken::new();
    let canceller = cancel.clone();
    let handle = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(400));
        canceller.cancel();
    });

    let engine = test_engine();
    let err = engine
        .download_with(&meta, &config, &cancel, None)
        .expect_err("cancelled download must not succeed");
    handle.join().unwrap();
    assert_eq!(err.kind, ErrorKind::Cancelled);

    // Part file and metadata stay behind, sized within bounds.
    let part = dir.path().join("data.bin.part");
    assert!(part.exists());
    assert!(std::fs::metadata(&part).unwrap().len() <= body.len() as u64);
    let record = planner::load_resume_metadata(&output).unwrap();
    assert_eq!(record.segments.len(), 2);
    // Whatever was marked complete really is complete on disk.
    let on_disk = std::fs::read(&part).unwrap();
    for s in record.segments.iter().filter(|s| s.completed) {
        assert_eq!(
            &on_disk[s.start as usize..=(s.end as usize)],
            &body[s.start as usize..=(s.end as usize)],
            "completed segment {} must be byte-exact",
            s.index
        );
    }
}

#[test]
fn direct_resolver_probes_size_and_filename() {
    let body = pattern_body(1_048_576 * 2);
    let server = range_server::start_with_options(
        body.clone(),
        RangeServerOptions {
            content_disposition: Some(r#"attachment; filename="payload.tar""#.to_string()),
            ..RangeServerOptions::default()
        },
    );

    let transport = Arc::new(HttpTransport::new(TransportConfig::default()));
    let resolver = DirectResolver::new(transport);
    let meta = resolver.resolve(&server.url, None).expect("probe succeeds");
    assert_eq!(meta.size, body.len() as u64);
    assert_eq!(meta.filename, "payload.tar");
    assert_eq!(meta.direct_url, server.url);
}

#[test]
fn finalize_hook_sees_the_renamed_file() {
    let body = pattern_body(200_000);
    let server = range_server::start(body.clone());
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("hooked.bin");

    let digest: Arc<std::sync::Mutex<Option<String>>> = Arc::new(std::sync::Mutex::new(None));
    let sink = Arc::clone(&digest);
    let engine = test_engine().with_finalize_hook(Box::new(move |path, _expected| {
        let d = terafetch_core::checksum::sha256_path(path)?;
        *sink.lock().unwrap() = Some(d);
        Ok(())
    }));

    let meta = meta_for(&server.url, "hooked.bin", body.len() as u64);
    engine
        .download(&meta, &config_for(&output, 2))
        .expect("download should succeed");

    // The hook ran against the final path, after the atomic rename.
    let reference = dir.path().join("reference.bin");
    std::fs::write(&reference, &body).unwrap();
    let expected = terafetch_core::checksum::sha256_path(&reference).unwrap();
    assert_eq!(digest.lock().unwrap().as_deref(), Some(expected.as_str()));
}

#[test]
fn rate_limited_download_stays_near_the_cap() {
    let body = pattern_body(300_000);
    let server = range_server::start(body.clone());
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("slow.bin");

    let meta = meta_for(&server.url, "slow.bin", body.len() as u64);
    let mut config = config_for(&output, 1);
    config.rate_limit_bps = 200_000;

    let started = std::time::Instant::now();
    test_engine()
        .download(&meta, &config)
        .expect("rate-limited download succeeds");
    let elapsed = started.elapsed();

    assert_eq!(std::fs::read(&output).unwrap(), body);
    // 300 kB at 200 kB/s with a full initial bucket: roughly half a second;
    // generous lower bound only, throttling must not be a no-op.
    assert!(
        elapsed >= Duration::from_millis(300),
        "finished too fast for the cap: {:?}",
        elapsed
    );
}
