//! Whole-pipeline behaviour with fake collaborators.

mod common;

use common::*;
use std::sync::Arc;
use std::time::Duration;

use streambox::ledger::{DedupStore, MemoryDedupStore};
use streambox::pipeline::{Collaborators, JobStatus, JobTarget, Pipeline, PipelineError, SkipReason};
use streambox::progress::ProgressDisplay;
use streambox::transport::{ObjectStoreTransport, UploadTransport};
use tempfile::TempDir;
use tokio::sync::Semaphore;

const PAGE: &str = "https://video.example.com/watch/show";

#[tokio::test]
async fn test_local_job_end_to_end() {
    let out = TempDir::new().unwrap();
    let origin = stream_origin(&[100, 200, 300]).await;
    let extractor = FakeExtractor::serving(playlist_url(&origin));
    let merger = Arc::new(FakeMerger::default());
    let dedup = Arc::new(MemoryDedupStore::new());

    let pipeline = Pipeline::start(
        &config(out.path()),
        http(),
        collaborators(extractor.clone(), merger.clone(), dedup.clone()),
    )
    .unwrap();
    let mut reports = pipeline.subscribe();

    let id = pipeline.submit(PAGE).await.unwrap();
    let report = next_report(&mut reports).await;
    let stats = pipeline.close().await;

    assert_eq!(report.job_id, id);
    assert_eq!(report.status, JobStatus::Completed);
    assert!(report.skipped.is_none());

    let target = JobTarget::resolve(PAGE, out.path()).unwrap();
    let media = std::fs::metadata(target.media_file()).unwrap();
    assert_eq!(media.len(), 600);
    for name in ["segment_0000.ts", "segment_0001.ts", "segment_0002.ts"] {
        assert!(target.output_dir.join(name).exists(), "{name}");
    }
    assert!(dedup.contains(&target.dedup_key).await.unwrap());

    assert_eq!(stats.total_jobs, 1);
    assert_eq!(stats.completed_jobs, 1);
    assert_eq!(stats.failed_jobs, 0);
    assert_eq!(stats.pending(), 0);
}

#[tokio::test]
async fn test_progress_display_runs_alongside_jobs() {
    let out = TempDir::new().unwrap();
    let origin = stream_origin(&[50, 50, 50]).await;
    let mut config = config(out.path());
    config.progress.enabled = true;

    let collaborators = Collaborators::builder()
        .extractor(FakeExtractor::serving(playlist_url(&origin)))
        .merger(Arc::new(FakeMerger::default()))
        .splitter(Arc::new(FakeSplitter { parts: 1 }))
        .dedup(Arc::new(MemoryDedupStore::new()))
        .display(ProgressDisplay::hidden())
        .build();
    let pipeline = Pipeline::start(&config, http(), collaborators).unwrap();
    let mut reports = pipeline.subscribe();

    pipeline.submit(PAGE).await.unwrap();
    pipeline.submit("https://video.example.com/watch/other").await.unwrap();
    let first = next_report(&mut reports).await;
    let second = next_report(&mut reports).await;
    let stats = tokio::time::timeout(Duration::from_secs(10), pipeline.close())
        .await
        .expect("close waits on the renderer");

    assert!(first.is_success() && second.is_success());
    assert_eq!(stats.completed_jobs, 2);
}

#[tokio::test]
async fn test_processed_target_skips_collaborators() {
    let out = TempDir::new().unwrap();
    let origin = stream_origin(&[10, 10]).await;
    let extractor = FakeExtractor::serving(playlist_url(&origin));
    let merger = Arc::new(FakeMerger::default());
    let dedup = Arc::new(MemoryDedupStore::new());

    let pipeline = Pipeline::start(
        &config(out.path()),
        http(),
        collaborators(extractor.clone(), merger.clone(), dedup.clone()),
    )
    .unwrap();
    let mut reports = pipeline.subscribe();

    pipeline.submit(PAGE).await.unwrap();
    assert_eq!(next_report(&mut reports).await.status, JobStatus::Completed);

    // same canonical target, different spelling
    pipeline.submit(&format!("{PAGE}/#t=10")).await.unwrap();
    let second = next_report(&mut reports).await;
    let stats = pipeline.close().await;

    assert_eq!(second.status, JobStatus::Completed);
    assert_eq!(second.skipped, Some(SkipReason::AlreadyProcessed));
    assert_eq!(extractor.calls(), 1);
    assert_eq!(merger.calls(), 1);
    assert_eq!(stats.completed_jobs, 2);
    assert_eq!(stats.skipped_jobs, 1);
}

#[tokio::test]
async fn test_single_download_worker_applies_backpressure() {
    let out = TempDir::new().unwrap();
    let gate = Arc::new(Semaphore::new(0));
    let extractor = FakeExtractor::empty(Some(gate.clone()));

    let mut config = config(out.path());
    config.pipeline.download_workers = 1;
    let pipeline = Pipeline::start(
        &config,
        http(),
        collaborators(extractor.clone(), Arc::default(), Arc::default()),
    )
    .unwrap();

    pipeline.submit("https://video.example.com/watch/first").await.unwrap();
    pipeline.submit("https://video.example.com/watch/second").await.unwrap();

    wait_until(|| extractor.calls() == 1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(extractor.calls(), 1, "second extraction started while the only worker was busy");

    gate.add_permits(2);
    let stats = pipeline.close().await;

    assert_eq!(extractor.calls(), 2);
    assert_eq!(stats.failed_jobs, 2);
}

#[tokio::test]
async fn test_shutdown_cancels_and_rejects_new_work() {
    let out = TempDir::new().unwrap();
    let gate = Arc::new(Semaphore::new(0));
    let extractor = FakeExtractor::empty(Some(gate));

    let pipeline = Pipeline::start(
        &config(out.path()),
        http(),
        collaborators(extractor.clone(), Arc::default(), Arc::default()),
    )
    .unwrap();
    let mut reports = pipeline.subscribe();

    pipeline.submit(PAGE).await.unwrap();
    wait_until(|| extractor.calls() == 1).await;

    // the gate is never opened: only cancellation can end the job
    let stats = tokio::time::timeout(Duration::from_secs(10), pipeline.shutdown())
        .await
        .expect("shutdown did not return");

    assert_eq!(stats.failed_jobs, 1);
    assert_eq!(stats.pending(), 0);
    assert_eq!(stats.active_downloads, 0);
    assert_eq!(next_report(&mut reports).await.error_kind, Some("cancelled"));
    assert!(matches!(pipeline.submit(PAGE).await, Err(PipelineError::Closed)));
}

#[tokio::test]
async fn test_close_rejects_new_work() {
    let out = TempDir::new().unwrap();
    let pipeline = Pipeline::start(
        &config(out.path()),
        http(),
        collaborators(FakeExtractor::empty(None), Arc::default(), Arc::default()),
    )
    .unwrap();

    let stats = pipeline.close().await;
    assert_eq!(stats.total_jobs, 0);
    assert!(matches!(pipeline.submit(PAGE).await, Err(PipelineError::Closed)));
    assert_eq!(pipeline.stats().total_jobs, 0);
}

#[tokio::test]
async fn test_close_lets_waiting_submission_through() {
    let out = TempDir::new().unwrap();
    let gate = Arc::new(Semaphore::new(0));
    let extractor = FakeExtractor::empty(Some(gate.clone()));

    let mut config = config(out.path());
    config.pipeline.download_workers = 1;
    config.pipeline.queue_size = 1;
    let pipeline = Pipeline::start(
        &config,
        http(),
        collaborators(extractor.clone(), Arc::default(), Arc::default()),
    )
    .unwrap();

    // four jobs fill the worker and queues; the fifth waits for capacity
    let submitting = async {
        let mut results = Vec::new();
        for i in 0..5 {
            results.push(pipeline.submit(&format!("https://video.example.com/watch/{i}")).await);
        }
        results
    };
    let closing = async {
        wait_until(|| pipeline.stats().total_jobs == 5).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        let (stats, ()) = tokio::join!(pipeline.close(), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            gate.add_permits(5);
        });
        stats
    };
    let (results, stats) = tokio::time::timeout(Duration::from_secs(10), async { tokio::join!(submitting, closing) })
        .await
        .expect("close did not drain");

    assert!(results.iter().all(Result::is_ok), "{results:?}");
    assert_eq!(stats.total_jobs, 5);
    assert_eq!(stats.failed_jobs, 5);
    assert_eq!(extractor.calls(), 5);
}

#[tokio::test]
async fn test_failures_are_counted_per_job() {
    let out = TempDir::new().unwrap();
    let pipeline = Pipeline::start(
        &config(out.path()),
        http(),
        collaborators(FakeExtractor::empty(None), Arc::default(), Arc::default()),
    )
    .unwrap();
    let mut reports = pipeline.subscribe();

    pipeline.submit(PAGE).await.unwrap();
    pipeline.submit("ftp://files.example.com/clip").await.unwrap();

    let mut kinds = vec![
        next_report(&mut reports).await.error_kind.unwrap(),
        next_report(&mut reports).await.error_kind.unwrap(),
    ];
    kinds.sort();
    let stats = pipeline.close().await;

    assert_eq!(kinds, vec!["extraction", "invalid_url"]);
    assert_eq!(stats.failed_jobs, 2);
    assert_eq!(stats.completed_jobs, 0);
}

#[tokio::test]
async fn test_missing_segment_fails_job_and_keeps_the_rest() {
    let out = TempDir::new().unwrap();
    let origin = stream_origin(&[10, 10]).await;
    // the playlist lists a third segment the origin does not serve
    wiremock::Mock::given(wiremock::matchers::method("GET"))
        .and(wiremock::matchers::path("/gappy.m3u8"))
        .respond_with(
            wiremock::ResponseTemplate::new(200).set_body_string("stream/seg0.ts\nstream/seg1.ts\nstream/seg9.ts\n"),
        )
        .mount(&origin)
        .await;
    let playlist = url::Url::parse(&format!("{}/gappy.m3u8", origin.uri())).unwrap();

    let merger = Arc::new(FakeMerger::default());
    let pipeline = Pipeline::start(
        &config(out.path()),
        http(),
        collaborators(FakeExtractor::serving(playlist), merger.clone(), Arc::default()),
    )
    .unwrap();
    let mut reports = pipeline.subscribe();

    pipeline.submit(PAGE).await.unwrap();
    let report = next_report(&mut reports).await;
    pipeline.close().await;

    assert_eq!(report.error_kind, Some("incomplete_segments"));
    assert!(report.error.unwrap().starts_with("1 of 3 segments missing"));
    assert_eq!(merger.calls(), 0);

    let target = JobTarget::resolve(PAGE, out.path()).unwrap();
    assert!(target.output_dir.join("segment_0000.ts").exists());
    assert!(target.output_dir.join("segment_0001.ts").exists());
}

#[tokio::test]
async fn test_identical_submissions_in_flight_run_once() {
    let out = TempDir::new().unwrap();
    let gate = Arc::new(Semaphore::new(0));
    let extractor = FakeExtractor::empty(Some(gate.clone()));

    let mut config = config(out.path());
    config.pipeline.download_workers = 2;
    let pipeline = Pipeline::start(
        &config,
        http(),
        collaborators(extractor.clone(), Arc::default(), Arc::default()),
    )
    .unwrap();
    let mut reports = pipeline.subscribe();

    pipeline.submit(PAGE).await.unwrap();
    wait_until(|| extractor.calls() == 1).await;
    pipeline.submit(PAGE).await.unwrap();

    let duplicate = next_report(&mut reports).await;
    assert_eq!(duplicate.skipped, Some(SkipReason::InProgress));

    gate.add_permits(1);
    let stats = pipeline.close().await;
    assert_eq!(extractor.calls(), 1);
    assert_eq!(stats.completed_jobs, 1);
    assert_eq!(stats.failed_jobs, 1);
}

fn remote_config(out: &std::path::Path) -> streambox::config::Config {
    let mut config = config(out);
    config.distribution.enabled = true;
    config.distribution.destination = Some("channel".to_string());
    config
}

fn remote_collaborators(
    extractor: Arc<FakeExtractor>,
    parts: usize,
    transport: Arc<dyn UploadTransport>,
    dedup: Arc<MemoryDedupStore>,
) -> Collaborators {
    Collaborators::builder()
        .extractor(extractor)
        .merger(Arc::new(FakeMerger::default()))
        .splitter(Arc::new(FakeSplitter { parts }))
        .transport(transport)
        .dedup(dedup)
        .build()
}

#[tokio::test]
async fn test_remote_job_uploads_parts_and_cleans_up() {
    let out = TempDir::new().unwrap();
    let origin = stream_origin(&[100, 100, 100, 100]).await;
    let transport = Arc::new(ObjectStoreTransport::in_memory());
    let dedup = Arc::new(MemoryDedupStore::new());

    let pipeline = Pipeline::start(
        &remote_config(out.path()),
        http(),
        remote_collaborators(
            FakeExtractor::serving(playlist_url(&origin)),
            2,
            transport.clone(),
            dedup.clone(),
        ),
    )
    .unwrap();
    let mut reports = pipeline.subscribe();

    pipeline.submit(PAGE).await.unwrap();
    let report = next_report(&mut reports).await;
    let stats = pipeline.close().await;

    assert!(report.is_success(), "{:?}", report.error);
    assert!(transport.exists("channel/show_part1.mp4").await.unwrap());
    assert!(transport.exists("channel/show_part2.mp4").await.unwrap());
    assert!(transport.exists("channel/show_part1.mp4.json").await.unwrap());

    let target = JobTarget::resolve(PAGE, out.path()).unwrap();
    assert!(!target.output_dir.exists());
    assert!(dedup.contains(&target.dedup_key).await.unwrap());
    assert!(stats.remote);
    assert_eq!(stats.completed_jobs, 1);
    assert_eq!(stats.active_uploads, 0);
}

#[tokio::test]
async fn test_failed_part_aborts_remaining_uploads() {
    let out = TempDir::new().unwrap();
    let origin = stream_origin(&[90, 90, 90]).await;
    let transport = Arc::new(RecordingTransport {
        fail_on: Some(2),
        ..Default::default()
    });
    let dedup = Arc::new(MemoryDedupStore::new());

    let pipeline = Pipeline::start(
        &remote_config(out.path()),
        http(),
        remote_collaborators(
            FakeExtractor::serving(playlist_url(&origin)),
            3,
            transport.clone(),
            dedup.clone(),
        ),
    )
    .unwrap();
    let mut reports = pipeline.subscribe();

    pipeline.submit(PAGE).await.unwrap();
    let report = next_report(&mut reports).await;
    let stats = pipeline.close().await;

    assert_eq!(report.status, JobStatus::Failed);
    assert_eq!(report.error_kind, Some("upload"));
    assert_eq!(transport.captions(), vec!["show (part 1/3)", "show (part 2/3)"]);

    let target = JobTarget::resolve(PAGE, out.path()).unwrap();
    assert!(target.media_file().exists());
    assert!(dedup.is_empty());
    assert_eq!(stats.failed_jobs, 1);
}

#[tokio::test]
async fn test_remote_without_transport_refuses_to_start() {
    let out = TempDir::new().unwrap();
    let result = Pipeline::start(
        &remote_config(out.path()),
        http(),
        collaborators(FakeExtractor::empty(None), Arc::default(), Arc::default()),
    );
    assert!(matches!(result, Err(PipelineError::Misconfigured(_))));
}
