//! Collaborator fakes and a local stream origin shared by the pipeline tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use streambox::config::{Config, HttpSettings};
use streambox::extract::{ExtractError, ExtractedStream, StreamExtractor};
use streambox::fetch::{HttpClient, is_segment_file_name};
use streambox::humanize::ByteSize;
use streambox::ledger::MemoryDedupStore;
use streambox::media::{MediaError, MediaMerger, MediaSplitter, part_path};
use streambox::pipeline::{Collaborators, JobReport};
use streambox::transport::{TransportError, UploadReceipt, UploadRequest, UploadTransport};
use tokio::sync::{Semaphore, broadcast};
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Serve `/stream/index.m3u8` listing segments of the given sizes.
pub async fn stream_origin(sizes: &[usize]) -> MockServer {
    let server = MockServer::start().await;

    let mut playlist = String::from("#EXTM3U\n#EXT-X-TARGETDURATION:4\n");
    for (i, size) in sizes.iter().enumerate() {
        playlist.push_str(&format!("#EXTINF:4.0,\nseg{i}.ts\n"));
        Mock::given(method("GET"))
            .and(path(format!("/stream/seg{i}.ts")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'0' + i as u8; *size]))
            .mount(&server)
            .await;
    }
    playlist.push_str("#EXT-X-ENDLIST\n");

    Mock::given(method("GET"))
        .and(path("/stream/index.m3u8"))
        .respond_with(ResponseTemplate::new(200).set_body_string(playlist))
        .mount(&server)
        .await;
    server
}

pub fn playlist_url(server: &MockServer) -> Url {
    Url::parse(&format!("{}/stream/index.m3u8", server.uri())).unwrap()
}

pub fn http() -> HttpClient {
    HttpClient::new(&HttpSettings::default()).unwrap()
}

pub fn config(output_dir: &Path) -> Config {
    let mut config = Config::default();
    config.pipeline.output_dir = output_dir.to_path_buf();
    config.pipeline.stats_interval_secs = 3600;
    config.progress.enabled = false;
    config
}

/// Hands out the same playlist for every page. With a gate, each call
/// waits for a permit first.
pub struct FakeExtractor {
    playlist: Option<Url>,
    gate: Option<Arc<Semaphore>>,
    pub calls: AtomicUsize,
}

impl FakeExtractor {
    pub fn serving(playlist: Url) -> Arc<Self> {
        Arc::new(Self {
            playlist: Some(playlist),
            gate: None,
            calls: AtomicUsize::new(0),
        })
    }

    /// Finds nothing, after waiting on `gate` when given.
    pub fn empty(gate: Option<Arc<Semaphore>>) -> Arc<Self> {
        Arc::new(Self {
            playlist: None,
            gate,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StreamExtractor for FakeExtractor {
    async fn extract(&self, page_url: &Url) -> Result<ExtractedStream, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        match &self.playlist {
            Some(playlist) => Ok(ExtractedStream {
                playlist_url: playlist.clone(),
                thumbnail: None,
            }),
            None => Err(ExtractError::NotFound(page_url.to_string())),
        }
    }
}

/// Concatenates segment files in name order, like a stream-copy concat.
#[derive(Default)]
pub struct FakeMerger {
    pub calls: AtomicUsize,
}

impl FakeMerger {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaMerger for FakeMerger {
    async fn merge(&self, segment_dir: &Path, _thumbnail: Option<&Path>, output: &Path) -> Result<(), MediaError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let mut names: Vec<String> = std::fs::read_dir(segment_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| is_segment_file_name(name))
            .collect();
        names.sort();

        let mut merged = Vec::new();
        for name in names {
            merged.extend(std::fs::read(segment_dir.join(name)).unwrap());
        }
        tokio::fs::write(output, merged).await.map_err(|source| MediaError::Io {
            path: output.to_path_buf(),
            source,
        })
    }
}

/// Cuts a file into `parts` byte ranges named like real split parts.
pub struct FakeSplitter {
    pub parts: usize,
}

#[async_trait]
impl MediaSplitter for FakeSplitter {
    async fn split(&self, media: &Path, _threshold: ByteSize) -> Result<Vec<PathBuf>, MediaError> {
        if self.parts <= 1 {
            return Ok(vec![media.to_path_buf()]);
        }
        let data = std::fs::read(media).unwrap();
        let chunk = data.len().div_ceil(self.parts).max(1);

        let mut out = Vec::new();
        for (n, bytes) in data.chunks(chunk).enumerate() {
            let part = part_path(media, n + 1);
            std::fs::write(&part, bytes).unwrap();
            out.push(part);
        }
        Ok(out)
    }
}

/// Records every request; fails the `fail_on`-th call (1-based).
#[derive(Default)]
pub struct RecordingTransport {
    pub fail_on: Option<usize>,
    pub requests: Mutex<Vec<UploadRequest>>,
}

impl RecordingTransport {
    pub fn captions(&self) -> Vec<String> {
        self.requests.lock().unwrap().iter().map(|r| r.caption.clone()).collect()
    }
}

#[async_trait]
impl UploadTransport for RecordingTransport {
    async fn upload(&self, request: &UploadRequest) -> Result<UploadReceipt, TransportError> {
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            requests.len()
        };
        if self.fail_on == Some(call) {
            return Err(TransportError::UploadFailed {
                file: request.file.display().to_string(),
                reason: "rate limited".to_string(),
            });
        }
        Ok(UploadReceipt {
            key: format!("{}/{call}", request.destination),
            size: std::fs::metadata(&request.file).map(|m| m.len()).unwrap_or(0),
        })
    }
}

pub fn collaborators(
    extractor: Arc<FakeExtractor>,
    merger: Arc<FakeMerger>,
    dedup: Arc<MemoryDedupStore>,
) -> Collaborators {
    Collaborators::builder()
        .extractor(extractor)
        .merger(merger)
        .splitter(Arc::new(FakeSplitter { parts: 1 }))
        .dedup(dedup)
        .build()
}

pub async fn next_report(reports: &mut broadcast::Receiver<JobReport>) -> JobReport {
    tokio::time::timeout(Duration::from_secs(10), reports.recv())
        .await
        .expect("timed out waiting for a job report")
        .expect("report feed closed")
}

/// Poll `condition` until it holds or a few seconds pass.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
