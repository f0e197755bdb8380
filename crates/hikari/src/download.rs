use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::{
    error::HikariResult,
    fetch::fetch_bytes,
    progress::{ProgressEvent, ProgressObserver},
    segment::{init_file_name, segment_file_name, MediaSegment, ResolvedTracks, SegmentMap, TrackKind},
    util::http::HttpClient,
};

/// Hard bounds of the per-track worker pool.
pub const MIN_CONCURRENCY: u32 = 4;
pub const MAX_CONCURRENCY: u32 = 16;

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Requested workers per track. Clamped to
    /// `MIN_CONCURRENCY..=MAX_CONCURRENCY` when the pool is built.
    pub concurrency: u32,
    /// Attempts per segment before it is recorded as failed.
    pub retries: u32,
    pub audio_dir: PathBuf,
    pub video_dir: PathBuf,
}

impl DownloadOptions {
    pub fn new(audio_dir: impl Into<PathBuf>, video_dir: impl Into<PathBuf>) -> Self {
        Self {
            concurrency: 8,
            retries: 3,
            audio_dir: audio_dir.into(),
            video_dir: video_dir.into(),
        }
    }

    /// Both tracks download into the same directory; file names keep them
    /// apart.
    pub fn shared_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self::new(dir.clone(), dir)
    }

    pub fn concurrency(mut self, concurrency: u32) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub(crate) fn workers(&self) -> u32 {
        self.concurrency.clamp(MIN_CONCURRENCY, MAX_CONCURRENCY)
    }
}

/// Outcome of one track download.
#[derive(Debug, Clone)]
pub struct DownloadResult {
    pub track: TrackKind,
    /// Local path of the init segment, `None` if it could not be fetched.
    pub init_path: Option<PathBuf>,
    /// Directory the segment files were written into.
    pub dir: PathBuf,
    pub total: u64,
    pub successful: u64,
    /// Segment numbers that exhausted their retries, in timeline order.
    pub failed: Vec<u64>,
}

impl DownloadResult {
    pub fn is_complete(&self) -> bool {
        self.init_path.is_some() && self.successful == self.total
    }
}

/// Outcome of both track downloads of one asset.
#[derive(Debug, Clone)]
pub struct DownloadReport {
    pub audio: DownloadResult,
    pub video: DownloadResult,
}

impl DownloadReport {
    pub fn is_complete(&self) -> bool {
        self.audio.is_complete() && self.video.is_complete()
    }

    pub fn failed_count(&self) -> usize {
        self.audio.failed.len() + self.video.failed.len()
    }
}

#[derive(Default)]
struct TrackState {
    current: u64,
    successful: u64,
    failed: Vec<u64>,
}

/// Downloads every segment of one track with a bounded worker pool.
pub struct TrackDownloader {
    client: HttpClient,
    map: SegmentMap,
    dir: PathBuf,
    workers: u32,
    retries: u32,
    permits: Arc<Semaphore>,
    state: Arc<Mutex<TrackState>>,
    observer: Arc<dyn ProgressObserver>,
    cancel: CancellationToken,
}

impl TrackDownloader {
    pub fn new(
        client: HttpClient,
        map: SegmentMap,
        dir: impl Into<PathBuf>,
        workers: u32,
        retries: u32,
        observer: Arc<dyn ProgressObserver>,
        cancel: CancellationToken,
    ) -> Self {
        let workers = workers.clamp(MIN_CONCURRENCY, MAX_CONCURRENCY);
        let permits = Arc::new(Semaphore::new(workers as usize));

        Self {
            client,
            map,
            dir: dir.into(),
            workers,
            retries,
            permits,
            state: Arc::new(Mutex::new(TrackState::default())),
            observer,
            cancel,
        }
    }

    pub async fn download(self) -> HikariResult<DownloadResult> {
        let track = self.map.track;
        let total = self.map.total();
        if self.cancel.is_cancelled() {
            tracing::warn!("Download of {track} track cancelled before start.");
            return Ok(DownloadResult {
                track,
                init_path: None,
                dir: self.dir.clone(),
                total,
                successful: 0,
                failed: Vec::new(),
            });
        }

        tracing::info!(
            "Start downloading {track} track with {} worker(s).",
            self.workers
        );

        tokio::fs::create_dir_all(&self.dir).await?;

        // The init segment comes first. Without it the track cannot be
        // played at all, so no segment work is scheduled after a failure.
        let init_path = self
            .dir
            .join(init_file_name(track, self.map.init_basename()));
        match fetch_bytes(&self.client, &self.map.init_url).await {
            Ok(bytes) => tokio::fs::write(&init_path, &bytes).await?,
            Err(e) => {
                tracing::error!("Fetching init segment of {track} track failed: {e}");
                return Ok(DownloadResult {
                    track,
                    init_path: None,
                    dir: self.dir.clone(),
                    total,
                    successful: 0,
                    failed: self.map.numbers().collect(),
                });
            }
        }

        for segment in self.map.segments.iter() {
            if self.cancel.is_cancelled() {
                tracing::warn!("Download of {track} track cancelled, stopping scheduler.");
                break;
            }

            let permit = self.permits.clone().acquire_owned().await.unwrap();

            let client = self.client.clone();
            let segment = segment.clone();
            let dir = self.dir.clone();
            let state = self.state.clone();
            let observer = self.observer.clone();
            let cancel = self.cancel.clone();
            let retries = self.retries;

            tokio::spawn(async move {
                let file_name = segment_file_name(track, segment.number, segment.basename());
                let path = dir.join(&file_name);

                let Some(success) =
                    download_segment(&client, &segment, &path, &file_name, retries, &cancel).await
                else {
                    // cancelled before the segment could finish, emit nothing
                    drop(permit);
                    return;
                };

                let mut state = state.lock().await;
                state.current += 1;
                if success {
                    state.successful += 1;
                } else {
                    state.failed.push(segment.number);
                }

                let event = ProgressEvent::new(
                    track,
                    total,
                    state.current,
                    segment.number,
                    success,
                    state.failed.clone(),
                );
                tracing::info!(
                    "Processing {file_name} finished. ({} / {total} or {:.2}%)",
                    state.current,
                    event.percentage
                );
                observer.on_segment(&event);
                drop(state);

                drop(permit);
            });
        }

        // wait for all tasks to finish
        let _ = self.permits.acquire_many(self.workers).await.unwrap();

        let state = self.state.lock().await;
        let mut failed = state.failed.clone();
        failed.sort_unstable();

        if !failed.is_empty() {
            tracing::error!(
                "Failed to download {} segments of {track} track:",
                failed.len()
            );
            for number in failed.iter() {
                tracing::error!("  - segment {number}");
            }
        }

        Ok(DownloadResult {
            track,
            init_path: Some(init_path),
            dir: self.dir.clone(),
            total,
            successful: state.successful,
            failed,
        })
    }
}

async fn download_segment(
    client: &HttpClient,
    segment: &MediaSegment,
    path: &Path,
    file_name: &str,
    retries: u32,
    cancel: &CancellationToken,
) -> Option<bool> {
    let mut attempts = retries.max(1);
    loop {
        if cancel.is_cancelled() {
            return None;
        }

        let result = match fetch_bytes(client, &segment.url).await {
            Ok(bytes) => tokio::fs::write(path, &bytes).await.map_err(Into::into),
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => return Some(true),
            Err(e) => {
                attempts -= 1;
                if attempts == 0 {
                    tracing::error!("Processing {file_name} failed, max retries exceed, drop. {e}");
                    return Some(false);
                }
                tracing::warn!("Processing {file_name} failed, retry later. {e}");
            }
        }
    }
}

/// Download both tracks concurrently, each with its own worker pool.
///
/// Segment failures never abort the call; they are recorded in the report
/// and the corresponding files are simply absent.
pub async fn download_tracks(
    client: &HttpClient,
    tracks: &ResolvedTracks,
    options: &DownloadOptions,
    observer: Arc<dyn ProgressObserver>,
    cancel: &CancellationToken,
) -> HikariResult<DownloadReport> {
    let workers = options.workers();

    let audio = TrackDownloader::new(
        client.clone(),
        tracks.audio.clone(),
        &options.audio_dir,
        workers,
        options.retries,
        observer.clone(),
        cancel.clone(),
    );
    let video = TrackDownloader::new(
        client.clone(),
        tracks.video.clone(),
        &options.video_dir,
        workers,
        options.retries,
        observer,
        cancel.clone(),
    );

    let (audio, video) = tokio::join!(audio.download(), video.download());

    Ok(DownloadReport {
        audio: audio?,
        video: video?,
    })
}
