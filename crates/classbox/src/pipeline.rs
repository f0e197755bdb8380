//! End-to-end acquisition of one Classbox asset.
//!
//! The pipeline runs six phases in a fixed order: license, manifest,
//! download, decrypt, mux, cleanup. Callers watch it through a single
//! observer that receives a monotonic completion percentage. Downloads fill
//! the 0 to 80 band, decryption 80 to 90, muxing 90 to 99, and 100 is
//! emitted once the workspace is cleaned up.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fake_user_agent::get_chrome_rua;
use hikari::{
    assemble::assemble_track, download_tracks, DownloadOptions, DownloadReport, HttpClient,
    ProgressAggregator, ProgressSnapshot,
};
use reqwest::{
    header::{self, HeaderMap, HeaderValue},
    Client,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::api::Api;
use crate::error::ClassboxError;
use crate::license::{LicenseClient, LicenseMaterial, Session};
use crate::tools::{Decrypter, FfmpegMux, Mp4Decrypt, Muxer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelinePhase {
    License,
    Manifest,
    Download,
    Decrypt,
    Mux,
    Cleanup,
}

impl PipelinePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelinePhase::License => "license",
            PipelinePhase::Manifest => "manifest",
            PipelinePhase::Download => "download",
            PipelinePhase::Decrypt => "decrypt",
            PipelinePhase::Mux => "mux",
            PipelinePhase::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tick of pipeline progress.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineEvent {
    pub phase: PipelinePhase,
    /// Overall completion in percent. Never decreases over the lifetime of
    /// one run, whatever order the underlying signals arrive in.
    pub percent: f64,
    /// Per-track detail, present for download events.
    pub snapshot: Option<ProgressSnapshot>,
}

pub trait PipelineObserver: Send + Sync {
    fn on_event(&self, event: &PipelineEvent);
}

impl<F> PipelineObserver for F
where
    F: Fn(&PipelineEvent) + Send + Sync,
{
    fn on_event(&self, event: &PipelineEvent) {
        self(event)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("License acquisition failed: {0}")]
    License(ClassboxError),

    #[error("Manifest resolution failed: {0}")]
    Manifest(hikari::HikariError),

    #[error("Download failed: {0}")]
    Download(hikari::HikariError),

    #[error("{0} segment(s) are missing after download")]
    MissingSegments(usize),

    #[error("Decryption failed: {0}")]
    Decrypt(ClassboxError),

    #[error("Muxing failed: {0}")]
    Mux(ClassboxError),

    #[error("Cleanup failed: {0}")]
    Cleanup(std::io::Error),

    #[error("Cancelled during the {0} phase")]
    Cancelled(PipelinePhase),
}

impl PipelineError {
    /// Phase the pipeline was in when it stopped.
    pub fn phase(&self) -> PipelinePhase {
        match self {
            PipelineError::License(_) => PipelinePhase::License,
            PipelineError::Manifest(_) => PipelinePhase::Manifest,
            PipelineError::Download(_) | PipelineError::MissingSegments(_) => {
                PipelinePhase::Download
            }
            PipelineError::Decrypt(_) => PipelinePhase::Decrypt,
            PipelineError::Mux(_) => PipelinePhase::Mux,
            PipelineError::Cleanup(_) => PipelinePhase::Cleanup,
            PipelineError::Cancelled(phase) => *phase,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub api: Api,
    /// Video height to select from the manifest.
    pub target_height: u64,
    pub concurrency: u32,
    pub retries: u32,
    pub request_timeout: Duration,
    /// Directory the per-run workspace is created under.
    pub work_root: PathBuf,
    /// Leave the workspace behind instead of removing it.
    pub keep_temp_files: bool,
    /// Treat segments that exhausted their retries as a fatal error instead
    /// of muxing the gaps away.
    pub fail_on_missing_segments: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            api: Api::default(),
            target_height: 1080,
            concurrency: 8,
            retries: 3,
            request_timeout: Duration::from_secs(30),
            work_root: std::env::temp_dir(),
            keep_temp_files: false,
            fail_on_missing_segments: false,
        }
    }
}

/// What a finished run leaves on disk.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub output: PathBuf,
    pub report: DownloadReport,
}

pub struct Pipeline<D, M> {
    config: PipelineConfig,
    decrypter: D,
    muxer: M,
}

impl Pipeline<Mp4Decrypt, FfmpegMux> {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            decrypter: Mp4Decrypt,
            muxer: FfmpegMux::default(),
        }
    }
}

impl<D, M> Pipeline<D, M>
where
    D: Decrypter,
    M: Muxer,
{
    pub fn with_tools(config: PipelineConfig, decrypter: D, muxer: M) -> Self {
        Self {
            config,
            decrypter,
            muxer,
        }
    }

    /// Acquire one asset and write the muxed result to `output`.
    ///
    /// The cancellation token is honored between phases and between
    /// segments. A run stopped this way reports the phase it was in.
    pub async fn run(
        &self,
        session: &Session,
        output: &Path,
        observer: Arc<dyn PipelineObserver>,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutcome, PipelineError> {
        let progress = Monotonic::new(observer);

        ensure_live(cancel, PipelinePhase::License)?;
        progress.emit(PipelinePhase::License, 0.0, None);
        let license = self.acquire_license(session).await?;

        ensure_live(cancel, PipelinePhase::Manifest)?;
        progress.emit(PipelinePhase::Manifest, 0.0, None);
        let tracks = hikari::mpd::resolve_tracks(
            &license.manifest,
            &license.manifest_url,
            self.config.target_height,
        )
        .map_err(PipelineError::Manifest)?;
        log::info!(
            "Resolved {} audio and {} video segment(s)",
            tracks.audio.total(),
            tracks.video.total()
        );

        ensure_live(cancel, PipelinePhase::Download)?;
        let work_dir = self.work_dir(&license.asset_id);
        let report = self
            .download(&license, &tracks, &work_dir, &progress, cancel)
            .await?;
        let video_raw = assemble_track(&report.video, work_dir.join("video.mp4"))
            .await
            .map_err(PipelineError::Download)?;
        let audio_raw = assemble_track(&report.audio, work_dir.join("audio.mp4"))
            .await
            .map_err(PipelineError::Download)?;

        ensure_live(cancel, PipelinePhase::Decrypt)?;
        progress.emit(PipelinePhase::Decrypt, 80.0, None);
        let audio_clear = work_dir.join("audio_clear.mp4");
        let video_clear = work_dir.join("video_clear.mp4");
        self.decrypter
            .decrypt(&license.kid, &license.key, &audio_raw, &audio_clear)
            .await
            .map_err(PipelineError::Decrypt)?;
        progress.emit(PipelinePhase::Decrypt, 85.0, None);
        self.decrypter
            .decrypt(&license.kid, &license.key, &video_raw, &video_clear)
            .await
            .map_err(PipelineError::Decrypt)?;
        progress.emit(PipelinePhase::Decrypt, 90.0, None);

        ensure_live(cancel, PipelinePhase::Mux)?;
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|error| PipelineError::Mux(error.into()))?;
        }
        self.muxer
            .mux(&video_clear, &audio_clear, output)
            .await
            .map_err(PipelineError::Mux)?;
        progress.emit(PipelinePhase::Mux, 99.0, None);

        if self.config.keep_temp_files {
            log::info!("Keeping temporary files at {}", work_dir.display());
        } else {
            tokio::fs::remove_dir_all(&work_dir)
                .await
                .map_err(PipelineError::Cleanup)?;
        }
        progress.emit(PipelinePhase::Cleanup, 100.0, None);
        log::info!(
            "All finished. Please checkout your files at {}",
            output.display()
        );

        Ok(PipelineOutcome {
            output: output.to_path_buf(),
            report,
        })
    }

    async fn acquire_license(&self, session: &Session) -> Result<LicenseMaterial, PipelineError> {
        let client = HttpClient::new(
            Client::builder()
                .user_agent(get_chrome_rua())
                .timeout(self.config.request_timeout),
        );
        LicenseClient::with_client(self.config.api.clone(), client)
            .derive(session)
            .await
            .map_err(PipelineError::License)
    }

    async fn download(
        &self,
        license: &LicenseMaterial,
        tracks: &hikari::ResolvedTracks,
        work_dir: &Path,
        progress: &Arc<Monotonic>,
        cancel: &CancellationToken,
    ) -> Result<DownloadReport, PipelineError> {
        let cdn = self.cdn_client(license).map_err(PipelineError::License)?;
        let options = DownloadOptions::new(work_dir.join("audio"), work_dir.join("video"))
            .concurrency(self.config.concurrency)
            .retries(self.config.retries);

        let sink = {
            let progress = progress.clone();
            Arc::new(move |snapshot: &ProgressSnapshot| {
                progress.emit(
                    PipelinePhase::Download,
                    snapshot.overall_percentage() * 0.8,
                    Some(snapshot.clone()),
                );
            })
        };
        let aggregator = ProgressAggregator::new(sink);

        let report = download_tracks(&cdn, tracks, &options, aggregator, cancel)
            .await
            .map_err(PipelineError::Download)?;
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled(PipelinePhase::Download));
        }

        let failed = report.failed_count();
        if failed > 0 {
            if self.config.fail_on_missing_segments {
                return Err(PipelineError::MissingSegments(failed));
            }
            log::warn!("{failed} segment(s) are missing from the final output");
        }
        Ok(report)
    }

    /// Headers every CDN request of this run shares.
    fn cdn_client(&self, license: &LicenseMaterial) -> Result<HttpClient, ClassboxError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_str(&license.cookie_string())?,
        );
        Ok(HttpClient::new(
            Client::builder()
                .user_agent(get_chrome_rua())
                .default_headers(headers)
                .timeout(self.config.request_timeout),
        ))
    }

    fn work_dir(&self, asset_id: &str) -> PathBuf {
        let rand_suffix = rand::random::<u64>();
        self.config
            .work_root
            .join(format!("classbox_{asset_id}_{rand_suffix}"))
    }
}

/// Serializes observer callbacks and clamps the percentage so it never
/// moves backwards.
struct Monotonic {
    observer: Arc<dyn PipelineObserver>,
    last: Mutex<f64>,
}

impl Monotonic {
    fn new(observer: Arc<dyn PipelineObserver>) -> Arc<Self> {
        Arc::new(Self {
            observer,
            last: Mutex::new(0.0),
        })
    }

    fn emit(&self, phase: PipelinePhase, raw: f64, snapshot: Option<ProgressSnapshot>) {
        let mut last = self.last.lock().unwrap();
        let percent = raw.max(*last);
        *last = percent;
        self.observer.on_event(&PipelineEvent {
            phase,
            percent,
            snapshot,
        });
    }
}

fn ensure_live(cancel: &CancellationToken, phase: PipelinePhase) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
        Err(PipelineError::Cancelled(phase))
    } else {
        Ok(())
    }
}
