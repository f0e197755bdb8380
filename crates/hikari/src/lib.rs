pub mod assemble;
pub mod download;
pub mod error;
pub mod fetch;
pub mod mpd;
pub mod progress;
pub mod segment;
pub mod util;

pub use download::{
    download_tracks, DownloadOptions, DownloadReport, DownloadResult, TrackDownloader,
};
pub use error::{HikariError, HikariResult};
pub use progress::{
    ProgressAggregator, ProgressEvent, ProgressObserver, ProgressSnapshot, SnapshotObserver,
};
pub use segment::{MediaSegment, ResolvedTracks, SegmentMap, TrackKind};
pub use util::http::HttpClient;
