use thiserror::Error;

use crate::segment::TrackKind;

#[derive(Error, Debug)]
pub enum HikariError {
    #[error("HTTP error: {0}")]
    HttpError(reqwest::StatusCode),

    #[error("No {0} adaptation set in manifest")]
    AdaptationSetNotFound(TrackKind),

    #[error("No representation in {0} adaptation set")]
    RepresentationNotFound(TrackKind),

    #[error("No video representation with height {0}")]
    HeightNotFound(u64),

    #[error("No segment template for {0} representation")]
    MissingSegmentTemplate(TrackKind),

    #[error("No segment timeline for {0} representation")]
    MissingSegmentTimeline(TrackKind),

    #[error("No initialization attribute for {0} representation")]
    MissingInitialization(TrackKind),

    #[error("No media attribute for {0} representation")]
    MissingMediaTemplate(TrackKind),

    #[error("Init segment of {0} track was not downloaded")]
    MissingInitSegment(TrackKind),

    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    #[error(transparent)]
    RequestError(#[from] reqwest::Error),

    #[error(transparent)]
    MpdParseError(#[from] dash_mpd::DashMpdError),
}

pub type HikariResult<T> = Result<T, HikariError>;
