use std::fmt;

use serde::Serialize;
use url::Url;

/// Which elementary stream a segment belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One addressable media chunk of a track.
#[derive(Debug, Clone)]
pub struct MediaSegment {
    /// Position in the track timeline, taken from the expanded `$Number$`.
    pub number: u64,
    pub url: Url,
}

impl MediaSegment {
    /// Final path component of the segment URL.
    pub fn basename(&self) -> &str {
        basename_of(&self.url)
    }
}

/// Ordered description of every chunk of one track.
///
/// Segment numbers are contiguous from `start_number`. A map is never
/// modified after it has been resolved; downloads share it read-only.
#[derive(Debug, Clone)]
pub struct SegmentMap {
    pub track: TrackKind,
    pub init_url: Url,
    pub start_number: u64,
    pub timescale: u64,
    pub segments: Vec<MediaSegment>,
}

impl SegmentMap {
    pub fn new(
        track: TrackKind,
        init_url: Url,
        start_number: u64,
        timescale: u64,
        segments: Vec<MediaSegment>,
    ) -> Self {
        Self {
            track,
            init_url,
            start_number,
            timescale,
            segments,
        }
    }

    pub fn total(&self) -> u64 {
        self.segments.len() as u64
    }

    /// Segment numbers of this track, in timeline order.
    pub fn numbers(&self) -> impl Iterator<Item = u64> + '_ {
        self.segments.iter().map(|segment| segment.number)
    }

    pub fn init_basename(&self) -> &str {
        basename_of(&self.init_url)
    }
}

/// Both tracks of one asset, resolved from the same manifest.
#[derive(Debug, Clone)]
pub struct ResolvedTracks {
    pub audio: SegmentMap,
    pub video: SegmentMap,
}

/// Local file name of a downloaded media segment.
///
/// The number prefix is zero padded so that byte-wise name order matches
/// timeline order for any track shorter than a million segments.
pub fn segment_file_name(track: TrackKind, number: u64, basename: &str) -> String {
    format!("{number:06}-{track}-{basename}")
}

/// Local file name of a downloaded init segment.
pub fn init_file_name(track: TrackKind, basename: &str) -> String {
    format!("init-{track}-{basename}")
}

/// Parse `{number}-{track}-{basename}` back from a local file name.
pub(crate) fn parse_segment_file_name(name: &str) -> Option<(u64, TrackKind, &str)> {
    let mut parts = name.splitn(3, '-');
    let number = parts.next()?.parse().ok()?;
    let track = match parts.next()? {
        "audio" => TrackKind::Audio,
        "video" => TrackKind::Video,
        _ => return None,
    };
    Some((number, track, parts.next()?))
}

fn basename_of(url: &Url) -> &str {
    url.path_segments()
        .and_then(|segments| segments.last())
        .filter(|name| !name.is_empty())
        .unwrap_or("segment.m4s")
}
