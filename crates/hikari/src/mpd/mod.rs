//! Static MPD resolution.
//!
//! Turns a DASH manifest into per-track [SegmentMap]s: pick one audio and
//! one video representation, expand their `SegmentTemplate` timelines, and
//! join every expanded file name against the manifest URL so that a signed
//! query on the manifest carries over to each segment.

pub mod template;

use dash_mpd::{AdaptationSet, Representation, SegmentTemplate, MPD};
use url::Url;

use crate::{
    error::{HikariError, HikariResult},
    segment::{MediaSegment, ResolvedTracks, SegmentMap, TrackKind},
    util::http::HttpClient,
};

use template::Template;

/// Fetch a manifest and resolve both of its tracks.
pub async fn fetch_and_resolve(
    client: &HttpClient,
    manifest_url: &Url,
    target_height: u64,
) -> HikariResult<ResolvedTracks> {
    log::info!("Fetching MPD manifest from {manifest_url}");
    let response = client
        .get(manifest_url.clone())
        .header("Accept", "application/dash+xml,video/vnd.mpeg.dash.mpd")
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(HikariError::HttpError(status));
    }

    let manifest = response.text().await?;
    resolve_tracks(&manifest, manifest_url, target_height)
}

/// Resolve the audio track and the video track of a static manifest.
///
/// The video representation must match `target_height` exactly. For audio,
/// the highest-bandwidth representation wins.
pub fn resolve_tracks(
    manifest: &str,
    manifest_url: &Url,
    target_height: u64,
) -> HikariResult<ResolvedTracks> {
    let mpd = dash_mpd::parse(manifest)?;

    let audio = resolve_track(&mpd, manifest_url, TrackKind::Audio, target_height)?;
    let video = resolve_track(&mpd, manifest_url, TrackKind::Video, target_height)?;
    Ok(ResolvedTracks { audio, video })
}

fn resolve_track(
    mpd: &MPD,
    manifest_url: &Url,
    track: TrackKind,
    target_height: u64,
) -> HikariResult<SegmentMap> {
    let adaptation = mpd
        .periods
        .iter()
        .flat_map(|period| period.adaptations.iter())
        .find(|adaptation| adaptation_matches(adaptation, track))
        .ok_or(HikariError::AdaptationSetNotFound(track))?;

    let representation = select_representation(adaptation, track, target_height)?;

    let segment_template = representation
        .SegmentTemplate
        .as_ref()
        .or(adaptation.SegmentTemplate.as_ref())
        .ok_or(HikariError::MissingSegmentTemplate(track))?;

    expand_timeline(segment_template, representation, manifest_url, track)
}

fn adaptation_matches(adaptation: &AdaptationSet, track: TrackKind) -> bool {
    adaptation
        .contentType
        .as_deref()
        .or(adaptation.mimeType.as_deref())
        .is_some_and(|content_type| content_type.starts_with(track.as_str()))
}

fn select_representation<'a>(
    adaptation: &'a AdaptationSet,
    track: TrackKind,
    target_height: u64,
) -> HikariResult<&'a Representation> {
    match track {
        TrackKind::Video => adaptation
            .representations
            .iter()
            .find(|representation| representation.height == Some(target_height))
            .ok_or(HikariError::HeightNotFound(target_height)),
        TrackKind::Audio => adaptation
            .representations
            .iter()
            .max_by_key(|representation| representation.bandwidth.unwrap_or(0))
            .ok_or(HikariError::RepresentationNotFound(track)),
    }
}

fn expand_timeline(
    segment_template: &SegmentTemplate,
    representation: &Representation,
    manifest_url: &Url,
    track: TrackKind,
) -> HikariResult<SegmentMap> {
    let timescale = segment_template.timescale.unwrap_or(1);
    let start_number = segment_template.startNumber.unwrap_or(1);

    let initialization = segment_template
        .initialization
        .as_deref()
        .ok_or(HikariError::MissingInitialization(track))?;
    let media = segment_template
        .media
        .as_deref()
        .ok_or(HikariError::MissingMediaTemplate(track))?;
    let timeline = segment_template
        .SegmentTimeline
        .as_ref()
        .ok_or(HikariError::MissingSegmentTimeline(track))?;

    let template = Template {
        representation_id: representation.id.clone(),
        bandwidth: representation.bandwidth,
        ..Default::default()
    };

    let init_url = merge_signed_url(manifest_url, &template.resolve(initialization))?;

    let mut segments = Vec::new();
    let mut current_time = 0;
    let mut segment_number = start_number;
    for segment in timeline.segments.iter() {
        if let Some(t) = segment.t {
            current_time = t;
        }

        let duration = segment.d;
        let repeat = segment.r.unwrap_or(0);
        for _ in 0..(repeat + 1) {
            let template = Template {
                number: Some(segment_number),
                time: Some(current_time),
                ..template.clone()
            };
            let url = merge_signed_url(manifest_url, &template.resolve(media))?;
            segments.push(MediaSegment {
                number: segment_number,
                url,
            });

            segment_number += 1;
            current_time += duration;
        }
    }

    Ok(SegmentMap::new(
        track,
        init_url,
        start_number,
        timescale,
        segments,
    ))
}

fn is_absolute_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

/// Join an expanded file name against the manifest URL.
///
/// The manifest query is carried over to the merged URL unless the new URL
/// brings a query of its own, so a CDN-signed manifest yields CDN-signed
/// segment URLs.
pub(crate) fn merge_signed_url(manifest_url: &Url, new: &str) -> HikariResult<Url> {
    if is_absolute_url(new) {
        Ok(Url::parse(new)?)
    } else {
        let mut merged = manifest_url.join(new)?;
        if merged.query().is_none() {
            merged.set_query(manifest_url.query());
        }
        Ok(merged)
    }
}
