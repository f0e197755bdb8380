use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::segment::TrackKind;

/// State of one track at the moment a segment finished, successfully or not.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub track: TrackKind,
    /// Number of segments the track has in total.
    pub total: u64,
    /// Number of segments that have finished so far, failed ones included.
    pub current: u64,
    pub percentage: f64,
    /// Segment number this event reports on.
    pub segment: u64,
    pub success: bool,
    /// Numbers of every segment that has failed so far.
    pub failed: Vec<u64>,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub(crate) fn new(
        track: TrackKind,
        total: u64,
        current: u64,
        segment: u64,
        success: bool,
        failed: Vec<u64>,
    ) -> Self {
        let percentage = if total == 0 {
            0.
        } else {
            current as f64 / total as f64 * 100.
        };

        Self {
            track,
            total,
            current,
            percentage,
            segment,
            success,
            failed,
            timestamp: Utc::now(),
        }
    }
}

/// Consumer of the per-segment events of one track download.
pub trait ProgressObserver: Send + Sync {
    fn on_segment(&self, event: &ProgressEvent);
}

impl<F> ProgressObserver for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn on_segment(&self, event: &ProgressEvent) {
        self(event)
    }
}

/// Latest known state of both tracks of one asset.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProgressSnapshot {
    pub audio: Option<ProgressEvent>,
    pub video: Option<ProgressEvent>,
}

impl ProgressSnapshot {
    /// Mean completion of both tracks, in percent. A track that has not
    /// reported yet counts as zero.
    pub fn overall_percentage(&self) -> f64 {
        let audio = self.audio.as_ref().map_or(0., |event| event.percentage);
        let video = self.video.as_ref().map_or(0., |event| event.percentage);
        (audio + video) / 2.
    }
}

/// Consumer of merged two-track snapshots.
pub trait SnapshotObserver: Send + Sync {
    fn on_snapshot(&self, snapshot: &ProgressSnapshot);
}

impl<F> SnapshotObserver for F
where
    F: Fn(&ProgressSnapshot) + Send + Sync,
{
    fn on_snapshot(&self, snapshot: &ProgressSnapshot) {
        self(snapshot)
    }
}

/// Merges the two per-track event streams into one snapshot stream.
///
/// Updating the stored state and notifying the sink happen under one lock,
/// so the sink never observes snapshots out of order.
pub struct ProgressAggregator {
    state: Mutex<ProgressSnapshot>,
    sink: Arc<dyn SnapshotObserver>,
}

impl ProgressAggregator {
    pub fn new(sink: Arc<dyn SnapshotObserver>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ProgressSnapshot::default()),
            sink,
        })
    }
}

impl ProgressObserver for ProgressAggregator {
    fn on_segment(&self, event: &ProgressEvent) {
        let mut state = self.state.lock().unwrap();
        match event.track {
            TrackKind::Audio => state.audio = Some(event.clone()),
            TrackKind::Video => state.video = Some(event.clone()),
        }
        self.sink.on_snapshot(&state);
    }
}
