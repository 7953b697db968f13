//! Drift tracking between simulated stream positions and the wall clock

use crate::audio::Direction;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, trace};

/// Drift beyond which a stream is reported as lagging
const DRIFT_THRESHOLD_FRAMES: i64 = 480; // ~10ms at 48kHz

/// Per-direction drift tracker
///
/// The host feeds it the running frame count each stream has advanced
/// (periods elapsed times period size); it compares that against the
/// frames wall-clock time says should have elapsed.
pub struct DriftTracker {
    streams: HashMap<Direction, StreamDrift>,
}

struct StreamDrift {
    sample_rate: u32,
    /// Frames reported at the last update
    last_frames: u64,
    last_update: Instant,
    /// Smoothed drift in frames (positive = ahead of wall clock)
    drift_frames: i64,
}

impl DriftTracker {
    pub fn new() -> Self {
        Self {
            streams: HashMap::new(),
        }
    }

    /// Start tracking a stream from now
    pub fn register(&mut self, direction: Direction, sample_rate: u32) {
        self.streams.insert(
            direction,
            StreamDrift {
                sample_rate,
                last_frames: 0,
                last_update: Instant::now(),
                drift_frames: 0,
            },
        );
        debug!("Drift tracking registered for {} stream", direction);
    }

    /// Report the total frames a stream has advanced so far
    pub fn update(&mut self, direction: Direction, total_frames: u64) {
        self.update_at(direction, total_frames, Instant::now());
    }

    fn update_at(&mut self, direction: Direction, total_frames: u64, now: Instant) {
        if let Some(stream) = self.streams.get_mut(&direction) {
            let elapsed = now.duration_since(stream.last_update);
            let expected = (elapsed.as_secs_f64() * stream.sample_rate as f64) as i64;
            let actual = total_frames.wrapping_sub(stream.last_frames) as i64;

            let drift_delta = actual - expected;
            stream.drift_frames = (stream.drift_frames * 7 + drift_delta) / 8;
            stream.last_frames = total_frames;
            stream.last_update = now;

            trace!(
                "{} drift: {} frames ({:.2}ms)",
                direction,
                stream.drift_frames,
                stream.drift_frames as f64 * 1000.0 / stream.sample_rate as f64
            );

            if stream.drift_frames.abs() > DRIFT_THRESHOLD_FRAMES {
                debug!(
                    "{} stream drifting: {} frames",
                    direction, stream.drift_frames
                );
            }
        }
    }

    /// Current smoothed drift for a stream in milliseconds
    pub fn drift_ms(&self, direction: Direction) -> Option<f64> {
        self.streams
            .get(&direction)
            .map(|s| s.drift_frames as f64 * 1000.0 / s.sample_rate as f64)
    }

    /// Whether a stream's drift exceeds the reporting threshold
    pub fn is_lagging(&self, direction: Direction) -> bool {
        self.streams
            .get(&direction)
            .is_some_and(|s| s.drift_frames.abs() > DRIFT_THRESHOLD_FRAMES)
    }
}

impl Default for DriftTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_unregistered_stream_has_no_drift() {
        let tracker = DriftTracker::new();
        assert!(tracker.drift_ms(Direction::Capture).is_none());
        assert!(!tracker.is_lagging(Direction::Capture));
    }

    #[test]
    fn test_matching_rate_has_no_drift() {
        let mut tracker = DriftTracker::new();
        tracker.register(Direction::Playback, 48000);

        let start = tracker.streams[&Direction::Playback].last_update;
        tracker.update_at(Direction::Playback, 480, start + Duration::from_millis(10));
        tracker.update_at(Direction::Playback, 960, start + Duration::from_millis(20));

        let drift = tracker.drift_ms(Direction::Playback).unwrap();
        assert!(drift.abs() < 0.1, "Drift was {}", drift);
    }

    #[test]
    fn test_stalled_stream_drifts_negative() {
        let mut tracker = DriftTracker::new();
        tracker.register(Direction::Capture, 48000);

        let start = tracker.streams[&Direction::Capture].last_update;
        for i in 1..=20u32 {
            tracker.update_at(Direction::Capture, 0, start + Duration::from_millis(20 * i as u64));
        }

        assert!(tracker.drift_ms(Direction::Capture).unwrap() < -5.0);
        assert!(tracker.is_lagging(Direction::Capture));
    }
}
