//! Period timer engine - advances the simulated hardware pointer each period
//!
//! Runs in the timer context: no blocking beyond short uncontended locks,
//! no allocation, bounded work. The stream lock covers only the flag and
//! pointer arithmetic; the data copy happens afterwards under the DMA and
//! device locks, never nested inside the stream lock.

use crate::audio::session::PcmSession;
use crate::audio::stream::{StreamGeometry, StreamShared};
use crate::audio::Direction;
use crate::sync::{Expiry, TimerRestart};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::trace;

const NSEC_PER_SEC: u64 = 1_000_000_000;

/// Period length in nanoseconds, truncated: `period_frames * 1e9 / rate`
pub fn period_nanos(period_frames: usize, rate: u32) -> u64 {
    if rate == 0 {
        return 0;
    }
    ((period_frames as u128 * NSEC_PER_SEC as u128) / rate as u128) as u64
}

/// Frame span `[start, start + len)` within the stream buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Span {
    pub start: usize,
    pub len: usize,
}

/// Split the period starting at `old_ptr` into at most two contiguous spans
pub(crate) fn period_spans(old_ptr: usize, period: usize, buffer: usize) -> [Span; 2] {
    if old_ptr + period > buffer {
        let first = buffer - old_ptr;
        [
            Span {
                start: old_ptr,
                len: first,
            },
            Span {
                start: 0,
                len: period - first,
            },
        ]
    } else {
        [
            Span {
                start: old_ptr,
                len: period,
            },
            Span { start: 0, len: 0 },
        ]
    }
}

/// State captured under the stream lock for one firing
struct Tick {
    old_ptr: usize,
    new_ptr: usize,
    geometry: StreamGeometry,
    session: Arc<dyn PcmSession>,
}

/// Timer callback body for one stream
pub(crate) fn on_period(stream: &StreamShared, expiry: &mut Expiry) -> TimerRestart {
    let Some(tick) = advance(stream) else {
        return TimerRestart::NoRestart;
    };

    let spans = period_spans(
        tick.old_ptr,
        tick.geometry.period_frames,
        tick.geometry.buffer_frames,
    );
    for span in spans.iter().filter(|s| s.len > 0) {
        move_span(stream, &tick.geometry, *span);
    }

    stream.periods_elapsed.fetch_add(1, Ordering::Relaxed);
    tick.session.period_elapsed(stream.direction, tick.new_ptr);

    reschedule(stream, expiry, &tick.geometry)
}

/// Check the run flag and bump the pointer under the stream lock
fn advance(stream: &StreamShared) -> Option<Tick> {
    let mut state = stream.state.lock();
    if !state.running {
        return None;
    }

    let (Some(geometry), Some(session)) = (state.geometry, state.session.clone()) else {
        state.running = false;
        return None;
    };

    let old_ptr = state.hw_ptr;
    let new_ptr = (old_ptr + geometry.period_frames) % geometry.buffer_frames;
    state.hw_ptr = new_ptr;

    Some(Tick {
        old_ptr,
        new_ptr,
        geometry,
        session,
    })
}

/// Move one contiguous span between the stream buffer and the device ring
fn move_span(stream: &StreamShared, geometry: &StreamGeometry, span: Span) {
    let start = span.start * geometry.frame_bytes;
    let end = (span.start + span.len) * geometry.frame_bytes;
    let device = &stream.device;

    match stream.direction {
        Direction::Playback => {
            if device.loopback() {
                let accepted = stream.dma.with_range(start, end, |bytes| device.push(bytes));
                if !accepted {
                    trace!("playback overflow: {} bytes dropped", end - start);
                }
            }
        }
        Direction::Capture => {
            if device.loopback() {
                let delivered = stream
                    .dma
                    .with_range_mut(start, end, |bytes| device.pop(bytes));
                if !delivered {
                    trace!("capture underrun: {} bytes of silence", end - start);
                }
            } else {
                stream.dma.with_range_mut(start, end, |bytes| bytes.fill(0));
            }
        }
    }
}

/// Re-arm in whole periods from the previous deadline while running
fn reschedule(
    stream: &StreamShared,
    expiry: &mut Expiry,
    geometry: &StreamGeometry,
) -> TimerRestart {
    if !stream.state.lock().running {
        return TimerRestart::NoRestart;
    }

    let overruns = expiry.forward_now(geometry.period);
    if overruns > 1 {
        let missed = overruns - 1;
        stream.missed_deadlines.fetch_add(missed, Ordering::Relaxed);
        trace!("{} timer skipped {} period(s)", stream.direction, missed);
    }
    TimerRestart::Restart
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{ChannelSession, DeviceContext, HwParams, PcmStream, ToneGenerator};
    use std::time::{Duration, Instant};

    fn open(device: &Arc<DeviceContext>, direction: Direction) -> PcmStream {
        let (session, _rx) = ChannelSession::new(1024);
        device.open(direction, Arc::new(session)).unwrap()
    }

    /// Mark running without arming the timer so firings can be driven by hand
    fn force_running(stream: &PcmStream) {
        stream.shared().state.lock().running = true;
    }

    fn fire(stream: &PcmStream) -> TimerRestart {
        let mut expiry = Expiry::new(Instant::now());
        on_period(stream.shared(), &mut expiry)
    }

    #[test]
    fn test_period_nanos_truncates() {
        assert_eq!(period_nanos(480, 48000), 10_000_000);
        assert_eq!(period_nanos(441, 44100), 10_000_000);
        assert_eq!(period_nanos(256, 44100), 5_804_988);
        assert_eq!(period_nanos(1, 48000), 20_833);
    }

    #[test]
    fn test_period_spans() {
        assert_eq!(
            period_spans(0, 480, 19200),
            [Span { start: 0, len: 480 }, Span { start: 0, len: 0 }]
        );
        // Exactly reaching the end is not a split
        assert_eq!(
            period_spans(18720, 480, 19200),
            [Span { start: 18720, len: 480 }, Span { start: 0, len: 0 }]
        );
        assert_eq!(
            period_spans(16000, 1000, 16500),
            [Span { start: 16000, len: 500 }, Span { start: 0, len: 500 }]
        );
    }

    #[test]
    fn test_n_firings_advance_pointer() {
        let device = DeviceContext::new("test", 512 * 1024, false).unwrap();
        let mut stream = open(&device, Direction::Playback);
        stream.configure(HwParams::new(48000, 16500, 1000)).unwrap();
        force_running(&stream);

        for n in 1..=40usize {
            assert_eq!(fire(&stream), TimerRestart::Restart);
            assert_eq!(stream.query_position(), (n * 1000) % 16500);
        }
        assert_eq!(stream.stats().periods_elapsed, 40);
        stream.close();
    }

    #[test]
    fn test_not_running_terminates_without_moving() {
        let device = DeviceContext::new("test", 65536, true).unwrap();
        let mut stream = open(&device, Direction::Playback);
        stream.configure(HwParams::new(48000, 16384, 256)).unwrap();

        assert_eq!(fire(&stream), TimerRestart::NoRestart);
        assert_eq!(stream.query_position(), 0);
        assert_eq!(stream.stats().periods_elapsed, 0);
        assert_eq!(device.ring_stats().filled, 0);
        stream.close();
    }

    #[test]
    fn test_loopback_moves_playback_bytes_to_capture() {
        let device = DeviceContext::new("test", 512 * 1024, true).unwrap();
        let mut playback = open(&device, Direction::Playback);
        let mut capture = open(&device, Direction::Capture);
        let params = HwParams::new(48000, 19200, 480);
        playback.configure(params).unwrap();
        capture.configure(params).unwrap();

        let buffer_bytes = playback.buffer_bytes();
        let mut source = vec![0u8; buffer_bytes];
        ToneGenerator::new().fill(&mut source);
        playback.dma().write(0, buffer_bytes, &source);

        force_running(&playback);
        force_running(&capture);

        fire(&playback);
        fire(&playback);
        assert_eq!(device.ring_stats().filled, 2 * 1920);

        fire(&capture);
        let mut captured = vec![0u8; 1920];
        capture.dma().read(0, buffer_bytes, &mut captured);
        assert_eq!(captured, source[..1920]);
        assert_eq!(device.ring_stats().filled, 1920);

        playback.close();
        capture.close();
    }

    #[test]
    fn test_wrapping_period_is_split_in_order() {
        let device = DeviceContext::new("test", 512 * 1024, true).unwrap();
        let mut stream = open(&device, Direction::Playback);
        stream.configure(HwParams::new(48000, 16500, 1000)).unwrap();

        let buffer_bytes = stream.buffer_bytes();
        let source: Vec<u8> = (0..buffer_bytes).map(|i| (i % 251) as u8).collect();
        stream.dma().write(0, buffer_bytes, &source);

        stream.shared().state.lock().hw_ptr = 16000;
        force_running(&stream);
        fire(&stream);
        assert_eq!(stream.query_position(), 500);

        let mut queued = vec![0u8; 4000];
        assert!(device.pop(&mut queued));
        assert_eq!(&queued[..2000], &source[64000..66000]);
        assert_eq!(&queued[2000..], &source[..2000]);
        stream.close();
    }

    #[test]
    fn test_capture_without_loopback_is_silence() {
        let device = DeviceContext::new("test", 65536, false).unwrap();
        let mut stream = open(&device, Direction::Capture);
        stream.configure(HwParams::new(48000, 16384, 256)).unwrap();

        let buffer_bytes = stream.buffer_bytes();
        stream.dma().write(0, buffer_bytes, &vec![0xAAu8; buffer_bytes]);
        force_running(&stream);
        fire(&stream);

        let mut span = vec![0xFFu8; 1024];
        stream.dma().read(0, buffer_bytes, &mut span);
        assert!(span.iter().all(|&b| b == 0));

        let mut next = [0u8; 4];
        stream.dma().read(1024, buffer_bytes, &mut next);
        assert_eq!(next, [0xAA; 4]);
        assert_eq!(device.ring_stats().underruns, 0);
        stream.close();
    }

    #[test]
    fn test_capture_underrun_counts_on_device() {
        let device = DeviceContext::new("test", 65536, true).unwrap();
        let mut stream = open(&device, Direction::Capture);
        stream.configure(HwParams::new(48000, 16384, 256)).unwrap();
        force_running(&stream);

        fire(&stream);
        fire(&stream);
        assert_eq!(device.ring_stats().underruns, 2);
        assert_eq!(stream.query_position(), 512);
        stream.close();
    }

    #[test]
    fn test_late_firing_counts_missed_deadlines() {
        let device = DeviceContext::new("test", 65536, false).unwrap();
        let mut stream = open(&device, Direction::Playback);
        stream.configure(HwParams::new(48000, 19200, 480)).unwrap();
        force_running(&stream);

        let period = Duration::from_millis(10);
        let target = Instant::now() - period * 5 - period / 2;
        let mut expiry = Expiry::new(target);

        assert_eq!(on_period(stream.shared(), &mut expiry), TimerRestart::Restart);
        assert!(stream.stats().missed_deadlines >= 5);
        assert!(expiry.deadline() > Instant::now() - period);
        // Phase preserved: still a whole number of periods after the target
        let advanced = expiry.deadline().duration_since(target).as_nanos();
        assert_eq!(advanced % period.as_nanos(), 0);
        stream.close();
    }

    #[test]
    fn test_concurrent_timers_keep_frames_whole_and_ordered() {
        let device = DeviceContext::new("test", 512 * 1024, true).unwrap();
        let mut playback = open(&device, Direction::Playback);
        let mut capture = open(&device, Direction::Capture);

        // Different cadences: ~10.7ms playback, ~5.3ms capture
        playback.configure(HwParams::new(48000, 16384, 512)).unwrap();
        capture.configure(HwParams::new(48000, 16384, 256)).unwrap();

        // Frame i carries the value i + 1 so silence is distinguishable
        let buffer_bytes = playback.buffer_bytes();
        let source: Vec<u8> = (0..16384u32).flat_map(|i| (i + 1).to_le_bytes()).collect();
        playback.dma().write(0, buffer_bytes, &source);

        playback.start(true).unwrap();
        capture.start(true).unwrap();
        std::thread::sleep(Duration::from_millis(100));
        playback.release();
        capture.release();

        let stats = device.ring_stats();
        assert!(stats.filled <= stats.capacity);
        assert_eq!(stats.filled % 4, 0);

        // The capture buffer holds 64 periods; 100ms never wraps it
        let periods = (capture.stats().periods_elapsed as usize).min(64);
        assert!(periods > 0);
        let mut captured = vec![0u8; periods * 1024];
        capture.dma().read(0, capture.buffer_bytes(), &mut captured);

        let mut next = 1u32;
        let mut delivered = 0;
        for period in captured.chunks(1024) {
            let frames: Vec<u32> = period
                .chunks_exact(4)
                .map(|f| u32::from_le_bytes([f[0], f[1], f[2], f[3]]))
                .collect();
            if frames.iter().all(|&v| v == 0) {
                continue;
            }
            for value in frames {
                assert_eq!(value, next, "frame out of order or torn");
                next += 1;
            }
            delivered += 1;
        }
        assert!(delivered > 0, "no playback data reached capture");

        playback.close();
        capture.close();
    }
}
