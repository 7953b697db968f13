//! Boundary to the host framework's transport session

use crate::audio::Direction;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};

/// The host side of an open stream
///
/// `period_elapsed` is invoked from the period timer context once per
/// period, after the position has advanced and the period's bytes have
/// moved. Implementations must return promptly and must not block or call
/// back into the stream's control operations.
pub trait PcmSession: Send + Sync {
    fn period_elapsed(&self, direction: Direction, position: usize);
}

/// Notification emitted by [`ChannelSession`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodEvent {
    pub direction: Direction,
    /// Hardware pointer in frames after the period elapsed
    pub position: usize,
}

/// Session that forwards period notifications over a bounded channel
///
/// Sending never blocks: when the receiver falls behind, events are
/// dropped and counted.
pub struct ChannelSession {
    tx: Sender<PeriodEvent>,
    dropped: AtomicU64,
}

impl ChannelSession {
    /// Create a session and the receiver the host drains
    pub fn new(capacity: usize) -> (Self, Receiver<PeriodEvent>) {
        let (tx, rx) = bounded(capacity.max(1));
        (
            Self {
                tx,
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    /// Wrap an existing sender, e.g. to share one receiver between streams
    pub fn from_sender(tx: Sender<PeriodEvent>) -> Self {
        Self {
            tx,
            dropped: AtomicU64::new(0),
        }
    }

    /// Events lost because the channel was full or disconnected
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl PcmSession for ChannelSession {
    fn period_elapsed(&self, direction: Direction, position: usize) {
        let event = PeriodEvent {
            direction,
            position,
        };
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_session_forwards_and_drops() {
        let (session, rx) = ChannelSession::new(2);
        session.period_elapsed(Direction::Playback, 480);
        session.period_elapsed(Direction::Playback, 960);
        session.period_elapsed(Direction::Playback, 1440);

        assert_eq!(
            rx.try_recv().unwrap(),
            PeriodEvent {
                direction: Direction::Playback,
                position: 480
            }
        );
        assert_eq!(rx.try_recv().unwrap().position, 960);
        assert!(rx.try_recv().is_err());
        assert_eq!(session.dropped(), 1);
    }
}
