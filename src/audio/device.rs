//! Device context shared by the playback and capture streams of one instance

use crate::audio::buffer::{RingBuffer, RingStats};
use crate::audio::hardware::PcmHardware;
use crate::audio::session::PcmSession;
use crate::audio::stream::PcmStream;
use crate::audio::Direction;
use crate::config::DeviceConfig;
use crate::error::{Result, SoftPcmError};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

/// One simulated sound device
///
/// Owns the loopback ring and its lock. Streams hold an `Arc` to it, so it
/// outlives every stream it serves. At most one playback and one capture
/// stream may be open at a time.
pub struct DeviceContext {
    name: String,
    hardware: PcmHardware,
    loopback: bool,
    /// Device lock: covers ring offsets and fill count only
    ring: Mutex<RingBuffer>,
    /// Open flags indexed by [`Direction::index`]
    open_streams: Mutex<[bool; 2]>,
}

impl DeviceContext {
    /// Create a device with a ring of `ring_bytes` capacity
    pub fn new(name: impl Into<String>, ring_bytes: usize, loopback: bool) -> Result<Arc<Self>> {
        let name = name.into();
        let ring = RingBuffer::try_new(ring_bytes).ok_or_else(|| {
            SoftPcmError::ResourceExhausted(format!("ring buffer of {} bytes", ring_bytes))
        })?;

        info!(
            "Device '{}' created: ring={} bytes, loopback={}",
            name, ring_bytes, loopback
        );

        Ok(Arc::new(Self {
            name,
            hardware: PcmHardware::default(),
            loopback,
            ring: Mutex::new(ring),
            open_streams: Mutex::new([false; 2]),
        }))
    }

    /// Create a device from configuration
    pub fn from_config(config: &DeviceConfig) -> Result<Arc<Self>> {
        Self::new(config.name.clone(), config.ring_bytes, config.loopback)
    }

    /// Device name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Capability descriptor every stream on this device declares
    pub fn hardware(&self) -> &PcmHardware {
        &self.hardware
    }

    /// Whether playback data is looped into capture
    pub fn loopback(&self) -> bool {
        self.loopback
    }

    /// Open a stream in `direction`, bound to the host's `session`
    pub fn open(
        self: &Arc<Self>,
        direction: Direction,
        session: Arc<dyn PcmSession>,
    ) -> Result<PcmStream> {
        self.claim_with(direction, || PcmStream::open(self.clone(), direction, session))
    }

    /// Hold the `direction` slot for whatever `open` builds; free it on failure
    fn claim_with<T>(&self, direction: Direction, open: impl FnOnce() -> Result<T>) -> Result<T> {
        self.claim(direction)?;
        open().map_err(|e| {
            self.release_slot(direction);
            e
        })
    }

    /// Whether a stream of `direction` is currently open
    pub fn is_open(&self, direction: Direction) -> bool {
        self.open_streams.lock()[direction.index()]
    }

    fn claim(&self, direction: Direction) -> Result<()> {
        let mut open = self.open_streams.lock();
        if open[direction.index()] {
            return Err(SoftPcmError::StreamBusy(direction));
        }
        open[direction.index()] = true;
        Ok(())
    }

    pub(crate) fn release_slot(&self, direction: Direction) {
        self.open_streams.lock()[direction.index()] = false;
        debug!("Device '{}': {} slot released", self.name, direction);
    }

    /// Producer side: queue one contiguous span of playback bytes
    ///
    /// Returns false on overflow (span dropped whole).
    pub fn push(&self, data: &[u8]) -> bool {
        self.ring.lock().push(data)
    }

    /// Consumer side: take one contiguous span for capture
    ///
    /// Returns false on underrun (`out` zero-filled).
    pub fn pop(&self, out: &mut [u8]) -> bool {
        self.ring.lock().pop(out)
    }

    /// Discard any queued loopback bytes
    pub fn flush(&self) {
        debug!("Device '{}': loopback ring flushed", self.name);
        self.ring.lock().clear();
    }

    /// Snapshot of ring occupancy and glitch counters
    pub fn ring_stats(&self) -> RingStats {
        self.ring.lock().stats()
    }
}
