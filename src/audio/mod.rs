//! Simulated PCM device: ring buffer, stream runtimes and the period engine

mod buffer;
mod device;
mod dma;
mod engine;
mod hardware;
mod session;
mod stream;
mod tone;

pub use buffer::{RingBuffer, RingStats};
pub use device::DeviceContext;
pub use dma::DmaBuffer;
pub use engine::period_nanos;
pub use hardware::{HwParams, PcmHardware, SampleFormat};
pub use session::{ChannelSession, PcmSession, PeriodEvent};
pub use stream::{PcmStream, StreamPhase, StreamStats, TriggerCommand};
pub use tone::{non_silent_frames, ToneGenerator, SINE_1K_48K};

/// Stream direction within a device instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Producer side: bytes flow from the host into the ring
    Playback,
    /// Consumer side: bytes flow from the ring to the host
    Capture,
}

impl Direction {
    pub(crate) fn index(self) -> usize {
        match self {
            Direction::Playback => 0,
            Direction::Capture => 1,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Playback => f.pad("playback"),
            Direction::Capture => f.pad("capture"),
        }
    }
}

/// Audio format information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub block_align: u16,
}

impl AudioFormat {
    /// Interleaved signed 16-bit stereo at the given rate
    pub fn s16_stereo(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 2,
            bits_per_sample: 16,
            block_align: 4,
        }
    }

    /// Calculate bytes per second
    pub fn bytes_per_second(&self) -> u32 {
        self.sample_rate * self.block_align as u32
    }

    /// Calculate number of frames for given bytes
    pub fn bytes_to_frames(&self, bytes: usize) -> usize {
        bytes / self.block_align as usize
    }

    /// Calculate bytes for given number of frames
    pub fn frames_to_bytes(&self, frames: usize) -> usize {
        frames * self.block_align as usize
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}Hz {}ch {}bit",
            self.sample_rate, self.channels, self.bits_per_sample
        )
    }
}
