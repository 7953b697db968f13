//! Fixed capability descriptor and hardware-parameter validation

use crate::audio::AudioFormat;
use crate::error::{Result, SoftPcmError};
use tracing::debug;

/// Sample formats the simulated device can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// Signed 16-bit little-endian
    S16Le,
}

impl SampleFormat {
    /// Width of one sample in bits
    pub fn width(&self) -> u16 {
        match self {
            SampleFormat::S16Le => 16,
        }
    }
}

impl std::fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SampleFormat::S16Le => write!(f, "S16_LE"),
        }
    }
}

/// Capability set declared by every stream at open
///
/// Mirrors what a host audio framework expects from a PCM component:
/// the framework refines the user's request against these bounds before
/// handing geometry to [`PcmStream::configure`](crate::audio::PcmStream::configure).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmHardware {
    pub interleaved: bool,
    pub mmap: bool,
    pub format: SampleFormat,
    pub rates: &'static [u32],
    pub rate_min: u32,
    pub rate_max: u32,
    pub channels_min: u16,
    pub channels_max: u16,
    pub buffer_bytes_min: usize,
    pub buffer_bytes_max: usize,
    pub period_bytes_min: usize,
    pub period_bytes_max: usize,
    pub periods_min: usize,
    pub periods_max: usize,
}

/// The one descriptor this device advertises
pub const SOFTPCM_HARDWARE: PcmHardware = PcmHardware {
    interleaved: true,
    mmap: true,
    format: SampleFormat::S16Le,
    rates: &[44100, 48000],
    rate_min: 44100,
    rate_max: 48000,
    channels_min: 2,
    channels_max: 2,
    buffer_bytes_min: 64 * 1024,
    buffer_bytes_max: 512 * 1024,
    period_bytes_min: 1024,
    period_bytes_max: 64 * 1024,
    periods_min: 2,
    periods_max: 1024,
};

impl PcmHardware {
    /// Bytes per interleaved frame at the fixed channel count
    pub fn frame_bytes(&self) -> usize {
        self.channels_max as usize * (self.format.width() as usize / 8)
    }

    /// Format descriptor for a stream running at `rate`
    pub fn audio_format(&self, rate: u32) -> AudioFormat {
        AudioFormat {
            sample_rate: rate,
            channels: self.channels_max,
            bits_per_sample: self.format.width(),
            block_align: self.frame_bytes() as u16,
        }
    }

    /// Check a geometry against every bound in the descriptor
    pub fn validate(&self, params: &HwParams) -> Result<()> {
        if !self.rates.contains(&params.rate) {
            return Err(SoftPcmError::InvalidParams(format!(
                "rate {}Hz not in {:?}",
                params.rate, self.rates
            )));
        }
        if params.period_frames == 0 || params.buffer_frames == 0 {
            return Err(SoftPcmError::InvalidParams(
                "buffer and period must be non-zero".to_string(),
            ));
        }
        if params.period_frames > params.buffer_frames {
            return Err(SoftPcmError::InvalidParams(format!(
                "period {} frames exceeds buffer {} frames",
                params.period_frames, params.buffer_frames
            )));
        }

        let frame_bytes = self.frame_bytes();
        let buffer_bytes = params.buffer_frames * frame_bytes;
        let period_bytes = params.period_frames * frame_bytes;
        let periods = params.periods();

        if !(self.buffer_bytes_min..=self.buffer_bytes_max).contains(&buffer_bytes) {
            return Err(SoftPcmError::InvalidParams(format!(
                "buffer {} bytes outside [{}, {}]",
                buffer_bytes, self.buffer_bytes_min, self.buffer_bytes_max
            )));
        }
        if !(self.period_bytes_min..=self.period_bytes_max).contains(&period_bytes) {
            return Err(SoftPcmError::InvalidParams(format!(
                "period {} bytes outside [{}, {}]",
                period_bytes, self.period_bytes_min, self.period_bytes_max
            )));
        }
        if !(self.periods_min..=self.periods_max).contains(&periods) {
            return Err(SoftPcmError::InvalidParams(format!(
                "{} periods outside [{}, {}]",
                periods, self.periods_min, self.periods_max
            )));
        }

        debug!(
            "hw_params ok: rate={} buffer={}B period={}B periods={}",
            params.rate, buffer_bytes, period_bytes, periods
        );
        Ok(())
    }
}

impl Default for PcmHardware {
    fn default() -> Self {
        SOFTPCM_HARDWARE
    }
}

impl std::fmt::Display for PcmHardware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "  Format:       {}", self.format)?;
        writeln!(f, "  Rates:        {:?} Hz", self.rates)?;
        writeln!(
            f,
            "  Channels:     {}..={}",
            self.channels_min, self.channels_max
        )?;
        writeln!(
            f,
            "  Buffer bytes: {}..={}",
            self.buffer_bytes_min, self.buffer_bytes_max
        )?;
        writeln!(
            f,
            "  Period bytes: {}..={}",
            self.period_bytes_min, self.period_bytes_max
        )?;
        write!(f, "  Periods:      {}..={}", self.periods_min, self.periods_max)
    }
}

/// Geometry chosen by the host for one stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HwParams {
    pub rate: u32,
    pub buffer_frames: usize,
    pub period_frames: usize,
}

impl HwParams {
    pub fn new(rate: u32, buffer_frames: usize, period_frames: usize) -> Self {
        Self {
            rate,
            buffer_frames,
            period_frames,
        }
    }

    /// Whole periods per buffer
    pub fn periods(&self) -> usize {
        if self.period_frames == 0 {
            0
        } else {
            self.buffer_frames / self.period_frames
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_bounds() {
        let hw = PcmHardware::default();
        assert_eq!(hw.frame_bytes(), 4);
        assert_eq!(hw.rates, &[44100, 48000]);
        assert_eq!(hw.buffer_bytes_min, 65536);
        assert_eq!(hw.buffer_bytes_max, 524288);
        assert_eq!((hw.periods_min, hw.periods_max), (2, 1024));
    }

    #[test]
    fn test_validate_accepts_typical_geometry() {
        let hw = PcmHardware::default();
        assert!(hw.validate(&HwParams::new(48000, 19200, 480)).is_ok());
        assert!(hw.validate(&HwParams::new(44100, 16384, 256)).is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let hw = PcmHardware::default();
        // Rate outside the set
        assert!(hw.validate(&HwParams::new(32000, 19200, 480)).is_err());
        // Buffer below 64 KiB
        assert!(hw.validate(&HwParams::new(48000, 4096, 512)).is_err());
        // Period above 64 KiB
        assert!(hw.validate(&HwParams::new(48000, 65536, 32768)).is_err());
        // Period below 1 KiB
        assert!(hw.validate(&HwParams::new(48000, 16384, 128)).is_err());
        // Single period
        assert!(hw.validate(&HwParams::new(48000, 16384, 16384)).is_err());
    }

    #[test]
    fn test_audio_format_for_rate() {
        let format = PcmHardware::default().audio_format(44100);
        assert_eq!(format, AudioFormat::s16_stereo(44100));
    }
}
