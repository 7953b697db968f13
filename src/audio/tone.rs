//! 1kHz test tone for feeding the playback stream

/// One cycle of a 1kHz sine at 48kHz (48 samples per cycle)
pub const SINE_1K_48K: [i16; 48] = [
    0, 2616, 5195, 7702, 10099, 12350, 14421, 16280, 17898, 19248, 20309, 21062, 21493, 21598,
    21376, 20830, 19967, 18803, 17357, 15654, 13725, 11606, 9336, 6956, 4510, 2043, -402, -2786,
    -5070, -7215, -9186, -10952, -12484, -13755, -14742, -15433, -15814, -15882, -15635, -15077,
    -14217, -13069, -11654, -10000, -8142, -6116, -3962, -1728,
];

/// Interleaved stereo S16_LE tone source with continuous phase
///
/// At 44.1kHz the same table plays back at roughly 919Hz.
#[derive(Debug, Clone, Default)]
pub struct ToneGenerator {
    phase: usize,
}

impl ToneGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fill `out` with whole frames; a trailing partial frame is zeroed
    pub fn fill(&mut self, out: &mut [u8]) {
        let mut frames = out.chunks_exact_mut(4);
        for frame in &mut frames {
            let sample = SINE_1K_48K[self.phase].to_le_bytes();
            frame[..2].copy_from_slice(&sample);
            frame[2..].copy_from_slice(&sample);
            self.phase = (self.phase + 1) % SINE_1K_48K.len();
        }
        frames.into_remainder().fill(0);
    }

    /// Current index into the sine table
    pub fn phase(&self) -> usize {
        self.phase
    }
}

/// Count frames in an S16_LE stereo byte slice that are not digital silence
pub fn non_silent_frames(bytes: &[u8]) -> usize {
    bytes
        .chunks_exact(4)
        .filter(|frame| frame.iter().any(|&b| b != 0))
        .count()
}
