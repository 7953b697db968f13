//! softpcm - Software PCM device
//!
//! Emulates an audio device entirely in software: a periodic timer
//! fabricates the hardware position of each stream, and a shared ring
//! buffer loops playback data into capture.

pub mod audio;
pub mod config;
pub mod error;
pub mod sync;

pub use error::{Result, SoftPcmError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
