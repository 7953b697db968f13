//! Unified error types for softpcm

use crate::audio::{Direction, StreamPhase};
use crate::config::ConfigError;
use thiserror::Error;

/// Main error type for softpcm operations
#[derive(Error, Debug)]
pub enum SoftPcmError {
    /// Allocation or timer-thread creation failed
    #[error("Out of resources: {0}")]
    ResourceExhausted(String),

    /// A stream of this direction is already open on the device
    #[error("Device busy: {0} stream already open")]
    StreamBusy(Direction),

    /// Operation not legal in the stream's current lifecycle phase
    #[error("Cannot {op} while stream is {phase}")]
    InvalidState {
        op: &'static str,
        phase: StreamPhase,
    },

    /// Unrecognized trigger command or malformed argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Hardware parameters outside the capability descriptor
    #[error("Unsupported hardware parameters: {0}")]
    InvalidParams(String),

    /// Stream has no geometry yet
    #[error("Stream not configured")]
    NotConfigured,

    /// Configuration file error
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type alias for softpcm operations
pub type Result<T> = std::result::Result<T, SoftPcmError>;

impl SoftPcmError {
    /// Create an invalid-state error for the given operation
    pub fn invalid_state(op: &'static str, phase: StreamPhase) -> Self {
        Self::InvalidState { op, phase }
    }

    /// Check if this error is recoverable (caller can fix and retry)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SoftPcmError::StreamBusy(_)
                | SoftPcmError::InvalidState { .. }
                | SoftPcmError::InvalidParams(_)
                | SoftPcmError::NotConfigured
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_errors() {
        assert!(SoftPcmError::StreamBusy(Direction::Capture).is_recoverable());
        assert!(SoftPcmError::invalid_state("configure", StreamPhase::Running).is_recoverable());
        assert!(SoftPcmError::NotConfigured.is_recoverable());
        assert!(!SoftPcmError::ResourceExhausted("ring".into()).is_recoverable());
        assert!(!SoftPcmError::InvalidArgument("trigger 9".into()).is_recoverable());
    }
}
