//! Timer service and clock tracking

mod clock;
mod timer;

pub use clock::DriftTracker;
pub use timer::{Expiry, PeriodTimer, TimerRestart};
