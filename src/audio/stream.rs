//! Stream runtime - per-direction lifecycle, geometry and simulated position

use crate::audio::device::DeviceContext;
use crate::audio::dma::DmaBuffer;
use crate::audio::engine::{self, period_nanos};
use crate::audio::hardware::HwParams;
use crate::audio::session::PcmSession;
use crate::audio::{AudioFormat, Direction};
use crate::error::{Result, SoftPcmError};
use crate::sync::PeriodTimer;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Lifecycle phase of an open stream
///
/// Closing consumes the [`PcmStream`], so there is no closed phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    /// Opened, no geometry yet
    Open,
    /// Geometry set (or released by hw-free)
    Configured,
    /// Ready to start
    Prepared,
    /// Timer armed and advancing
    Running,
    /// Paused or suspended, position retained
    Paused,
    /// Stopped by trigger
    Stopped,
}

impl std::fmt::Display for StreamPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StreamPhase::Open => "open",
            StreamPhase::Configured => "configured",
            StreamPhase::Prepared => "prepared",
            StreamPhase::Running => "running",
            StreamPhase::Paused => "paused",
            StreamPhase::Stopped => "stopped",
        };
        f.pad(name)
    }
}

/// Host-issued trigger request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerCommand {
    Stop,
    Start,
    PausePush,
    PauseRelease,
    Suspend,
    Resume,
}

impl TriggerCommand {
    /// Decode the host framework's numeric trigger code
    pub fn from_raw(cmd: i32) -> Result<Self> {
        match cmd {
            0 => Ok(TriggerCommand::Stop),
            1 => Ok(TriggerCommand::Start),
            3 => Ok(TriggerCommand::PausePush),
            4 => Ok(TriggerCommand::PauseRelease),
            5 => Ok(TriggerCommand::Suspend),
            6 => Ok(TriggerCommand::Resume),
            other => Err(SoftPcmError::InvalidArgument(format!(
                "unknown trigger command {}",
                other
            ))),
        }
    }
}

/// Geometry derived at configure time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StreamGeometry {
    pub rate: u32,
    pub buffer_frames: usize,
    pub period_frames: usize,
    pub frame_bytes: usize,
    pub period: Duration,
}

/// Fields guarded by the stream lock
pub(crate) struct StreamState {
    pub running: bool,
    /// Simulated hardware position in frames, `< buffer_frames`
    pub hw_ptr: usize,
    pub session: Option<Arc<dyn PcmSession>>,
    /// Written only by the control path while not running
    pub geometry: Option<StreamGeometry>,
}

/// Everything the timer callback touches
pub(crate) struct StreamShared {
    pub direction: Direction,
    pub device: Arc<DeviceContext>,
    pub state: Mutex<StreamState>,
    pub dma: DmaBuffer,
    pub periods_elapsed: AtomicU64,
    pub missed_deadlines: AtomicU64,
}

/// Counters for one stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub periods_elapsed: u64,
    pub missed_deadlines: u64,
}

/// Handle to one open directional stream
///
/// Control operations take `&mut self`: the host serializes control calls
/// on a stream, while the period timer runs concurrently against the
/// shared state. Dropping the handle closes the stream.
pub struct PcmStream {
    shared: Arc<StreamShared>,
    timer: Option<PeriodTimer>,
    phase: StreamPhase,
}

impl PcmStream {
    /// Allocate the runtime and install (but not arm) its timer
    pub(crate) fn open(
        device: Arc<DeviceContext>,
        direction: Direction,
        session: Arc<dyn PcmSession>,
    ) -> Result<Self> {
        let dma_bytes = device.hardware().buffer_bytes_max;
        let dma = DmaBuffer::try_new(dma_bytes).ok_or_else(|| {
            SoftPcmError::ResourceExhausted(format!(
                "{} stream buffer of {} bytes",
                direction, dma_bytes
            ))
        })?;

        let shared = Arc::new(StreamShared {
            direction,
            device,
            state: Mutex::new(StreamState {
                running: false,
                hw_ptr: 0,
                session: Some(session),
                geometry: None,
            }),
            dma,
            periods_elapsed: AtomicU64::new(0),
            missed_deadlines: AtomicU64::new(0),
        });

        let callback_shared = shared.clone();
        let timer = PeriodTimer::new(format!("softpcm-{}", direction), move |expiry| {
            engine::on_period(&callback_shared, expiry)
        })
        .map_err(|e| SoftPcmError::ResourceExhausted(format!("{} timer: {}", direction, e)))?;

        info!("Opened {} stream on '{}'", direction, shared.device.name());

        Ok(Self {
            shared,
            timer: Some(timer),
            phase: StreamPhase::Open,
        })
    }

    /// Stream direction
    pub fn direction(&self) -> Direction {
        self.shared.direction
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> StreamPhase {
        self.phase
    }

    /// Set geometry and derive the period duration
    ///
    /// Rejected while running or paused. Resets the position to 0.
    pub fn configure(&mut self, params: HwParams) -> Result<Duration> {
        if matches!(self.phase, StreamPhase::Running | StreamPhase::Paused) {
            return Err(SoftPcmError::invalid_state("configure", self.phase));
        }

        let hardware = self.shared.device.hardware();
        hardware.validate(&params)?;

        let nanos = period_nanos(params.period_frames, params.rate);
        let geometry = StreamGeometry {
            rate: params.rate,
            buffer_frames: params.buffer_frames,
            period_frames: params.period_frames,
            frame_bytes: hardware.frame_bytes(),
            period: Duration::from_nanos(nanos),
        };

        {
            let mut state = self.shared.state.lock();
            state.geometry = Some(geometry);
            state.hw_ptr = 0;
        }
        self.shared.dma.clear();
        self.phase = StreamPhase::Configured;

        info!(
            "{} hw_params: buffer={} period={} rate={} (period {} ns)",
            self.direction(),
            params.buffer_frames * geometry.frame_bytes,
            params.period_frames * geometry.frame_bytes,
            params.rate,
            nanos
        );

        Ok(geometry.period)
    }

    /// Mark the stream ready to start; idempotent
    pub fn prepare(&mut self) -> Result<()> {
        match self.phase {
            StreamPhase::Open => Err(SoftPcmError::NotConfigured),
            StreamPhase::Running | StreamPhase::Paused => {
                Err(SoftPcmError::invalid_state("prepare", self.phase))
            }
            StreamPhase::Configured | StreamPhase::Prepared | StreamPhase::Stopped => {
                self.phase = StreamPhase::Prepared;
                debug!("{} prepared", self.direction());
                Ok(())
            }
        }
    }

    /// Start advancing; a fresh start rewinds the position, a resume keeps it
    pub fn start(&mut self, fresh: bool) -> Result<()> {
        let period = match self.phase {
            StreamPhase::Open => return Err(SoftPcmError::NotConfigured),
            StreamPhase::Running => return Err(SoftPcmError::invalid_state("start", self.phase)),
            _ => self.geometry().ok_or(SoftPcmError::NotConfigured)?.period,
        };

        // Bytes queued by an earlier playback run must not reach capture
        if fresh && self.direction() == Direction::Playback && self.shared.device.loopback() {
            self.shared.device.flush();
        }

        {
            let mut state = self.shared.state.lock();
            if fresh {
                state.hw_ptr = 0;
            }
            state.running = true;
        }

        if let Some(timer) = &self.timer {
            timer.start(period);
        }
        self.phase = StreamPhase::Running;

        debug!(
            "{} {} (period {:?})",
            self.direction(),
            if fresh { "started" } else { "resumed" },
            period
        );
        Ok(())
    }

    /// Clear the run flag
    ///
    /// Lazy: a pending firing is left armed and terminates itself when it
    /// observes the flag, so the timer goes idle within one period.
    pub fn stop(&mut self) -> Result<()> {
        self.halt();
        if matches!(self.phase, StreamPhase::Running | StreamPhase::Paused) {
            self.phase = StreamPhase::Stopped;
        }
        debug!("{} stopped", self.direction());
        Ok(())
    }

    /// Lazy stop that keeps the position for a later resume
    pub fn pause(&mut self) -> Result<()> {
        if self.phase != StreamPhase::Running {
            return Err(SoftPcmError::invalid_state("pause", self.phase));
        }
        self.halt();
        self.phase = StreamPhase::Paused;
        debug!("{} paused", self.direction());
        Ok(())
    }

    /// Dispatch a host trigger command
    pub fn trigger(&mut self, cmd: TriggerCommand) -> Result<()> {
        match cmd {
            TriggerCommand::Start => self.start(true),
            TriggerCommand::PauseRelease | TriggerCommand::Resume => {
                if self.phase != StreamPhase::Paused {
                    return Err(SoftPcmError::invalid_state("resume", self.phase));
                }
                self.start(false)
            }
            TriggerCommand::Stop => self.stop(),
            TriggerCommand::PausePush => self.pause(),
            TriggerCommand::Suspend => {
                if self.phase == StreamPhase::Running {
                    self.pause()
                } else {
                    Ok(())
                }
            }
        }
    }

    /// [`trigger`](Self::trigger) with the host's numeric command code
    pub fn trigger_raw(&mut self, cmd: i32) -> Result<()> {
        self.trigger(TriggerCommand::from_raw(cmd)?)
    }

    /// Cancel the timer, wait out any running callback, then clear the flag
    pub fn release(&mut self) {
        if let Some(timer) = &self.timer {
            timer.cancel();
        }
        self.halt();
        if self.phase != StreamPhase::Open {
            self.phase = StreamPhase::Configured;
        }
        debug!("{} released", self.direction());
    }

    /// Release, detach from the session and free the runtime
    pub fn close(self) {
        drop(self);
    }

    /// Simulated hardware position in frames
    pub fn query_position(&self) -> usize {
        self.shared.state.lock().hw_ptr
    }

    /// Whether the run flag is set
    pub fn is_running(&self) -> bool {
        self.shared.state.lock().running
    }

    /// Whether a timer firing is pending
    pub fn timer_armed(&self) -> bool {
        self.timer.as_ref().is_some_and(|t| t.is_armed())
    }

    /// Geometry as configured
    pub fn params(&self) -> Option<HwParams> {
        self.geometry()
            .map(|g| HwParams::new(g.rate, g.buffer_frames, g.period_frames))
    }

    /// Period duration as configured
    pub fn period_duration(&self) -> Option<Duration> {
        self.geometry().map(|g| g.period)
    }

    /// Sample format as configured
    pub fn format(&self) -> Option<AudioFormat> {
        self.geometry()
            .map(|g| self.shared.device.hardware().audio_format(g.rate))
    }

    /// Active buffer size in bytes (0 before configure)
    pub fn buffer_bytes(&self) -> usize {
        self.geometry()
            .map(|g| g.buffer_frames * g.frame_bytes)
            .unwrap_or(0)
    }

    /// Host-visible sample buffer
    pub fn dma(&self) -> &DmaBuffer {
        &self.shared.dma
    }

    /// Counter snapshot
    pub fn stats(&self) -> StreamStats {
        StreamStats {
            periods_elapsed: self.shared.periods_elapsed.load(Ordering::Relaxed),
            missed_deadlines: self.shared.missed_deadlines.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn shared(&self) -> &StreamShared {
        &self.shared
    }

    fn geometry(&self) -> Option<StreamGeometry> {
        self.shared.state.lock().geometry
    }

    fn halt(&self) {
        self.shared.state.lock().running = false;
    }
}

impl Drop for PcmStream {
    fn drop(&mut self) {
        self.release();
        self.shared.state.lock().session = None;

        // Joins the timer thread: no callback can run past this point
        self.timer = None;
        self.shared.device.release_slot(self.shared.direction);

        info!("Closed {} stream", self.shared.direction);
    }
}
