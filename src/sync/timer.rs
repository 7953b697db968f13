//! High-resolution one-shot/periodic timer backed by a dedicated thread
//!
//! Models a kernel hrtimer: `start` arms a relative expiry, the callback
//! decides whether to restart by forwarding its own expiry in whole
//! intervals, and `cancel` does not return while the callback is running.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Callback verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerRestart {
    /// Re-arm at the (forwarded) expiry
    Restart,
    /// Stay idle until started again
    NoRestart,
}

/// Expiry handed to the callback for the firing in progress
#[derive(Debug, Clone, Copy)]
pub struct Expiry {
    deadline: Instant,
}

impl Expiry {
    pub fn new(deadline: Instant) -> Self {
        Self { deadline }
    }

    /// Target instant of this firing
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Advance the expiry by whole `interval`s until it lies after `now`
    ///
    /// Returns the number of intervals added; 0 if the expiry is already in
    /// the future. More than 1 means intervals were skipped.
    pub fn forward(&mut self, now: Instant, interval: Duration) -> u64 {
        if now < self.deadline {
            return 0;
        }

        let interval_ns = interval.as_nanos().max(1);
        let late_ns = now.duration_since(self.deadline).as_nanos();
        let overruns = late_ns / interval_ns + 1;

        let advance = interval_ns * overruns;
        self.deadline += Duration::new(
            (advance / 1_000_000_000) as u64,
            (advance % 1_000_000_000) as u32,
        );
        overruns as u64
    }

    /// [`forward`](Self::forward) relative to the current instant
    pub fn forward_now(&mut self, interval: Duration) -> u64 {
        self.forward(Instant::now(), interval)
    }
}

struct TimerState {
    deadline: Option<Instant>,
    /// Bumped by every start/cancel so a firing in flight can tell its
    /// restart request has been superseded
    generation: u64,
    in_callback: bool,
    shutdown: bool,
}

struct TimerShared {
    state: Mutex<TimerState>,
    cond: Condvar,
}

/// Timer owning one worker thread
///
/// Dropping the timer cancels it and joins the worker, so once `drop`
/// returns the callback can never run again.
pub struct PeriodTimer {
    name: String,
    shared: Arc<TimerShared>,
    worker: Option<JoinHandle<()>>,
    worker_id: ThreadId,
}

impl PeriodTimer {
    /// Install a timer without arming it
    pub fn new<F>(name: impl Into<String>, callback: F) -> std::io::Result<Self>
    where
        F: FnMut(&mut Expiry) -> TimerRestart + Send + 'static,
    {
        let name = name.into();
        let shared = Arc::new(TimerShared {
            state: Mutex::new(TimerState {
                deadline: None,
                generation: 0,
                in_callback: false,
                shutdown: false,
            }),
            cond: Condvar::new(),
        });

        let worker_shared = shared.clone();
        let worker = thread::Builder::new()
            .name(name.clone())
            .spawn(move || timer_thread(worker_shared, callback))?;
        let worker_id = worker.thread().id();

        debug!("Timer {} installed", name);

        Ok(Self {
            name,
            shared,
            worker: Some(worker),
            worker_id,
        })
    }

    /// Arm the timer to fire once after `after`, replacing any pending expiry
    pub fn start(&self, after: Duration) {
        let mut state = self.shared.state.lock();
        state.generation = state.generation.wrapping_add(1);
        state.deadline = Some(Instant::now() + after);
        self.shared.cond.notify_all();
        trace!("Timer {} armed in {:?}", self.name, after);
    }

    /// Disarm and wait until no callback is executing
    ///
    /// Returns whether a pending expiry was removed. Called from the
    /// timer's own callback it only disarms, since waiting would deadlock.
    pub fn cancel(&self) -> bool {
        let mut state = self.shared.state.lock();
        state.generation = state.generation.wrapping_add(1);
        let was_armed = state.deadline.take().is_some();
        self.shared.cond.notify_all();

        if thread::current().id() != self.worker_id {
            wait_idle(&self.shared.cond, &mut state);
        }
        was_armed
    }

    /// Whether an expiry is pending
    pub fn is_armed(&self) -> bool {
        self.shared.state.lock().deadline.is_some()
    }

    /// Whether the callback is executing right now
    pub fn is_running_callback(&self) -> bool {
        self.shared.state.lock().in_callback
    }
}

impl Drop for PeriodTimer {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            state.deadline = None;
            self.shared.cond.notify_all();
        }
        if let Some(handle) = self.worker.take() {
            if handle.thread().id() != thread::current().id() {
                if handle.join().is_err() {
                    warn!("Timer {} thread panicked", self.name);
                }
            }
        }
        debug!("Timer {} removed", self.name);
    }
}

fn wait_idle(cond: &Condvar, state: &mut MutexGuard<'_, TimerState>) {
    while state.in_callback {
        cond.wait(state);
    }
}

/// Timer worker: sleeps until the deadline, runs the callback unlocked
fn timer_thread<F>(shared: Arc<TimerShared>, mut callback: F)
where
    F: FnMut(&mut Expiry) -> TimerRestart,
{
    let mut state = shared.state.lock();

    loop {
        if state.shutdown {
            break;
        }

        let Some(deadline) = state.deadline else {
            shared.cond.wait(&mut state);
            continue;
        };

        if Instant::now() < deadline {
            shared.cond.wait_until(&mut state, deadline);
            continue;
        }

        let generation = state.generation;
        state.deadline = None;
        state.in_callback = true;

        let mut expiry = Expiry::new(deadline);
        let restart = MutexGuard::unlocked(&mut state, || callback(&mut expiry));

        state.in_callback = false;
        if restart == TimerRestart::Restart && state.generation == generation && !state.shutdown
        {
            state.deadline = Some(expiry.deadline());
        }
        shared.cond.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn test_forward_in_future_is_noop() {
        let base = Instant::now();
        let mut expiry = Expiry::new(base + Duration::from_millis(5));
        assert_eq!(expiry.forward(base, Duration::from_millis(10)), 0);
        assert_eq!(expiry.deadline(), base + Duration::from_millis(5));
    }

    #[test]
    fn test_forward_advances_by_whole_intervals() {
        let base = Instant::now();
        let interval = Duration::from_millis(10);

        // On time: exactly one interval
        let mut expiry = Expiry::new(base);
        assert_eq!(expiry.forward(base + Duration::from_millis(3), interval), 1);
        assert_eq!(expiry.deadline(), base + interval);

        // Late by 2.5 intervals: catch up past now, keep phase
        let mut expiry = Expiry::new(base);
        assert_eq!(expiry.forward(base + Duration::from_millis(25), interval), 3);
        assert_eq!(expiry.deadline(), base + Duration::from_millis(30));
    }

    #[test]
    fn test_one_shot_fires_once() {
        let fired = Arc::new(AtomicU64::new(0));
        let counter = fired.clone();
        let timer = PeriodTimer::new("test-oneshot", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            TimerRestart::NoRestart
        })
        .unwrap();

        timer.start(Duration::from_millis(2));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!timer.is_armed());
    }

    #[test]
    fn test_periodic_restart_and_cancel() {
        let fired = Arc::new(AtomicU64::new(0));
        let counter = fired.clone();
        let interval = Duration::from_millis(2);
        let timer = PeriodTimer::new("test-periodic", move |expiry| {
            counter.fetch_add(1, Ordering::SeqCst);
            expiry.forward_now(interval);
            TimerRestart::Restart
        })
        .unwrap();

        timer.start(interval);
        thread::sleep(Duration::from_millis(40));
        timer.cancel();

        let after_cancel = fired.load(Ordering::SeqCst);
        assert!(after_cancel >= 2, "only {} firings", after_cancel);

        thread::sleep(Duration::from_millis(20));
        assert_eq!(fired.load(Ordering::SeqCst), after_cancel);
    }

    #[test]
    fn test_cancel_waits_for_running_callback() {
        let done = Arc::new(AtomicU64::new(0));
        let flag = done.clone();
        let timer = PeriodTimer::new("test-slow", move |_| {
            thread::sleep(Duration::from_millis(30));
            flag.store(1, Ordering::SeqCst);
            TimerRestart::NoRestart
        })
        .unwrap();

        timer.start(Duration::ZERO);
        // Give the worker time to enter the callback
        let entered = Instant::now();
        while !timer.is_running_callback() && entered.elapsed() < Duration::from_secs(1) {
            thread::yield_now();
        }

        timer.cancel();
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_after_callback_panic() {
        let timer = PeriodTimer::new("test-panic", |_| -> TimerRestart {
            panic!("callback failed");
        })
        .unwrap();

        timer.start(Duration::ZERO);
        thread::sleep(Duration::from_millis(20));
        // The join error is logged, not propagated
        drop(timer);
    }
}
