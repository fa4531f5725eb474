//! Shared activation record.
//!
//! Every node owns one [`Activation`]. It is the only structure that several
//! threads mutate concurrently: upstream nodes decrement its join counter,
//! the owning loop stamps its status and timestamps, and the driver resets
//! it at the start of every quantum. All fields are atomics laid out in a
//! fixed `repr(C)` order so the record could be placed in shared memory.
//!
//! # Field ownership
//!
//! | Field | Written by |
//! |---|---|
//! | `status`, `awake_time`, `finish_time` | the loop running the node |
//! | `signal_time` | whichever thread completes the last dependency |
//! | `state.pending` | upstream nodes (decrement), driver (reset) |
//! | `state.required` | the control plane, through join accounting |
//! | `pending_sync` | driver (set), the node itself (clear on finish) |
//! | `xrun_*`, `max_delay` | the node and its driver |
//! | `cpu_load` | driver |
//! | `position` | driver only; followers read their driver's copy |
//! | `command`, `reposition` | any thread (request), driver (consume) |
//! | `sync_timeout`, `sync_left` | driver |

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

/// Lifecycle of a node within one quantum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ActivationStatus {
    /// Waiting for upstream completions.
    NotTriggered = 0,
    /// All dependencies done, wakeup posted.
    Triggered = 1,
    /// Running `process`.
    Awake = 2,
    /// Done for this quantum.
    Finished = 3,
}

impl ActivationStatus {
    fn from_u32(v: u32) -> Self {
        match v {
            1 => ActivationStatus::Triggered,
            2 => ActivationStatus::Awake,
            3 => ActivationStatus::Finished,
            _ => ActivationStatus::NotTriggered,
        }
    }

    /// Short lowercase name used in state dumps.
    pub fn as_str(self) -> &'static str {
        match self {
            ActivationStatus::NotTriggered => "not-triggered",
            ActivationStatus::Triggered => "triggered",
            ActivationStatus::Awake => "awake",
            ActivationStatus::Finished => "finished",
        }
    }
}

impl fmt::Display for ActivationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport state of a driver's position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PositionState {
    /// Transport stopped.
    Stopped = 0,
    /// Waiting for followers to sync after a start or reposition.
    Starting = 1,
    /// Running.
    Running = 2,
}

impl PositionState {
    fn from_u32(v: u32) -> Self {
        match v {
            1 => PositionState::Starting,
            2 => PositionState::Running,
            _ => PositionState::Stopped,
        }
    }
}

/// Transport command posted to a driver, consumed on its next tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DriverCommand {
    /// No pending command.
    None = 0,
    /// Enter `Starting` and arm the sync timeout.
    Start = 1,
    /// Enter `Stopped`.
    Stop = 2,
}

impl DriverCommand {
    fn from_u32(v: u32) -> Self {
        match v {
            1 => DriverCommand::Start,
            2 => DriverCommand::Stop,
            _ => DriverCommand::None,
        }
    }
}

/// Wait-free join counter.
#[derive(Debug, Default)]
#[repr(C)]
pub struct ActivationState {
    /// Last status returned by `process`.
    status: AtomicU32,
    /// Completions needed per quantum.
    required: AtomicU32,
    /// Completions still missing in the current quantum.
    pending: AtomicU32,
}

impl ActivationState {
    /// Completions needed per quantum.
    pub fn required(&self) -> u32 {
        self.required.load(Ordering::Acquire)
    }

    /// Completions still missing.
    pub fn pending(&self) -> u32 {
        self.pending.load(Ordering::Acquire)
    }

    /// Last process status bits.
    pub fn status(&self) -> u32 {
        self.status.load(Ordering::Relaxed)
    }

    pub(crate) fn set_status(&self, status: u32) {
        self.status.store(status, Ordering::Relaxed);
    }

    /// Rearms the counter for a new quantum.
    pub fn reset(&self) {
        self.pending.store(self.required.load(Ordering::Acquire), Ordering::Release);
    }

    /// Posts one completion. Returns `true` only for the call that takes
    /// `pending` from 1 to 0. A counter already at zero stays there.
    #[inline]
    pub fn dec(&self) -> bool {
        self.pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |p| p.checked_sub(1))
            == Ok(1)
    }

    pub(crate) fn add_required(&self) {
        self.required.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn sub_required(&self) {
        let _ = self
            .required
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |r| r.checked_sub(1));
    }
}

/// Clock and transport position of a driver.
#[derive(Debug, Default)]
#[repr(C)]
pub struct Position {
    rate: AtomicU32,
    duration: AtomicU64,
    position: AtomicU64,
    offset: AtomicU64,
    state: AtomicU32,
}

/// Plain copy of a [`Position`] taken at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Clock {
    /// Graph sample rate.
    pub rate: u32,
    /// Quantum length in frames.
    pub duration: u64,
    /// Frames elapsed since the driver started.
    pub position: u64,
}

impl Clock {
    /// Length of one quantum in nanoseconds, 0 when the clock is unset.
    pub fn period_nsec(&self) -> u64 {
        if self.rate == 0 {
            0
        } else {
            self.duration * 1_000_000_000 / u64::from(self.rate)
        }
    }
}

impl Position {
    /// Rate, duration and position in one copy.
    pub fn clock(&self) -> Clock {
        Clock {
            rate: self.rate.load(Ordering::Relaxed),
            duration: self.duration.load(Ordering::Relaxed),
            position: self.position.load(Ordering::Relaxed),
        }
    }

    /// Transport state.
    pub fn state(&self) -> PositionState {
        PositionState::from_u32(self.state.load(Ordering::Acquire))
    }

    /// Frames counted while not running.
    pub fn offset(&self) -> u64 {
        self.offset.load(Ordering::Relaxed)
    }

    pub(crate) fn set_clock(&self, rate: u32, duration: u64) {
        self.rate.store(rate, Ordering::Relaxed);
        self.duration.store(duration, Ordering::Relaxed);
    }

    pub(crate) fn set_state(&self, state: PositionState) {
        self.state.store(state as u32, Ordering::Release);
    }

    pub(crate) fn advance(&self, frames: u64) {
        self.position.fetch_add(frames, Ordering::Relaxed);
    }

    pub(crate) fn add_offset(&self, frames: u64) {
        self.offset.fetch_add(frames, Ordering::Relaxed);
    }
}

/// Per-node activation record.
#[derive(Debug, Default)]
#[repr(C)]
pub struct Activation {
    status: AtomicU32,
    pending_sync: AtomicBool,
    state: ActivationState,
    signal_time: AtomicU64,
    awake_time: AtomicU64,
    finish_time: AtomicU64,
    prev_signal_time: AtomicU64,
    xrun_count: AtomicU32,
    xrun_time: AtomicU64,
    xrun_delay: AtomicU64,
    max_delay: AtomicU64,
    cpu_load: [AtomicU32; 3],
    position: Position,
    command: AtomicU32,
    reposition: AtomicBool,
    sync_timeout: AtomicU64,
    sync_left: AtomicU32,
}

impl Activation {
    /// Creates a record with zeroed counters and a stopped transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current lifecycle status.
    pub fn status(&self) -> ActivationStatus {
        ActivationStatus::from_u32(self.status.load(Ordering::Acquire))
    }

    pub(crate) fn set_status(&self, status: ActivationStatus) {
        self.status.store(status as u32, Ordering::Release);
    }

    /// The join counter.
    pub fn state(&self) -> &ActivationState {
        &self.state
    }

    /// Transport position. Only meaningful on drivers.
    pub fn position(&self) -> &Position {
        &self.position
    }

    /// `true` while the driver waits for this node to sync.
    pub fn pending_sync(&self) -> bool {
        self.pending_sync.load(Ordering::Acquire)
    }

    pub(crate) fn set_pending_sync(&self, v: bool) {
        self.pending_sync.store(v, Ordering::Release);
    }

    /// When the last dependency completed.
    pub fn signal_time(&self) -> u64 {
        self.signal_time.load(Ordering::Relaxed)
    }

    pub(crate) fn set_signal_time(&self, nsec: u64) {
        self.signal_time.store(nsec, Ordering::Relaxed);
    }

    /// When processing started.
    pub fn awake_time(&self) -> u64 {
        self.awake_time.load(Ordering::Relaxed)
    }

    pub(crate) fn set_awake_time(&self, nsec: u64) {
        self.awake_time.store(nsec, Ordering::Relaxed);
    }

    /// When processing finished.
    pub fn finish_time(&self) -> u64 {
        self.finish_time.load(Ordering::Relaxed)
    }

    pub(crate) fn set_finish_time(&self, nsec: u64) {
        self.finish_time.store(nsec, Ordering::Relaxed);
    }

    pub(crate) fn prev_signal_time(&self) -> u64 {
        self.prev_signal_time.load(Ordering::Relaxed)
    }

    pub(crate) fn set_prev_signal_time(&self, nsec: u64) {
        self.prev_signal_time.store(nsec, Ordering::Relaxed);
    }

    /// Missed deadlines so far.
    pub fn xrun_count(&self) -> u32 {
        self.xrun_count.load(Ordering::Relaxed)
    }

    /// Trigger time of the last xrun.
    pub fn xrun_time(&self) -> u64 {
        self.xrun_time.load(Ordering::Relaxed)
    }

    /// Delay of the last xrun.
    pub fn xrun_delay(&self) -> u64 {
        self.xrun_delay.load(Ordering::Relaxed)
    }

    /// Largest xrun delay seen.
    pub fn max_delay(&self) -> u64 {
        self.max_delay.load(Ordering::Relaxed)
    }

    /// Records one missed deadline.
    pub(crate) fn record_xrun(&self, trigger: u64, delay: u64) {
        self.xrun_count.fetch_add(1, Ordering::Relaxed);
        self.xrun_time.store(trigger, Ordering::Relaxed);
        self.xrun_delay.store(delay, Ordering::Relaxed);
        self.max_delay.fetch_max(delay, Ordering::Relaxed);
    }

    /// DSP load averaged over roughly 1, 8 and 32 quanta.
    pub fn cpu_load(&self) -> [f32; 3] {
        [0usize, 1, 2].map(|i| f32::from_bits(self.cpu_load[i].load(Ordering::Relaxed)))
    }

    /// Folds the last cycle into the load averages. Skipped when the signal
    /// time did not advance.
    pub(crate) fn update_cpu_load(&self) {
        let signal = self.signal_time();
        let prev = self.prev_signal_time();
        if signal <= prev {
            return;
        }
        let process_time = self.finish_time().saturating_sub(signal);
        let period_time = signal - prev;
        let load = process_time as f32 / period_time as f32;
        let [c0, c1, c2] = self.cpu_load();
        let next = [(c0 + load) / 2.0, (c1 * 7.0 + load) / 8.0, (c2 * 31.0 + load) / 32.0];
        for (slot, v) in self.cpu_load.iter().zip(next) {
            slot.store(v.to_bits(), Ordering::Relaxed);
        }
    }

    /// Posts a transport command for the driver's next tick.
    pub fn request(&self, command: DriverCommand) {
        self.command.store(command as u32, Ordering::Release);
    }

    pub(crate) fn take_command(&self) -> DriverCommand {
        DriverCommand::from_u32(self.command.swap(DriverCommand::None as u32, Ordering::AcqRel))
    }

    /// Asks the driver to restart synchronization, as after a seek.
    pub fn request_reposition(&self) {
        self.reposition.store(true, Ordering::Release);
    }

    pub(crate) fn take_reposition(&self) -> bool {
        self.reposition.swap(false, Ordering::AcqRel)
    }

    /// Sync timeout in nanoseconds.
    pub fn sync_timeout(&self) -> u64 {
        self.sync_timeout.load(Ordering::Relaxed)
    }

    pub(crate) fn set_sync_timeout(&self, nsec: u64) {
        self.sync_timeout.store(nsec, Ordering::Relaxed);
    }

    /// Quanta left before the sync timeout fires.
    pub fn sync_left(&self) -> u32 {
        self.sync_left.load(Ordering::Relaxed)
    }

    /// Arms `sync_left` from the timeout and the current quantum period.
    pub(crate) fn arm_sync(&self) {
        let period = self.position.clock().period_nsec();
        let left = if period == 0 { 0 } else { self.sync_timeout() / period };
        self.sync_left.store(left.min(u64::from(u32::MAX)) as u32, Ordering::Relaxed);
    }

    /// Counts one quantum off `sync_left`. Returns `true` when it reaches
    /// zero, including when it was already zero.
    pub(crate) fn tick_sync(&self) -> bool {
        let left = self.sync_left().saturating_sub(1);
        self.sync_left.store(left, Ordering::Relaxed);
        left == 0
    }
}
