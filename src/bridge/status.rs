//! Bridge activity status
//!
//! ```text
//!   Disabled ──enable──▶ Offline ◀──disconnect── Idle / Active
//!                           │                        ▲
//!                        connect                     │
//!                           ▼                        │
//!                          Idle ──update──▶ Active ──┘ (delay elapsed)
//! ```
//!
//! [`StatusMachine`] is pure: every transition takes the current time from the
//! caller, so it can be driven by a real or a manual clock.

use parking_lot::{Condvar, Mutex, MutexGuard, ReentrantMutex};
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use super::clock::Clock;

/// Default time an update keeps the bridge `Active`
pub const DEFAULT_ACTIVE_STATUS_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum BridgeStatus {
    Disabled = 0,
    Offline = 1,
    Idle = 2,
    Active = 3,
}

impl BridgeStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Offline,
            2 => Self::Idle,
            3 => Self::Active,
            _ => Self::Disabled,
        }
    }
}

impl fmt::Display for BridgeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Disabled => "disabled",
            Self::Offline => "offline",
            Self::Idle => "idle",
            Self::Active => "active",
        };
        f.write_str(label)
    }
}

/// Called on every status change
///
/// Notifications are delivered one at a time in transition order; a callback
/// must not wait on another thread that is changing the status.
pub type StatusCallback = Arc<dyn Fn(BridgeStatus) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Disabled,
    Offline,
    Idle,
    Active { deadline: Instant },
}

#[derive(Debug)]
pub struct StatusMachine {
    phase: Phase,
    enabled: bool,
    connected: bool,
    delay: Duration,
}

impl StatusMachine {
    pub fn new(enabled: bool, connected: bool, delay: Duration) -> Self {
        let mut machine = Self {
            phase: Phase::Disabled,
            enabled,
            connected,
            delay,
        };
        machine.phase = machine.resting_phase();
        machine
    }

    pub fn status(&self) -> BridgeStatus {
        match self.phase {
            Phase::Disabled => BridgeStatus::Disabled,
            Phase::Offline => BridgeStatus::Offline,
            Phase::Idle => BridgeStatus::Idle,
            Phase::Active { .. } => BridgeStatus::Active,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn connected(&self) -> bool {
        self.connected
    }

    /// Whether element updates should reach the script
    pub fn accepts_updates(&self) -> bool {
        self.enabled && self.connected
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Takes effect the next time the deadline is armed
    pub fn set_delay(&mut self, delay: Duration) {
        self.delay = delay;
    }

    /// Pending decay deadline, if `Active`
    pub fn deadline(&self) -> Option<Instant> {
        match self.phase {
            Phase::Active { deadline } => Some(deadline),
            _ => None,
        }
    }

    fn resting_phase(&self) -> Phase {
        match (self.enabled, self.connected) {
            (false, _) => Phase::Disabled,
            (true, false) => Phase::Offline,
            (true, true) => Phase::Idle,
        }
    }

    /// Move to `phase`, returning the new status if it changed
    fn enter(&mut self, phase: Phase) -> Option<BridgeStatus> {
        let before = self.status();
        self.phase = phase;
        let after = self.status();
        (before != after).then_some(after)
    }

    pub fn set_enabled(&mut self, enabled: bool) -> Option<BridgeStatus> {
        self.enabled = enabled;
        self.enter(self.resting_phase())
    }

    pub fn set_connected(&mut self, connected: bool) -> Option<BridgeStatus> {
        self.connected = connected;
        self.enter(self.resting_phase())
    }

    /// Record an element update; arms or re-arms the decay deadline
    pub fn activity(&mut self, now: Instant) -> Option<BridgeStatus> {
        if !self.accepts_updates() {
            return None;
        }
        self.enter(Phase::Active {
            deadline: now + self.delay,
        })
    }

    /// Decay `Active` to `Idle` once the deadline has passed
    pub fn tick(&mut self, now: Instant) -> Option<BridgeStatus> {
        match self.phase {
            Phase::Active { deadline } if now >= deadline => self.enter(Phase::Idle),
            _ => None,
        }
    }
}

/// Status machine shared between the bridge and its decay timer
///
/// Keeps an atomic snapshot of the status so readers never take the lock.
pub struct StatusTracker {
    machine: Mutex<StatusMachine>,
    wake: Condvar,
    snapshot: AtomicU8,
    /// Bumped under the machine lock on every status change
    sequence: AtomicU64,
    /// Sequence number of the last notification handed to subscribers
    delivered: ReentrantMutex<Cell<u64>>,
    stopping: AtomicBool,
    subscribers: Mutex<Vec<StatusCallback>>,
    clock: Arc<dyn Clock>,
}

impl StatusTracker {
    pub fn new(machine: StatusMachine, clock: Arc<dyn Clock>) -> Self {
        let snapshot = AtomicU8::new(machine.status() as u8);
        Self {
            machine: Mutex::new(machine),
            wake: Condvar::new(),
            snapshot,
            sequence: AtomicU64::new(0),
            delivered: ReentrantMutex::new(Cell::new(0)),
            stopping: AtomicBool::new(false),
            subscribers: Mutex::new(Vec::new()),
            clock,
        }
    }

    pub fn status(&self) -> BridgeStatus {
        BridgeStatus::from_u8(self.snapshot.load(Ordering::Acquire))
    }

    pub fn subscribe(&self, callback: StatusCallback) {
        self.subscribers.lock().push(callback);
    }

    /// Read-only access to the machine
    pub fn with<R>(&self, f: impl FnOnce(&StatusMachine) -> R) -> R {
        f(&self.machine.lock())
    }

    /// Run a transition, then publish any resulting change
    pub fn apply(&self, f: impl FnOnce(&mut StatusMachine, Instant) -> Option<BridgeStatus>) {
        let now = self.clock.now();
        let mut machine = self.machine.lock();
        let changed = f(&mut machine, now);
        self.commit(machine, changed);
    }

    pub fn tick(&self) {
        self.apply(|machine, now| machine.tick(now));
    }

    /// Store the snapshot, wake the timer and notify subscribers outside the lock
    fn commit(&self, machine: MutexGuard<'_, StatusMachine>, changed: Option<BridgeStatus>) {
        self.wake.notify_all();
        let Some(status) = changed else {
            return;
        };
        let seq = self.publish(status);
        drop(machine);
        self.notify(seq, status);
    }

    /// Must be called with the machine lock held
    fn publish(&self, status: BridgeStatus) -> u64 {
        self.snapshot.store(status as u8, Ordering::Release);
        self.sequence.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Deliver a change unless a later one already went out
    fn notify(&self, seq: u64, status: BridgeStatus) {
        let delivered = self.delivered.lock();
        if seq <= delivered.get() {
            debug!("Dropping superseded status {} (#{})", status, seq);
            return;
        }
        delivered.set(seq);

        debug!("Bridge status -> {}", status);
        let subscribers = self.subscribers.lock().clone();
        for callback in subscribers {
            callback(status);
        }
    }

    pub(crate) fn stop(&self) {
        let _machine = self.machine.lock();
        self.stopping.store(true, Ordering::Release);
        self.wake.notify_all();
    }

    /// Body of the decay timer thread
    ///
    /// Sleeps until the armed deadline (or until woken by a transition) and
    /// decays `Active` to `Idle` when it passes.
    pub(crate) fn run_timer(&self) {
        let mut machine = self.machine.lock();
        loop {
            if self.stopping.load(Ordering::Acquire) {
                return;
            }
            match machine.deadline() {
                None => self.wake.wait(&mut machine),
                Some(deadline) => {
                    let now = self.clock.now();
                    if now >= deadline {
                        if let Some(status) = machine.tick(now) {
                            let seq = self.publish(status);
                            MutexGuard::unlocked(&mut machine, || self.notify(seq, status));
                        }
                    } else {
                        self.wake.wait_until(&mut machine, deadline);
                    }
                }
            }
        }
    }
}
