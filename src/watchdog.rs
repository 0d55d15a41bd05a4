//! Inactivity watchdog
//!
//! Two-phase idle policy for a voice session:
//!
//! 1. **Idle** - armed by [`InactivityWatchdog::record_activity`]. If nothing
//!    is recorded for `silence`, the watchdog enters the warning phase.
//! 2. **Warning** - `on_warning` fires, then a visible countdown ticks once per
//!    second via `on_countdown(remaining)`. A fallback timer covering the
//!    whole countdown is armed in parallel in case the ticker falls behind.
//! 3. **TimedOut** - whichever of the countdown reaching zero and the fallback
//!    timer happens first wins; it cancels the other and `on_timeout` fires
//!    exactly once.
//!
//! Any recorded activity returns to idle and re-arms. Every timer callback
//! carries the epoch it was armed in and is ignored if the watchdog has been
//! reset or stopped since, so a stale countdown can never fire after a reset.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::timer::{Scheduler, TimerHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InactivityStatus {
    Idle,
    Warning,
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    /// Silence before the warning phase starts
    pub silence: Duration,
    /// Countdown length in whole seconds
    pub countdown_secs: u32,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            silence: Duration::from_secs(15),
            countdown_secs: 10,
        }
    }
}

/// Receives watchdog transitions
///
/// Callbacks run with the watchdog's lock held: they must not call back
/// into the watchdog and must not block.
pub trait WatchdogObserver: Send + Sync {
    fn on_warning(&self) {}

    fn on_countdown(&self, _seconds_remaining: u32) {}

    fn on_timeout(&self) {}
}

struct WatchdogState {
    status: InactivityStatus,
    remaining: u32,
    epoch: u64,
    armed: bool,
    last_activity: Option<Instant>,
    idle_timer: Option<TimerHandle>,
    countdown_timer: Option<TimerHandle>,
    fallback_timer: Option<TimerHandle>,
}

impl WatchdogState {
    fn cancel_timers(&mut self) {
        for timer in [
            self.idle_timer.take(),
            self.countdown_timer.take(),
            self.fallback_timer.take(),
        ]
        .into_iter()
        .flatten()
        {
            timer.cancel();
        }
    }
}

struct WatchdogShared {
    config: WatchdogConfig,
    scheduler: Scheduler,
    observer: Arc<dyn WatchdogObserver>,
    state: Mutex<WatchdogState>,
}

pub struct InactivityWatchdog {
    shared: Arc<WatchdogShared>,
}

impl InactivityWatchdog {
    pub fn new(
        config: WatchdogConfig,
        scheduler: Scheduler,
        observer: Arc<dyn WatchdogObserver>,
    ) -> Self {
        let remaining = config.countdown_secs;
        Self {
            shared: Arc::new(WatchdogShared {
                config,
                scheduler,
                observer,
                state: Mutex::new(WatchdogState {
                    status: InactivityStatus::Idle,
                    remaining,
                    epoch: 0,
                    armed: false,
                    last_activity: None,
                    idle_timer: None,
                    countdown_timer: None,
                    fallback_timer: None,
                }),
            }),
        }
    }

    /// Reset to idle and re-arm the silence timer
    pub fn record_activity(&self) {
        let mut state = self.shared.state.lock();
        state.cancel_timers();
        state.epoch += 1;
        state.status = InactivityStatus::Idle;
        state.remaining = self.shared.config.countdown_secs;
        state.armed = true;
        state.last_activity = Some(Instant::now());

        let epoch = state.epoch;
        let weak = Arc::downgrade(&self.shared);
        state.idle_timer = Some(
            self.shared
                .scheduler
                .after(self.shared.config.silence, move || enter_warning(&weak, epoch)),
        );
    }

    /// Cancel everything and return to idle without firing callbacks
    ///
    /// Safe from any state, including never started.
    pub fn stop_monitoring(&self) {
        let mut state = self.shared.state.lock();
        state.cancel_timers();
        state.epoch += 1;
        state.status = InactivityStatus::Idle;
        state.remaining = self.shared.config.countdown_secs;
        state.armed = false;
        state.last_activity = None;
    }

    pub fn status(&self) -> InactivityStatus {
        self.shared.state.lock().status
    }

    /// Seconds left on the countdown (full countdown while idle)
    pub fn seconds_remaining(&self) -> u32 {
        self.shared.state.lock().remaining
    }

    pub fn is_armed(&self) -> bool {
        self.shared.state.lock().armed
    }

    /// Time since the last recorded activity
    pub fn idle_for(&self) -> Option<Duration> {
        self.shared.state.lock().last_activity.map(|at| at.elapsed())
    }
}

impl Drop for InactivityWatchdog {
    fn drop(&mut self) {
        self.shared.state.lock().cancel_timers();
    }
}

fn enter_warning(weak: &Weak<WatchdogShared>, epoch: u64) {
    let Some(shared) = weak.upgrade() else {
        return;
    };
    let mut state = shared.state.lock();
    if state.epoch != epoch || state.status != InactivityStatus::Idle {
        return;
    }

    state.idle_timer = None;
    state.status = InactivityStatus::Warning;
    state.remaining = shared.config.countdown_secs;
    info!(
        "No activity for {:?}, session will time out in {}s",
        shared.config.silence, state.remaining
    );

    shared.observer.on_warning();
    shared.observer.on_countdown(state.remaining);

    if state.remaining == 0 {
        time_out(&shared, &mut state);
        return;
    }

    let tick_weak = weak.clone();
    state.countdown_timer = Some(
        shared
            .scheduler
            .every(Duration::from_secs(1), move || countdown_tick(&tick_weak, epoch)),
    );

    let fallback_weak = weak.clone();
    state.fallback_timer = Some(shared.scheduler.after(
        Duration::from_secs(shared.config.countdown_secs as u64),
        move || fallback_fired(&fallback_weak, epoch),
    ));
}

fn countdown_tick(weak: &Weak<WatchdogShared>, epoch: u64) {
    let Some(shared) = weak.upgrade() else {
        return;
    };
    let mut state = shared.state.lock();
    if state.epoch != epoch || state.status != InactivityStatus::Warning {
        return;
    }

    state.remaining = state.remaining.saturating_sub(1);
    shared.observer.on_countdown(state.remaining);

    if state.remaining == 0 {
        time_out(&shared, &mut state);
    }
}

fn fallback_fired(weak: &Weak<WatchdogShared>, epoch: u64) {
    let Some(shared) = weak.upgrade() else {
        return;
    };
    let mut state = shared.state.lock();
    if state.epoch != epoch || state.status != InactivityStatus::Warning {
        return;
    }

    debug!(
        "Inactivity fallback timer fired with {}s left on the countdown",
        state.remaining
    );
    if state.remaining > 0 {
        state.remaining = 0;
        shared.observer.on_countdown(0);
    }
    time_out(&shared, &mut state);
}

/// Single exit from the warning phase; the status check in both callers
/// makes the countdown and the fallback mutually exclusive.
fn time_out(shared: &WatchdogShared, state: &mut WatchdogState) {
    state.cancel_timers();
    state.status = InactivityStatus::TimedOut;
    state.armed = false;
    info!("Session timed out due to inactivity");
    shared.observer.on_timeout();
}
