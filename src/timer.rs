//! Cancellable timers on top of `tokio::time`
//!
//! Heartbeat and inactivity logic arm their timers through [`Scheduler`]
//! instead of sleeping inline, so every pending timer is represented by a
//! [`TimerHandle`] that its owner can cancel. Because everything runs on
//! `tokio::time`, tests drive the timers with tokio's paused clock.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Returned by async periodic callbacks to keep or stop the timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Continue,
    Stop,
}

/// Handle to one armed timer
///
/// Dropping the handle leaves the timer running; call [`TimerHandle::cancel`].
#[derive(Debug)]
pub struct TimerHandle {
    task: JoinHandle<()>,
}

impl TimerHandle {
    /// Cancel the timer. Idempotent, and a no-op once the timer has fired.
    pub fn cancel(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Arms timers on the ambient tokio runtime
#[derive(Debug, Clone, Copy, Default)]
pub struct Scheduler;

impl Scheduler {
    pub fn new() -> Self {
        Self
    }

    /// Run `f` once after `delay`
    pub fn after<F>(&self, delay: Duration, f: F) -> TimerHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            f();
        });
        TimerHandle { task }
    }

    /// Run `f` every `period`, first one period after arming
    pub fn every<F>(&self, period: Duration, mut f: F) -> TimerHandle
    where
        F: FnMut() + Send + 'static,
    {
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                f();
            }
        });
        TimerHandle { task }
    }

    /// Like [`Scheduler::every`] for callbacks that need to await
    ///
    /// The next tick is not scheduled until the returned future resolves.
    pub fn every_async<F, Fut>(&self, period: Duration, mut f: F) -> TimerHandle
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Tick> + Send + 'static,
    {
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if f().await == Tick::Stop {
                    break;
                }
            }
        });
        TimerHandle { task }
    }
}
