// Control-channel liveness probe
//
// A data channel can die without the transport ever reporting it. The monitor
// pings on a fixed interval and, before every ping, checks how long ago the
// last pong arrived. Too many consecutive stale checks (or a failed send)
// stop the monitor and report the connection as lost, exactly once. Retrying
// is up to the caller.

use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::timer::{Scheduler, Tick, TimerHandle};
use crate::transport::{ControlMessage, DuplexChannel, TransportError};

/// Invoked once when the monitor gives up on the channel
pub type ConnectionLostHandler = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Time between pings
    pub interval: Duration,
    /// A pong older than this counts as missed
    pub pong_timeout: Duration,
    /// Consecutive misses before the connection is declared lost
    pub max_missed_pongs: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            pong_timeout: Duration::from_secs(30),
            max_missed_pongs: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatSnapshot {
    pub running: bool,
    pub missed_pongs: u32,
    pub pings_sent: u64,
    pub pongs_received: u64,
}

struct HeartbeatState {
    running: bool,
    epoch: u64,
    last_pong: Instant,
    missed_pongs: u32,
    pings_sent: u64,
    pongs_received: u64,
    timer: Option<TimerHandle>,
}

struct HeartbeatShared {
    config: HeartbeatConfig,
    state: Mutex<HeartbeatState>,
}

enum Check {
    Stale,
    SendPing,
    Skip,
}

pub struct HeartbeatMonitor {
    shared: Arc<HeartbeatShared>,
    scheduler: Scheduler,
}

impl HeartbeatMonitor {
    pub fn new(config: HeartbeatConfig, scheduler: Scheduler) -> Self {
        Self {
            shared: Arc::new(HeartbeatShared {
                config,
                state: Mutex::new(HeartbeatState {
                    running: false,
                    epoch: 0,
                    last_pong: Instant::now(),
                    missed_pongs: 0,
                    pings_sent: 0,
                    pongs_received: 0,
                    timer: None,
                }),
            }),
            scheduler,
        }
    }

    /// Start pinging `channel`
    ///
    /// Restarting an already running monitor resets it. `on_lost` runs with
    /// the monitor's lock held and must not call back into the monitor.
    pub fn start(&self, channel: Arc<dyn DuplexChannel>, on_lost: ConnectionLostHandler) {
        let mut state = self.shared.state.lock();
        if let Some(timer) = state.timer.take() {
            timer.cancel();
        }

        state.epoch += 1;
        state.running = true;
        state.last_pong = Instant::now();
        state.missed_pongs = 0;

        let epoch = state.epoch;
        let weak = Arc::downgrade(&self.shared);
        debug!(
            "Heartbeat started on '{}' (every {:?}, pong timeout {:?})",
            channel.label(),
            self.shared.config.interval,
            self.shared.config.pong_timeout
        );

        state.timer = Some(self.scheduler.every_async(self.shared.config.interval, move || {
            let weak = weak.clone();
            let channel = Arc::clone(&channel);
            let on_lost = Arc::clone(&on_lost);
            async move { beat(weak, epoch, channel, on_lost).await }
        }));
    }

    /// Record an inbound pong
    pub fn handle_pong(&self) {
        let mut state = self.shared.state.lock();
        state.last_pong = Instant::now();
        state.missed_pongs = 0;
        state.pongs_received += 1;
    }

    /// Stop pinging. Idempotent; safe before `start`.
    ///
    /// Once this returns, `on_lost` will not be invoked for the stopped run.
    pub fn stop(&self) {
        let mut state = self.shared.state.lock();
        state.epoch += 1;
        state.running = false;
        state.missed_pongs = 0;
        if let Some(timer) = state.timer.take() {
            timer.cancel();
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.lock().running
    }

    pub fn snapshot(&self) -> HeartbeatSnapshot {
        let state = self.shared.state.lock();
        HeartbeatSnapshot {
            running: state.running,
            missed_pongs: state.missed_pongs,
            pings_sent: state.pings_sent,
            pongs_received: state.pongs_received,
        }
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Mark the run as lost and notify, unless it was stopped or superseded
fn declare_lost(state: &mut HeartbeatState, epoch: u64, on_lost: &ConnectionLostHandler) -> bool {
    if state.epoch != epoch || !state.running {
        return false;
    }
    state.running = false;
    state.timer.take();
    on_lost();
    true
}

async fn beat(
    shared: Weak<HeartbeatShared>,
    epoch: u64,
    channel: Arc<dyn DuplexChannel>,
    on_lost: ConnectionLostHandler,
) -> Tick {
    let Some(shared) = shared.upgrade() else {
        return Tick::Stop;
    };

    let check = {
        let mut state = shared.state.lock();
        if state.epoch != epoch || !state.running {
            return Tick::Stop;
        }

        let since_pong = state.last_pong.elapsed();
        if since_pong > shared.config.pong_timeout {
            state.missed_pongs += 1;
            warn!(
                "No pong for {:?} on '{}' ({}/{} missed)",
                since_pong,
                channel.label(),
                state.missed_pongs,
                shared.config.max_missed_pongs
            );

            if state.missed_pongs >= shared.config.max_missed_pongs {
                warn!("Heartbeat threshold reached, connection lost");
                declare_lost(&mut state, epoch, &on_lost);
                Check::Stale
            } else if channel.is_open() {
                Check::SendPing
            } else {
                Check::Skip
            }
        } else if channel.is_open() {
            Check::SendPing
        } else {
            Check::Skip
        }
    };

    match check {
        Check::Stale => Tick::Stop,
        Check::Skip => Tick::Continue,
        Check::SendPing => match send_ping(channel.as_ref()).await {
            Ok(()) => {
                shared.state.lock().pings_sent += 1;
                Tick::Continue
            }
            Err(e) => {
                warn!("Heartbeat ping failed on '{}': {}", channel.label(), e);
                declare_lost(&mut shared.state.lock(), epoch, &on_lost);
                Tick::Stop
            }
        },
    }
}

async fn send_ping(channel: &dyn DuplexChannel) -> Result<(), TransportError> {
    let ping = ControlMessage::ping_now()
        .to_json()
        .map_err(|e| TransportError::Send(e.to_string()))?;
    channel.send(ping).await
}
