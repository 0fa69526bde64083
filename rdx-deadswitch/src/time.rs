//! Defines the engine's sources of time.
//!
//! There are two, and they answer different questions. The [`SystemClock`]
//! decides *when* the engine evaluates: it is a fixed-cadence ticker that
//! broadcasts [`TickEvent`]s. A [`Clock`] decides *what time it is* at each
//! evaluation. Keeping them apart lets tests run the real dispatcher against a
//! [`ManualClock`] and jump days ahead between ticks.

use crate::config::ClockResolution;
use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// The wall-clock reading the controller evaluates against.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system's real time.
#[derive(Debug, Default, Clone, Copy)]
pub struct WallClock;

impl Clock for WallClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Cloning shares the same reading.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A single beat of the engine's heart.
#[derive(Debug, Clone)]
pub struct TickEvent {
    /// Monotonic count of ticks since the clock started.
    pub tick_count: u64,
    /// When the tick was produced.
    pub timestamp: Instant,
}

/// The fixed-cadence ticker driving the dispatcher loop.
pub struct SystemClock {
    resolution: ClockResolution,
    tick_sender: broadcast::Sender<Arc<TickEvent>>,
}

impl SystemClock {
    pub fn new(resolution: ClockResolution, tick_sender: broadcast::Sender<Arc<TickEvent>>) -> Self {
        Self {
            resolution,
            tick_sender,
        }
    }

    /// Ticks until a shutdown signal arrives.
    ///
    /// Missed ticks are skipped rather than bursted: each evaluation recomputes
    /// everything from the current time, so catching up would only repeat work.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let period = self.resolution.period();
        let mut ticker = time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut tick_count: u64 = 0;
        info!("SystemClock started with a period of {:?}.", period);

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => break,
                instant = ticker.tick() => {
                    tick_count += 1;
                    let tick = Arc::new(TickEvent { tick_count, timestamp: instant });
                    if self.tick_sender.send(tick).is_err() {
                        debug!("No tick subscribers; tick #{} dropped.", tick_count);
                    }
                }
            }
        }
        info!("SystemClock stopped after {} ticks.", tick_count);
    }
}
