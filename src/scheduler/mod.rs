// Periodic tasks: position ticks and server heartbeats

mod broadcaster;


pub use broadcaster::{HeartbeatBroadcaster, PositionBroadcaster, TickOutcome, TrackError};

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Scheduler timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Delay before the first tick, so subscribers are wired first
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// Upper bound on waiting for an in-flight tick at shutdown
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_initial_delay_ms() -> u64 {
    5000
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}

fn default_stop_timeout_ms() -> u64 {
    2000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            initial_delay_ms: default_initial_delay_ms(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            stop_timeout_ms: default_stop_timeout_ms(),
        }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

/// Cancellable periodic task.
///
/// Each tick is awaited before the next one is considered, so ticks never
/// overlap. Ticks missed while one overran are skipped, not queued.
pub struct Ticker {
    name: &'static str,
    stop_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    pub fn start<F, Fut>(
        name: &'static str,
        interval: Duration,
        initial_delay: Duration,
        mut tick: F,
    ) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        // tokio intervals must have a non-zero period
        let interval = interval.max(Duration::from_millis(1));

        info!(
            ticker = name,
            interval_ms = interval.as_millis() as u64,
            initial_delay_ms = initial_delay.as_millis() as u64,
            "Starting ticker"
        );

        let handle = tokio::spawn(async move {
            let mut timer = interval_at(Instant::now() + initial_delay, interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = timer.tick() => {}
                    _ = stop_rx.changed() => break,
                }

                let started = Instant::now();
                tick().await;
                let elapsed = started.elapsed();

                if elapsed > interval {
                    warn!(
                        ticker = name,
                        elapsed_ms = elapsed.as_millis() as u64,
                        interval_ms = interval.as_millis() as u64,
                        "Tick overran its interval, skipping missed ticks"
                    );
                }
            }

            debug!(ticker = name, "Ticker loop exited");
        });

        Self {
            name,
            stop_tx,
            handle: Some(handle),
        }
    }

    /// Stop future ticks and wait up to `timeout` for an in-flight one.
    ///
    /// Returns false if the tick had to be aborted.
    pub async fn stop(mut self, timeout: Duration) -> bool {
        let _ = self.stop_tx.send(true);

        let Some(mut handle) = self.handle.take() else {
            return true;
        };

        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(_) => {
                info!(ticker = self.name, "Ticker stopped");
                true
            }
            Err(_) => {
                warn!(ticker = self.name, "In-flight tick did not finish, aborting");
                handle.abort();
                false
            }
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
