use crate::alert::AlertRules;
use crate::broker::{Broker, Envelope, InMemoryBroker, PublishReport, Topic};
use crate::motion::{MotionState, MotionStore};
use crate::roster::VehicleRecord;
use crate::route::{Route, RouteError};
use crate::simulator::PositionSimulator;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// What one tick did
#[derive(Debug, Clone, Serialize)]
pub struct TickOutcome {
    pub tick: u64,
    pub vehicles: usize,
    pub report: Option<PublishReport>,
    pub alerts: usize,
}

/// Why a vehicle could not be tracked
#[derive(Debug, Clone, PartialEq)]
pub enum TrackError {
    Route(RouteError),
    /// The requested initial speed is NaN or infinite
    InvalidSpeed(f64),
}

impl fmt::Display for TrackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackError::Route(e) => write!(f, "{}", e),
            TrackError::InvalidSpeed(speed) => {
                write!(f, "initial speed {} is not a finite number", speed)
            }
        }
    }
}

impl std::error::Error for TrackError {}

impl From<RouteError> for TrackError {
    fn from(e: RouteError) -> Self {
        TrackError::Route(e)
    }
}

/// One tick of the real-time engine: simulate everything, publish one
/// consolidated batch, then run the alert rules over the same snapshot.
///
/// Driven by the position `Ticker`, and directly by the admin push-now hook
/// and by tests.
pub struct PositionBroadcaster {
    store: Arc<MotionStore>,
    simulator: PositionSimulator,
    broker: Arc<dyn Broker>,
    rules: Option<Arc<AlertRules>>,
    in_flight: AtomicBool,
    ticks: AtomicU64,
}

/// Clears the in-flight flag however the tick ends
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl PositionBroadcaster {
    pub fn new(
        store: Arc<MotionStore>,
        simulator: PositionSimulator,
        broker: Arc<dyn Broker>,
        rules: Option<Arc<AlertRules>>,
    ) -> Self {
        Self {
            store,
            simulator,
            broker,
            rules,
            in_flight: AtomicBool::new(false),
            ticks: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &Arc<MotionStore> {
        &self.store
    }

    pub fn simulator(&self) -> &PositionSimulator {
        &self.simulator
    }

    pub fn rules(&self) -> Option<&Arc<AlertRules>> {
        self.rules.as_ref()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Start simulating a vehicle, replacing any state it already had.
    ///
    /// The initial speed is clamped into the simulator's speed range.
    /// Returns true if the vehicle was already tracked.
    pub fn track_vehicle(&self, vehicle: &VehicleRecord) -> Result<bool, TrackError> {
        let route = Route::new(vehicle.route.clone())?;
        let speed = self
            .simulator
            .config()
            .starting_speed(vehicle.initial_speed_kmh)
            .ok_or_else(|| {
                TrackError::InvalidSpeed(vehicle.initial_speed_kmh.unwrap_or(f64::NAN))
            })?;

        let replaced = self
            .store
            .track(MotionState::new(
                vehicle.id.clone(),
                vehicle.car_name.clone(),
                Arc::new(route),
                speed,
            ))
            .is_some();

        // A replaced vehicle starts over from its new baseline
        if let Some(rules) = &self.rules {
            rules.forget(&vehicle.id);
        }

        info!(entity_id = %vehicle.id, replaced = replaced, "Vehicle tracked");
        Ok(replaced)
    }

    /// Stop simulating a vehicle; returns false if it was not tracked
    pub fn untrack_vehicle(&self, entity_id: &str) -> bool {
        let removed = self.store.untrack(entity_id).is_some();
        if let Some(rules) = &self.rules {
            rules.forget(entity_id);
        }
        if removed {
            info!(entity_id = %entity_id, "Vehicle untracked");
        }
        removed
    }

    /// Run one tick.
    ///
    /// Returns `None` without doing anything if another tick is still
    /// running (a manual push racing the scheduled tick).
    pub fn tick(&self) -> Option<TickOutcome> {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            warn!("Tick already in progress, skipping");
            return None;
        }
        let _guard = InFlight(&self.in_flight);

        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        let snapshots = self.simulator.simulate_all(&self.store, Utc::now());

        // A batch that fails to encode is dropped; the next tick supersedes it
        let report = match Envelope::position_batch(&snapshots) {
            Ok(envelope) => match self.broker.publish(Topic::Positions, &envelope) {
                Ok(report) => Some(report),
                Err(e) => {
                    warn!(tick = tick, error = %e, "Position batch dropped");
                    None
                }
            },
            Err(e) => {
                error!(tick = tick, error = %e, "Failed to encode position batch");
                None
            }
        };

        let alerts = match &self.rules {
            Some(rules) => rules.evaluate(&snapshots).len(),
            None => 0,
        };

        debug!(
            tick = tick,
            vehicles = snapshots.len(),
            delivered = report.map(|r| r.delivered).unwrap_or(0),
            alerts = alerts,
            "Tick complete"
        );

        Some(TickOutcome {
            tick,
            vehicles: snapshots.len(),
            report,
            alerts,
        })
    }
}

/// Publishes a server heartbeat so idle dashboards can tell the feed is alive.
///
/// With an idle timeout set, each beat first reaps fallback sessions that
/// have gone silent.
pub struct HeartbeatBroadcaster {
    broker: Arc<InMemoryBroker>,
    store: Arc<MotionStore>,
    idle_timeout: Option<Duration>,
}

impl HeartbeatBroadcaster {
    pub fn new(broker: Arc<InMemoryBroker>, store: Arc<MotionStore>) -> Self {
        Self {
            broker,
            store,
            idle_timeout: None,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = Some(idle_timeout);
        self
    }

    pub fn beat(&self) -> Option<PublishReport> {
        if let Some(idle_timeout) = self.idle_timeout {
            let reaped = self.broker.reap_idle(idle_timeout);
            if !reaped.is_empty() {
                debug!(reaped = reaped.len(), "Idle sessions removed");
            }
        }

        let envelope = Envelope::heartbeat(json!({
            "connections": self.broker.connection_count(),
            "vehicles": self.store.len(),
        }));

        match self.broker.publish(Topic::Heartbeat, &envelope) {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(error = %e, "Heartbeat dropped");
                None
            }
        }
    }
}
