use crate::motion::{MotionState, MotionStore};
use crate::route::Waypoint;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::warn;


/// Fraction of a route segment covered per tick for each km/h of speed.
///
/// Empirical tuning value: at the default a vehicle doing 50 km/h needs 100
/// ticks per segment, which reads well on a city-scale map at one tick per
/// second. It is not a physical unit conversion, segments of different
/// length take the same number of ticks.
pub const DEFAULT_PROGRESS_PER_KMH: f64 = 0.0002;

/// Tunables for the position simulator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_min_speed")]
    pub min_speed_kmh: f64,
    #[serde(default = "default_max_speed")]
    pub max_speed_kmh: f64,
    /// Largest speed change applied per tick (uniform in `[-jitter, +jitter]`)
    #[serde(default = "default_speed_jitter")]
    pub speed_jitter_kmh: f64,
    #[serde(default = "default_overspeed_threshold")]
    pub overspeed_threshold_kmh: f64,
    #[serde(default = "default_stopped_threshold")]
    pub stopped_threshold_kmh: f64,
    #[serde(default = "default_progress_per_kmh")]
    pub progress_per_kmh: f64,
    /// Speed for roster vehicles that do not set their own
    #[serde(default = "default_initial_speed")]
    pub initial_speed_kmh: f64,
}

fn default_min_speed() -> f64 {
    25.0
}

fn default_max_speed() -> f64 {
    70.0
}

fn default_speed_jitter() -> f64 {
    5.0
}

fn default_overspeed_threshold() -> f64 {
    60.0
}

fn default_stopped_threshold() -> f64 {
    5.0
}

fn default_progress_per_kmh() -> f64 {
    DEFAULT_PROGRESS_PER_KMH
}

fn default_initial_speed() -> f64 {
    40.0
}

impl SimulationConfig {
    /// Speed a newly tracked vehicle starts at: its own value or the
    /// configured default, pulled into `[min_speed_kmh, max_speed_kmh]`.
    ///
    /// `None` when the requested speed is not a finite number.
    pub fn starting_speed(&self, requested: Option<f64>) -> Option<f64> {
        let speed = requested.unwrap_or(self.initial_speed_kmh);
        if !speed.is_finite() {
            return None;
        }
        Some(self.clamp_speed(speed))
    }

    /// `f64::clamp` panics on inverted bounds; this never does
    fn clamp_speed(&self, speed: f64) -> f64 {
        speed.max(self.min_speed_kmh).min(self.max_speed_kmh)
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            min_speed_kmh: default_min_speed(),
            max_speed_kmh: default_max_speed(),
            speed_jitter_kmh: default_speed_jitter(),
            overspeed_threshold_kmh: default_overspeed_threshold(),
            stopped_threshold_kmh: default_stopped_threshold(),
            progress_per_kmh: default_progress_per_kmh(),
            initial_speed_kmh: default_initial_speed(),
        }
    }
}

/// Source of the per-tick speed change
pub trait SpeedPerturbation: Send + Sync {
    /// A value in `[-max_delta, +max_delta]`
    fn draw(&self, max_delta: f64) -> f64;
}

/// Uniform random perturbation backed by the thread-local RNG
#[derive(Debug, Default, Clone, Copy)]
pub struct UniformPerturbation;

impl SpeedPerturbation for UniformPerturbation {
    fn draw(&self, max_delta: f64) -> f64 {
        if max_delta <= 0.0 {
            return 0.0;
        }
        rand::thread_rng().gen_range(-max_delta..=max_delta)
    }
}

/// Derived driving status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VehicleStatus {
    Moving,
    Stopped,
    Overspeed,
}

impl fmt::Display for VehicleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VehicleStatus::Moving => write!(f, "Moving"),
            VehicleStatus::Stopped => write!(f, "Stopped"),
            VehicleStatus::Overspeed => write!(f, "Overspeed"),
        }
    }
}

/// Position of one vehicle after a tick (recomputed every tick, never stored)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub entity_id: String,
    pub car_name: String,
    pub longitude: f64,
    pub latitude: f64,
    pub speed_kmh: f64,
    /// Heading in `[0, 360)`
    pub bearing_degrees: f64,
    pub status: VehicleStatus,
    pub observed_at: DateTime<Utc>,
}

impl PositionSnapshot {
    pub fn location(&self) -> Waypoint {
        Waypoint::new(self.longitude, self.latitude)
    }
}

/// Per-entity simulation failure
#[derive(Debug, Clone, PartialEq)]
pub enum SimulationError {
    NonFinite(String),
}

impl fmt::Display for SimulationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimulationError::NonFinite(id) => {
                write!(f, "entity '{}' produced a non-finite position", id)
            }
        }
    }
}

impl std::error::Error for SimulationError {}

/// Advances motion state one tick at a time
pub struct PositionSimulator {
    config: SimulationConfig,
    perturbation: Arc<dyn SpeedPerturbation>,
}

impl PositionSimulator {
    pub fn new(config: SimulationConfig, perturbation: Arc<dyn SpeedPerturbation>) -> Self {
        Self {
            config,
            perturbation,
        }
    }

    /// Simulator with the random uniform perturbation
    pub fn with_random(config: SimulationConfig) -> Self {
        Self::new(config, Arc::new(UniformPerturbation))
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Advance one vehicle by one tick and return where it ended up
    pub fn advance(
        &self,
        state: &mut MotionState,
        now: DateTime<Utc>,
    ) -> Result<PositionSnapshot, SimulationError> {
        let segments = state.route.segment_count();
        if state.segment_index >= segments {
            state.segment_index %= segments;
        }

        let (mut a, mut b) = state.route.segment(state.segment_index);
        let mut bearing = bearing_degrees(a, b);

        let step = state.speed_kmh * self.config.progress_per_kmh;
        state.progress = (state.progress + step).max(0.0);
        if state.progress >= 1.0 {
            state.progress = 0.0;
            state.segment_index = (state.segment_index + 1) % segments;
            (a, b) = state.route.segment(state.segment_index);
            bearing = bearing_degrees(a, b);
        }

        let longitude = a.longitude + (b.longitude - a.longitude) * state.progress;
        let latitude = a.latitude + (b.latitude - a.latitude) * state.progress;

        let mut delta = self.perturbation.draw(self.config.speed_jitter_kmh);
        if !delta.is_finite() {
            delta = 0.0;
        }
        state.speed_kmh = self.config.clamp_speed(state.speed_kmh + delta);

        if !longitude.is_finite() || !latitude.is_finite() || !bearing.is_finite() {
            return Err(SimulationError::NonFinite(state.entity_id.clone()));
        }

        Ok(PositionSnapshot {
            entity_id: state.entity_id.clone(),
            car_name: state.car_name.clone(),
            longitude,
            latitude,
            speed_kmh: state.speed_kmh,
            bearing_degrees: bearing,
            status: self.status_for(state.speed_kmh),
            observed_at: now,
        })
    }

    /// Advance every tracked vehicle, returning snapshots sorted by entity id.
    ///
    /// A vehicle that fails to simulate is logged and left out of the batch;
    /// the rest still advance.
    pub fn simulate_all(&self, store: &MotionStore, now: DateTime<Utc>) -> Vec<PositionSnapshot> {
        let mut snapshots = Vec::with_capacity(store.len());

        for mut entry in store.states.iter_mut() {
            match self.advance(entry.value_mut(), now) {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => warn!(entity_id = %entry.key(), error = %e, "Skipping entity this tick"),
            }
        }

        snapshots.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        snapshots
    }

    fn status_for(&self, speed_kmh: f64) -> VehicleStatus {
        if speed_kmh > self.config.overspeed_threshold_kmh {
            VehicleStatus::Overspeed
        } else if speed_kmh < self.config.stopped_threshold_kmh {
            VehicleStatus::Stopped
        } else {
            VehicleStatus::Moving
        }
    }
}

/// Planar heading from `a` to `b` in degrees, normalised to `[0, 360)`
pub fn bearing_degrees(a: Waypoint, b: Waypoint) -> f64 {
    let degrees = (b.latitude - a.latitude)
        .atan2(b.longitude - a.longitude)
        .to_degrees();
    if degrees < 0.0 {
        let wrapped = degrees + 360.0;
        // -0.0000001 + 360.0 rounds to 360.0
        if wrapped >= 360.0 {
            0.0
        } else {
            wrapped
        }
    } else {
        degrees
    }
}
