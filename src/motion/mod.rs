use crate::roster::VehicleRecord;
use crate::route::{Route, RouteTable};
use crate::simulator::SimulationConfig;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{info, warn};

#[cfg(test)]
mod tests;

/// Per-vehicle simulation state
///
/// Mutated only by the position simulator; read back as snapshots.
#[derive(Debug, Clone)]
pub struct MotionState {
    pub entity_id: String,

    /// Display name carried onto the wire as `carName`
    pub car_name: String,

    pub route: Arc<Route>,

    /// Index of the segment currently being driven (`< route.segment_count()`)
    pub segment_index: usize,

    /// Fraction of the current segment already covered, in `[0, 1)`
    pub progress: f64,

    pub speed_kmh: f64,
}

impl MotionState {
    /// New state parked at the first waypoint of `route`
    pub fn new(entity_id: String, car_name: String, route: Arc<Route>, speed_kmh: f64) -> Self {
        Self {
            entity_id,
            car_name,
            route,
            segment_index: 0,
            progress: 0.0,
            speed_kmh,
        }
    }
}

/// Concurrent store of motion state, keyed by entity id.
///
/// The ticker is the only writer of existing states; admin handlers may add
/// or remove tracked vehicles from other tasks at any time.
pub struct MotionStore {
    pub(crate) states: Arc<DashMap<String, MotionState>>,
}

impl MotionStore {
    pub fn new() -> Self {
        Self {
            states: Arc::new(DashMap::new()),
        }
    }

    /// Seed one state per roster vehicle that has a route in `table`.
    ///
    /// Starting speeds are clamped into the simulator's speed range.
    /// Vehicles without a route or with a non-finite speed are excluded from
    /// simulation and logged.
    pub fn seed(table: &RouteTable, vehicles: &[VehicleRecord], config: &SimulationConfig) -> Self {
        let store = Self::new();

        for vehicle in vehicles {
            match table.route_for(&vehicle.id) {
                Ok(route) => {
                    let Some(speed) = config.starting_speed(vehicle.initial_speed_kmh) else {
                        warn!(
                            entity_id = %vehicle.id,
                            speed = ?vehicle.initial_speed_kmh,
                            "Vehicle excluded, initial speed is not a number"
                        );
                        continue;
                    };
                    store.track(MotionState::new(
                        vehicle.id.clone(),
                        vehicle.car_name.clone(),
                        route,
                        speed,
                    ));
                }
                Err(e) => {
                    warn!(entity_id = %vehicle.id, error = %e, "Vehicle excluded from simulation");
                }
            }
        }

        info!(tracked = store.len(), "Motion store seeded");
        store
    }

    /// Start tracking a vehicle, replacing any previous state for the same id
    pub fn track(&self, state: MotionState) -> Option<MotionState> {
        self.states.insert(state.entity_id.clone(), state)
    }

    /// Stop tracking a vehicle
    pub fn untrack(&self, entity_id: &str) -> Option<MotionState> {
        self.states.remove(entity_id).map(|(_, state)| state)
    }

    pub fn get(&self, entity_id: &str) -> Option<MotionState> {
        self.states.get(entity_id).map(|s| s.clone())
    }

    pub fn contains(&self, entity_id: &str) -> bool {
        self.states.contains_key(entity_id)
    }

    /// Tracked entity ids, sorted for stable batch ordering
    pub fn entity_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.states.iter().map(|s| s.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

impl Default for MotionStore {
    fn default() -> Self {
        Self::new()
    }
}
