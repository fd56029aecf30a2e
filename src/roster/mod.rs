//! Fleet roster: the vehicle and geofence records the real-time layer reads
//! at startup.
//!
//! Entity CRUD lives elsewhere; this module only exposes the read side the
//! simulator and alert rules consume. `StaticRoster` serves the
//! `[[vehicles]]` / `[[geofences]]` tables of the TOML config and falls back
//! to a small demo fleet when none are configured.

use crate::route::Waypoint;
use serde::{Deserialize, Serialize};

/// A vehicle and the closed route it patrols.
///
/// camelCase on the wire like every other admin payload; the snake_case
/// names used in TOML tables are accepted too.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleRecord {
    pub id: String,
    #[serde(alias = "car_name")]
    pub car_name: String,
    pub route: Vec<Waypoint>,
    #[serde(default, alias = "initial_speed_kmh")]
    pub initial_speed_kmh: Option<f64>,
}

/// A named polygonal area
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Geofence {
    pub id: String,
    pub name: String,
    pub polygon: Vec<Waypoint>,
}

impl Geofence {
    /// Point-in-polygon test (even-odd ray casting, planar)
    pub fn contains(&self, point: Waypoint) -> bool {
        let n = self.polygon.len();
        if n < 3 {
            return false;
        }

        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let pi = self.polygon[i];
            let pj = self.polygon[j];
            if (pi.latitude > point.latitude) != (pj.latitude > point.latitude) {
                let crossing = (pj.longitude - pi.longitude) * (point.latitude - pi.latitude)
                    / (pj.latitude - pi.latitude)
                    + pi.longitude;
                if point.longitude < crossing {
                    inside = !inside;
                }
            }
            j = i;
        }
        inside
    }
}

/// Read API over the current vehicle roster
pub trait FleetRoster: Send + Sync {
    fn vehicles(&self) -> Vec<VehicleRecord>;
    fn geofences(&self) -> Vec<Geofence>;
}

/// Roster backed by configuration
#[derive(Debug, Clone, Default)]
pub struct StaticRoster {
    vehicles: Vec<VehicleRecord>,
    geofences: Vec<Geofence>,
}

impl StaticRoster {
    pub fn new(vehicles: Vec<VehicleRecord>, geofences: Vec<Geofence>) -> Self {
        Self {
            vehicles,
            geofences,
        }
    }

    /// Three vehicles looping around a city block grid, one depot geofence
    pub fn demo() -> Self {
        let loop_a = vec![
            Waypoint::new(121.4737, 31.2304),
            Waypoint::new(121.4837, 31.2304),
            Waypoint::new(121.4837, 31.2384),
            Waypoint::new(121.4737, 31.2384),
            Waypoint::new(121.4737, 31.2304),
        ];
        let loop_b = vec![
            Waypoint::new(121.4600, 31.2200),
            Waypoint::new(121.4750, 31.2250),
            Waypoint::new(121.4700, 31.2350),
            Waypoint::new(121.4600, 31.2200),
        ];
        let loop_c = vec![
            Waypoint::new(121.4900, 31.2400),
            Waypoint::new(121.5000, 31.2420),
            Waypoint::new(121.5020, 31.2500),
            Waypoint::new(121.4920, 31.2510),
            Waypoint::new(121.4900, 31.2400),
        ];

        let vehicles = vec![
            VehicleRecord {
                id: "vehicle-001".to_string(),
                car_name: "Truck 01".to_string(),
                route: loop_a,
                initial_speed_kmh: Some(40.0),
            },
            VehicleRecord {
                id: "vehicle-002".to_string(),
                car_name: "Van 02".to_string(),
                route: loop_b,
                initial_speed_kmh: Some(50.0),
            },
            VehicleRecord {
                id: "vehicle-003".to_string(),
                car_name: "Truck 03".to_string(),
                route: loop_c,
                initial_speed_kmh: Some(35.0),
            },
        ];

        let geofences = vec![Geofence {
            id: "depot".to_string(),
            name: "Central Depot".to_string(),
            polygon: vec![
                Waypoint::new(121.4730, 31.2300),
                Waypoint::new(121.4790, 31.2300),
                Waypoint::new(121.4790, 31.2340),
                Waypoint::new(121.4730, 31.2340),
            ],
        }];

        Self::new(vehicles, geofences)
    }
}

impl FleetRoster for StaticRoster {
    fn vehicles(&self) -> Vec<VehicleRecord> {
        self.vehicles.clone()
    }

    fn geofences(&self) -> Vec<Geofence> {
        self.geofences.clone()
    }
}
