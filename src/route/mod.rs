use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

#[cfg(test)]
mod tests;

/// A single point on a route (WGS84 degrees)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub longitude: f64,
    pub latitude: f64,
}

impl Waypoint {
    pub const fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            longitude,
            latitude,
        }
    }
}

/// Closed polyline a vehicle patrols.
///
/// Always holds at least three waypoints and the first waypoint equals the
/// last, so `segment_count() == waypoints.len() - 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    waypoints: Vec<Waypoint>,
}

impl Route {
    /// Validate and build a route
    pub fn new(waypoints: Vec<Waypoint>) -> Result<Self, RouteError> {
        if waypoints.len() < 3 {
            return Err(RouteError::InvalidRoute(format!(
                "route needs at least 3 waypoints, got {}",
                waypoints.len()
            )));
        }

        if let Some(bad) = waypoints
            .iter()
            .find(|w| !w.longitude.is_finite() || !w.latitude.is_finite())
        {
            return Err(RouteError::InvalidRoute(format!(
                "non-finite waypoint ({}, {})",
                bad.longitude, bad.latitude
            )));
        }

        if waypoints.first() != waypoints.last() {
            return Err(RouteError::InvalidRoute(
                "route is not closed (first waypoint must equal last)".to_string(),
            ));
        }

        Ok(Self { waypoints })
    }

    pub fn waypoints(&self) -> &[Waypoint] {
        &self.waypoints
    }

    /// Number of drivable segments (the closing waypoint does not start one)
    pub fn segment_count(&self) -> usize {
        self.waypoints.len() - 1
    }

    /// Endpoints of segment `index`, wrapping around the loop
    pub fn segment(&self, index: usize) -> (Waypoint, Waypoint) {
        let len = self.waypoints.len();
        let a = self.waypoints[index % len];
        let b = self.waypoints[(index + 1) % len];
        (a, b)
    }
}

/// Static per-entity route definitions.
///
/// Built once at startup from the fleet roster; there is no mutation API.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: HashMap<String, Arc<Route>>,
}

impl RouteTable {
    /// Build a table from `(entity_id, waypoints)` pairs.
    ///
    /// Entities whose waypoints do not form a valid closed route are logged
    /// and left out, so the rest of the fleet still gets simulated.
    pub fn from_definitions<I>(definitions: I) -> Self
    where
        I: IntoIterator<Item = (String, Vec<Waypoint>)>,
    {
        let mut routes = HashMap::new();

        for (entity_id, waypoints) in definitions {
            match Route::new(waypoints) {
                Ok(route) => {
                    routes.insert(entity_id, Arc::new(route));
                }
                Err(e) => {
                    warn!(entity_id = %entity_id, error = %e, "Excluding entity with invalid route");
                }
            }
        }

        info!(routes = routes.len(), "Route table loaded");

        Self { routes }
    }

    /// Route for `entity_id`, shared with every motion state that uses it
    pub fn route_for(&self, entity_id: &str) -> Result<Arc<Route>, RouteError> {
        self.routes
            .get(entity_id)
            .cloned()
            .ok_or_else(|| RouteError::UnknownEntity(entity_id.to_string()))
    }

    pub fn entity_ids(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(|k| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Route lookup and validation errors
#[derive(Debug, Clone, PartialEq)]
pub enum RouteError {
    UnknownEntity(String),
    InvalidRoute(String),
}

impl fmt::Display for RouteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteError::UnknownEntity(id) => write!(f, "no route configured for entity '{}'", id),
            RouteError::InvalidRoute(reason) => write!(f, "invalid route: {}", reason),
        }
    }
}

impl std::error::Error for RouteError {}
