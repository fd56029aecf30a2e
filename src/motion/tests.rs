use super::*;
use crate::route::Waypoint;
use crate::simulator::SimulationConfig;
use std::thread;

fn square() -> Vec<Waypoint> {
    vec![
        Waypoint::new(0.0, 0.0),
        Waypoint::new(1.0, 0.0),
        Waypoint::new(1.0, 1.0),
        Waypoint::new(0.0, 0.0),
    ]
}

fn vehicle(id: &str, route: Vec<Waypoint>) -> VehicleRecord {
    VehicleRecord {
        id: id.to_string(),
        car_name: format!("Truck {}", id),
        route,
        initial_speed_kmh: None,
    }
}

#[test]
fn test_seed_from_roster() {
    let vehicles = vec![vehicle("car-1", square()), vehicle("car-2", square())];
    let table = RouteTable::from_definitions(
        vehicles.iter().map(|v| (v.id.clone(), v.route.clone())),
    );

    let store = MotionStore::seed(&table, &vehicles, &SimulationConfig::default());

    assert_eq!(store.len(), 2);
    let state = store.get("car-1").unwrap();
    assert_eq!(state.segment_index, 0);
    assert_eq!(state.progress, 0.0);
    assert_eq!(state.speed_kmh, 40.0);
    assert_eq!(state.car_name, "Truck car-1");
}

#[test]
fn test_seed_excludes_vehicle_without_route() {
    let vehicles = vec![vehicle("car-1", square()), vehicle("broken", vec![])];
    let table = RouteTable::from_definitions(
        vehicles.iter().map(|v| (v.id.clone(), v.route.clone())),
    );

    let store = MotionStore::seed(&table, &vehicles, &SimulationConfig::default());

    assert_eq!(store.len(), 1);
    assert!(!store.contains("broken"));
}

#[test]
fn test_seed_uses_vehicle_initial_speed() {
    let mut v = vehicle("car-1", square());
    v.initial_speed_kmh = Some(55.0);
    let vehicles = vec![v];
    let table = RouteTable::from_definitions(
        vehicles.iter().map(|v| (v.id.clone(), v.route.clone())),
    );

    let store = MotionStore::seed(&table, &vehicles, &SimulationConfig::default());
    assert_eq!(store.get("car-1").unwrap().speed_kmh, 55.0);
}

#[test]
fn test_seed_clamps_initial_speed_into_range() {
    let mut reversing = vehicle("reversing", square());
    reversing.initial_speed_kmh = Some(-2000.0);
    let mut racing = vehicle("racing", square());
    racing.initial_speed_kmh = Some(400.0);
    let mut broken = vehicle("broken", square());
    broken.initial_speed_kmh = Some(f64::NAN);
    let vehicles = vec![reversing, racing, broken];
    let table = RouteTable::from_definitions(
        vehicles.iter().map(|v| (v.id.clone(), v.route.clone())),
    );

    let config = SimulationConfig::default();
    let store = MotionStore::seed(&table, &vehicles, &config);

    assert_eq!(store.get("reversing").unwrap().speed_kmh, config.min_speed_kmh);
    assert_eq!(store.get("racing").unwrap().speed_kmh, config.max_speed_kmh);
    assert!(!store.contains("broken"));
}

#[test]
fn test_track_and_untrack() {
    let store = MotionStore::new();
    let route = Arc::new(Route::new(square()).unwrap());

    assert!(store
        .track(MotionState::new("a".into(), "A".into(), route, 30.0))
        .is_none());
    assert!(store.contains("a"));

    let removed = store.untrack("a").unwrap();
    assert_eq!(removed.entity_id, "a");
    assert!(store.is_empty());
    assert!(store.untrack("a").is_none());
}

#[test]
fn test_entity_ids_sorted() {
    let store = MotionStore::new();
    let route = Arc::new(Route::new(square()).unwrap());
    for id in ["c", "a", "b"] {
        store.track(MotionState::new(id.into(), id.into(), Arc::clone(&route), 30.0));
    }
    assert_eq!(store.entity_ids(), vec!["a", "b", "c"]);
}

#[test]
fn test_concurrent_track() {
    let store = Arc::new(MotionStore::new());
    let route = Arc::new(Route::new(square()).unwrap());
    let mut handles = vec![];

    for i in 0..10 {
        let store = Arc::clone(&store);
        let route = Arc::clone(&route);
        handles.push(thread::spawn(move || {
            let id = format!("vehicle_{}", i);
            store.track(MotionState::new(id.clone(), id, route, 30.0));
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(store.len(), 10);
}
