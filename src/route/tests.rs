use super::*;

fn square() -> Vec<Waypoint> {
    vec![
        Waypoint::new(0.0, 0.0),
        Waypoint::new(1.0, 0.0),
        Waypoint::new(1.0, 1.0),
        Waypoint::new(0.0, 0.0),
    ]
}

#[test]
fn test_route_valid() {
    let route = Route::new(square()).unwrap();
    assert_eq!(route.waypoints().len(), 4);
    assert_eq!(route.segment_count(), 3);
}

#[test]
fn test_route_too_short() {
    let result = Route::new(vec![Waypoint::new(0.0, 0.0), Waypoint::new(0.0, 0.0)]);
    assert!(matches!(result, Err(RouteError::InvalidRoute(_))));
}

#[test]
fn test_route_not_closed() {
    let result = Route::new(vec![
        Waypoint::new(0.0, 0.0),
        Waypoint::new(1.0, 0.0),
        Waypoint::new(1.0, 1.0),
    ]);
    assert!(matches!(result, Err(RouteError::InvalidRoute(_))));
}

#[test]
fn test_route_rejects_nan() {
    let result = Route::new(vec![
        Waypoint::new(0.0, 0.0),
        Waypoint::new(f64::NAN, 0.0),
        Waypoint::new(1.0, 1.0),
        Waypoint::new(0.0, 0.0),
    ]);
    assert!(matches!(result, Err(RouteError::InvalidRoute(_))));
}

#[test]
fn test_segment_wraps() {
    let route = Route::new(square()).unwrap();
    let (a, b) = route.segment(2);
    assert_eq!(a, Waypoint::new(1.0, 1.0));
    assert_eq!(b, Waypoint::new(0.0, 0.0));

    // Index past the end wraps around the waypoint list
    let (a, _) = route.segment(4);
    assert_eq!(a, Waypoint::new(0.0, 0.0));
}

#[test]
fn test_table_lookup() {
    let table = RouteTable::from_definitions(vec![("car-1".to_string(), square())]);
    assert_eq!(table.len(), 1);
    assert!(table.route_for("car-1").is_ok());
}

#[test]
fn test_table_unknown_entity() {
    let table = RouteTable::from_definitions(vec![("car-1".to_string(), square())]);
    assert_eq!(
        table.route_for("car-9"),
        Err(RouteError::UnknownEntity("car-9".to_string()))
    );
}

#[test]
fn test_table_excludes_invalid_routes() {
    let table = RouteTable::from_definitions(vec![
        ("good".to_string(), square()),
        ("bad".to_string(), vec![Waypoint::new(0.0, 0.0)]),
    ]);

    assert_eq!(table.len(), 1);
    assert!(table.route_for("good").is_ok());
    assert!(matches!(
        table.route_for("bad"),
        Err(RouteError::UnknownEntity(_))
    ));
}

#[test]
fn test_routes_are_shared() {
    let table = RouteTable::from_definitions(vec![("car-1".to_string(), square())]);
    let first = table.route_for("car-1").unwrap();
    let second = table.route_for("car-1").unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}
