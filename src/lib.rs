// Closed-loop routes and the route table
pub mod route;

// Per-vehicle motion state
pub mod motion;

// Vehicle and geofence records
pub mod roster;

// Position simulation
pub mod simulator;

// Topic pub/sub broker and wire protocol
pub mod broker;

// Alert ids, dispatch, rules and history
pub mod alert;

// Periodic ticks and heartbeats
pub mod scheduler;

// Configuration
pub mod config;

// HTTP and WebSocket APIs
pub mod api;
