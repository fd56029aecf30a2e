// Client session configuration
pub mod config;

// Session errors
pub mod error;

// Typed inbound events
pub mod event;

// Reconnecting session state machine
pub mod session;

// Transport seam and the WebSocket implementation
pub mod transport;

pub use config::FleetClientConfig;
pub use error::SessionError;
pub use event::ClientEvent;
pub use session::{ClientSession, SessionState};
pub use transport::{Transport, WsTransport};
