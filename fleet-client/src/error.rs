use std::fmt;

/// Client session errors
#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    /// The transport closed or failed mid-stream
    TransportClosed(String),
    /// Every reconnect attempt failed; a new `connect()` is required
    ReconnectExhausted { attempts: u32 },
    /// Could not open the transport
    Connect(String),
    /// Inbound frame was not a valid envelope
    Decode(String),
    /// The session was disposed by its owner
    Disposed,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::TransportClosed(msg) => write!(f, "Transport closed: {}", msg),
            SessionError::ReconnectExhausted { attempts } => {
                write!(f, "Gave up after {} reconnect attempts", attempts)
            }
            SessionError::Connect(msg) => write!(f, "Connect failed: {}", msg),
            SessionError::Decode(msg) => write!(f, "Invalid frame: {}", msg),
            SessionError::Disposed => write!(f, "Session disposed"),
        }
    }
}

impl std::error::Error for SessionError {}
