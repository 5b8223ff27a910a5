//! Connection state machine values.

/// The engine's single authoritative connection state.
///
/// ```text
/// Idle -> Connecting -> Connected
/// Connected -> Closing -> Idle
/// Connected -> Reconnecting -> Connecting        (unexpected closure)
/// Closing -> Refreshing -> Idle -> Connecting    (connect() during a close)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Closing,
    Reconnecting,
    Refreshing,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Closing => "closing",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Refreshing => "refreshing",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Whether the engine is tearing down a transport.
    pub fn is_closing(&self) -> bool {
        matches!(self, ConnectionState::Closing | ConnectionState::Refreshing)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
