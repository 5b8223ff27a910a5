//! Centralized configuration defaults.
//!
//! Constants for socket timing, reconnection backoff and clock synchronisation.
//! Runtime-adjustable settings live in [`SocketOptions`](crate::SocketOptions)
//! and [`ClockSyncOptions`](crate::ClockSyncOptions); these are their defaults.

use std::time::Duration;

/// Socket-level configuration.
pub struct SocketConfig;

impl SocketConfig {
    pub const PROTOCOL_VERSION: &'static str = "2.0";
    pub const PROTOCOL_VERSION_HEADER: &'static str = "X-Protocol-Version";
    pub const JWT_QUERY_PARAM: &'static str = "Authorization";
    pub const REPLY_TIMEOUT: Duration = Duration::from_secs(10);
    pub const PING_INTERVAL: Duration = Duration::from_secs(10);
    pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024; // 16MB
    pub const SENT_CHANNEL_CAPACITY: usize = 256;
    pub const ERROR_CHANNEL_CAPACITY: usize = 64;
}

/// Reconnection backoff defaults.
pub struct ReconnectConfig;

impl ReconnectConfig {
    pub const BASE_DELAY: Duration = Duration::from_millis(500);
    pub const MAX_DELAY: Duration = Duration::from_millis(20_000);
}

/// Clock synchronisation defaults.
pub struct ClockSyncConfig;

impl ClockSyncConfig {
    pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(30);
    pub const MIN_SAMPLE_INTERVAL: Duration = Duration::from_millis(1);
    pub const SAMPLE_CAPACITY: usize = 3;
    pub const GET_TIME_METHOD: &'static str = "getTime";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeouts_are_reasonable() {
        assert!(SocketConfig::REPLY_TIMEOUT > Duration::ZERO);
        assert!(ReconnectConfig::BASE_DELAY < ReconnectConfig::MAX_DELAY);
        assert!(ClockSyncConfig::SAMPLE_CAPACITY > 0);
    }
}
