//! Runtime configuration.

use std::time::Duration;

use boltlink_core::ChannelConfig;

/// Time allowed for all three acts to complete.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Bytes read from the transport per call.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 16 * 1024;

/// Queued outbound bytes at which `write` asks the caller to pause.
pub const DEFAULT_WRITE_HIGH_WATER: usize = 64 * 1024;

/// Events buffered between the driver task and the consumer.
pub const DEFAULT_EVENT_CAPACITY: usize = 32;

/// Configuration for one secure stream
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// State machine configuration
    pub channel: ChannelConfig,
    /// Deadline for the handshake, measured from stream creation
    pub handshake_timeout: Duration,
    /// Transport read size
    pub read_buffer_size: usize,
    /// Outbound backlog at which `write` returns false
    pub write_high_water: usize,
    /// Capacity of the consumer event queue (minimum 1)
    pub event_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            channel: ChannelConfig::default(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            write_high_water: DEFAULT_WRITE_HIGH_WATER,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}
