//! Driver configuration.

/// Timing and buffering parameters for a [`NetDriver`](crate::NetDriver).
///
/// All timeouts are in milliseconds of the driver's virtual clock: with
/// `fixed_frame_time_ms` set, the clock advances exactly that much per
/// [`update`](crate::NetDriver::update) (deterministic tests); left at 0 it
/// tracks wall time.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Time between connection request attempts
    pub connect_timeout_ms: u64,
    /// Attempts before a connect gives up with `ConnectionTimeout`
    pub max_connect_attempts: u16,
    /// Inbound silence after which an established connection is dropped
    pub disconnect_timeout_ms: u64,
    /// Outbound silence after which a keep-alive ping goes out
    pub heartbeat_timeout_ms: u64,
    /// Virtual clock step per tick; 0 = wall clock
    pub fixed_frame_time_ms: u64,
    /// Receive stream capacity in bytes (the cap in dynamic mode)
    pub receive_buffer_size: usize,
    /// Grow the receive stream on demand instead of preallocating
    pub dynamic_stream_size: bool,
    /// Queued events per connection before the queue resets
    pub max_events_per_connection: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 1000,
            max_connect_attempts: 60,
            disconnect_timeout_ms: 30_000,
            heartbeat_timeout_ms: 500,
            fixed_frame_time_ms: 0,
            receive_buffer_size: 64 * 1024,
            dynamic_stream_size: false,
            max_events_per_connection: 256,
        }
    }
}
