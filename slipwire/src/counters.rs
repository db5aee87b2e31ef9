//! Driver-level traffic counters.

/// Plain counters accumulated by a driver since creation.
///
/// Observable state only; there is no metrics surface. Sent counts are
/// recorded at enqueue time (the flush is best-effort).
#[derive(Debug, Default, Clone, Copy)]
pub struct DriverCounters {
    pub datagrams_sent: u64,
    pub datagrams_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    /// Malformed, unknown-type or unsolicited datagrams dropped
    pub dropped_datagrams: u64,
    /// Datagrams dropped for carrying the wrong session token
    pub dropped_token_mismatch: u64,
    /// Event queues discarded (tick-start or capacity resets)
    pub event_queue_resets: u64,
}
