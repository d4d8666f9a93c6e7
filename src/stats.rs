//! Process-wide event counters and the connection-status bit-field.
//!
//! Both services write here and the register map reads here; routing the
//! cross-service queries through this component keeps control and streaming
//! free of imports of each other's internals.
//!
//! Counters wrap on overflow; consumers treat them as monotonic within one
//! boot. The status bit-field is updated with atomic read-modify-write, so
//! concurrent per-bit updates from both services cannot lose each other.

use std::sync::atomic::{AtomicU32, Ordering};

// Connection-status bits.
pub const STATUS_GVCP_SOCKET_UP: u32 = 1 << 0;
pub const STATUS_GVSP_SOCKET_UP: u32 = 1 << 1;
pub const STATUS_CLIENT_CONNECTED: u32 = 1 << 2;
pub const STATUS_STREAMING_ACTIVE: u32 = 1 << 3;
pub const STATUS_CLIENT_TIMEOUT: u32 = 1 << 4;

/// Monotonic event counters, one per named event.
#[derive(Debug, Default)]
pub struct Stats {
    pub gvcp_commands: AtomicU32,
    pub gvcp_errors: AtomicU32,
    pub frames_captured: AtomicU32,
    pub frames_sent: AtomicU32,
    pub packets_sent: AtomicU32,
    pub resend_requests: AtomicU32,
    pub discovery_broadcasts: AtomicU32,
    pub send_failures: AtomicU32,
    status: AtomicU32,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the given status bits, leaving the rest untouched.
    pub fn set_status(&self, bits: u32) {
        self.status.fetch_or(bits, Ordering::Relaxed);
    }

    /// Clear the given status bits, leaving the rest untouched.
    pub fn clear_status(&self, bits: u32) {
        self.status.fetch_and(!bits, Ordering::Relaxed);
    }

    /// Snapshot of the status bit-field.
    pub fn status(&self) -> u32 {
        self.status.load(Ordering::Relaxed)
    }

    pub fn status_bit(&self, bit: u32) -> bool {
        self.status() & bit != 0
    }
}

/// Wrapping increment for a counter cell.
pub fn bump(counter: &AtomicU32) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Relaxed read of a counter cell.
pub fn count(counter: &AtomicU32) -> u32 {
    counter.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero_and_bump() {
        let stats = Stats::new();
        assert_eq!(count(&stats.frames_sent), 0);
        bump(&stats.frames_sent);
        bump(&stats.frames_sent);
        assert_eq!(count(&stats.frames_sent), 2);
    }

    #[test]
    fn counters_wrap() {
        let stats = Stats::new();
        stats.gvcp_commands.store(u32::MAX, Ordering::Relaxed);
        bump(&stats.gvcp_commands);
        assert_eq!(count(&stats.gvcp_commands), 0);
    }

    #[test]
    fn status_bits_are_independent() {
        let stats = Stats::new();
        stats.set_status(STATUS_GVCP_SOCKET_UP | STATUS_CLIENT_CONNECTED);
        stats.set_status(STATUS_STREAMING_ACTIVE);
        stats.clear_status(STATUS_CLIENT_CONNECTED);
        assert!(stats.status_bit(STATUS_GVCP_SOCKET_UP));
        assert!(stats.status_bit(STATUS_STREAMING_ACTIVE));
        assert!(!stats.status_bit(STATUS_CLIENT_CONNECTED));
        assert_eq!(
            stats.status(),
            STATUS_GVCP_SOCKET_UP | STATUS_STREAMING_ACTIVE
        );
    }

    #[test]
    fn concurrent_bit_updates_do_not_lose_writes() {
        use std::sync::Arc;
        let stats = Arc::new(Stats::new());
        let a = Arc::clone(&stats);
        let b = Arc::clone(&stats);
        let ta = std::thread::spawn(move || {
            for _ in 0..1000 {
                a.set_status(STATUS_CLIENT_CONNECTED);
                a.clear_status(STATUS_CLIENT_CONNECTED);
            }
        });
        let tb = std::thread::spawn(move || {
            for _ in 0..1000 {
                b.set_status(STATUS_GVSP_SOCKET_UP);
            }
        });
        ta.join().unwrap();
        tb.join().unwrap();
        assert!(stats.status_bit(STATUS_GVSP_SOCKET_UP));
    }
}
