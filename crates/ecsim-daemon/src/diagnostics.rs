//! Diagnostics counters for the slave server.
//!
//! Counters are plain atomics updated from the server thread and read from
//! anywhere; [`DiagnosticsState::snapshot`] freezes them into a serializable
//! value that the daemon logs as JSON.

use ecsim_bus::DispatchSummary;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Point-in-time copy of the server counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DiagnosticsSnapshot {
    /// Frames dispatched.
    pub frames: u64,
    /// Datagrams executed.
    pub datagrams: u64,
    /// Datagrams answered by nobody.
    pub zero_wkc_datagrams: u64,
    /// Frames that stopped at a truncated datagram.
    pub truncated_frames: u64,
    /// Client connections accepted.
    pub connections: u64,
    /// Connections closed because of a transport or framing error.
    pub connection_errors: u64,
    /// Whether a client is currently connected.
    pub client_connected: bool,
    /// Seconds since the server started.
    pub uptime_secs: u64,
}

impl DiagnosticsSnapshot {
    /// Render as a single-line JSON object.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}"))
    }
}

/// Shared counters updated by the server.
#[derive(Debug)]
pub struct DiagnosticsState {
    frames: AtomicU64,
    datagrams: AtomicU64,
    zero_wkc_datagrams: AtomicU64,
    truncated_frames: AtomicU64,
    connections: AtomicU64,
    connection_errors: AtomicU64,
    client_connected: AtomicBool,
    start_time: Instant,
}

impl Default for DiagnosticsState {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagnosticsState {
    /// Create zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self {
            frames: AtomicU64::new(0),
            datagrams: AtomicU64::new(0),
            zero_wkc_datagrams: AtomicU64::new(0),
            truncated_frames: AtomicU64::new(0),
            connections: AtomicU64::new(0),
            connection_errors: AtomicU64::new(0),
            client_connected: AtomicBool::new(false),
            start_time: Instant::now(),
        }
    }

    /// Account for one dispatched frame.
    pub fn record_frame(&self, summary: &DispatchSummary) {
        self.frames.fetch_add(1, Ordering::Relaxed);
        self.datagrams
            .fetch_add(summary.datagrams as u64, Ordering::Relaxed);
        self.zero_wkc_datagrams
            .fetch_add(summary.zero_wkc as u64, Ordering::Relaxed);
        if summary.truncated {
            self.truncated_frames.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// A client connected.
    pub fn connection_opened(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
        self.client_connected.store(true, Ordering::Relaxed);
    }

    /// The client went away; `failed` if a transport error ended it.
    pub fn connection_closed(&self, failed: bool) {
        self.client_connected.store(false, Ordering::Relaxed);
        if failed {
            self.connection_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Frames dispatched so far.
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Connections accepted so far.
    pub fn connections(&self) -> u64 {
        self.connections.load(Ordering::Relaxed)
    }

    /// Whether a client is connected.
    pub fn is_client_connected(&self) -> bool {
        self.client_connected.load(Ordering::Relaxed)
    }

    /// Time since the counters were created.
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Freeze the counters.
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            frames: self.frames(),
            datagrams: self.datagrams.load(Ordering::Relaxed),
            zero_wkc_datagrams: self.zero_wkc_datagrams.load(Ordering::Relaxed),
            truncated_frames: self.truncated_frames.load(Ordering::Relaxed),
            connections: self.connections(),
            connection_errors: self.connection_errors.load(Ordering::Relaxed),
            client_connected: self.is_client_connected(),
            uptime_secs: self.uptime().as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state_is_zero() {
        let state = DiagnosticsState::new();
        let snap = state.snapshot();
        assert_eq!(snap.frames, 0);
        assert_eq!(snap.connections, 0);
        assert!(!snap.client_connected);
    }

    #[test]
    fn test_record_frame() {
        let state = DiagnosticsState::new();
        state.record_frame(&DispatchSummary {
            datagrams: 3,
            wkc_total: 4,
            zero_wkc: 1,
            truncated: false,
        });
        state.record_frame(&DispatchSummary {
            datagrams: 1,
            wkc_total: 0,
            zero_wkc: 1,
            truncated: true,
        });
        let snap = state.snapshot();
        assert_eq!(snap.frames, 2);
        assert_eq!(snap.datagrams, 4);
        assert_eq!(snap.zero_wkc_datagrams, 2);
        assert_eq!(snap.truncated_frames, 1);
    }

    #[test]
    fn test_connection_tracking() {
        let state = DiagnosticsState::new();
        state.connection_opened();
        assert!(state.is_client_connected());
        state.connection_closed(true);
        state.connection_opened();
        state.connection_closed(false);

        let snap = state.snapshot();
        assert_eq!(snap.connections, 2);
        assert_eq!(snap.connection_errors, 1);
        assert!(!snap.client_connected);
    }

    #[test]
    fn test_snapshot_json() {
        let state = DiagnosticsState::new();
        state.connection_opened();
        let json: serde_json::Value = serde_json::from_str(&state.snapshot().to_json()).unwrap();
        assert_eq!(json["connections"], 1);
        assert_eq!(json["client_connected"], true);
        assert_eq!(json["frames"], 0);
    }
}
