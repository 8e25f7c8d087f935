//! In-process frame socket.
//!
//! [`SimSocket`] gives a master the same write/read shape as a raw socket:
//! a written frame is dispatched against the bus and then queued, so the
//! processed frame comes back on `read` once the configured latency has
//! elapsed.

use crate::dispatcher::{dispatch_frame, DispatchSummary};
use crate::simulator::NetworkSimulator;
use ecsim_common::error::{SimError, SimResult};
use std::sync::Arc;
use tracing::trace;

/// Socket-like handle onto a [`NetworkSimulator`].
#[derive(Debug, Clone)]
pub struct SimSocket {
    sim: Arc<NetworkSimulator>,
}

impl SimSocket {
    /// Attach to a simulator.
    #[must_use]
    pub fn new(sim: Arc<NetworkSimulator>) -> Self {
        Self { sim }
    }

    /// The simulator behind this socket.
    #[must_use]
    pub fn simulator(&self) -> &Arc<NetworkSimulator> {
        &self.sim
    }

    /// Process a frame and queue the reply.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::LinkDown`] if the link is down; the frame is then
    /// neither dispatched nor queued.
    pub fn write(&self, frame: &[u8]) -> SimResult<DispatchSummary> {
        if !self.sim.is_link_up() {
            return Err(SimError::LinkDown);
        }
        let mut reply = frame.to_vec();
        let summary = dispatch_frame(&self.sim, &mut reply);
        trace!(
            len = frame.len(),
            datagrams = summary.datagrams,
            wkc = summary.wkc_total,
            "frame written"
        );
        self.sim.send_frame(&reply)?;
        Ok(summary)
    }

    /// Copy the next ready frame into `buf`.
    ///
    /// Returns 0 when no frame is ready yet. A frame longer than `buf` is cut
    /// to fit.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::LinkDown`] if the link is down.
    pub fn read(&self, buf: &mut [u8]) -> SimResult<usize> {
        let Some(frame) = self.sim.receive_frame()? else {
            return Ok(0);
        };
        let n = frame.len().min(buf.len());
        buf[..n].copy_from_slice(&frame[..n]);
        Ok(n)
    }
}
