//! Blocking master-side client for the slave server.

use crate::endpoint::{parse_endpoint, Endpoint};
use crate::framing::{read_frame, write_frame, Received};
use crate::transport::Connection;
use ecsim_common::config::DEFAULT_MAX_FRAME_SIZE;
use ecsim_common::error::{SimError, SimResult};
use std::time::Duration;

/// Default time to wait for a connect or a reply.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// One master connection speaking the length-prefixed frame protocol.
#[derive(Debug)]
pub struct MasterLink {
    conn: Connection,
    endpoint: Endpoint,
    max_frame_size: usize,
}

impl MasterLink {
    /// Connect to an endpoint string such as `tcp://127.0.0.1:5000`.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InvalidEndpoint`] or the connection failure.
    pub fn connect_str(endpoint: &str) -> SimResult<Self> {
        Self::connect(&parse_endpoint(endpoint)?, DEFAULT_TIMEOUT)
    }

    /// Connect to `endpoint`; `timeout` also bounds every later exchange.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Transport`] if the server cannot be reached.
    pub fn connect(endpoint: &Endpoint, timeout: Duration) -> SimResult<Self> {
        let conn = Connection::connect(endpoint, timeout)?;
        conn.set_timeouts(Some(timeout))?;
        Ok(Self {
            conn,
            endpoint: endpoint.clone(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        })
    }

    /// Accept replies up to `max` bytes.
    #[must_use]
    pub fn with_max_frame_size(mut self, max: usize) -> Self {
        self.max_frame_size = max;
        self
    }

    /// The endpoint this link is connected to.
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Send a frame without waiting for the reply.
    ///
    /// # Errors
    ///
    /// Returns the framing or socket failure.
    pub fn send(&mut self, frame: &[u8]) -> SimResult<()> {
        write_frame(&mut self.conn, frame, None)
    }

    /// Wait for the next reply frame.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Transport`] on timeout or if the server closed the
    /// connection.
    pub fn receive(&mut self) -> SimResult<Vec<u8>> {
        match read_frame(&mut self.conn, self.max_frame_size, None)? {
            Received::Frame(frame) => Ok(frame),
            Received::Closed | Received::Stopped => {
                Err(SimError::Transport(format!("{} closed the connection", self.endpoint)))
            }
        }
    }

    /// Send a frame and return the processed copy.
    ///
    /// # Errors
    ///
    /// Returns any failure of [`send`](Self::send) or [`receive`](Self::receive).
    pub fn exchange(&mut self, frame: &[u8]) -> SimResult<Vec<u8>> {
        self.send(frame)?;
        self.receive()
    }
}
