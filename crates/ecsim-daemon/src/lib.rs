//! Standalone EtherCAT slave simulator server.
//!
//! The daemon exposes a [`NetworkSimulator`](ecsim_bus::NetworkSimulator)
//! populated with virtual slaves over a stream socket. A master connects,
//! sends raw EtherCAT frames with a 2-byte big-endian length prefix and
//! receives each frame back with payloads and working counters filled in.
//!
//! ```no_run
//! use ecsim_common::config::SimConfig;
//! use ecsim_daemon::{MasterLink, SlaveServer};
//!
//! let config = SimConfig {
//!     endpoint: "tcp://127.0.0.1:5800".into(),
//!     slave_count: 2,
//!     ..SimConfig::default()
//! };
//! let server = SlaveServer::start(&config)?;
//! let mut link = MasterLink::connect_str("tcp://127.0.0.1:5800")?;
//! # let frame = vec![];
//! let reply = link.exchange(&frame)?;
//! server.stop();
//! # Ok::<(), ecsim_common::error::SimError>(())
//! ```

pub mod client;
pub mod diagnostics;
pub mod endpoint;
pub mod framing;
pub mod server;
pub mod signals;
pub mod transport;

pub use client::MasterLink;
pub use diagnostics::{DiagnosticsSnapshot, DiagnosticsState};
pub use endpoint::{parse_endpoint, Endpoint, EndpointError};
pub use server::{populate_simulator, SlaveServer};
