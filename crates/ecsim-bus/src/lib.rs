//! EtherCAT slave controller (ESC) and bus emulation.
//!
//! This crate models what an EtherCAT master sees on the wire:
//!
//! - [`VirtualSlave`]: a 4 KiB ESC register file with EEPROM, mailbox and
//!   Sync-Manager windows, the AL state machine, and a CoE SDO server
//! - [`NetworkSimulator`]: the shared bus with station/position addressing,
//!   a logical process image, and a latency-delayed frame queue
//! - [`dispatch_frame`]: the datagram walker that executes each command
//!   against the bus and writes working counters back in place
//!
//! Device-specific object dictionaries plug in through [`DeviceProfile`].
//!
//! # Example
//!
//! ```
//! use ecsim_bus::{dispatch_frame, Command, FrameBuilder, NetworkSimulator};
//!
//! let sim = NetworkSimulator::new();
//! sim.set_virtual_slave_count(2);
//!
//! let mut frame = FrameBuilder::new()
//!     .datagram(Command::Brd, 0x0130_0000, &[0, 0])
//!     .build();
//! let summary = dispatch_frame(&sim, &mut frame);
//! assert_eq!(summary.wkc_total, 2);
//! ```

pub mod devices;
pub mod dispatcher;
pub mod eeprom;
pub mod error;
pub mod frame;
pub mod mailbox;
pub mod profile;
pub mod registers;
pub mod simulator;
pub mod slave;
pub mod socket;

pub use dispatcher::{dispatch_frame, DispatchSummary};
pub use error::AccessError;
pub use frame::{Command, DatagramMut, DecodedDatagram, Frame, FrameBuilder, FrameError};
pub use profile::{DeviceProfile, GenericDevice};
pub use simulator::{lock_slave, NetworkSimulator, SharedSlave};
pub use slave::{SlaveIdentity, VirtualSlave};
pub use socket::SimSocket;
