use thiserror::Error;

/// Negative result of a register or logical memory access.
///
/// These never abort frame processing; the dispatcher turns them into a
/// zero working counter for the affected datagram.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AccessError {
    /// The access is not fully contained in any register window.
    #[error("register access 0x{offset:04X}+{len} outside every window")]
    OutOfWindow {
        /// First register offset.
        offset: u16,
        /// Access length in bytes.
        len: usize,
    },

    /// No slave answers to the station address.
    #[error("no slave with station address 0x{0:04X}")]
    UnknownStation(u16),

    /// No slave at the bus position.
    #[error("no slave at bus position {0}")]
    UnknownPosition(usize),

    /// The addressed slave is offline.
    #[error("slave 0x{0:04X} is offline")]
    Offline(u16),

    /// The logical access exceeds the process image.
    #[error("logical access 0x{address:08X}+{len} exceeds image of {size} bytes")]
    LogicalOutOfBounds {
        /// First logical address.
        address: u32,
        /// Access length in bytes.
        len: usize,
        /// Process image size.
        size: usize,
    },
}
