//! EtherCAT frame and datagram views.
//!
//! Frame layout:
//!
//! ```text
//! | Ethernet (14) | EtherCAT header (2) | datagram | datagram | ... |
//!
//! datagram:
//! | cmd (1) | idx (1) | address (4) | len/flags (2) | irq (2) | payload (len) | wkc (2) |
//! ```
//!
//! All multi-byte fields inside the EtherCAT part are little-endian; the
//! Ethernet type is big-endian. [`Frame`] walks the datagrams of a caller
//! owned buffer and hands out mutable views so payload and working counter
//! are updated in place.

use thiserror::Error;

/// EtherType assigned to EtherCAT.
pub const ETHERCAT_ETHERTYPE: u16 = 0x88A4;
/// Ethernet header size (destination, source, type).
pub const ETHERNET_HEADER_SIZE: usize = 14;
/// EtherCAT frame header size.
pub const ETHERCAT_HEADER_SIZE: usize = 2;
/// Datagram header size.
pub const DATAGRAM_HEADER_SIZE: usize = 10;
/// Working counter size.
pub const WKC_SIZE: usize = 2;
/// EtherCAT frame type for PDU frames.
pub const ETHERCAT_TYPE_PDU: u16 = 0x1;

const LEN_MASK: u16 = 0x07FF;
const CIRCULATING_BIT: u16 = 1 << 14;
const MORE_FOLLOWS_BIT: u16 = 1 << 15;

/// Datagram commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    /// No operation.
    Nop = 0x00,
    /// Auto-increment physical read.
    Aprd = 0x01,
    /// Auto-increment physical write.
    Apwr = 0x02,
    /// Auto-increment physical read & write.
    Aprw = 0x03,
    /// Configured-address physical read.
    Fprd = 0x04,
    /// Configured-address physical write.
    Fpwr = 0x05,
    /// Configured-address physical read & write.
    Fprw = 0x06,
    /// Broadcast read.
    Brd = 0x07,
    /// Broadcast write.
    Bwr = 0x08,
    /// Broadcast read & write.
    Brw = 0x09,
    /// Logical memory read.
    Lrd = 0x0A,
    /// Logical memory write.
    Lwr = 0x0B,
    /// Logical memory read & write.
    Lrw = 0x0C,
    /// Auto-increment read, multiple write.
    Armw = 0x0D,
    /// Configured-address read, multiple write.
    Frmw = 0x0E,
}

impl Command {
    /// Parse a command from its wire value.
    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Nop),
            0x01 => Some(Self::Aprd),
            0x02 => Some(Self::Apwr),
            0x03 => Some(Self::Aprw),
            0x04 => Some(Self::Fprd),
            0x05 => Some(Self::Fpwr),
            0x06 => Some(Self::Fprw),
            0x07 => Some(Self::Brd),
            0x08 => Some(Self::Bwr),
            0x09 => Some(Self::Brw),
            0x0A => Some(Self::Lrd),
            0x0B => Some(Self::Lwr),
            0x0C => Some(Self::Lrw),
            0x0D => Some(Self::Armw),
            0x0E => Some(Self::Frmw),
            _ => None,
        }
    }
}

/// Frame-level decoding failures.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Buffer shorter than the Ethernet and EtherCAT headers.
    #[error("frame too short: {0} bytes")]
    TooShort(usize),
}

/// A frame buffer borrowed for in-place processing.
pub struct Frame<'a> {
    buf: &'a mut [u8],
}

impl<'a> Frame<'a> {
    /// Wrap a raw frame.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::TooShort`] when the buffer cannot hold the headers.
    pub fn new(buf: &'a mut [u8]) -> Result<Self, FrameError> {
        if buf.len() < ETHERNET_HEADER_SIZE + ETHERCAT_HEADER_SIZE {
            return Err(FrameError::TooShort(buf.len()));
        }
        Ok(Self { buf })
    }

    /// Ethernet type field.
    #[must_use]
    pub fn ethertype(&self) -> u16 {
        u16::from_be_bytes([self.buf[12], self.buf[13]])
    }

    /// Overwrite the Ethernet type field.
    pub fn set_ethertype(&mut self, ethertype: u16) {
        self.buf[12..14].copy_from_slice(&ethertype.to_be_bytes());
    }

    /// Iterate the datagrams in wire order.
    ///
    /// Iteration ends after the datagram whose "more follows" bit is clear,
    /// or before a datagram that does not fit in the remaining buffer.
    pub fn datagrams(&mut self) -> DatagramIter<'_> {
        DatagramIter {
            rest: &mut self.buf[ETHERNET_HEADER_SIZE + ETHERCAT_HEADER_SIZE..],
            done: false,
            truncated: false,
        }
    }
}

/// Iterator over the datagrams of a [`Frame`].
pub struct DatagramIter<'a> {
    rest: &'a mut [u8],
    done: bool,
    truncated: bool,
}

impl DatagramIter<'_> {
    /// True once iteration stopped at a datagram that did not fit.
    #[must_use]
    pub fn truncated(&self) -> bool {
        self.truncated
    }
}

impl<'a> Iterator for DatagramIter<'a> {
    type Item = DatagramMut<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let Some(total) = datagram_size(self.rest) else {
            self.done = true;
            self.truncated = !self.rest.is_empty();
            return None;
        };
        let rest = std::mem::take(&mut self.rest);
        let (head, tail) = rest.split_at_mut(total);
        let datagram = DatagramMut { bytes: head };
        if !datagram.more_follows() {
            self.done = true;
        }
        self.rest = tail;
        Some(datagram)
    }
}

/// Size of the datagram at the start of `bytes`, if it fits completely.
fn datagram_size(bytes: &[u8]) -> Option<usize> {
    if bytes.len() < DATAGRAM_HEADER_SIZE + WKC_SIZE {
        return None;
    }
    let len = usize::from(u16::from_le_bytes([bytes[6], bytes[7]]) & LEN_MASK);
    let total = DATAGRAM_HEADER_SIZE + len + WKC_SIZE;
    (total <= bytes.len()).then_some(total)
}

/// Mutable view of one datagram (header, payload, and working counter).
pub struct DatagramMut<'a> {
    bytes: &'a mut [u8],
}

impl DatagramMut<'_> {
    /// Raw command byte.
    #[must_use]
    pub fn command_byte(&self) -> u8 {
        self.bytes[0]
    }

    /// Decoded command, `None` for reserved values.
    #[must_use]
    pub fn command(&self) -> Option<Command> {
        Command::from_byte(self.bytes[0])
    }

    /// Datagram index assigned by the master.
    #[must_use]
    pub fn index(&self) -> u8 {
        self.bytes[1]
    }

    /// Full 32-bit address (logical commands).
    #[must_use]
    pub fn address(&self) -> u32 {
        u32::from_le_bytes([self.bytes[2], self.bytes[3], self.bytes[4], self.bytes[5]])
    }

    /// Position or station address (low 16 bits).
    #[must_use]
    pub fn adp(&self) -> u16 {
        u16::from_le_bytes([self.bytes[2], self.bytes[3]])
    }

    /// Register offset (high 16 bits).
    #[must_use]
    pub fn ado(&self) -> u16 {
        u16::from_le_bytes([self.bytes[4], self.bytes[5]])
    }

    /// Payload length.
    #[must_use]
    pub fn data_len(&self) -> usize {
        self.bytes.len() - DATAGRAM_HEADER_SIZE - WKC_SIZE
    }

    fn len_word(&self) -> u16 {
        u16::from_le_bytes([self.bytes[6], self.bytes[7]])
    }

    /// True if another datagram follows this one.
    #[must_use]
    pub fn more_follows(&self) -> bool {
        self.len_word() & MORE_FOLLOWS_BIT != 0
    }

    /// True if the frame already circulated once.
    #[must_use]
    pub fn circulating(&self) -> bool {
        self.len_word() & CIRCULATING_BIT != 0
    }

    /// Payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        let end = self.bytes.len() - WKC_SIZE;
        &self.bytes[DATAGRAM_HEADER_SIZE..end]
    }

    /// Payload bytes, writable.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        let end = self.bytes.len() - WKC_SIZE;
        &mut self.bytes[DATAGRAM_HEADER_SIZE..end]
    }

    /// Working counter.
    #[must_use]
    pub fn wkc(&self) -> u16 {
        let n = self.bytes.len();
        u16::from_le_bytes([self.bytes[n - 2], self.bytes[n - 1]])
    }

    /// Overwrite the working counter.
    pub fn set_wkc(&mut self, wkc: u16) {
        let n = self.bytes.len();
        self.bytes[n - 2..].copy_from_slice(&wkc.to_le_bytes());
    }
}

/// Owned copy of a datagram, for inspecting replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedDatagram {
    /// Raw command byte.
    pub command: u8,
    /// Datagram index.
    pub index: u8,
    /// 32-bit address field.
    pub address: u32,
    /// Payload bytes.
    pub payload: Vec<u8>,
    /// Working counter.
    pub wkc: u16,
}

impl DecodedDatagram {
    /// Decode every complete datagram in a frame.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::TooShort`] when the headers are missing.
    pub fn decode_all(frame: &[u8]) -> Result<Vec<Self>, FrameError> {
        let mut copy = frame.to_vec();
        let mut frame = Frame::new(&mut copy)?;
        Ok(frame
            .datagrams()
            .map(|dg| Self {
                command: dg.command_byte(),
                index: dg.index(),
                address: dg.address(),
                payload: dg.payload().to_vec(),
                wkc: dg.wkc(),
            })
            .collect())
    }
}

/// Builds complete EtherCAT frames, as a master would send them.
#[derive(Debug, Clone, Default)]
pub struct FrameBuilder {
    datagrams: Vec<(u8, u8, u32, Vec<u8>)>,
}

impl FrameBuilder {
    /// Create an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a datagram; the index is its position in the frame.
    #[must_use]
    pub fn datagram(self, command: Command, address: u32, payload: &[u8]) -> Self {
        self.raw_datagram(command as u8, address, payload)
    }

    /// Append a datagram with an arbitrary command byte.
    #[must_use]
    pub fn raw_datagram(mut self, command: u8, address: u32, payload: &[u8]) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        let index = self.datagrams.len() as u8;
        self.datagrams
            .push((command, index, address, payload.to_vec()));
        self
    }

    /// Serialize the frame with broadcast destination and zero working counters.
    #[must_use]
    pub fn build(self) -> Vec<u8> {
        let body: usize = self
            .datagrams
            .iter()
            .map(|(_, _, _, p)| DATAGRAM_HEADER_SIZE + p.len() + WKC_SIZE)
            .sum();
        let mut out = Vec::with_capacity(ETHERNET_HEADER_SIZE + ETHERCAT_HEADER_SIZE + body);
        out.extend_from_slice(&[0xFF; 6]);
        out.extend_from_slice(&[0x02, 0, 0, 0, 0, 0x01]);
        out.extend_from_slice(&ETHERCAT_ETHERTYPE.to_be_bytes());

        #[allow(clippy::cast_possible_truncation)]
        let header = (body as u16 & LEN_MASK) | (ETHERCAT_TYPE_PDU << 12);
        out.extend_from_slice(&header.to_le_bytes());

        let count = self.datagrams.len();
        for (i, (command, index, address, payload)) in self.datagrams.into_iter().enumerate() {
            out.push(command);
            out.push(index);
            out.extend_from_slice(&address.to_le_bytes());
            #[allow(clippy::cast_possible_truncation)]
            let mut len = payload.len() as u16 & LEN_MASK;
            if i + 1 < count {
                len |= MORE_FOLLOWS_BIT;
            }
            out.extend_from_slice(&len.to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes());
            out.extend_from_slice(&payload);
            out.extend_from_slice(&0u16.to_le_bytes());
        }
        out
    }
}

/// Compose a physical address from position/station and register offset.
#[must_use]
pub fn physical_address(adp: u16, ado: u16) -> u32 {
    (u32::from(ado) << 16) | u32::from(adp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_layout() {
        let frame = FrameBuilder::new()
            .datagram(Command::Fprd, physical_address(0x1001, 0x0130), &[0, 0])
            .build();
        assert_eq!(frame.len(), 14 + 2 + 10 + 2 + 2);
        assert_eq!(&frame[12..14], &[0x88, 0xA4]);
        let header = u16::from_le_bytes([frame[14], frame[15]]);
        assert_eq!(header & 0x07FF, 14);
        assert_eq!(header >> 12, 1);
        assert_eq!(frame[16], 0x04);
        assert_eq!(u16::from_le_bytes([frame[18], frame[19]]), 0x1001);
        assert_eq!(u16::from_le_bytes([frame[20], frame[21]]), 0x0130);
    }

    #[test]
    fn test_iterates_all_datagrams() {
        let mut frame = FrameBuilder::new()
            .datagram(Command::Brd, 0, &[0; 2])
            .datagram(Command::Lrd, 0x100, &[0; 4])
            .datagram(Command::Nop, 0, &[])
            .build();
        let mut frame = Frame::new(&mut frame).unwrap();
        let commands: Vec<_> = frame.datagrams().map(|d| d.command()).collect();
        assert_eq!(
            commands,
            vec![Some(Command::Brd), Some(Command::Lrd), Some(Command::Nop)]
        );
    }

    #[test]
    fn test_stops_at_last_datagram_despite_padding() {
        let mut frame = FrameBuilder::new()
            .datagram(Command::Brd, 0, &[0; 2])
            .build();
        frame.resize(60, 0xEE);
        let mut frame = Frame::new(&mut frame).unwrap();
        assert_eq!(frame.datagrams().count(), 1);
    }

    #[test]
    fn test_truncated_datagram_is_not_yielded() {
        let mut frame = FrameBuilder::new()
            .datagram(Command::Brd, 0, &[0; 2])
            .datagram(Command::Bwr, 0, &[1, 2, 3, 4])
            .build();
        frame.truncate(frame.len() - 3);
        let mut frame = Frame::new(&mut frame).unwrap();
        let mut iter = frame.datagrams();
        assert!(iter.next().is_some());
        assert!(iter.next().is_none());
        assert!(iter.truncated());
    }

    #[test]
    fn test_in_place_updates() {
        let mut bytes = FrameBuilder::new()
            .datagram(Command::Lrd, 0x10, &[0; 3])
            .build();
        {
            let mut frame = Frame::new(&mut bytes).unwrap();
            for mut dg in frame.datagrams() {
                dg.payload_mut().copy_from_slice(&[7, 8, 9]);
                dg.set_wkc(1);
            }
        }
        let decoded = DecodedDatagram::decode_all(&bytes).unwrap();
        assert_eq!(decoded[0].payload, vec![7, 8, 9]);
        assert_eq!(decoded[0].wkc, 1);
        assert_eq!(decoded[0].address, 0x10);
    }

    #[test]
    fn test_too_short() {
        let mut bytes = [0u8; 10];
        assert_eq!(Frame::new(&mut bytes).err(), Some(FrameError::TooShort(10)));
    }
}
