//! Mailbox, CoE and SDO message codec.
//!
//! Only expedited SDO transfers are modelled:
//!
//! ```text
//! | mailbox header (6) | CoE header (2) | SDO command (1) | index (2) | sub (1) | data (4) |
//! ```
//!
//! The mailbox header carries `length` (bytes after the header), `address`,
//! a channel/priority byte and a byte with the mailbox type in its low nibble
//! and the session counter in bits 4..=6. The CoE header packs a 9-bit number
//! and the service in its top nibble.

/// Mailbox header size.
pub const MAILBOX_HEADER_SIZE: usize = 6;
/// Offset of the CoE header.
pub const COE_HEADER_OFFSET: usize = MAILBOX_HEADER_SIZE;
/// Offset of the SDO command byte.
pub const SDO_OFFSET: usize = COE_HEADER_OFFSET + 2;
/// Length announced for an expedited SDO message (CoE + SDO part).
pub const SDO_EXPEDITED_LENGTH: u16 = 10;
/// Total size of an expedited SDO message.
pub const SDO_MESSAGE_SIZE: usize = MAILBOX_HEADER_SIZE + SDO_EXPEDITED_LENGTH as usize;

/// Mailbox type: CAN application protocol over EtherCAT.
pub const MAILBOX_TYPE_COE: u8 = 0x03;

/// CoE services.
pub mod coe_service {
    /// SDO request, master → slave.
    pub const SDO_REQUEST: u8 = 0x02;
    /// SDO response, slave → master.
    pub const SDO_RESPONSE: u8 = 0x03;
}

/// SDO command specifiers in requests.
pub mod sdo_request {
    /// Initiate download.
    pub const DOWNLOAD: u8 = 0x01;
    /// Initiate upload.
    pub const UPLOAD: u8 = 0x02;
}

/// SDO command specifiers in responses.
pub mod sdo_response {
    /// Initiate upload response.
    pub const UPLOAD: u8 = 0x02;
    /// Initiate download response.
    pub const DOWNLOAD: u8 = 0x03;
}

const SIZE_INDICATOR: u8 = 0x01;
const EXPEDITED: u8 = 0x02;
const SIZE_SHIFT: u8 = 2;
const COMMAND_SHIFT: u8 = 5;

/// Mailbox header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MailboxHeader {
    /// Bytes following the header.
    pub length: u16,
    /// Station address of the originator.
    pub address: u16,
    /// Channel and priority byte.
    pub channel: u8,
    /// Mailbox protocol type.
    pub mailbox_type: u8,
    /// Session counter (1..=7).
    pub counter: u8,
}

impl MailboxHeader {
    /// Encoded size.
    pub const SIZE: usize = MAILBOX_HEADER_SIZE;

    /// Parse the header at the start of `bytes`.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            length: u16::from_le_bytes([bytes[0], bytes[1]]),
            address: u16::from_le_bytes([bytes[2], bytes[3]]),
            channel: bytes[4],
            mailbox_type: bytes[5] & 0x0F,
            counter: (bytes[5] >> 4) & 0x07,
        })
    }

    /// Encode the header.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..2].copy_from_slice(&self.length.to_le_bytes());
        bytes[2..4].copy_from_slice(&self.address.to_le_bytes());
        bytes[4] = self.channel;
        bytes[5] = (self.mailbox_type & 0x0F) | ((self.counter & 0x07) << 4);
        bytes
    }

    /// Total message size announced by this header.
    #[must_use]
    pub fn message_size(&self) -> usize {
        Self::SIZE + usize::from(self.length)
    }
}

/// Decoded expedited SDO request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SdoRequest {
    /// Session counter from the mailbox header.
    pub counter: u8,
    /// CoE service.
    pub service: u8,
    /// SDO command specifier.
    pub command: u8,
    /// Object index.
    pub index: u16,
    /// Object subindex.
    pub subindex: u8,
    /// Inline data, little-endian.
    pub data: u32,
    /// Number of meaningful data bytes (1..=4).
    pub size: u8,
}

impl SdoRequest {
    /// Parse a CoE message from the start of a mailbox buffer.
    ///
    /// Returns `None` when the buffer is too short or the mailbox type is not CoE.
    #[must_use]
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let header = MailboxHeader::from_bytes(bytes)?;
        if header.mailbox_type != MAILBOX_TYPE_COE || bytes.len() < SDO_MESSAGE_SIZE {
            return None;
        }
        let coe = u16::from_le_bytes([bytes[COE_HEADER_OFFSET], bytes[COE_HEADER_OFFSET + 1]]);
        #[allow(clippy::cast_possible_truncation)]
        let service = (coe >> 12) as u8;
        let flags = bytes[SDO_OFFSET];
        let size = if flags & EXPEDITED != 0 && flags & SIZE_INDICATOR != 0 {
            4 - ((flags >> SIZE_SHIFT) & 0x03)
        } else {
            4
        };
        let data = u32::from_le_bytes([
            bytes[SDO_OFFSET + 4],
            bytes[SDO_OFFSET + 5],
            bytes[SDO_OFFSET + 6],
            bytes[SDO_OFFSET + 7],
        ]);
        Some(Self {
            counter: header.counter,
            service,
            command: flags >> COMMAND_SHIFT,
            index: u16::from_le_bytes([bytes[SDO_OFFSET + 1], bytes[SDO_OFFSET + 2]]),
            subindex: bytes[SDO_OFFSET + 3],
            data,
            size,
        })
    }

    /// Inline data masked to the announced size.
    #[must_use]
    pub fn value(&self) -> u32 {
        match self.size {
            1 => self.data & 0xFF,
            2 => self.data & 0xFFFF,
            3 => self.data & 0x00FF_FFFF,
            _ => self.data,
        }
    }
}

fn encode_sdo(
    counter: u8,
    service: u8,
    command: u8,
    size: u8,
    index: u16,
    subindex: u8,
    data: u32,
) -> [u8; SDO_MESSAGE_SIZE] {
    let mut out = [0u8; SDO_MESSAGE_SIZE];
    let header = MailboxHeader {
        length: SDO_EXPEDITED_LENGTH,
        address: 0,
        channel: 0,
        mailbox_type: MAILBOX_TYPE_COE,
        counter,
    };
    out[..MAILBOX_HEADER_SIZE].copy_from_slice(&header.to_bytes());
    let coe = u16::from(service) << 12;
    out[COE_HEADER_OFFSET..COE_HEADER_OFFSET + 2].copy_from_slice(&coe.to_le_bytes());
    out[SDO_OFFSET] = (command << COMMAND_SHIFT)
        | (((4 - size.clamp(1, 4)) & 0x03) << SIZE_SHIFT)
        | EXPEDITED
        | SIZE_INDICATOR;
    out[SDO_OFFSET + 1..SDO_OFFSET + 3].copy_from_slice(&index.to_le_bytes());
    out[SDO_OFFSET + 3] = subindex;
    out[SDO_OFFSET + 4..SDO_OFFSET + 8].copy_from_slice(&data.to_le_bytes());
    out
}

/// Encode an expedited SDO response carrying a 4-byte value.
#[must_use]
pub fn encode_sdo_response(
    counter: u8,
    command: u8,
    index: u16,
    subindex: u8,
    value: u32,
) -> [u8; SDO_MESSAGE_SIZE] {
    encode_sdo(
        counter,
        coe_service::SDO_RESPONSE,
        command,
        4,
        index,
        subindex,
        value,
    )
}

/// Encode an expedited SDO upload request.
#[must_use]
pub fn encode_upload_request(counter: u8, index: u16, subindex: u8) -> [u8; SDO_MESSAGE_SIZE] {
    encode_sdo(
        counter,
        coe_service::SDO_REQUEST,
        sdo_request::UPLOAD,
        4,
        index,
        subindex,
        0,
    )
}

/// Encode an expedited SDO download request of `size` bytes (1..=4).
#[must_use]
pub fn encode_download_request(
    counter: u8,
    index: u16,
    subindex: u8,
    value: u32,
    size: u8,
) -> [u8; SDO_MESSAGE_SIZE] {
    encode_sdo(
        counter,
        coe_service::SDO_REQUEST,
        sdo_request::DOWNLOAD,
        size,
        index,
        subindex,
        value,
    )
}

/// Value carried by an expedited SDO response.
#[must_use]
pub fn response_value(bytes: &[u8]) -> Option<u32> {
    if bytes.len() < SDO_MESSAGE_SIZE {
        return None;
    }
    Some(u32::from_le_bytes([
        bytes[SDO_OFFSET + 4],
        bytes[SDO_OFFSET + 5],
        bytes[SDO_OFFSET + 6],
        bytes[SDO_OFFSET + 7],
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_bit_packing() {
        let header = MailboxHeader {
            length: 10,
            address: 0x1001,
            channel: 0,
            mailbox_type: MAILBOX_TYPE_COE,
            counter: 5,
        };
        let bytes = header.to_bytes();
        assert_eq!(bytes[5], 0x53);
        assert_eq!(MailboxHeader::from_bytes(&bytes), Some(header));
        assert_eq!(header.message_size(), 16);
    }

    #[test]
    fn test_upload_request_fields() {
        let msg = encode_upload_request(1, 0x1018, 1);
        assert_eq!(msg[7] >> 4, coe_service::SDO_REQUEST);
        let req = SdoRequest::parse(&msg).unwrap();
        assert_eq!(req.service, coe_service::SDO_REQUEST);
        assert_eq!(req.command, sdo_request::UPLOAD);
        assert_eq!(req.index, 0x1018);
        assert_eq!(req.subindex, 1);
        assert_eq!(req.counter, 1);
    }

    #[test]
    fn test_download_size_masks_value() {
        let msg = encode_download_request(2, 0x8000, 0, 0xAABB_CCDD, 1);
        let req = SdoRequest::parse(&msg).unwrap();
        assert_eq!(req.size, 1);
        assert_eq!(req.value(), 0xDD);
    }

    #[test]
    fn test_response_shape() {
        let msg = encode_sdo_response(3, sdo_response::UPLOAD, 0x1018, 2, 0x0102_0304);
        assert_eq!(u16::from_le_bytes([msg[0], msg[1]]), 10);
        assert_eq!(msg[5], 0x33);
        assert_eq!(msg[7], 0x30);
        assert_eq!(msg[8], 0x43);
        assert_eq!(response_value(&msg), Some(0x0102_0304));

        let ack = encode_sdo_response(3, sdo_response::DOWNLOAD, 0x1018, 2, 0);
        assert_eq!(ack[8], 0x63);
    }

    #[test]
    fn test_non_coe_is_ignored() {
        let mut msg = encode_upload_request(1, 0x1000, 0);
        msg[5] = (msg[5] & 0xF0) | 0x04;
        assert!(SdoRequest::parse(&msg).is_none());
        assert!(SdoRequest::parse(&msg[..8]).is_none());
    }
}
