//! SII EEPROM image.
//!
//! The master reads the EEPROM through two registers: a control write at
//! 0x0502 that sets the word address, then 4-byte data reads at 0x0508 that
//! return two consecutive words and advance the address.

use crate::registers;
use crate::slave::SlaveIdentity;

/// EEPROM size in 16-bit words.
pub const EEPROM_WORDS: usize = 128;

/// Word addresses of the fields the master parses.
pub mod word {
    /// PDI control.
    pub const PDI_CONTROL: usize = 0x00;
    /// Vendor id, low word first.
    pub const VENDOR_ID: usize = 0x08;
    /// Product code.
    pub const PRODUCT_CODE: usize = 0x0A;
    /// Revision number.
    pub const REVISION: usize = 0x0C;
    /// Serial number.
    pub const SERIAL: usize = 0x0E;
    /// Bootstrap receive mailbox offset.
    pub const BOOTSTRAP_MAILBOX: usize = 0x14;
    /// Standard receive mailbox offset.
    pub const STANDARD_MAILBOX: usize = 0x1C;
    /// Supported mailbox protocols.
    pub const MAILBOX_PROTOCOL: usize = 0x24;
    /// EEPROM size.
    pub const SIZE: usize = 0x2E;
    /// SII version.
    pub const VERSION: usize = 0x30;
    /// End-of-categories marker.
    pub const CATEGORY_END: usize = 0x60;
}

const MAILBOX_PROTOCOL_COE: u16 = 0x0004;
const CATEGORY_TYPE_END: u16 = 0xFFFF;

/// Word-addressed EEPROM with the auto-incrementing read pointer.
#[derive(Debug, Clone)]
pub struct Eeprom {
    words: [u16; EEPROM_WORDS],
    pointer: usize,
}

impl Eeprom {
    /// Build the image for a slave identity with default mailbox windows.
    #[must_use]
    pub fn new(identity: &SlaveIdentity) -> Self {
        let mut words = [0u16; EEPROM_WORDS];
        words[word::PDI_CONTROL] = 0x0180;

        put_u32(&mut words, word::VENDOR_ID, identity.vendor_id);
        put_u32(&mut words, word::PRODUCT_CODE, identity.product_code);
        put_u32(&mut words, word::REVISION, identity.revision);
        put_u32(&mut words, word::SERIAL, identity.serial);

        // Offsets are stored as (low byte, high byte) word pairs.
        for base in [word::BOOTSTRAP_MAILBOX, word::STANDARD_MAILBOX] {
            words[base] = registers::DEFAULT_MAILBOX_RECV_OFFSET & 0x00FF;
            words[base + 1] = registers::DEFAULT_MAILBOX_RECV_OFFSET >> 8;
            words[base + 2] = registers::DEFAULT_MAILBOX_SIZE;
            words[base + 4] = registers::DEFAULT_MAILBOX_SEND_OFFSET & 0x00FF;
            words[base + 5] = registers::DEFAULT_MAILBOX_SEND_OFFSET >> 8;
            words[base + 6] = registers::DEFAULT_MAILBOX_SIZE;
        }

        words[word::MAILBOX_PROTOCOL] = MAILBOX_PROTOCOL_COE;
        words[word::SIZE] = 0x0001;
        words[word::VERSION] = 0x0001;
        words[word::CATEGORY_END] = CATEGORY_TYPE_END;

        Self { words, pointer: 0 }
    }

    /// Handle a control write; needs command, low and high address words.
    ///
    /// Returns `false` if the write is too short to carry an address.
    pub fn control_write(&mut self, bytes: &[u8]) -> bool {
        if bytes.len() < 6 {
            return false;
        }
        let command = u16::from_le_bytes([bytes[0], bytes[1]]);
        let address = u16::from_le_bytes([bytes[2], bytes[3]]);
        self.pointer = usize::from(address);
        tracing::trace!(command, address, "EEPROM control write");
        true
    }

    /// Fill `out` with two words from the pointer and advance it by two.
    ///
    /// Returns `false` if `out` is shorter than 4 bytes.
    pub fn read_data(&mut self, out: &mut [u8]) -> bool {
        if out.len() < 4 {
            return false;
        }
        let lo = self.word(self.pointer);
        let hi = self.word(self.pointer + 1);
        out[0..2].copy_from_slice(&lo.to_le_bytes());
        out[2..4].copy_from_slice(&hi.to_le_bytes());
        out[4..].fill(0);
        self.pointer += 2;
        true
    }

    /// Word at `address`; reads past the image return 0.
    #[must_use]
    pub fn word(&self, address: usize) -> u16 {
        self.words.get(address).copied().unwrap_or(0)
    }

    /// Current read pointer (word address).
    #[must_use]
    pub fn pointer(&self) -> usize {
        self.pointer
    }
}

fn put_u32(words: &mut [u16], at: usize, value: u32) {
    #[allow(clippy::cast_possible_truncation)]
    {
        words[at] = value as u16;
        words[at + 1] = (value >> 16) as u16;
    }
}
