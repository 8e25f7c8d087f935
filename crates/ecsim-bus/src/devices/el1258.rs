//! EL1258-compatible 8-channel digital input terminal.
//!
//! Channel 0 follows the power button and channel 1 the AC power state;
//! the other channels are set explicitly. Inputs pass through a per-device
//! debounce filter and invert mask before they are reported, both
//! configurable over CoE.

use crate::profile::DeviceProfile;
use std::any::Any;
use std::time::{Duration, Instant};

/// Vendor id reported by default.
pub const VENDOR_ID: u32 = 0x0000_0002;
/// Product code reported by default.
pub const PRODUCT_CODE: u32 = 0x04EA_3052;
/// Revision reported by default.
pub const REVISION: u32 = 0x0011_0000;
/// Number of input channels.
pub const CHANNEL_COUNT: usize = 8;

const MAX_ASSIGNMENTS: usize = 4;

/// Object dictionary indices.
pub mod object {
    /// Device type.
    pub const DEVICE_TYPE: u16 = 0x1000;
    /// Device name (first four characters).
    pub const DEVICE_NAME: u16 = 0x1008;
    /// Hardware version string.
    pub const HARDWARE_VERSION: u16 = 0x1009;
    /// Software version string.
    pub const SOFTWARE_VERSION: u16 = 0x100A;
    /// TxPDO mapping.
    pub const TX_PDO_MAPPING: u16 = 0x1A00;
    /// Sync-Manager TxPDO assignment.
    pub const TX_PDO_ASSIGN: u16 = 0x1C13;
    /// Per-channel input bits, subindex 1..=8.
    pub const DIGITAL_INPUT: u16 = 0x6000;
    /// All channels as one bitfield.
    pub const DIGITAL_AGGREGATE: u16 = 0x6002;
    /// Invert mask, bit n inverts channel n.
    pub const INVERT_MASK: u16 = 0x8000;
    /// Debounce time in milliseconds.
    pub const DEBOUNCE_TIME: u16 = 0x8001;
}

/// PDO mapping entry: index(16) | subindex(8) | bit length(8).
#[must_use]
pub fn mapping_entry(index: u16, subindex: u8, bits: u8) -> u32 {
    (u32::from(index) << 16) | (u32::from(subindex) << 8) | u32::from(bits)
}

fn pack4(s: &str) -> u32 {
    let mut buf = [0u8; 4];
    for (dst, src) in buf.iter_mut().zip(s.bytes()) {
        *dst = src;
    }
    u32::from_le_bytes(buf)
}

#[derive(Debug, Clone, Copy)]
struct Channel {
    raw: bool,
    effective: bool,
    last_change: Instant,
}

/// EL1258 device profile.
#[derive(Debug, Clone)]
pub struct El1258 {
    power: bool,
    power_button: bool,
    channels: [Channel; CHANNEL_COUNT],
    invert_mask: u8,
    debounce: Duration,
    tx_pdo_count: u8,
    tx_pdo_entries: [u32; CHANNEL_COUNT],
    assign_count: u8,
    assign_entries: [u16; MAX_ASSIGNMENTS],
}

impl Default for El1258 {
    fn default() -> Self {
        Self::new()
    }
}

impl El1258 {
    /// Create a terminal with all inputs low and no PDO mapping.
    #[must_use]
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            power: false,
            power_button: false,
            channels: [Channel {
                raw: false,
                effective: false,
                last_change: now,
            }; CHANNEL_COUNT],
            invert_mask: 0,
            debounce: Duration::ZERO,
            tx_pdo_count: 0,
            tx_pdo_entries: [0; CHANNEL_COUNT],
            assign_count: 0,
            assign_entries: [0; MAX_ASSIGNMENTS],
        }
    }

    /// Builder form of [`apply_default_tx_pdo_mapping`](Self::apply_default_tx_pdo_mapping).
    #[must_use]
    pub fn with_default_tx_pdo_mapping(mut self) -> Self {
        self.apply_default_tx_pdo_mapping();
        self
    }

    /// Map the 8-bit aggregate into 0x1A00 and assign 0x1A00 to the inputs SM.
    pub fn apply_default_tx_pdo_mapping(&mut self) {
        #[allow(clippy::cast_possible_truncation)]
        let bits = CHANNEL_COUNT as u8;
        self.tx_pdo_count = 1;
        self.tx_pdo_entries = [0; CHANNEL_COUNT];
        self.tx_pdo_entries[0] = mapping_entry(object::DIGITAL_AGGREGATE, 0, bits);
        self.assign_count = 1;
        self.assign_entries = [0; MAX_ASSIGNMENTS];
        self.assign_entries[0] = object::TX_PDO_MAPPING;
    }

    /// Set the AC power state (drives channel 1).
    pub fn set_power(&mut self, on: bool) {
        self.power = on;
        self.set_raw(1, on);
    }

    /// AC power state.
    #[must_use]
    pub fn power(&self) -> bool {
        self.power
    }

    /// Press or release the power button (drives channel 0).
    pub fn set_power_button(&mut self, pressed: bool) {
        self.power_button = pressed;
        self.set_raw(0, pressed);
    }

    /// Power button state.
    #[must_use]
    pub fn power_button(&self) -> bool {
        self.power_button
    }

    /// Drive a channel directly; out-of-range channels are ignored.
    pub fn set_input(&mut self, channel: usize, value: bool) {
        if channel >= CHANNEL_COUNT {
            return;
        }
        self.set_raw(channel, value);
        match channel {
            0 => self.power_button = value,
            1 => self.power = value,
            _ => {}
        }
    }

    /// Effective (debounced, inverted) value of a channel.
    pub fn input(&mut self, channel: usize) -> bool {
        channel < CHANNEL_COUNT && self.effective(channel)
    }

    /// All effective inputs, bit n = channel n.
    pub fn aggregate(&mut self) -> u8 {
        (0..CHANNEL_COUNT).fold(0u8, |bits, ch| {
            if self.effective(ch) {
                bits | (1 << ch)
            } else {
                bits
            }
        })
    }

    /// Invert mask.
    #[must_use]
    pub fn invert_mask(&self) -> u8 {
        self.invert_mask
    }

    /// Debounce filter time.
    #[must_use]
    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// True when 0x1A00 is assigned and maps at least one entry.
    #[must_use]
    pub fn mapping_valid(&self) -> bool {
        let assigned = self.assign_entries[..usize::from(self.assign_count)]
            .contains(&object::TX_PDO_MAPPING);
        assigned && self.tx_pdo_count > 0
    }

    fn set_raw(&mut self, channel: usize, value: bool) {
        let ch = &mut self.channels[channel];
        if ch.raw != value {
            ch.raw = value;
            ch.last_change = Instant::now();
        }
    }

    fn effective(&mut self, channel: usize) -> bool {
        let debounce = self.debounce;
        let ch = &mut self.channels[channel];
        if ch.effective != ch.raw && ch.last_change.elapsed() >= debounce {
            ch.effective = ch.raw;
        }
        ch.effective ^ ((self.invert_mask >> channel) & 1 != 0)
    }
}

impl DeviceProfile for El1258 {
    fn name(&self) -> &str {
        "EL1258"
    }

    fn sdo_upload(&mut self, index: u16, subindex: u8) -> Option<u32> {
        match (index, subindex) {
            (object::DEVICE_TYPE, 0) => Some(0),
            (object::DEVICE_NAME, 0) => Some(pack4("EL1258")),
            (object::HARDWARE_VERSION, 0) => Some(pack4("HW10")),
            (object::SOFTWARE_VERSION, 0) => Some(pack4("SW10")),
            (object::DIGITAL_INPUT, 1..=8) => {
                Some(u32::from(self.input(usize::from(subindex) - 1)))
            }
            (object::DIGITAL_AGGREGATE, 0) => Some(u32::from(self.aggregate())),
            (object::INVERT_MASK, 0) => Some(u32::from(self.invert_mask)),
            (object::DEBOUNCE_TIME, 0) => {
                u32::try_from(self.debounce.as_millis()).ok()
            }
            (object::TX_PDO_MAPPING, 0) => Some(u32::from(self.tx_pdo_count)),
            (object::TX_PDO_MAPPING, 1..=8) => {
                Some(self.tx_pdo_entries[usize::from(subindex) - 1])
            }
            (object::TX_PDO_ASSIGN, 0) => Some(u32::from(self.assign_count)),
            (object::TX_PDO_ASSIGN, 1..=4) => {
                Some(u32::from(self.assign_entries[usize::from(subindex) - 1]))
            }
            _ => None,
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn sdo_download(&mut self, index: u16, subindex: u8, value: u32, _size: u8) -> bool {
        match (index, subindex) {
            (object::INVERT_MASK, 0) => self.invert_mask = value as u8,
            (object::DEBOUNCE_TIME, 0) => {
                self.debounce = Duration::from_millis(u64::from(value as u16));
            }
            (object::TX_PDO_MAPPING, 0) => {
                self.tx_pdo_count = (value as u8).min(CHANNEL_COUNT as u8);
                for entry in &mut self.tx_pdo_entries[usize::from(self.tx_pdo_count)..] {
                    *entry = 0;
                }
            }
            (object::TX_PDO_MAPPING, 1..=8) => {
                self.tx_pdo_entries[usize::from(subindex) - 1] = value;
            }
            (object::TX_PDO_ASSIGN, 0) => {
                self.assign_count = (value as u8).min(MAX_ASSIGNMENTS as u8);
                for entry in &mut self.assign_entries[usize::from(self.assign_count)..] {
                    *entry = 0;
                }
            }
            (object::TX_PDO_ASSIGN, 1..=4) => {
                self.assign_entries[usize::from(subindex) - 1] = value as u16;
            }
            _ => return false,
        }
        true
    }

    fn input_mapping_valid(&self) -> Option<bool> {
        Some(self.mapping_valid())
    }

    fn digital_inputs(&mut self) -> Option<u32> {
        Some(u32::from(self.aggregate()))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
