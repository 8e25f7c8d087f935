//! Device profiles: the device-specific part of a slave's object dictionary.
//!
//! A [`VirtualSlave`](crate::VirtualSlave) answers the identity object itself
//! and hands every other SDO access to its profile.

use std::any::Any;
use std::fmt;

/// Device-specific behavior plugged into a [`VirtualSlave`](crate::VirtualSlave).
pub trait DeviceProfile: Send + fmt::Debug {
    /// Short device name used in logs.
    fn name(&self) -> &str;

    /// Answer an expedited SDO upload, `None` if the object is unknown.
    fn sdo_upload(&mut self, index: u16, subindex: u8) -> Option<u32>;

    /// Consume an expedited SDO download of `size` bytes.
    ///
    /// Returns `true` if the object accepted the value.
    fn sdo_download(&mut self, index: u16, subindex: u8, value: u32, size: u8) -> bool;

    /// Whether the device's own PDO configuration makes its inputs valid.
    ///
    /// Queried after every accepted download; `None` leaves the slave's
    /// mapping flag untouched.
    fn input_mapping_valid(&self) -> Option<bool> {
        None
    }

    /// Current digital input bitfield, LSB = channel 0.
    fn digital_inputs(&mut self) -> Option<u32> {
        None
    }

    /// Upcast for typed access.
    fn as_any(&self) -> &dyn Any;

    /// Upcast for typed mutable access.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Bare ESC with no device objects.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericDevice;

impl DeviceProfile for GenericDevice {
    fn name(&self) -> &str {
        "generic"
    }

    fn sdo_upload(&mut self, _index: u16, _subindex: u8) -> Option<u32> {
        None
    }

    fn sdo_download(&mut self, _index: u16, _subindex: u8, _value: u32, _size: u8) -> bool {
        false
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
