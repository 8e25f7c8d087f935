//! Concrete device profiles.

pub mod el1258;

pub use el1258::El1258;

use crate::profile::{DeviceProfile, GenericDevice};
use crate::slave::{SlaveIdentity, VirtualSlave};
use ecsim_common::config::DeviceKind;

/// Identity a device kind reports unless overridden.
#[must_use]
pub fn default_identity(kind: DeviceKind) -> SlaveIdentity {
    match kind {
        DeviceKind::Generic => SlaveIdentity::new(0, 0, 1, 0),
        DeviceKind::El1258 => {
            SlaveIdentity::new(el1258::VENDOR_ID, el1258::PRODUCT_CODE, el1258::REVISION, 0)
        }
    }
}

/// Build a slave of the given kind at `address`.
#[must_use]
pub fn build_slave(kind: DeviceKind, address: u16, identity: SlaveIdentity) -> VirtualSlave {
    let (profile, name): (Box<dyn DeviceProfile>, &str) = match kind {
        DeviceKind::Generic => (Box::new(GenericDevice), "generic"),
        DeviceKind::El1258 => (Box::new(El1258::new()), "EL1258"),
    };
    VirtualSlave::with_profile(address, identity, format!("{name}@{address}"), profile)
}
