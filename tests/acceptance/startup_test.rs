//! Master startup sequence.
//!
//! Mirrors what a master does after opening the link: scan the bus, assign
//! station addresses, check identities from EEPROM and the object
//! dictionary, then walk every slave up to OP.

use super::common::{quick_config, start_tcp, TestMaster};
use ecsim_bus::devices::el1258;
use ecsim_bus::eeprom::word;
use ecsim_bus::frame::physical_address;
use ecsim_bus::registers;
use ecsim_bus::Command;
use ecsim_common::config::{DeviceKind, SimConfig};
use ecsim_common::state::{status_code, AlState};

#[test]
fn test_scan_and_assign_addresses() {
    let server = start_tcp(&quick_config(4));
    let mut master = TestMaster::connect(&server);

    let count = master.count_slaves();
    assert_eq!(count, 4);

    master.assign_addresses(count, 0x1001);
    for station in 0x1001..0x1001 + count {
        assert_eq!(master.read_u16(station, registers::STATION_ADDRESS), station);
    }

    // The factory addresses are gone.
    let reply = master.datagram(Command::Fprd, physical_address(1, registers::AL_STATUS), &[0, 0]);
    assert_eq!(reply.wkc, 0);

    server.stop();
}

#[test]
fn test_identity_from_eeprom_and_coe() {
    let server = start_tcp(&quick_config(2));
    let mut master = TestMaster::connect(&server);

    for station in [1, 2] {
        let vendor = master.eeprom_read(station, u16::try_from(word::VENDOR_ID).unwrap());
        let product = master.eeprom_read(station, u16::try_from(word::PRODUCT_CODE).unwrap());
        assert_eq!(vendor, el1258::VENDOR_ID);
        assert_eq!(product, el1258::PRODUCT_CODE);

        assert_eq!(master.sdo_upload(station, 0x1018, 1), Some(el1258::VENDOR_ID));
        assert_eq!(master.sdo_upload(station, 0x1018, 2), Some(el1258::PRODUCT_CODE));
    }

    server.stop();
}

#[test]
fn test_identity_overrides_reach_the_wire() {
    let config = SimConfig {
        device: DeviceKind::Generic,
        vendor_id: Some(0x1234_5678),
        product_code: Some(0x0000_1258),
        ..quick_config(1)
    };
    let server = start_tcp(&config);
    let mut master = TestMaster::connect(&server);

    assert_eq!(master.sdo_upload(1, 0x1018, 1), Some(0x1234_5678));
    assert_eq!(
        master.eeprom_read(1, u16::try_from(word::PRODUCT_CODE).unwrap()),
        0x0000_1258
    );

    server.stop();
}

#[test]
fn test_bring_up_to_op() {
    let server = start_tcp(&quick_config(3));
    let mut master = TestMaster::connect(&server);

    // INIT -> PREOP for everyone at once.
    let control = u16::from(AlState::PreOp.code()).to_le_bytes();
    let reply = master.datagram(Command::Bwr, physical_address(0, registers::AL_CONTROL), &control);
    assert_eq!(reply.wkc, 3);

    for station in 1..=3 {
        for state in [AlState::SafeOp, AlState::Op] {
            let (status, code) = master.request_state(station, state);
            assert_eq!(status, u16::from(state.code()));
            assert_eq!(code, status_code::NONE);
        }
    }

    server.stop();
}

#[test]
fn test_invalid_transition_reports_error() {
    let server = start_tcp(&quick_config(1));
    let mut master = TestMaster::connect(&server);

    let (status, code) = master.request_state(1, AlState::Op);
    assert_eq!(status & 0x0F, u16::from(AlState::Init.code()));
    assert_ne!(status & 0x10, 0);
    assert_ne!(code, status_code::NONE);

    server.stop();
}

#[cfg(unix)]
#[test]
fn test_startup_over_unix_socket() {
    use ecsim_daemon::{Endpoint, MasterLink, SlaveServer};
    use std::time::Duration;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ethercat_bus.sock");
    let server = SlaveServer::start_at(&Endpoint::Uds(path.clone()), &quick_config(2)).unwrap();

    let mut link = MasterLink::connect(server.local_endpoint(), Duration::from_secs(2)).unwrap();
    let frame = ecsim_bus::FrameBuilder::new()
        .datagram(Command::Brd, physical_address(0, registers::AL_STATUS), &[0, 0])
        .build();
    let reply = link.exchange(&frame).unwrap();
    let datagrams = ecsim_bus::DecodedDatagram::decode_all(&reply).unwrap();
    assert_eq!(datagrams[0].wkc, 2);

    drop(link);
    server.stop();
    assert!(!path.exists());
}
