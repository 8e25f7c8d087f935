//! Cyclic process data exchange.
//!
//! Once slaves are in OP a master exchanges the logical process image every
//! cycle. These scenarios check that the image behaves like shared memory,
//! that configured latency is honoured, and that the server shuts down
//! promptly while a master is still attached.

use super::common::{quick_config, start_tcp, TestMaster};
use ecsim_bus::frame::physical_address;
use ecsim_bus::registers;
use ecsim_bus::{Command, DecodedDatagram, FrameBuilder};
use ecsim_common::config::SimConfig;
use std::time::{Duration, Instant};

#[test]
fn test_logical_image_round_trip() {
    let server = start_tcp(&quick_config(1));
    let mut master = TestMaster::connect(&server);

    let outputs = [0xA5, 0x5A, 0x0F, 0xF0];
    assert_eq!(master.datagram(Command::Lwr, 0x100, &outputs).wkc, 1);
    assert_eq!(master.datagram(Command::Lrd, 0x100, &[0; 4]).payload, outputs);

    // LRW returns the old image and stores the new one.
    let swapped = master.datagram(Command::Lrw, 0x100, &[1, 2, 3, 4]);
    assert_eq!(swapped.wkc, 1);
    assert_eq!(swapped.payload, outputs);
    assert_eq!(master.datagram(Command::Lrd, 0x100, &[0; 4]).payload, vec![1, 2, 3, 4]);

    server.stop();
}

#[test]
fn test_logical_access_outside_image() {
    let config = SimConfig {
        logical_memory_size: 64,
        ..quick_config(1)
    };
    let server = start_tcp(&config);
    let mut master = TestMaster::connect(&server);

    assert_eq!(master.datagram(Command::Lrd, 62, &[0; 4]).wkc, 0);
    assert_eq!(master.datagram(Command::Lrd, 60, &[0; 4]).wkc, 1);

    server.stop();
}

#[test]
fn test_cycles_honour_latency() {
    let latency = Duration::from_millis(15);
    let config = SimConfig {
        latency,
        ..quick_config(2)
    };
    let server = start_tcp(&config);
    let mut master = TestMaster::connect(&server);

    let cycles = 5u32;
    let started = Instant::now();
    for _ in 0..cycles {
        assert_eq!(master.count_slaves(), 2);
    }
    assert!(started.elapsed() >= latency * cycles);

    let stats = server.diagnostics().snapshot();
    assert_eq!(stats.frames, u64::from(cycles));
    assert_eq!(stats.zero_wkc_datagrams, 0);

    server.stop();
}

#[test]
fn test_mixed_cycle_frame() {
    let server = start_tcp(&quick_config(2));
    let mut master = TestMaster::connect(&server);

    let frame = FrameBuilder::new()
        .datagram(Command::Lrw, 0, &[0x11, 0x22])
        .datagram(Command::Brd, physical_address(0, registers::DL_STATUS), &[0, 0])
        .datagram(Command::Fprd, physical_address(1, registers::STATION_ADDRESS), &[0, 0])
        .build();
    let reply = master.link().exchange(&frame).unwrap();
    let datagrams = DecodedDatagram::decode_all(&reply).unwrap();

    assert_eq!(datagrams.len(), 3);
    assert_eq!(datagrams[0].wkc, 1);
    assert_eq!(datagrams[1].wkc, 2);
    assert_eq!(datagrams[2].wkc, 1);
    assert_eq!(datagrams[2].payload, vec![1, 0]);

    server.stop();
}

#[test]
fn test_shutdown_with_attached_master() {
    let server = start_tcp(&quick_config(1));
    let mut master = TestMaster::connect(&server);
    assert_eq!(master.count_slaves(), 1);

    let started = Instant::now();
    server.stop();
    assert!(started.elapsed() < Duration::from_millis(500));

    let frame = FrameBuilder::new()
        .datagram(Command::Brd, physical_address(0, registers::AL_STATUS), &[0, 0])
        .build();
    assert!(master.link().exchange(&frame).is_err());
}

#[test]
#[ignore = "long-running"]
fn test_sustained_cycling() {
    let server = start_tcp(&quick_config(8));
    let mut master = TestMaster::connect(&server);

    let cycles = 20_000u64;
    for cycle in 0..cycles {
        let value = cycle.to_le_bytes();
        master.datagram(Command::Lwr, 0, &value);
        assert_eq!(master.count_slaves(), 8);
    }

    let stats = server.diagnostics().snapshot();
    assert_eq!(stats.frames, cycles * 2);
    assert_eq!(stats.connection_errors, 0);
    server.stop();
}
