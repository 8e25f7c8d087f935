//! Master-side helpers shared by the acceptance scenarios.

#![allow(dead_code)]

use ecsim_bus::frame::physical_address;
use ecsim_bus::mailbox::{encode_upload_request, response_value};
use ecsim_bus::registers;
use ecsim_bus::{Command, DecodedDatagram, FrameBuilder};
use ecsim_common::config::SimConfig;
use ecsim_common::state::AlState;
use ecsim_daemon::{Endpoint, MasterLink, SlaveServer};
use std::time::Duration;

/// Server configuration with a short poll interval and no stats logging.
pub fn quick_config(slaves: usize) -> SimConfig {
    SimConfig {
        slave_count: slaves,
        poll_interval: Duration::from_millis(50),
        stats_interval: Duration::ZERO,
        ..SimConfig::default()
    }
}

/// Start a server on an ephemeral loopback port.
pub fn start_tcp(config: &SimConfig) -> SlaveServer {
    let endpoint = Endpoint::Tcp {
        host: "127.0.0.1".into(),
        port: 0,
    };
    SlaveServer::start_at(&endpoint, config).expect("server starts")
}

/// A minimal master on top of [`MasterLink`].
pub struct TestMaster {
    link: MasterLink,
    counter: u8,
}

impl TestMaster {
    pub fn connect(server: &SlaveServer) -> Self {
        let link = MasterLink::connect(server.local_endpoint(), Duration::from_secs(2))
            .expect("master connects");
        Self { link, counter: 0 }
    }

    /// Send a frame with one datagram and return its processed copy.
    pub fn datagram(&mut self, command: Command, address: u32, payload: &[u8]) -> DecodedDatagram {
        let frame = FrameBuilder::new().datagram(command, address, payload).build();
        let reply = self.link.exchange(&frame).expect("reply frame");
        DecodedDatagram::decode_all(&reply)
            .expect("well-formed reply")
            .remove(0)
    }

    /// Count slaves with a broadcast read of AL status.
    pub fn count_slaves(&mut self) -> u16 {
        self.datagram(Command::Brd, physical_address(0, registers::AL_STATUS), &[0, 0])
            .wkc
    }

    /// Assign `first + position` to every slave by auto-increment address.
    pub fn assign_addresses(&mut self, count: u16, first: u16) {
        for position in 0..count {
            let adp = 0u16.wrapping_sub(position);
            let station = first + position;
            let reply = self.datagram(
                Command::Apwr,
                physical_address(adp, registers::STATION_ADDRESS),
                &station.to_le_bytes(),
            );
            assert_eq!(reply.wkc, 1, "slave at position {position} did not answer");
        }
    }

    pub fn read_u16(&mut self, station: u16, offset: u16) -> u16 {
        let reply = self.datagram(Command::Fprd, physical_address(station, offset), &[0, 0]);
        assert_eq!(reply.wkc, 1);
        u16::from_le_bytes([reply.payload[0], reply.payload[1]])
    }

    pub fn write_u16(&mut self, station: u16, offset: u16, value: u16) -> u16 {
        self.datagram(Command::Fpwr, physical_address(station, offset), &value.to_le_bytes())
            .wkc
    }

    /// Request `state` and return the resulting (AL status, status code).
    pub fn request_state(&mut self, station: u16, state: AlState) -> (u16, u16) {
        assert_eq!(
            self.write_u16(station, registers::AL_CONTROL, u16::from(state.code())),
            1
        );
        (
            self.read_u16(station, registers::AL_STATUS),
            self.read_u16(station, registers::AL_STATUS_CODE),
        )
    }

    /// Read one EEPROM double word at `word_address`.
    pub fn eeprom_read(&mut self, station: u16, word_address: u16) -> u32 {
        let [lo, hi] = word_address.to_le_bytes();
        let control = [0x00, 0x01, lo, hi, 0x00, 0x00];
        let reply = self.datagram(
            Command::Fpwr,
            physical_address(station, registers::EEPROM_CONTROL),
            &control,
        );
        assert_eq!(reply.wkc, 1);
        let data = self.datagram(
            Command::Fprd,
            physical_address(station, registers::EEPROM_DATA),
            &[0; 4],
        );
        u32::from_le_bytes([data.payload[0], data.payload[1], data.payload[2], data.payload[3]])
    }

    /// Expedited SDO upload through the default mailbox windows.
    pub fn sdo_upload(&mut self, station: u16, index: u16, subindex: u8) -> Option<u32> {
        self.counter = self.counter % 7 + 1;
        let request = encode_upload_request(self.counter, index, subindex);
        let write = self.datagram(
            Command::Fpwr,
            physical_address(station, registers::DEFAULT_MAILBOX_RECV_OFFSET),
            &request,
        );
        assert_eq!(write.wkc, 1);
        let read = self.datagram(
            Command::Fprd,
            physical_address(station, registers::DEFAULT_MAILBOX_SEND_OFFSET),
            &[0; 16],
        );
        response_value(&read.payload)
    }

    pub fn link(&mut self) -> &mut MasterLink {
        &mut self.link
    }
}
