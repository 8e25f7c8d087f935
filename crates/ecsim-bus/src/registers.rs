//! ESC register map.
//!
//! Only the registers the simulated slave gives meaning to are listed;
//! everything else in the 4 KiB register file is plain storage.

/// Size of the ESC register file.
pub const REGISTER_FILE_SIZE: usize = 0x1000;

/// Configured station address (u16).
pub const STATION_ADDRESS: u16 = 0x0010;
/// Data-link status (u16).
pub const DL_STATUS: u16 = 0x0110;
/// AL control, written by the master (u16).
pub const AL_CONTROL: u16 = 0x0120;
/// AL status, state plus error indication bit (u16).
pub const AL_STATUS: u16 = 0x0130;
/// AL status code (u16).
pub const AL_STATUS_CODE: u16 = 0x0134;

/// SII EEPROM control/status; a write carries command and word address.
pub const EEPROM_CONTROL: u16 = 0x0502;
/// SII EEPROM data; a read returns two words.
pub const EEPROM_DATA: u16 = 0x0508;

/// First Sync-Manager channel.
pub const SYNC_MANAGER: u16 = 0x0800;
/// SM0, mailbox master → slave.
pub const SYNC_MANAGER_0: u16 = 0x0800;
/// SM1, mailbox slave → master.
pub const SYNC_MANAGER_1: u16 = 0x0808;
/// Size of one Sync-Manager descriptor.
pub const SM_DESCRIPTOR_SIZE: u16 = 8;
/// Number of descriptors that configure the mailbox windows.
pub const SM_MAILBOX_CHANNELS: u16 = 2;
/// Offset of the status byte inside a descriptor.
pub const SM_STATUS: u16 = 5;
/// SM status bit: mailbox full.
pub const SM_STATUS_MAILBOX_FULL: u8 = 0x08;

/// Default mailbox-receive window (master → slave).
pub const DEFAULT_MAILBOX_RECV_OFFSET: u16 = 0x1000;
/// Default mailbox-send window (slave → master).
pub const DEFAULT_MAILBOX_SEND_OFFSET: u16 = 0x1200;
/// Default size of both mailbox windows.
pub const DEFAULT_MAILBOX_SIZE: u16 = 0x0200;

/// DL status bits reported while the slave is online.
pub mod dl_status {
    /// PDI operational.
    pub const PDI_OPERATIONAL: u16 = 1 << 0;
    /// Physical link on port 0.
    pub const LINK_PORT0: u16 = 1 << 4;
    /// Communication established on port 0.
    pub const COM_PORT0: u16 = 1 << 9;
}
