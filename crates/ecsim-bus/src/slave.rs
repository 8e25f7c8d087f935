//! Virtual EtherCAT slave controller.
//!
//! A [`VirtualSlave`] owns a 4 KiB register file overlaid with special
//! windows. Every access is routed through an ordered window table; the
//! first window that accepts the access handles it:
//!
//! | Window | Range | Access |
//! |---|---|---|
//! | EEPROM control | 0x0502, ≥6 bytes | write |
//! | EEPROM data | 0x0508, ≥4 bytes | read |
//! | Mailbox receive | SM0 (default 0x1000/512) | write |
//! | Mailbox send | SM1 (default 0x1200/512) | read |
//! | Sync-Manager config | 0x0800..0x0810 | write |
//! | Register file | 0x0000..0x1000 | read, write |
//!
//! Accesses no window accepts fail with [`AccessError::OutOfWindow`].

use crate::eeprom::Eeprom;
use crate::error::AccessError;
use crate::mailbox::{self, coe_service, sdo_request, sdo_response, MailboxHeader, SdoRequest};
use crate::profile::{DeviceProfile, GenericDevice};
use crate::registers::{self, dl_status};
use ecsim_common::state::{status_code, AlState, AL_ACK_BIT, AL_STATE_MASK};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use tracing::{debug, trace};

/// CoE identity object.
pub const OBJ_IDENTITY: u16 = 0x1018;

/// EtherCAT slave identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct SlaveIdentity {
    /// Vendor ID (0x1018:1).
    pub vendor_id: u32,
    /// Product code (0x1018:2).
    pub product_code: u32,
    /// Revision number (0x1018:3).
    pub revision: u32,
    /// Serial number (0x1018:4).
    pub serial: u32,
}

impl SlaveIdentity {
    /// Create a new slave identity.
    #[must_use]
    pub fn new(vendor_id: u32, product_code: u32, revision: u32, serial: u32) -> Self {
        Self {
            vendor_id,
            product_code,
            revision,
            serial,
        }
    }

    /// Identity object entry for a subindex.
    #[must_use]
    pub fn entry(&self, subindex: u8) -> Option<u32> {
        match subindex {
            0 => Some(4),
            1 => Some(self.vendor_id),
            2 => Some(self.product_code),
            3 => Some(self.revision),
            4 => Some(self.serial),
            _ => None,
        }
    }
}

impl std::fmt::Display for SlaveIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "V:{:#010x} P:{:#010x} R:{:#010x}",
            self.vendor_id, self.product_code, self.revision
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WindowKind {
    EepromControl,
    EepromData,
    MailboxRecv,
    MailboxSend,
    SyncManager,
    Registers,
}

/// How an access must relate to a window's range to be accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    /// Starts exactly at the range start.
    Anchored,
    /// Starts inside the range; may extend past it.
    StartsIn,
    /// Lies entirely inside the range.
    Within,
}

#[derive(Debug, Clone)]
struct Window {
    kind: WindowKind,
    range: Range<usize>,
    placement: Placement,
    access: Option<Access>,
    min_len: usize,
}

impl Window {
    fn accepts(&self, access: Access, start: usize, len: usize) -> bool {
        if self.access.is_some_and(|a| a != access) || len < self.min_len {
            return false;
        }
        let end = start + len;
        match self.placement {
            Placement::Anchored => start == self.range.start && end <= registers::REGISTER_FILE_SIZE,
            Placement::StartsIn => {
                self.range.contains(&start) && end <= registers::REGISTER_FILE_SIZE
            }
            Placement::Within => start >= self.range.start && end <= self.range.end,
        }
    }
}

/// A mailbox buffer mapped at a Sync-Manager configured offset.
#[derive(Debug, Clone)]
struct MailboxWindow {
    offset: u16,
    buffer: Vec<u8>,
}

impl MailboxWindow {
    fn new(offset: u16, size: u16) -> Self {
        Self {
            offset,
            buffer: vec![0; usize::from(size)],
        }
    }

    fn range(&self) -> Range<usize> {
        let start = usize::from(self.offset);
        start..start + self.buffer.len()
    }

    fn size(&self) -> u16 {
        u16::try_from(self.buffer.len()).unwrap_or(u16::MAX)
    }

    /// Move/resize the window; contents are cleared only on resize.
    fn reconfigure(&mut self, offset: u16, size: u16) -> bool {
        let changed = self.offset != offset || self.size() != size;
        self.offset = offset;
        if self.size() != size {
            self.buffer = vec![0; usize::from(size)];
        }
        changed
    }
}

/// Emulated EtherCAT slave controller.
#[derive(Debug)]
pub struct VirtualSlave {
    address: u16,
    identity: SlaveIdentity,
    name: String,
    online: bool,
    al_state: AlState,
    al_status_code: u16,
    ack_pending: bool,
    input_pdo_mapped: bool,
    registers: Vec<u8>,
    eeprom: Eeprom,
    mailbox_recv: MailboxWindow,
    mailbox_send: MailboxWindow,
    reply_pending: bool,
    profile: Box<dyn DeviceProfile>,
}

impl VirtualSlave {
    /// Create a slave without device objects.
    pub fn new(address: u16, identity: SlaveIdentity, name: impl Into<String>) -> Self {
        Self::with_profile(address, identity, name, Box::new(GenericDevice))
    }

    /// Create a slave whose object dictionary is extended by `profile`.
    pub fn with_profile(
        address: u16,
        identity: SlaveIdentity,
        name: impl Into<String>,
        profile: Box<dyn DeviceProfile>,
    ) -> Self {
        let input_pdo_mapped = profile.input_mapping_valid().unwrap_or(false);
        let mut slave = Self {
            address,
            identity,
            name: name.into(),
            online: true,
            al_state: AlState::Init,
            al_status_code: status_code::NONE,
            ack_pending: false,
            input_pdo_mapped,
            registers: vec![0; registers::REGISTER_FILE_SIZE],
            eeprom: Eeprom::new(&identity),
            mailbox_recv: MailboxWindow::new(
                registers::DEFAULT_MAILBOX_RECV_OFFSET,
                registers::DEFAULT_MAILBOX_SIZE,
            ),
            mailbox_send: MailboxWindow::new(
                registers::DEFAULT_MAILBOX_SEND_OFFSET,
                registers::DEFAULT_MAILBOX_SIZE,
            ),
            reply_pending: false,
            profile,
        };
        slave.put_u16(registers::STATION_ADDRESS, address);
        slave.sync_core_registers();
        slave.sync_sm_registers();
        slave
    }

    /// Configured station address.
    #[must_use]
    pub fn address(&self) -> u16 {
        self.address
    }

    /// Set the station address and its register copy.
    pub fn set_address(&mut self, address: u16) {
        self.address = address;
        self.put_u16(registers::STATION_ADDRESS, address);
    }

    /// Identity reported through 0x1018 and the EEPROM.
    #[must_use]
    pub fn identity(&self) -> &SlaveIdentity {
        &self.identity
    }

    /// Human-readable name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the slave takes part in bus traffic.
    #[must_use]
    pub fn online(&self) -> bool {
        self.online
    }

    /// Connect or disconnect the slave from the bus.
    pub fn set_online(&mut self, online: bool) {
        self.online = online;
        self.sync_core_registers();
    }

    /// Current AL state.
    #[must_use]
    pub fn al_state(&self) -> AlState {
        self.al_state
    }

    /// Force the AL state, bypassing the transition checks.
    pub fn set_al_state(&mut self, state: AlState) {
        self.al_state = state;
        self.sync_core_registers();
    }

    /// Last AL status code (0 = no error).
    #[must_use]
    pub fn al_status_code(&self) -> u16 {
        self.al_status_code
    }

    /// True while an AL error waits for acknowledgement.
    #[must_use]
    pub fn ack_pending(&self) -> bool {
        self.ack_pending
    }

    /// Whether the input PDOs are mapped (gates SAFE_OP and OP).
    #[must_use]
    pub fn input_pdo_mapped(&self) -> bool {
        self.input_pdo_mapped
    }

    /// Mark the input PDOs as mapped or unmapped.
    pub fn set_input_pdo_mapped(&mut self, mapped: bool) {
        self.input_pdo_mapped = mapped;
    }

    /// Re-read the mapping validity from the device profile.
    ///
    /// Needed after the profile's PDO configuration was changed directly
    /// instead of through SDO downloads.
    pub fn refresh_input_mapping(&mut self) {
        if let Some(valid) = self.profile.input_mapping_valid() {
            self.input_pdo_mapped = valid;
        }
    }

    /// True while a mailbox reply waits to be read.
    #[must_use]
    pub fn reply_pending(&self) -> bool {
        self.reply_pending
    }

    /// Mailbox-receive window as (offset, size).
    #[must_use]
    pub fn mailbox_recv_window(&self) -> (u16, u16) {
        (self.mailbox_recv.offset, self.mailbox_recv.size())
    }

    /// Mailbox-send window as (offset, size).
    #[must_use]
    pub fn mailbox_send_window(&self) -> (u16, u16) {
        (self.mailbox_send.offset, self.mailbox_send.size())
    }

    /// SII EEPROM image.
    #[must_use]
    pub fn eeprom(&self) -> &Eeprom {
        &self.eeprom
    }

    /// Device profile.
    #[must_use]
    pub fn profile(&self) -> &dyn DeviceProfile {
        self.profile.as_ref()
    }

    /// Device profile, mutable.
    pub fn profile_mut(&mut self) -> &mut dyn DeviceProfile {
        self.profile.as_mut()
    }

    /// Typed access to the device profile.
    #[must_use]
    pub fn profile_as<T: 'static>(&self) -> Option<&T> {
        self.profile.as_any().downcast_ref::<T>()
    }

    /// Typed mutable access to the device profile.
    pub fn profile_as_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.profile.as_any_mut().downcast_mut::<T>()
    }

    /// Current digital input bitfield, if the device has one.
    pub fn digital_inputs(&mut self) -> Option<u32> {
        self.profile.digital_inputs()
    }

    /// Read `out.len()` bytes starting at register `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::OutOfWindow`] if no window accepts the access.
    pub fn read(&mut self, offset: u16, out: &mut [u8]) -> Result<(), AccessError> {
        let start = usize::from(offset);
        match self.route(Access::Read, start, out.len()) {
            Some(WindowKind::EepromData) => {
                self.eeprom.read_data(out);
                Ok(())
            }
            Some(WindowKind::MailboxSend) => {
                let from = start - usize::from(self.mailbox_send.offset);
                out.copy_from_slice(&self.mailbox_send.buffer[from..from + out.len()]);
                if self.reply_pending {
                    trace!(station = self.address, "mailbox reply read");
                }
                self.reply_pending = false;
                self.sync_sm_status();
                Ok(())
            }
            Some(WindowKind::Registers) => {
                out.copy_from_slice(&self.registers[start..start + out.len()]);
                Ok(())
            }
            _ => Err(AccessError::OutOfWindow {
                offset,
                len: out.len(),
            }),
        }
    }

    /// Write `data` starting at register `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::OutOfWindow`] if no window accepts the access.
    pub fn write(&mut self, offset: u16, data: &[u8]) -> Result<(), AccessError> {
        let start = usize::from(offset);
        match self.route(Access::Write, start, data.len()) {
            Some(WindowKind::EepromControl) => {
                self.eeprom.control_write(data);
                Ok(())
            }
            Some(WindowKind::MailboxRecv) => {
                let at = start - usize::from(self.mailbox_recv.offset);
                self.mailbox_recv.buffer[at..at + data.len()].copy_from_slice(data);
                if self.mailbox_message_complete(at, data.len()) {
                    self.process_mailbox();
                }
                Ok(())
            }
            Some(WindowKind::SyncManager) => {
                self.registers[start..start + data.len()].copy_from_slice(data);
                self.apply_sm_config();
                Ok(())
            }
            Some(WindowKind::Registers) => {
                self.registers[start..start + data.len()].copy_from_slice(data);
                self.after_register_write(start, start + data.len());
                Ok(())
            }
            _ => Err(AccessError::OutOfWindow {
                offset,
                len: data.len(),
            }),
        }
    }

    /// Whether a write of `len` bytes at `offset` would be accepted.
    ///
    /// Resolves the window only; nothing is written and no side effect runs.
    #[must_use]
    pub fn accepts_write(&self, offset: u16, len: usize) -> bool {
        self.route(Access::Write, usize::from(offset), len).is_some()
    }

    fn windows(&self) -> [Window; 6] {
        let eeprom_control = usize::from(registers::EEPROM_CONTROL);
        let eeprom_data = usize::from(registers::EEPROM_DATA);
        let sm = usize::from(registers::SYNC_MANAGER);
        let sm_len = usize::from(registers::SM_DESCRIPTOR_SIZE * registers::SM_MAILBOX_CHANNELS);
        [
            Window {
                kind: WindowKind::EepromControl,
                range: eeprom_control..eeprom_control + 6,
                placement: Placement::Anchored,
                access: Some(Access::Write),
                min_len: 6,
            },
            Window {
                kind: WindowKind::EepromData,
                range: eeprom_data..eeprom_data + 4,
                placement: Placement::Anchored,
                access: Some(Access::Read),
                min_len: 4,
            },
            Window {
                kind: WindowKind::MailboxRecv,
                range: self.mailbox_recv.range(),
                placement: Placement::Within,
                access: Some(Access::Write),
                min_len: 0,
            },
            Window {
                kind: WindowKind::MailboxSend,
                range: self.mailbox_send.range(),
                placement: Placement::Within,
                access: Some(Access::Read),
                min_len: 0,
            },
            Window {
                kind: WindowKind::SyncManager,
                range: sm..sm + sm_len,
                placement: Placement::StartsIn,
                access: Some(Access::Write),
                min_len: 1,
            },
            Window {
                kind: WindowKind::Registers,
                range: 0..registers::REGISTER_FILE_SIZE,
                placement: Placement::Within,
                access: None,
                min_len: 0,
            },
        ]
    }

    fn route(&self, access: Access, start: usize, len: usize) -> Option<WindowKind> {
        self.windows()
            .into_iter()
            .find(|w| w.accepts(access, start, len))
            .map(|w| w.kind)
    }

    fn after_register_write(&mut self, start: usize, end: usize) {
        let covers = |reg: u16, width: usize| {
            let reg = usize::from(reg);
            start <= reg && end >= reg + width
        };
        if covers(registers::STATION_ADDRESS, 2) {
            self.address = self.get_u16(registers::STATION_ADDRESS);
            debug!(station = self.address, "station address configured");
        }
        let control = usize::from(registers::AL_CONTROL);
        if start <= control && end > control {
            let value = self.get_u16(registers::AL_CONTROL);
            self.handle_al_control(value);
        }
    }

    fn handle_al_control(&mut self, control: u16) {
        #[allow(clippy::cast_possible_truncation)]
        let requested_code = (control & AL_STATE_MASK) as u8;
        let ack = control & u16::from(AL_ACK_BIT) != 0;
        trace!(station = self.address, control, current = %self.al_state, "AL control write");

        if ack {
            self.ack_pending = false;
            self.al_status_code = status_code::NONE;
        }

        if requested_code == 0 {
            self.sync_core_registers();
            return;
        }

        let Some(requested) = AlState::from_code(requested_code) else {
            self.signal_error(status_code::INVALID_TRANSITION);
            return;
        };

        if requested == self.al_state {
            self.sync_core_registers();
            return;
        }

        if ack && requested.rank() > 0 && requested.rank() < self.al_state.rank() {
            debug!(station = self.address, requested = %requested, "acknowledge-only AL control write");
            self.sync_core_registers();
            return;
        }

        if requested == AlState::Boot {
            self.signal_error(status_code::BOOT_NOT_SUPPORTED);
            return;
        }

        if !self.al_state.can_transition_to(requested) {
            self.signal_error(status_code::INVALID_TRANSITION);
            return;
        }

        if requested.requires_process_data() && !self.input_pdo_mapped {
            self.signal_error(status_code::INPUTS_NOT_MAPPED);
            return;
        }

        let previous = self.al_state;
        self.al_state = requested;
        self.al_status_code = status_code::NONE;
        self.ack_pending = false;
        if requested == AlState::Init {
            self.reply_pending = false;
            self.sync_sm_status();
        }
        self.sync_core_registers();
        debug!(station = self.address, from = %previous, to = %requested, "AL state change");
    }

    fn signal_error(&mut self, code: u16) {
        self.al_status_code = code;
        self.ack_pending = true;
        self.sync_core_registers();
        debug!(
            station = self.address,
            state = %self.al_state,
            code = %format!("{code:#06x}"),
            "AL state change rejected"
        );
    }

    fn mailbox_message_complete(&self, at: usize, len: usize) -> bool {
        if at + len == self.mailbox_recv.buffer.len() {
            return true;
        }
        at == 0
            && MailboxHeader::from_bytes(&self.mailbox_recv.buffer)
                .is_some_and(|h| h.length > 0 && len >= h.message_size())
    }

    fn process_mailbox(&mut self) {
        let reply = match SdoRequest::parse(&self.mailbox_recv.buffer) {
            Some(req)
                if req.service == coe_service::SDO_REQUEST
                    && req.command == sdo_request::UPLOAD =>
            {
                let value = self.sdo_upload(req.index, req.subindex).unwrap_or(0);
                trace!(station = self.address, index = req.index, sub = req.subindex, value, "SDO upload");
                mailbox::encode_sdo_response(
                    req.counter,
                    sdo_response::UPLOAD,
                    req.index,
                    req.subindex,
                    value,
                )
            }
            Some(req)
                if req.service == coe_service::SDO_REQUEST
                    && req.command == sdo_request::DOWNLOAD =>
            {
                let accepted =
                    self.profile
                        .sdo_download(req.index, req.subindex, req.value(), req.size);
                if accepted {
                    self.refresh_input_mapping();
                }
                trace!(station = self.address, index = req.index, sub = req.subindex, accepted, "SDO download");
                mailbox::encode_sdo_response(
                    req.counter,
                    sdo_response::DOWNLOAD,
                    req.index,
                    req.subindex,
                    0,
                )
            }
            Some(req) => mailbox::encode_sdo_response(
                req.counter,
                sdo_response::UPLOAD,
                req.index,
                req.subindex,
                0,
            ),
            None => {
                let request = &self.mailbox_recv.buffer;
                let counter = MailboxHeader::from_bytes(request).map_or(0, |h| h.counter);
                let index = match (request.get(9), request.get(10)) {
                    (Some(&lo), Some(&hi)) => u16::from_le_bytes([lo, hi]),
                    _ => 0,
                };
                let subindex = request.get(11).copied().unwrap_or(0);
                mailbox::encode_sdo_response(counter, sdo_response::UPLOAD, index, subindex, 0)
            }
        };

        self.mailbox_send.buffer.fill(0);
        let n = reply.len().min(self.mailbox_send.buffer.len());
        self.mailbox_send.buffer[..n].copy_from_slice(&reply[..n]);
        self.reply_pending = true;
        self.sync_sm_status();
    }

    fn sdo_upload(&mut self, index: u16, subindex: u8) -> Option<u32> {
        if index == OBJ_IDENTITY {
            if let Some(value) = self.identity.entry(subindex) {
                return Some(value);
            }
        }
        self.profile.sdo_upload(index, subindex)
    }

    fn apply_sm_config(&mut self) {
        let recv = self.sm_descriptor(0);
        let send = self.sm_descriptor(1);
        let recv_changed = self.mailbox_recv.reconfigure(recv.0, recv.1);
        let send_changed = self.mailbox_send.reconfigure(send.0, send.1);
        if send_changed && self.reply_pending {
            debug!(station = self.address, "pending mailbox reply dropped by SM1 reconfiguration");
            self.reply_pending = false;
        }
        if recv_changed || send_changed {
            debug!(
                station = self.address,
                recv_offset = recv.0,
                recv_size = recv.1,
                send_offset = send.0,
                send_size = send.1,
                "mailbox windows reconfigured"
            );
        }
        self.sync_sm_status();
    }

    /// (start, length) of a Sync-Manager descriptor.
    fn sm_descriptor(&self, channel: u16) -> (u16, u16) {
        let base = registers::SYNC_MANAGER + channel * registers::SM_DESCRIPTOR_SIZE;
        (self.get_u16(base), self.get_u16(base + 2))
    }

    fn sync_core_registers(&mut self) {
        let dl = if self.online {
            dl_status::PDI_OPERATIONAL | dl_status::LINK_PORT0 | dl_status::COM_PORT0
        } else {
            0
        };
        self.put_u16(registers::DL_STATUS, dl);

        let mut status = u16::from(self.al_state.code());
        if self.ack_pending {
            status |= u16::from(AL_ACK_BIT);
        }
        self.put_u16(registers::AL_STATUS, status);
        self.put_u16(registers::AL_STATUS_CODE, self.al_status_code);
    }

    fn sync_sm_registers(&mut self) {
        let (recv_offset, recv_size) = self.mailbox_recv_window();
        let (send_offset, send_size) = self.mailbox_send_window();
        self.put_u16(registers::SYNC_MANAGER_0, recv_offset);
        self.put_u16(registers::SYNC_MANAGER_0 + 2, recv_size);
        self.put_u16(registers::SYNC_MANAGER_1, send_offset);
        self.put_u16(registers::SYNC_MANAGER_1 + 2, send_size);
        self.sync_sm_status();
    }

    fn sync_sm_status(&mut self) {
        self.registers[usize::from(registers::SYNC_MANAGER_0 + registers::SM_STATUS)] = 0;
        self.registers[usize::from(registers::SYNC_MANAGER_1 + registers::SM_STATUS)] =
            if self.reply_pending {
                registers::SM_STATUS_MAILBOX_FULL
            } else {
                0
            };
    }

    fn get_u16(&self, reg: u16) -> u16 {
        let at = usize::from(reg);
        u16::from_le_bytes([self.registers[at], self.registers[at + 1]])
    }

    fn put_u16(&mut self, reg: u16, value: u16) {
        let at = usize::from(reg);
        self.registers[at..at + 2].copy_from_slice(&value.to_le_bytes());
    }
}
