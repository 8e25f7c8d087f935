//! Virtual EtherCAT bus.
//!
//! [`NetworkSimulator`] holds the slave registry (registry index = bus
//! position), the logical process image shared by all slaves, the optional
//! input mappings that project device bitfields into that image, and a
//! latency-delayed frame queue for in-process transports.
//!
//! All mutable state sits behind one mutex held for the full duration of
//! each public operation. Slaves have their own mutex; the lock order is
//! always simulator first, then slave.

use crate::error::AccessError;
use crate::slave::{SlaveIdentity, VirtualSlave};
use ecsim_common::config::DEFAULT_LOGICAL_MEMORY_SIZE;
use ecsim_common::error::{SimError, SimResult};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Slave handle shared between the registry and its users.
pub type SharedSlave = Arc<Mutex<VirtualSlave>>;

/// Lock a slave, recovering from poisoning.
pub fn lock_slave(slave: &SharedSlave) -> MutexGuard<'_, VirtualSlave> {
    slave.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
struct InputMapping {
    slave: Weak<Mutex<VirtualSlave>>,
    logical_address: u32,
    width: usize,
}

#[derive(Debug)]
struct QueuedFrame {
    frame: Vec<u8>,
    ready_at: Instant,
}

#[derive(Debug)]
struct SimState {
    slaves: Vec<SharedSlave>,
    link_up: bool,
    latency: Duration,
    queue: VecDeque<QueuedFrame>,
    logical: Vec<u8>,
    input_maps: Vec<InputMapping>,
}

impl SimState {
    fn by_station(&self, station: u16) -> Result<&SharedSlave, AccessError> {
        self.slaves
            .iter()
            .find(|s| lock_slave(s).address() == station)
            .ok_or(AccessError::UnknownStation(station))
    }

    fn by_index(&self, index: usize) -> Result<&SharedSlave, AccessError> {
        self.slaves
            .get(index)
            .ok_or(AccessError::UnknownPosition(index))
    }

    fn logical_range(&self, address: u32, len: usize) -> Result<std::ops::Range<usize>, AccessError> {
        let size = self.logical.len();
        let start = usize::try_from(address).unwrap_or(usize::MAX);
        match start.checked_add(len) {
            Some(end) if end <= size => Ok(start..end),
            _ => Err(AccessError::LogicalOutOfBounds { address, len, size }),
        }
    }
}

fn online(slave: &mut VirtualSlave) -> Result<&mut VirtualSlave, AccessError> {
    if slave.online() {
        Ok(slave)
    } else {
        Err(AccessError::Offline(slave.address()))
    }
}

/// Read previous content into `data`, then write the original `data`.
///
/// The write decides the outcome; a failed read leaves `data` unchanged.
/// A write no window accepts fails before the read runs, so a failed
/// exchange never consumes a mailbox reply.
fn exchange(slave: &mut VirtualSlave, offset: u16, data: &mut [u8]) -> Result<(), AccessError> {
    if !slave.accepts_write(offset, data.len()) {
        return Err(AccessError::OutOfWindow {
            offset,
            len: data.len(),
        });
    }
    let mut previous = vec![0u8; data.len()];
    let read_ok = slave.read(offset, &mut previous).is_ok();
    slave.write(offset, data)?;
    if read_ok {
        data.copy_from_slice(&previous);
    }
    Ok(())
}

/// The virtual EtherCAT segment.
#[derive(Debug)]
pub struct NetworkSimulator {
    state: Mutex<SimState>,
}

impl Default for NetworkSimulator {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkSimulator {
    /// Create an empty bus with the default 16 KiB logical image and the link up.
    #[must_use]
    pub fn new() -> Self {
        Self::with_logical_memory(DEFAULT_LOGICAL_MEMORY_SIZE)
    }

    /// Create an empty bus with a logical image of `size` bytes.
    #[must_use]
    pub fn with_logical_memory(size: usize) -> Self {
        Self {
            state: Mutex::new(SimState {
                slaves: Vec::new(),
                link_up: true,
                latency: Duration::ZERO,
                queue: VecDeque::new(),
                logical: vec![0; size],
                input_maps: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a slave at the next bus position.
    pub fn add_virtual_slave(&self, slave: VirtualSlave) -> SharedSlave {
        let shared = Arc::new(Mutex::new(slave));
        self.add_shared_slave(Arc::clone(&shared));
        shared
    }

    /// Append an already shared slave at the next bus position.
    pub fn add_shared_slave(&self, slave: SharedSlave) {
        let station = lock_slave(&slave).address();
        let position = {
            let mut state = self.lock();
            state.slaves.push(slave);
            state.slaves.len() - 1
        };
        trace!(position, station, "slave added");
    }

    /// Remove every slave and every input mapping.
    pub fn clear_slaves(&self) {
        let mut state = self.lock();
        state.slaves.clear();
        state.input_maps.clear();
    }

    /// Grow or shrink the registry to `count` generic slaves.
    ///
    /// New slaves get station addresses `position + 1`; shrinking drops the
    /// slaves at the end of the bus.
    pub fn set_virtual_slave_count(&self, count: usize) {
        {
            let mut state = self.lock();
            if count < state.slaves.len() {
                state.slaves.truncate(count);
            }
            while state.slaves.len() < count {
                let position = state.slaves.len();
                let address = u16::try_from(position + 1).unwrap_or(u16::MAX);
                let slave = VirtualSlave::new(address, SlaveIdentity::default(), format!("stub{position}"));
                state.slaves.push(Arc::new(Mutex::new(slave)));
            }
        }
        debug!(count, "virtual slave count set");
    }

    /// Number of slaves on the bus.
    #[must_use]
    pub fn slave_count(&self) -> usize {
        self.lock().slaves.len()
    }

    /// Number of slaves currently online.
    #[must_use]
    pub fn online_slave_count(&self) -> usize {
        self.lock()
            .slaves
            .iter()
            .filter(|s| lock_slave(s).online())
            .count()
    }

    /// Slave at bus position `index`.
    #[must_use]
    pub fn slave(&self, index: usize) -> Option<SharedSlave> {
        self.lock().slaves.get(index).cloned()
    }

    /// Slave answering to station address `station`.
    #[must_use]
    pub fn slave_by_station(&self, station: u16) -> Option<SharedSlave> {
        self.lock().by_station(station).ok().cloned()
    }

    /// Read registers of the slave with station address `station`.
    ///
    /// # Errors
    ///
    /// Fails if no online slave has the address or the register access fails.
    pub fn read_from_slave(&self, station: u16, offset: u16, out: &mut [u8]) -> Result<(), AccessError> {
        let state = self.lock();
        let mut slave = lock_slave(state.by_station(station)?);
        online(&mut slave)?.read(offset, out)
    }

    /// Write registers of the slave with station address `station`.
    ///
    /// # Errors
    ///
    /// Fails if no online slave has the address or the register access fails.
    pub fn write_to_slave(&self, station: u16, offset: u16, data: &[u8]) -> Result<(), AccessError> {
        let state = self.lock();
        let mut slave = lock_slave(state.by_station(station)?);
        online(&mut slave)?.write(offset, data)
    }

    /// Read-then-write registers of the slave with station address `station`.
    ///
    /// On success `data` holds the previous register content.
    ///
    /// # Errors
    ///
    /// Fails if no online slave has the address or the write fails.
    pub fn exchange_with_slave(
        &self,
        station: u16,
        offset: u16,
        data: &mut [u8],
    ) -> Result<(), AccessError> {
        let state = self.lock();
        let mut slave = lock_slave(state.by_station(station)?);
        exchange(online(&mut slave)?, offset, data)
    }

    /// Read registers of the slave at bus position `index`.
    ///
    /// # Errors
    ///
    /// Fails if the position is empty, the slave is offline, or the access fails.
    pub fn read_from_slave_by_index(
        &self,
        index: usize,
        offset: u16,
        out: &mut [u8],
    ) -> Result<(), AccessError> {
        let state = self.lock();
        let mut slave = lock_slave(state.by_index(index)?);
        online(&mut slave)?.read(offset, out)
    }

    /// Write registers of the slave at bus position `index`.
    ///
    /// # Errors
    ///
    /// Fails if the position is empty, the slave is offline, or the access fails.
    pub fn write_to_slave_by_index(
        &self,
        index: usize,
        offset: u16,
        data: &[u8],
    ) -> Result<(), AccessError> {
        let state = self.lock();
        let mut slave = lock_slave(state.by_index(index)?);
        online(&mut slave)?.write(offset, data)
    }

    /// Read-then-write registers of the slave at bus position `index`.
    ///
    /// # Errors
    ///
    /// Fails if the position is empty, the slave is offline, or the write fails.
    pub fn exchange_with_slave_by_index(
        &self,
        index: usize,
        offset: u16,
        data: &mut [u8],
    ) -> Result<(), AccessError> {
        let state = self.lock();
        let mut slave = lock_slave(state.by_index(index)?);
        exchange(online(&mut slave)?, offset, data)
    }

    /// Write to every online slave; returns how many accepted the write.
    pub fn broadcast_write(&self, offset: u16, data: &[u8]) -> usize {
        let state = self.lock();
        state
            .slaves
            .iter()
            .filter(|s| {
                let mut slave = lock_slave(s);
                slave.online() && slave.write(offset, data).is_ok()
            })
            .count()
    }

    /// Size of the logical process image.
    #[must_use]
    pub fn logical_memory_size(&self) -> usize {
        self.lock().logical.len()
    }

    /// Read from the logical process image.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::LogicalOutOfBounds`] if the range exceeds the image.
    pub fn read_logical(&self, address: u32, out: &mut [u8]) -> Result<(), AccessError> {
        let state = self.lock();
        let range = state.logical_range(address, out.len())?;
        out.copy_from_slice(&state.logical[range]);
        Ok(())
    }

    /// Write to the logical process image.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::LogicalOutOfBounds`] if the range exceeds the image.
    pub fn write_logical(&self, address: u32, data: &[u8]) -> Result<(), AccessError> {
        let mut state = self.lock();
        let range = state.logical_range(address, data.len())?;
        state.logical[range].copy_from_slice(data);
        Ok(())
    }

    /// Swap `data` with the logical image content at `address`.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::LogicalOutOfBounds`] if the range exceeds the image.
    pub fn exchange_logical(&self, address: u32, data: &mut [u8]) -> Result<(), AccessError> {
        let mut state = self.lock();
        let range = state.logical_range(address, data.len())?;
        state.logical[range].swap_with_slice(data);
        Ok(())
    }

    /// Bring the link up or down.
    pub fn set_link_up(&self, up: bool) {
        self.lock().link_up = up;
        debug!(up, "link state changed");
    }

    /// Whether the link is up.
    #[must_use]
    pub fn is_link_up(&self) -> bool {
        self.lock().link_up
    }

    /// Delay applied to frames entering the queue.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    /// Current frame latency.
    #[must_use]
    pub fn latency(&self) -> Duration {
        self.lock().latency
    }

    /// Enqueue a frame, deliverable after the configured latency.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::LinkDown`] if the link is down.
    pub fn send_frame(&self, frame: &[u8]) -> SimResult<()> {
        let mut state = self.lock();
        if !state.link_up {
            return Err(SimError::LinkDown);
        }
        let ready_at = Instant::now() + state.latency;
        state.queue.push_back(QueuedFrame {
            frame: frame.to_vec(),
            ready_at,
        });
        Ok(())
    }

    /// Dequeue the oldest frame if its latency has elapsed.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::LinkDown`] if the link is down.
    pub fn receive_frame(&self) -> SimResult<Option<Vec<u8>>> {
        let mut state = self.lock();
        if !state.link_up {
            return Err(SimError::LinkDown);
        }
        let ready = state
            .queue
            .front()
            .is_some_and(|head| head.ready_at <= Instant::now());
        Ok(if ready {
            state.queue.pop_front().map(|q| q.frame)
        } else {
            None
        })
    }

    /// Number of frames waiting in the queue.
    #[must_use]
    pub fn queued_frames(&self) -> usize {
        self.lock().queue.len()
    }

    /// Project `slave`'s digital inputs into `width` bytes at `logical_address`.
    ///
    /// Also marks the slave's inputs as mapped. The image is refreshed by
    /// [`run_once`](Self::run_once).
    pub fn map_digital_inputs(&self, slave: &SharedSlave, logical_address: u32, width: usize) {
        {
            let mut state = self.lock();
            lock_slave(slave).set_input_pdo_mapped(true);
            state.input_maps.push(InputMapping {
                slave: Arc::downgrade(slave),
                logical_address,
                width,
            });
        }
        debug!(logical_address, width, "digital inputs mapped");
    }

    /// Remove every input mapping.
    pub fn clear_input_mappings(&self) {
        self.lock().input_maps.clear();
    }

    /// Run one simulation step: refresh every mapped input in the logical image.
    ///
    /// Mappings whose slave was dropped are discarded. Returns the number of
    /// mappings projected.
    pub fn run_once(&self) -> usize {
        let mut guard = self.lock();
        let state = &mut *guard;
        state.input_maps.retain(|m| m.slave.strong_count() > 0);

        let mut projected = 0;
        for mapping in &state.input_maps {
            let Some(slave) = mapping.slave.upgrade() else {
                continue;
            };
            let Some(bits) = lock_slave(&slave).digital_inputs() else {
                continue;
            };
            let bytes = bits.to_le_bytes();
            let start = usize::try_from(mapping.logical_address).unwrap_or(usize::MAX);
            for i in 0..mapping.width {
                let Some(cell) = start.checked_add(i).and_then(|at| state.logical.get_mut(at)) else {
                    break;
                };
                *cell = bytes.get(i).copied().unwrap_or(0);
            }
            projected += 1;
        }
        projected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers;

    #[test]
    fn test_slave_count_assigns_addresses() {
        let sim = NetworkSimulator::new();
        sim.set_virtual_slave_count(3);
        assert_eq!(sim.slave_count(), 3);
        for i in 0..3 {
            let slave = sim.slave(i).unwrap();
            assert_eq!(lock_slave(&slave).address(), u16::try_from(i + 1).unwrap());
        }
        sim.set_virtual_slave_count(1);
        assert_eq!(sim.slave_count(), 1);
        assert_eq!(sim.online_slave_count(), 1);
    }

    #[test]
    fn test_station_and_index_lookup() {
        let sim = NetworkSimulator::new();
        sim.set_virtual_slave_count(2);
        sim.write_to_slave(2, 0x0100, &[0xAB]).unwrap();

        let mut buf = [0u8; 1];
        sim.read_from_slave_by_index(1, 0x0100, &mut buf).unwrap();
        assert_eq!(buf, [0xAB]);

        assert_eq!(
            sim.read_from_slave(9, 0x0100, &mut buf),
            Err(AccessError::UnknownStation(9))
        );
        assert_eq!(
            sim.write_to_slave_by_index(5, 0x0100, &buf),
            Err(AccessError::UnknownPosition(5))
        );
    }

    #[test]
    fn test_offline_slave_does_not_answer() {
        let sim = NetworkSimulator::new();
        sim.set_virtual_slave_count(2);
        lock_slave(&sim.slave(0).unwrap()).set_online(false);

        assert_eq!(sim.online_slave_count(), 1);
        let mut buf = [0u8; 2];
        assert_eq!(
            sim.read_from_slave(1, registers::AL_STATUS, &mut buf),
            Err(AccessError::Offline(1))
        );
        assert_eq!(sim.broadcast_write(0x0100, &[1]), 1);
    }

    #[test]
    fn test_exchange_returns_previous_content() {
        let sim = NetworkSimulator::new();
        sim.set_virtual_slave_count(1);
        sim.write_to_slave(1, 0x0200, &[1, 2]).unwrap();

        let mut data = [9, 9];
        sim.exchange_with_slave(1, 0x0200, &mut data).unwrap();
        assert_eq!(data, [1, 2]);

        let mut now = [0u8; 2];
        sim.read_from_slave(1, 0x0200, &mut now).unwrap();
        assert_eq!(now, [9, 9]);
    }

    #[test]
    fn test_rejected_exchange_keeps_mailbox_reply() {
        use crate::mailbox::encode_upload_request;

        let sim = NetworkSimulator::new();
        sim.set_virtual_slave_count(1);
        sim.write_to_slave(1, registers::DEFAULT_MAILBOX_RECV_OFFSET, &encode_upload_request(1, 0x1018, 1))
            .unwrap();
        let slave = sim.slave(0).unwrap();
        assert!(lock_slave(&slave).reply_pending());

        let mut data = [0xAAu8; 16];
        assert!(matches!(
            sim.exchange_with_slave(1, registers::DEFAULT_MAILBOX_SEND_OFFSET, &mut data),
            Err(AccessError::OutOfWindow { .. })
        ));
        assert_eq!(data, [0xAA; 16]);
        assert!(lock_slave(&slave).reply_pending());

        assert!(sim
            .exchange_with_slave_by_index(0, registers::DEFAULT_MAILBOX_SEND_OFFSET, &mut data)
            .is_err());
        assert!(lock_slave(&slave).reply_pending());
    }

    #[test]
    fn test_logical_bounds() {
        let sim = NetworkSimulator::with_logical_memory(16);
        sim.write_logical(12, &[1, 2, 3, 4]).unwrap();
        let mut buf = [0u8; 4];
        sim.read_logical(12, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);

        assert!(sim.write_logical(13, &[0; 4]).is_err());
        assert!(sim.read_logical(u32::MAX, &mut buf).is_err());

        let mut swap = [7, 7, 7, 7];
        sim.exchange_logical(12, &mut swap).unwrap();
        assert_eq!(swap, [1, 2, 3, 4]);
        sim.read_logical(12, &mut buf).unwrap();
        assert_eq!(buf, [7, 7, 7, 7]);
    }

    #[test]
    fn test_frame_queue_requires_link() {
        let sim = NetworkSimulator::new();
        sim.set_link_up(false);
        assert_eq!(sim.send_frame(&[1]), Err(SimError::LinkDown));
        assert_eq!(sim.receive_frame(), Err(SimError::LinkDown));
    }

    #[test]
    fn test_frame_queue_is_fifo() {
        let sim = NetworkSimulator::new();
        sim.send_frame(&[1]).unwrap();
        sim.send_frame(&[2]).unwrap();
        assert_eq!(sim.receive_frame().unwrap(), Some(vec![1]));
        assert_eq!(sim.receive_frame().unwrap(), Some(vec![2]));
        assert_eq!(sim.receive_frame().unwrap(), None);
    }

    #[test]
    fn test_frame_latency() {
        let sim = NetworkSimulator::new();
        sim.set_latency(Duration::from_millis(40));
        sim.send_frame(&[1]).unwrap();
        assert_eq!(sim.receive_frame().unwrap(), None);
        assert_eq!(sim.queued_frames(), 1);
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(sim.receive_frame().unwrap(), Some(vec![1]));
        assert_eq!(sim.queued_frames(), 0);
    }

    #[test]
    fn test_mapping_marks_slave_and_drops_dead_entries() {
        let sim = NetworkSimulator::new();
        let slave = sim.add_virtual_slave(VirtualSlave::new(1, SlaveIdentity::default(), "s"));
        sim.map_digital_inputs(&slave, 0, 1);
        assert!(lock_slave(&slave).input_pdo_mapped());
        // generic slaves have no inputs to project
        assert_eq!(sim.run_once(), 0);

        sim.clear_slaves();
        drop(slave);
        assert_eq!(sim.run_once(), 0);
    }
}
