//! Datagram dispatcher.
//!
//! [`dispatch_frame`] walks every datagram of a frame in wire order, executes
//! it against a [`NetworkSimulator`] and writes the working counter back into
//! the buffer. Read payloads are filled in place; the datagram layout is never
//! changed.

use crate::frame::{Command, DatagramMut, Frame, ETHERCAT_ETHERTYPE};
use crate::simulator::NetworkSimulator;
use tracing::{trace, warn};

/// Outcome of dispatching one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Number of datagrams executed.
    pub datagrams: usize,
    /// Sum of the working counters written back.
    pub wkc_total: u32,
    /// Datagrams that nothing answered (WKC 0).
    pub zero_wkc: usize,
    /// Whether dispatch stopped at a datagram that did not fit the buffer.
    pub truncated: bool,
}

/// Execute every datagram in `frame` against `sim`, in place.
///
/// Buffers too short to carry the Ethernet and EtherCAT headers are left
/// untouched and produce an empty summary.
pub fn dispatch_frame(sim: &NetworkSimulator, frame: &mut [u8]) -> DispatchSummary {
    let mut summary = DispatchSummary::default();
    let mut frame = match Frame::new(frame) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, "frame dropped before dispatch");
            return summary;
        }
    };
    frame.set_ethertype(ETHERCAT_ETHERTYPE);

    let mut datagrams = frame.datagrams();
    for mut datagram in datagrams.by_ref() {
        let wkc = execute(sim, &mut datagram);
        datagram.set_wkc(wkc);
        trace!(
            command = datagram.command_byte(),
            index = datagram.index(),
            address = %format!("{:#010x}", datagram.address()),
            len = datagram.data_len(),
            wkc,
            "datagram"
        );
        summary.datagrams += 1;
        summary.wkc_total += u32::from(wkc);
        if wkc == 0 {
            summary.zero_wkc += 1;
        }
    }
    summary.truncated = datagrams.truncated();
    if summary.truncated {
        warn!(executed = summary.datagrams, "truncated datagram, dispatch stopped");
    }
    summary
}

/// Bus index addressed by an auto-increment position.
fn position_index(adp: u16) -> usize {
    let p = if adp & 0x8000 == 0 { adp } else { 0u16.wrapping_sub(adp) };
    usize::from(p)
}

fn counted(ok: bool) -> u16 {
    u16::from(ok)
}

fn saturate(n: usize) -> u16 {
    u16::try_from(n).unwrap_or(u16::MAX)
}

fn execute(sim: &NetworkSimulator, dg: &mut DatagramMut<'_>) -> u16 {
    let Some(command) = dg.command() else {
        return counted(sim.online_slave_count() > 0);
    };
    let adp = dg.adp();
    let ado = dg.ado();
    let logical = dg.address();

    match command {
        Command::Nop => 0,
        Command::Brd | Command::Armw | Command::Frmw => saturate(sim.online_slave_count().max(1)),
        Command::Bwr | Command::Brw => saturate(sim.broadcast_write(ado, dg.payload())),
        Command::Fprd => counted(sim.read_from_slave(adp, ado, dg.payload_mut()).is_ok()),
        Command::Fpwr => counted(sim.write_to_slave(adp, ado, dg.payload()).is_ok()),
        Command::Fprw => counted(sim.exchange_with_slave(adp, ado, dg.payload_mut()).is_ok()),
        Command::Aprd => counted(
            sim.read_from_slave_by_index(position_index(adp), ado, dg.payload_mut())
                .is_ok(),
        ),
        Command::Apwr => counted(
            sim.write_to_slave_by_index(position_index(adp), ado, dg.payload())
                .is_ok(),
        ),
        Command::Aprw => counted(
            sim.exchange_with_slave_by_index(position_index(adp), ado, dg.payload_mut())
                .is_ok(),
        ),
        Command::Lrd => counted(sim.read_logical(logical, dg.payload_mut()).is_ok()),
        Command::Lwr => counted(sim.write_logical(logical, dg.payload()).is_ok()),
        Command::Lrw => counted(sim.exchange_logical(logical, dg.payload_mut()).is_ok()),
    }
}
