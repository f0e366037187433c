//! Bus-level SCSI target
//!
//! Drives the target side of the bus protocol on behalf of a command-level
//! [`ScsiTarget`]: responds to selection, collects messages and the CDB,
//! runs the data, status and message-in phases and frees the bus again.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::debuggable::Debuggable;
use crate::scsi::bus::{ScsiBus, ScsiDevice, ScsiRefId};
use crate::scsi::target::{ScsiCmdResult, ScsiTarget};
use crate::scsi::{MSG_COMMAND_COMPLETE, STATUS_GOOD, ScsiPhase, cdb_length};
use crate::scsi::{S_ACK, S_ALL, S_ATN, S_BSY, S_INP, S_PHASE_MASK, S_REQ, S_RST, S_SEL};
use crate::{dbgprop_string, dbgprop_udec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum Handshake {
    /// REQ asserted, waiting for the initiator to assert ACK
    AwaitAck,
    /// REQ released, waiting for the initiator to release ACK
    AwaitAckRelease,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum TargetState {
    BusFree,
    /// BSY asserted in response to selection, waiting for SEL to drop
    Selected,
    Transfer(ScsiPhase, Handshake),
}

#[derive(Serialize, Deserialize)]
pub struct TargetDevice {
    refid: ScsiRefId,
    scsi_id: u8,
    target: Box<dyn ScsiTarget>,
    state: TargetState,

    /// Messages received during the current connection
    messages: Vec<u8>,
    cdb: Vec<u8>,
    cdb_len: usize,
    /// Data-in to send or data-out received
    data: Vec<u8>,
    /// Position in `data` for data-in
    pos: usize,
    /// Expected data-out length
    expected: usize,
    status: u8,
}

impl TargetDevice {
    pub fn new(bus: &mut ScsiBus, scsi_id: u8, target: Box<dyn ScsiTarget>) -> Self {
        let refid = bus.attach();
        bus.ctrl_wait(refid, S_SEL | S_BSY | S_RST, S_ALL);
        Self {
            refid,
            scsi_id: scsi_id & 7,
            target,
            state: TargetState::BusFree,
            messages: vec![],
            cdb: vec![],
            cdb_len: 0,
            data: vec![],
            pos: 0,
            expected: 0,
            status: STATUS_GOOD,
        }
    }

    pub fn scsi_id(&self) -> u8 {
        self.scsi_id
    }

    pub fn target(&self) -> &dyn ScsiTarget {
        self.target.as_ref()
    }

    pub fn target_mut(&mut self) -> &mut dyn ScsiTarget {
        self.target.as_mut()
    }

    /// Messages received during the last connection
    pub fn messages(&self) -> &[u8] {
        &self.messages
    }

    /// Last CDB received
    pub fn last_cdb(&self) -> &[u8] {
        &self.cdb
    }

    pub fn is_bus_free(&self) -> bool {
        self.state == TargetState::BusFree
    }

    fn bus_free(&mut self, bus: &mut ScsiBus) {
        bus.release(self.refid);
        bus.ctrl_wait(self.refid, S_SEL | S_BSY | S_RST, S_ALL);
        self.state = TargetState::BusFree;
    }

    /// Switches to the given phase and requests the next byte
    fn request(&mut self, bus: &mut ScsiBus, phase: ScsiPhase) {
        if phase.is_input() {
            let byte = match phase {
                ScsiPhase::DataIn => {
                    let b = self.data.get(self.pos).copied().unwrap_or(0);
                    self.pos += 1;
                    b
                }
                ScsiPhase::Status => self.status,
                _ => MSG_COMMAND_COMPLETE,
            };
            bus.data_w(self.refid, byte);
        }
        bus.ctrl_wait(self.refid, S_ACK | S_RST, S_ALL);
        bus.ctrl_w(
            self.refid,
            phase.lines() | S_REQ,
            S_PHASE_MASK | S_REQ,
        );
        self.state = TargetState::Transfer(phase, Handshake::AwaitAck);
    }

    fn latch(&mut self, phase: ScsiPhase, byte: u8) {
        match phase {
            ScsiPhase::MessageOut => {
                log::debug!("Target {}: message {:02X}", self.scsi_id, byte);
                self.messages.push(byte);
            }
            ScsiPhase::Command => {
                if self.cdb.is_empty() {
                    self.cdb_len = cdb_length(byte);
                }
                self.cdb.push(byte);
            }
            ScsiPhase::DataOut => self.data.push(byte),
            _ => (),
        }
    }

    fn execute(&mut self, bus: &mut ScsiBus) -> Result<()> {
        log::debug!("Target {}: command {:02X?}", self.scsi_id, self.cdb);
        self.data.clear();
        self.pos = 0;
        self.status = STATUS_GOOD;

        match self.target.cmd(&self.cdb, None)? {
            ScsiCmdResult::Status(s) => {
                self.status = s;
                self.request(bus, ScsiPhase::Status);
            }
            ScsiCmdResult::DataIn(data) if data.is_empty() => {
                self.request(bus, ScsiPhase::Status);
            }
            ScsiCmdResult::DataIn(data) => {
                self.data = data;
                self.request(bus, ScsiPhase::DataIn);
            }
            ScsiCmdResult::DataOut(0) => self.data_out_done(bus)?,
            ScsiCmdResult::DataOut(len) => {
                self.expected = len;
                self.request(bus, ScsiPhase::DataOut);
            }
        }
        Ok(())
    }

    fn data_out_done(&mut self, bus: &mut ScsiBus) -> Result<()> {
        match self.target.cmd(&self.cdb, Some(&self.data))? {
            ScsiCmdResult::Status(s) => self.status = s,
            r => {
                log::warn!("Target {}: unexpected result after data-out: {:?}", self.scsi_id, r);
            }
        }
        self.request(bus, ScsiPhase::Status);
        Ok(())
    }

    /// Byte handshake finished, decide what comes next
    fn next(&mut self, bus: &mut ScsiBus, phase: ScsiPhase) -> Result<()> {
        let ctrl = bus.ctrl_r();
        match phase {
            ScsiPhase::MessageOut if ctrl & S_ATN != 0 => self.request(bus, ScsiPhase::MessageOut),
            ScsiPhase::MessageOut => self.request(bus, ScsiPhase::Command),
            ScsiPhase::Command if self.cdb.len() < self.cdb_len => {
                self.request(bus, ScsiPhase::Command)
            }
            ScsiPhase::Command => self.execute(bus)?,
            ScsiPhase::DataOut if self.data.len() < self.expected => {
                self.request(bus, ScsiPhase::DataOut)
            }
            ScsiPhase::DataOut => self.data_out_done(bus)?,
            ScsiPhase::DataIn if self.pos < self.data.len() => {
                self.request(bus, ScsiPhase::DataIn)
            }
            ScsiPhase::DataIn => self.request(bus, ScsiPhase::Status),
            ScsiPhase::Status => self.request(bus, ScsiPhase::MessageIn),
            ScsiPhase::MessageIn => {
                log::debug!("Target {}: disconnecting", self.scsi_id);
                self.bus_free(bus);
            }
        }
        Ok(())
    }
}

#[typetag::serde]
impl ScsiDevice for TargetDevice {
    fn refid(&self) -> ScsiRefId {
        self.refid
    }

    fn scsi_ctrl_changed(&mut self, bus: &mut ScsiBus) -> Result<()> {
        let ctrl = bus.ctrl_r();

        if bus.take_reset(self.refid) || ctrl & S_RST != 0 {
            if self.state != TargetState::BusFree {
                log::debug!("Target {}: bus reset", self.scsi_id);
                self.bus_free(bus);
            }
            return Ok(());
        }

        match self.state {
            TargetState::BusFree => {
                if ctrl & (S_SEL | S_BSY | S_INP) == S_SEL && bus.data_r() & (1 << self.scsi_id) != 0
                {
                    log::debug!("Target {}: selected", self.scsi_id);
                    self.messages.clear();
                    self.cdb.clear();
                    self.state = TargetState::Selected;
                    bus.ctrl_wait(self.refid, S_SEL | S_RST, S_ALL);
                    bus.ctrl_w(self.refid, S_BSY, S_BSY);
                }
            }
            TargetState::Selected => {
                if ctrl & S_SEL != 0 {
                    return Ok(());
                }
                if ctrl & S_ATN != 0 {
                    self.request(bus, ScsiPhase::MessageOut);
                } else {
                    self.request(bus, ScsiPhase::Command);
                }
            }
            TargetState::Transfer(phase, Handshake::AwaitAck) => {
                if ctrl & S_ACK == 0 {
                    return Ok(());
                }
                if phase.is_input() {
                    bus.data_w(self.refid, 0);
                } else {
                    self.latch(phase, bus.data_r());
                }
                self.state = TargetState::Transfer(phase, Handshake::AwaitAckRelease);
                bus.ctrl_w(self.refid, 0, S_REQ);
            }
            TargetState::Transfer(phase, Handshake::AwaitAckRelease) => {
                if ctrl & S_ACK != 0 {
                    return Ok(());
                }
                self.next(bus, phase)?;
            }
        }
        Ok(())
    }
}

impl Debuggable for TargetDevice {
    fn get_debug_properties(&self) -> crate::debuggable::DebuggableProperties {
        use crate::debuggable::*;

        vec![
            dbgprop_udec!("SCSI ID", self.scsi_id),
            dbgprop_string!("State", format!("{:?}", self.state)),
            dbgprop_string!("CDB", hex::encode_upper(&self.cdb)),
            dbgprop_string!("Messages", hex::encode_upper(&self.messages)),
            dbgprop_udec!("Data length", self.data.len()),
            dbgprop_udec!("Data position", self.pos),
        ]
    }
}
