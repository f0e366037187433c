//! Shared SCSI bus signal state
//!
//! The bus owns the authoritative signal state. Every attached device
//! contributes its own control lines and data byte; the value seen on the
//! bus is the wired-OR of all contributions. Devices never keep a private
//! copy of the bus, they receive `&mut ScsiBus` whenever they run.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::scsi::{CtrlLines, S_ALL};
use crate::types::LatchingEvent;

const SCSI_TRACE: bool = false;

/// Handle of a device attached to the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScsiRefId(usize);

impl ScsiRefId {
    pub const fn index(self) -> usize {
        self.0
    }
}

/// A participant on the SCSI bus
#[typetag::serde]
pub trait ScsiDevice {
    /// Bus handle of this device
    fn refid(&self) -> ScsiRefId;

    /// Invoked by the scheduler when one of the watched control lines changed,
    /// or a bus reset was pulsed.
    fn scsi_ctrl_changed(&mut self, bus: &mut ScsiBus) -> Result<()>;
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct BusSlot {
    /// Control lines driven by this device
    ctrl: CtrlLines,
    /// Data lines driven by this device
    data: u8,
    /// Control lines this device wants to be notified about
    wait: CtrlLines,
    /// Notification pending delivery
    pending: bool,
    /// Bus reset pulsed by another device
    reset: LatchingEvent,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ScsiBus {
    slots: Vec<BusSlot>,
    /// Aggregated control lines
    ctrl: CtrlLines,
}

impl ScsiBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a new device to the bus, returning its handle
    pub fn attach(&mut self) -> ScsiRefId {
        self.slots.push(BusSlot::default());
        ScsiRefId(self.slots.len() - 1)
    }

    /// Amount of attached devices
    pub fn devices(&self) -> usize {
        self.slots.len()
    }

    /// Current state of the control lines
    pub fn ctrl_r(&self) -> CtrlLines {
        self.ctrl
    }

    /// Current state of the data lines
    pub fn data_r(&self) -> u8 {
        self.slots.iter().fold(0, |acc, s| acc | s.data)
    }

    /// Control lines driven by a single device
    pub fn ctrl_of(&self, id: ScsiRefId) -> CtrlLines {
        self.slots[id.0].ctrl
    }

    /// Drives the control lines selected by `mask` to the state in `lines`,
    /// leaving the device's other lines untouched.
    pub fn ctrl_w(&mut self, id: ScsiRefId, lines: CtrlLines, mask: CtrlLines) {
        let slot = &mut self.slots[id.0];
        slot.ctrl = (slot.ctrl & !mask) | (lines & mask);
        self.regen_ctrl(id);
    }

    /// Drives the data lines of a device
    pub fn data_w(&mut self, id: ScsiRefId, data: u8) {
        self.slots[id.0].data = data;
    }

    /// Updates the set of control lines the device watches for changes.
    /// Lines in `mask` are set to the state in `lines`.
    pub fn ctrl_wait(&mut self, id: ScsiRefId, lines: CtrlLines, mask: CtrlLines) {
        let slot = &mut self.slots[id.0];
        slot.wait = (slot.wait & !mask) | (lines & mask);
    }

    /// Watch mask of a device
    pub fn wait_of(&self, id: ScsiRefId) -> CtrlLines {
        self.slots[id.0].wait
    }

    /// Pulses RST towards every other device.
    pub fn pulse_reset(&mut self, id: ScsiRefId) {
        if SCSI_TRACE {
            log::trace!("Bus reset pulsed by #{}", id.0);
        }
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if i != id.0 {
                slot.reset.set();
                slot.pending = true;
            }
        }
    }

    /// Returns whether a bus reset was pulsed since the last call
    pub fn take_reset(&mut self, id: ScsiRefId) -> bool {
        self.slots[id.0].reset.get_clear()
    }

    /// Pops the next device with a pending notification, lowest handle first
    pub fn next_pending(&mut self) -> Option<ScsiRefId> {
        let idx = self.slots.iter().position(|s| s.pending)?;
        self.slots[idx].pending = false;
        Some(ScsiRefId(idx))
    }

    /// Releases all lines driven by a device
    pub fn release(&mut self, id: ScsiRefId) {
        self.data_w(id, 0);
        self.ctrl_w(id, 0, S_ALL);
    }

    fn regen_ctrl(&mut self, writer: ScsiRefId) {
        let old = self.ctrl;
        self.ctrl = self.slots.iter().fold(0, |acc, s| acc | s.ctrl);
        let changed = old ^ self.ctrl;
        if changed == 0 {
            return;
        }

        if SCSI_TRACE {
            log::trace!(
                "Bus ctrl {:03X} -> {:03X} (by #{})",
                old,
                self.ctrl,
                writer.0
            );
        }

        for (i, slot) in self.slots.iter_mut().enumerate() {
            if i != writer.0 && slot.wait & changed != 0 {
                slot.pending = true;
            }
        }
    }
}
