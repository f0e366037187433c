//! NCR 5390 / 53C90A / 53C94 SCSI protocol controller
//!
//! The chip is modelled as a reactive automaton: all work happens in the
//! sequencer, which runs when a watched bus line changes, when the
//! one-shot delay timer expires, or when the host touches the command
//! register or DMA interface.

pub mod regs;
mod sequencer;
pub mod state;
pub mod variant;

use std::collections::VecDeque;

use arrayvec::ArrayVec;
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};

use crate::config::ControllerConfig;
use crate::debuggable::Debuggable;
use crate::scsi::bus::{ScsiBus, ScsiRefId};
use crate::scsi::fifo::Fifo;
use crate::scsi::{CtrlLines, S_ALL, S_BSY, S_PHASE_MASK, S_RST, S_SEL};
use crate::tickable::Ticks;
use crate::types::Field16;
use crate::{dbgprop_bool, dbgprop_byte, dbgprop_byte_bin, dbgprop_enum, dbgprop_string};
use crate::{dbgprop_group, dbgprop_header, dbgprop_udec, dbgprop_word};

use regs::{NcrConfig, NcrIStatus, NcrReg, NcrStatus};
use state::State;
pub use variant::ChipVariant;

/// Connection mode of the chip, governs which commands are valid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::IntoStaticStr)]
pub enum Mode {
    Disconnected,
    Initiator,
    Target,
}

/// Direction of the DMA interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::IntoStaticStr)]
pub enum DmaDir {
    None,
    /// SCSI bus -> FIFO -> host
    In,
    /// Host -> FIFO -> SCSI bus
    Out,
}

/// Edge on one of the chip's output lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEvent {
    Irq(bool),
    Drq(bool),
}

/// Conditions the modelled chip family never produces on real hardware.
/// Hitting one means the emulated environment is broken; the run halts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControllerFault {
    #[error("arbitration lost to ID {winner:?} (own ID {own}), waiting for bus free is not supported")]
    ArbitrationLost { winner: Option<u8>, own: u8 },
    #[error("command {0:02X} is not implemented")]
    UnimplementedCommand(u8),
    #[error("send from empty FIFO in state {0}")]
    FifoUnderrun(&'static str),
}

/// Highest SCSI ID asserted on the data lines
pub fn arbitration_winner(data: u8) -> Option<u8> {
    if data == 0 {
        None
    } else {
        Some(7 - data.leading_zeros() as u8)
    }
}

#[derive(Serialize, Deserialize)]
pub struct Ncr5390 {
    variant: ChipVariant,
    refid: ScsiRefId,
    fast_select_timeout: bool,
    select_timeout_scale: u32,

    /// Command register stack: current command and one chained command
    command: ArrayVec<u8, 2>,
    /// Command register as read back by the host
    cmd_reg: u8,
    /// Current command was issued with the DMA bit set
    dma_command: bool,

    fifo: Fifo,
    config: NcrConfig,
    config2: u8,
    config3: u8,
    status: NcrStatus,
    istatus: NcrIStatus,
    clock_conv: u8,
    sync_offset: u8,
    sync_period: u8,
    /// Destination ID for (re)selection
    dest_id: u8,
    select_timeout: u8,
    fifo_align: u8,
    test_mode: bool,
    /// Sequence step
    seq: u8,

    /// Transfer count, loaded into the counter by DMA commands
    tcount: Field16,
    tcounter: u16,

    mode: Mode,
    state: State,
    /// Phase lines captured when an information transfer started
    xfr_phase: CtrlLines,
    /// Remaining CDB bytes during selection
    command_length: usize,
    /// Remaining message-out bytes during selection
    msg_left: u8,
    /// Remaining bytes of a non-DMA target transfer
    tgt_left: usize,
    /// Target receive command: length follows from the first CDB byte
    tgt_cdb_pending: bool,
    dma_dir: DmaDir,

    irq: bool,
    drq: bool,
    /// Last observed state of RST
    rst_line: bool,

    /// One-shot delay timer, remaining ticks
    timer: Option<Ticks>,

    #[serde(skip)]
    events: VecDeque<LineEvent>,
}

impl Ncr5390 {
    /// Creates a controller in power-on state and attaches it to the bus
    pub fn new(config: &ControllerConfig, bus: &mut ScsiBus) -> Self {
        let mut chip = Self {
            variant: config.variant,
            refid: bus.attach(),
            fast_select_timeout: config.fast_select_timeout,
            select_timeout_scale: config.select_timeout_scale,
            command: ArrayVec::new(),
            cmd_reg: 0,
            dma_command: false,
            fifo: Fifo::new(),
            config: NcrConfig(0),
            config2: 0,
            config3: 0,
            status: NcrStatus(0),
            istatus: NcrIStatus(0),
            clock_conv: 0,
            sync_offset: 0,
            sync_period: 0,
            dest_id: 0,
            select_timeout: 0,
            fifo_align: 0,
            test_mode: false,
            seq: 0,
            tcount: Field16(0),
            tcounter: 0,
            mode: Mode::Disconnected,
            state: State::IDLE,
            xfr_phase: 0,
            command_length: 0,
            msg_left: 0,
            tgt_left: 0,
            tgt_cdb_pending: false,
            dma_dir: DmaDir::None,
            irq: false,
            drq: false,
            rst_line: false,
            timer: None,
            events: VecDeque::new(),
        };
        chip.device_reset(bus);
        chip
    }

    pub fn variant(&self) -> ChipVariant {
        self.variant
    }

    pub fn refid(&self) -> ScsiRefId {
        self.refid
    }

    pub fn irq(&self) -> bool {
        self.irq
    }

    pub fn drq(&self) -> bool {
        self.drq
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn seq(&self) -> u8 {
        self.seq
    }

    pub fn fifo(&self) -> &Fifo {
        &self.fifo
    }

    pub fn tcounter(&self) -> u16 {
        self.tcounter
    }

    pub fn test_mode(&self) -> bool {
        self.test_mode
    }

    /// Interrupt status without the read side effects
    pub fn peek_istatus(&self) -> u8 {
        self.istatus.0
    }

    /// Pending commands on the command register stack
    pub fn pending_commands(&self) -> &[u8] {
        &self.command
    }

    /// Takes the oldest output line edge
    pub fn take_event(&mut self) -> Option<LineEvent> {
        self.events.pop_front()
    }

    /// Remaining ticks on the delay timer, if armed
    pub fn timer_remaining(&self) -> Option<Ticks> {
        self.timer
    }

    /// Advances the delay timer without firing it
    pub fn elapse(&mut self, ticks: Ticks) {
        if let Some(t) = self.timer.as_mut() {
            *t = t.saturating_sub(ticks);
        }
    }

    /// Fires the delay timer
    pub fn expire_timer(&mut self, bus: &mut ScsiBus) -> Result<(), ControllerFault> {
        self.timer = None;
        self.step(bus, true)
    }

    /// Hard reset: power-on defaults for timing and configuration
    pub fn device_reset(&mut self, bus: &mut ScsiBus) {
        self.fifo.clear();
        self.clock_conv = 2;
        self.sync_period = 5;
        self.sync_offset = 0;
        self.seq = 0;
        self.config.0 &= 7;
        self.status.0 &= NcrStatus::RESET_KEEP;
        self.istatus = NcrIStatus(0);
        self.check_irq();
        self.reset_soft(bus);
    }

    /// Resets the SCSI bus: soft reset of the chip and a reset pulse
    /// towards every other device
    pub fn reset_bus(&mut self, bus: &mut ScsiBus) {
        self.reset_soft(bus);
        bus.pulse_reset(self.refid);
    }

    /// Soft reset: back to idle and disconnected, timing survives
    fn reset_soft(&mut self, bus: &mut ScsiBus) {
        self.abandon(bus);
        self.status.set_tc0(false);
        self.test_mode = false;
        let caps = self.variant.capabilities();
        if caps.config2 {
            self.config2 = 0;
        }
        if caps.config3 {
            self.config3 = 0;
        }
    }

    /// Drops whatever the sequencer was doing and lets go of the bus
    fn abandon(&mut self, bus: &mut ScsiBus) {
        self.state = State::IDLE;
        self.timer = None;
        bus.release(self.refid);
        bus.ctrl_wait(self.refid, S_SEL | S_BSY | S_RST, S_ALL);
        self.dma_dir = DmaDir::None;
        self.drq_clear();
        self.reset_disconnect();
    }

    fn reset_disconnect(&mut self) {
        self.command.clear();
        self.cmd_reg = 0;
        self.command_length = 0;
        self.mode = Mode::Disconnected;
    }

    /// Reacts to a change on the bus control lines
    pub fn bus_changed(&mut self, bus: &mut ScsiBus) -> Result<(), ControllerFault> {
        let rst = bus.ctrl_r() & S_RST != 0;
        let edge = bus.take_reset(self.refid) || (rst && !self.rst_line);
        self.rst_line = rst;

        if edge {
            log::debug!("SCSI bus reset detected");
            self.abandon(bus);
            if !self.config.reset_irq_disable() {
                self.istatus.set_scsi_reset(true);
                self.check_irq();
            }
        }
        if edge || rst {
            return Ok(());
        }
        self.step(bus, false)
    }

    /// Register read. Returns `None` for offsets the variant does not decode
    /// for reading.
    pub fn read(&mut self, bus: &mut ScsiBus, offset: u8) -> Result<Option<u8>, ControllerFault> {
        let Some(reg) = NcrReg::from_u8(offset & 0x0F) else {
            return Ok(None);
        };
        let caps = self.variant.capabilities();

        let val = match reg {
            NcrReg::TCOUNT_LO => self.tcounter as u8,
            NcrReg::TCOUNT_HI => (self.tcounter >> 8) as u8,
            NcrReg::FIFO => self.fifo_r(),
            NcrReg::COMMAND => self.cmd_reg,
            NcrReg::STATUS_DESTID => self.status_r(bus),
            NcrReg::ISTATUS_TIMEOUT => self.istatus_r(bus)?,
            NcrReg::SEQ_PERIOD => self.seq,
            NcrReg::FLAGS_OFFSET => self.fifo.len() as u8,
            NcrReg::CONFIG => self.config.0,
            NcrReg::CONFIG2 if caps.config2 => self.config2,
            NcrReg::CONFIG3 if caps.config3 => self.config3,
            _ => return Ok(None),
        };

        if reg != NcrReg::STATUS_DESTID {
            log::debug!("Read {:?} = {:02X}", reg, val);
        }
        Ok(Some(val))
    }

    /// Register write. Returns `None` for offsets the variant does not decode
    /// for writing.
    pub fn write(
        &mut self,
        bus: &mut ScsiBus,
        offset: u8,
        val: u8,
    ) -> Result<Option<()>, ControllerFault> {
        let Some(reg) = NcrReg::from_u8(offset & 0x0F) else {
            return Ok(None);
        };
        let caps = self.variant.capabilities();
        log::debug!("Write {:?} = {:02X}", reg, val);

        match reg {
            NcrReg::TCOUNT_LO => self.tcount.set_lsb(val),
            NcrReg::TCOUNT_HI => self.tcount.set_msb(val),
            NcrReg::FIFO => self.fifo_w(val),
            NcrReg::COMMAND => self.command_w(bus, val)?,
            NcrReg::STATUS_DESTID => self.dest_id = val & 7,
            NcrReg::ISTATUS_TIMEOUT => self.select_timeout = val,
            NcrReg::SEQ_PERIOD => self.sync_period = val & 0x1F,
            NcrReg::FLAGS_OFFSET => self.sync_offset = val & 0x0F,
            NcrReg::CONFIG => self.conf_w(val),
            NcrReg::CLOCK => self.clock_conv = val & 7,
            NcrReg::TEST => {
                if self.test_mode {
                    log::warn!("Test register write {:02X}: test mode not implemented", val);
                }
            }
            NcrReg::CONFIG2 if caps.config2 => self.config2 = val,
            NcrReg::CONFIG3 if caps.config3 => self.config3 = val,
            NcrReg::FIFO_ALIGN if caps.fifo_align => self.fifo_align = val,
            _ => return Ok(None),
        }
        Ok(Some(()))
    }

    /// DMA write: host supplies the next byte for the FIFO
    pub fn dma_w(&mut self, bus: &mut ScsiBus, val: u8) -> Result<(), ControllerFault> {
        self.fifo_push(val);
        self.decrement_tcounter();
        if self.fifo.is_full() || self.status.tc0() {
            self.drq_clear();
        }
        self.step(bus, false)
    }

    /// DMA read: host takes the next byte from the FIFO
    pub fn dma_r(&mut self, bus: &mut ScsiBus) -> Result<u8, ControllerFault> {
        let val = self.fifo_pop().unwrap_or_else(|| {
            log::warn!("DMA read from empty FIFO");
            0
        });
        self.decrement_tcounter();
        if self.fifo.is_empty() || self.status.tc0() {
            self.drq_clear();
        }
        self.step(bus, false)?;
        Ok(val)
    }

    fn fifo_r(&mut self) -> u8 {
        self.fifo.pop().unwrap_or_else(|| {
            log::warn!("FIFO read while empty");
            0
        })
    }

    fn fifo_w(&mut self, val: u8) {
        if !self.fifo.push(val) {
            log::warn!("FIFO write {:02X} while full, dropped", val);
        }
    }

    /// FIFO pop from the SCSI side
    fn fifo_pop(&mut self) -> Option<u8> {
        let val = self.fifo.pop()?;
        if self.fifo.is_empty() && self.dma_dir == DmaDir::Out && !self.status.tc0() {
            self.drq_set();
        }
        Some(val)
    }

    /// FIFO push from the SCSI side
    fn fifo_push(&mut self, val: u8) {
        if !self.fifo.push(val) {
            log::warn!("FIFO overflow, dropped {:02X}", val);
        }
        if !self.drq && self.dma_dir == DmaDir::In && !self.status.tc0() {
            self.drq_set();
        }
    }

    fn command_w(&mut self, bus: &mut ScsiBus, val: u8) -> Result<(), ControllerFault> {
        if self.command.is_full() {
            log::debug!("Command {:02X} while two are pending: gross error", val);
            self.status.set_gross_error(true);
            self.check_irq();
            return Ok(());
        }

        // Reset chip and reset bus execute as soon as they reach the top of
        // the command register.
        if regs::NcrCommand::is_immediate_reset(val & 0x7F) {
            self.command.clear();
        }

        self.command.push(val);
        if self.command.len() == 1 {
            self.start_command(bus)?;
        }
        Ok(())
    }

    fn status_r(&mut self, bus: &ScsiBus) -> u8 {
        let mut res = self
            .status
            .with_phase((bus.ctrl_r() & S_PHASE_MASK) as u8);

        if self.variant.capabilities().status_interrupt {
            res.set_interrupt(res.interrupt() || self.irq);
            if self.irq {
                self.status.0 &= !NcrStatus::ERRORS;
            }
        }
        res.0
    }

    fn istatus_r(&mut self, bus: &mut ScsiBus) -> Result<u8, ControllerFault> {
        let res = self.istatus.0;

        if self.irq {
            self.status.0 &= !NcrStatus::ERRORS;
            self.istatus = NcrIStatus(0);
            self.seq = 0;
        }
        self.check_irq();

        if res != 0 {
            self.command_pop_and_chain(bus)?;
        }
        Ok(res)
    }

    fn conf_w(&mut self, val: u8) {
        self.config = NcrConfig(val);

        // Test mode can only be left by a reset
        if self.config.chip_test() {
            self.test_mode = true;
        }
    }

    fn dma_set(&mut self, dir: DmaDir) {
        self.dma_dir = dir;
        if dir == DmaDir::Out && !self.fifo.is_full() && self.dma_remaining() > self.fifo.len() {
            self.drq_set();
        }
    }

    fn decrement_tcounter(&mut self) {
        if !self.dma_command {
            return;
        }

        self.tcounter = self.tcounter.wrapping_sub(1);
        if self.tcounter == 0 {
            self.status.set_tc0(true);
        }
    }

    /// Bytes the DMA side still has to move. A zero count means 64K.
    fn dma_remaining(&self) -> usize {
        if self.status.tc0() {
            0
        } else if self.tcounter == 0 {
            0x1_0000
        } else {
            usize::from(self.tcounter)
        }
    }

    fn check_irq(&mut self) {
        let irq = self.istatus.0 != 0;
        if irq != self.irq {
            self.irq = irq;
            self.events.push_back(LineEvent::Irq(irq));
        }
    }

    fn drq_set(&mut self) {
        if !self.drq {
            self.drq = true;
            self.events.push_back(LineEvent::Drq(true));
        }
    }

    fn drq_clear(&mut self) {
        if self.drq {
            self.drq = false;
            self.events.push_back(LineEvent::Drq(false));
        }
    }

    /// Arms the delay timer in units of the clock conversion factor
    fn delay(&mut self, cycles: Ticks) {
        let conv = if self.clock_conv == 0 {
            8
        } else {
            Ticks::from(self.clock_conv)
        };
        self.timer = Some(cycles * conv);
    }

    /// Arms the delay timer in input clock cycles
    fn delay_cycles(&mut self, cycles: Ticks) {
        self.timer = Some(cycles);
    }
}

impl Debuggable for Ncr5390 {
    fn get_debug_properties(&self) -> crate::debuggable::DebuggableProperties {
        use crate::debuggable::*;

        vec![
            dbgprop_enum!("Variant", self.variant),
            dbgprop_group!(
                "Registers",
                vec![
                    dbgprop_word!("Transfer count", self.tcount.0),
                    dbgprop_word!("Transfer counter", self.tcounter),
                    dbgprop_byte!("Command", self.cmd_reg),
                    dbgprop_byte_bin!("Status", self.status.0),
                    dbgprop_byte_bin!("Interrupt status", self.istatus.0),
                    dbgprop_byte!("Config", self.config.0),
                    dbgprop_byte!("Config 2", self.config2),
                    dbgprop_byte!("Config 3", self.config3),
                    dbgprop_udec!("Sequence step", self.seq),
                    dbgprop_udec!("Destination ID", self.dest_id),
                    dbgprop_udec!("Select timeout", self.select_timeout),
                    dbgprop_udec!("Clock conversion", self.clock_conv),
                    dbgprop_udec!("Sync period", self.sync_period),
                    dbgprop_udec!("Sync offset", self.sync_offset),
                    dbgprop_byte!("FIFO alignment", self.fifo_align),
                ]
            ),
            dbgprop_header!("Sequencer"),
            dbgprop_enum!("Mode", self.mode),
            dbgprop_string!("State", self.state.to_string()),
            dbgprop_string!("Command stack", format!("{:02X?}", self.command.as_slice())),
            dbgprop_enum!("DMA direction", self.dma_dir),
            dbgprop_bool!("DMA command", self.dma_command),
            dbgprop_bool!("Test mode", self.test_mode),
            dbgprop_string!("FIFO", hex::encode_upper(self.fifo.as_slice())),
            dbgprop_udec!("FIFO len", self.fifo.len()),
            dbgprop_bool!("IRQ", self.irq),
            dbgprop_bool!("DRQ", self.drq),
        ]
    }
}
