//! Command dispatch and the sequencer state machine

use num_traits::FromPrimitive;

use super::regs::{NcrCommand, NcrCommandByte, NcrIStatus};
use super::state::{SeqState, State, SubState};
use super::{ControllerFault, DmaDir, Mode, Ncr5390, arbitration_winner};
use crate::scsi::bus::ScsiBus;
use crate::scsi::{CtrlLines, S_ACK, S_ALL, S_ATN, S_BSY, S_INP, S_PHASE_MASK, S_REQ, S_RST, S_SEL};
use crate::scsi::{ScsiPhase, cdb_length};
use crate::tickable::Ticks;

const SEQ_TRACE: bool = false;

type SeqResult = Result<(), ControllerFault>;

impl Ncr5390 {
    /// Command currently on top of the command register
    fn current(&self) -> Option<NcrCommand> {
        let byte = *self.command.first()?;
        NcrCommand::from_u8(NcrCommandByte(byte).code())
    }

    fn enter(&mut self, main: SeqState) {
        if SEQ_TRACE {
            log::trace!("{} -> {:?}", self.state, main);
        }
        self.state = State { main, sub: None };
    }

    fn enter_sub(&mut self, sub: SubState) {
        if SEQ_TRACE {
            log::trace!("{} -> .{:?}", self.state, sub);
        }
        self.state.sub = Some(sub);
    }

    fn leave_sub(&mut self) {
        self.state.sub = None;
    }

    /// Drops a chained command, keeping the one in progress
    fn discard_chained(&mut self) {
        self.command.truncate(1);
    }

    /// Starts execution of the command on top of the command register
    pub(super) fn start_command(&mut self, bus: &mut ScsiBus) -> SeqResult {
        let Some(&byte) = self.command.first() else {
            return Ok(());
        };
        let cmd = NcrCommandByte(byte);
        self.cmd_reg = byte;

        if !self.variant.is_valid_command(cmd.code(), self.mode) {
            log::debug!("Illegal command {:02X} in mode {:?}", byte, self.mode);
            self.istatus.set_illegal(true);
            self.check_irq();
            return Ok(());
        }

        self.dma_command = cmd.dma();
        if self.dma_command {
            self.tcounter = self.tcount.0;
            self.status.set_tc0(false);
        }

        let Some(c) = NcrCommand::from_u8(cmd.code()) else {
            return Err(ControllerFault::UnimplementedCommand(byte));
        };
        log::debug!(
            "Command {:02X}: {}{}",
            byte,
            <&str>::from(c),
            if self.dma_command { " (DMA)" } else { "" }
        );

        match c {
            NcrCommand::Nop => self.command_pop_and_chain(bus)?,
            NcrCommand::FlushFifo => {
                self.fifo.clear();
                self.command_pop_and_chain(bus)?;
            }
            NcrCommand::Reset => self.device_reset(bus),
            NcrCommand::ResetBus => self.reset_bus(bus),
            NcrCommand::Reselect => {
                self.enter(SeqState::ReselArbitration);
                self.dma_set(DmaDir::None);
                self.arbitrate(bus);
            }
            NcrCommand::Select
            | NcrCommand::SelectAtn
            | NcrCommand::SelectAtnStop
            | NcrCommand::SelectAtn3 => {
                self.seq = 0;
                self.enter(SeqState::SelArbitrationInit);
                self.dma_set(if self.dma_command {
                    DmaDir::Out
                } else {
                    DmaDir::None
                });
                self.arbitrate(bus);
            }
            NcrCommand::EnableSelection | NcrCommand::DisableSelection => {
                self.command_pop_and_chain(bus)?
            }
            NcrCommand::TransferInfo => {
                self.xfr_phase = bus.ctrl_r() & S_PHASE_MASK;
                self.enter(SeqState::Xfr);
                self.dma_set_for_phase();
                self.step(bus, false)?;
            }
            NcrCommand::InitiatorComplete => {
                self.enter(SeqState::CompleteRecvByteAck);
                self.recv_byte(bus)?;
            }
            NcrCommand::MessageAccepted => {
                self.enter(SeqState::MsgAcceptWaitReq);
                self.seq = 1;
                bus.ctrl_w(self.refid, 0, S_ACK);
                bus.ctrl_wait(self.refid, S_REQ, S_REQ);
                self.step(bus, false)?;
            }
            NcrCommand::TransferPad => {
                self.xfr_phase = bus.ctrl_r() & S_PHASE_MASK;
                self.enter(if self.xfr_phase & S_INP != 0 {
                    SeqState::XfrRecvPadWaitReq
                } else {
                    SeqState::XfrSendPadWaitReq
                });
                self.dma_set(DmaDir::None);
                bus.ctrl_w(self.refid, 0, S_ACK);
                bus.ctrl_wait(self.refid, S_REQ, S_REQ);
                self.step(bus, false)?;
            }
            NcrCommand::SetAtn => {
                bus.ctrl_w(self.refid, S_ATN, S_ATN);
                self.command_pop_and_chain(bus)?;
            }
            NcrCommand::ResetAtn => {
                bus.ctrl_w(self.refid, 0, S_ATN);
                self.command_pop_and_chain(bus)?;
            }
            NcrCommand::SendMessage
            | NcrCommand::SendStatus
            | NcrCommand::SendData
            | NcrCommand::ReceiveMessage
            | NcrCommand::ReceiveCommand
            | NcrCommand::ReceiveData => self.start_target_transfer(bus, c)?,
            NcrCommand::Disconnect => {
                bus.release(self.refid);
                bus.ctrl_wait(self.refid, S_SEL | S_BSY | S_RST, S_ALL);
                self.mode = Mode::Disconnected;
                self.dma_set(DmaDir::None);
                self.command_pop_and_chain(bus)?;
            }
            NcrCommand::TargetDmaAbort
            | NcrCommand::DisconnectSequence
            | NcrCommand::Terminate
            | NcrCommand::TargetComplete
            | NcrCommand::ReceiveCommandSequence => {
                return Err(ControllerFault::UnimplementedCommand(byte));
            }
        }
        Ok(())
    }

    /// Retires the command on top of the command register and starts the
    /// chained one, if any.
    pub(super) fn command_pop_and_chain(&mut self, bus: &mut ScsiBus) -> SeqResult {
        if self.command.is_empty() {
            return Ok(());
        }
        self.command.remove(0);
        if !self.command.is_empty() {
            self.start_command(bus)?;
        }
        Ok(())
    }

    fn dma_set_for_phase(&mut self) {
        let dir = match (self.dma_command, self.xfr_phase & S_INP != 0) {
            (false, _) => DmaDir::None,
            (true, true) => DmaDir::In,
            (true, false) => DmaDir::Out,
        };
        self.dma_set(dir);
    }

    fn start_target_transfer(&mut self, bus: &mut ScsiBus, c: NcrCommand) -> SeqResult {
        let phase = match c {
            NcrCommand::SendMessage => ScsiPhase::MessageIn,
            NcrCommand::SendStatus => ScsiPhase::Status,
            NcrCommand::SendData => ScsiPhase::DataIn,
            NcrCommand::ReceiveMessage => ScsiPhase::MessageOut,
            NcrCommand::ReceiveCommand => ScsiPhase::Command,
            _ => ScsiPhase::DataOut,
        };
        self.xfr_phase = phase.lines();
        self.tgt_cdb_pending = c == NcrCommand::ReceiveCommand && !self.dma_command;
        self.tgt_left = if phase.is_input() { self.fifo.len() } else { 1 };

        // Target sends travel host -> bus, the reverse of initiator inputs
        self.dma_set(match (self.dma_command, phase.is_input()) {
            (false, _) => DmaDir::None,
            (true, true) => DmaDir::Out,
            (true, false) => DmaDir::In,
        });
        self.enter(SeqState::TargetXfr);
        self.step(bus, false)
    }

    /// Puts the own ID on the bus and asserts BSY
    fn arbitrate(&mut self, bus: &mut ScsiBus) {
        self.enter_sub(SubState::ArbComplete);
        bus.data_w(self.refid, 1 << self.config.own_id());
        bus.ctrl_w(self.refid, S_BSY, S_BSY);
        self.delay(11);
    }

    /// Starts the initiator side of an outgoing byte handshake
    fn send_byte(&mut self, bus: &mut ScsiBus) -> SeqResult {
        let pad = self.state.main == SeqState::XfrSendPad
            || (self.state.main == SeqState::SelSendByte && self.command_length == 0);
        let byte = if pad {
            0
        } else {
            self.fifo_pop()
                .ok_or(ControllerFault::FifoUnderrun(self.state.main.into()))?
        };

        self.enter_sub(SubState::SendWaitSettle);
        bus.data_w(self.refid, byte);
        bus.ctrl_w(self.refid, S_ACK, S_ACK);
        bus.ctrl_wait(self.refid, S_REQ, S_REQ);
        self.delay_cycles(Ticks::from(self.sync_period));
        Ok(())
    }

    /// Starts the initiator side of an incoming byte handshake
    fn recv_byte(&mut self, bus: &mut ScsiBus) -> SeqResult {
        bus.ctrl_wait(self.refid, S_REQ, S_REQ);
        self.enter_sub(SubState::RecvWaitReq1);
        self.step(bus, false)
    }

    fn function_complete(&mut self) {
        self.complete(NcrIStatus::default().with_function(true));
    }

    fn bus_complete(&mut self) {
        self.complete(NcrIStatus::default().with_bus(true));
    }

    fn function_bus_complete(&mut self) {
        self.complete(NcrIStatus::default().with_function(true).with_bus(true));
    }

    fn complete(&mut self, cause: NcrIStatus) {
        log::debug!("{} complete: {:02X}", self.state, cause.0);
        self.state = State::IDLE;
        self.istatus.0 |= cause.0;
        self.dma_dir = DmaDir::None;
        self.drq_clear();
        self.check_irq();
    }

    /// Target released the bus while we were its initiator
    fn lost_target(&mut self, bus: &mut ScsiBus) {
        log::debug!("Target disconnected in {}", self.state);
        bus.data_w(self.refid, 0);
        bus.ctrl_w(self.refid, 0, S_ATN | S_ACK);
        bus.ctrl_wait(self.refid, S_SEL | S_BSY | S_RST, S_ALL);
        self.state = State::IDLE;
        self.timer = None;
        self.istatus.set_disconnect(true);
        self.dma_dir = DmaDir::None;
        self.drq_clear();
        self.reset_disconnect();
        self.check_irq();
    }

    /// Advances the sequencer. `timeout` is set when the delay timer fired.
    pub(super) fn step(&mut self, bus: &mut ScsiBus, timeout: bool) -> SeqResult {
        let ctrl = bus.ctrl_r();
        let data = bus.data_r();

        if SEQ_TRACE {
            log::trace!(
                "step {} ctrl {:03X} data {:02X}{}",
                self.state,
                ctrl,
                data,
                if timeout { " timeout" } else { "" }
            );
        }

        if self.mode == Mode::Initiator && ctrl & S_BSY == 0 {
            self.lost_target(bus);
            return Ok(());
        }

        match self.state.sub {
            Some(sub) => self.step_sub(bus, sub, ctrl, data, timeout),
            None => self.step_main(bus, ctrl),
        }
    }

    /// Target answered (re)selection by asserting BSY
    fn target_responded(&mut self, bus: &mut ScsiBus, reselect: bool) {
        self.enter_sub(SubState::ArbDeskewWait);
        if reselect {
            bus.ctrl_w(self.refid, S_BSY, S_BSY);
        }
        self.delay_cycles(2);
    }

    fn step_sub(
        &mut self,
        bus: &mut ScsiBus,
        sub: SubState,
        ctrl: CtrlLines,
        data: u8,
        timeout: bool,
    ) -> SeqResult {
        let reselect = self.state.main == SeqState::ReselArbitration;

        match sub {
            SubState::ArbComplete => {
                if !timeout {
                    return Ok(());
                }
                let own = self.config.own_id();
                let winner = arbitration_winner(data);
                if winner != Some(own) {
                    bus.release(self.refid);
                    return Err(ControllerFault::ArbitrationLost { winner, own });
                }
                self.enter_sub(SubState::ArbAssertSel);
                bus.ctrl_w(self.refid, S_SEL, S_SEL);
                self.delay(6);
            }
            SubState::ArbAssertSel => {
                if !timeout {
                    return Ok(());
                }
                self.enter_sub(SubState::ArbSetDest);
                bus.data_w(
                    self.refid,
                    (1 << self.config.own_id()) | (1 << self.dest_id),
                );
                self.delay_cycles(4);
            }
            SubState::ArbSetDest => {
                if !timeout {
                    return Ok(());
                }
                self.enter_sub(SubState::ArbReleaseBusy);
                let lines = match self.current() {
                    Some(
                        NcrCommand::SelectAtn | NcrCommand::SelectAtnStop | NcrCommand::SelectAtn3,
                    ) => S_ATN,
                    Some(NcrCommand::Reselect) => S_INP,
                    _ => 0,
                };
                bus.ctrl_w(self.refid, lines, S_ATN | S_BSY | S_INP);
                self.delay(2);
            }
            SubState::ArbReleaseBusy => {
                if !timeout {
                    return Ok(());
                }
                if ctrl & S_BSY != 0 {
                    self.target_responded(bus, reselect);
                } else {
                    self.enter_sub(SubState::ArbTimeoutBusy);
                    if self.fast_select_timeout {
                        self.delay(1);
                    } else {
                        self.delay(
                            Ticks::from(self.select_timeout)
                                * Ticks::from(self.select_timeout_scale),
                        );
                    }
                }
            }
            SubState::ArbTimeoutBusy => {
                if timeout {
                    log::debug!("Selection timeout, aborting");
                    bus.data_w(self.refid, 0);
                    self.enter_sub(SubState::ArbTimeoutAbort);
                    self.delay(1000);
                } else if ctrl & S_BSY != 0 {
                    self.target_responded(bus, reselect);
                }
            }
            SubState::ArbTimeoutAbort => {
                if !timeout {
                    return Ok(());
                }
                if ctrl & S_BSY != 0 {
                    self.target_responded(bus, reselect);
                } else {
                    bus.ctrl_w(self.refid, 0, S_ALL);
                    self.state = State::IDLE;
                    self.istatus.set_disconnect(true);
                    self.dma_dir = DmaDir::None;
                    self.drq_clear();
                    self.reset_disconnect();
                    self.check_irq();
                }
            }
            SubState::ArbDeskewWait => {
                if !timeout {
                    return Ok(());
                }
                bus.data_w(self.refid, 0);
                bus.ctrl_w(self.refid, 0, S_SEL);
                self.mode = if reselect {
                    Mode::Target
                } else {
                    Mode::Initiator
                };
                self.leave_sub();
                return self.step(bus, true);
            }

            SubState::SendWaitSettle => {
                if !timeout {
                    return Ok(());
                }
                self.enter_sub(SubState::SendWaitReq0);
                return self.step(bus, false);
            }
            SubState::SendWaitReq0 => {
                if ctrl & S_REQ != 0 {
                    return Ok(());
                }
                self.leave_sub();
                bus.data_w(self.refid, 0);
                bus.ctrl_w(self.refid, 0, S_ACK);
                return self.step(bus, false);
            }

            SubState::RecvWaitReq1 => {
                if ctrl & S_REQ == 0 {
                    return Ok(());
                }
                self.enter_sub(SubState::RecvWaitSettle);
                self.delay_cycles(Ticks::from(self.sync_period));
            }
            SubState::RecvWaitSettle => {
                if !timeout {
                    return Ok(());
                }
                if self.state.main != SeqState::XfrRecvPad {
                    self.fifo_push(data);
                }
                bus.ctrl_w(self.refid, S_ACK, S_ACK);
                self.enter_sub(SubState::RecvWaitReq0);
                return self.step(bus, false);
            }
            SubState::RecvWaitReq0 => {
                if ctrl & S_REQ != 0 {
                    return Ok(());
                }
                self.leave_sub();
                return self.step(bus, false);
            }

            SubState::TargetWaitAck1 => {
                if ctrl & S_ACK == 0 {
                    return Ok(());
                }
                if self.xfr_phase & S_INP == 0 {
                    self.fifo_push(data);
                    if self.tgt_cdb_pending {
                        self.tgt_cdb_pending = false;
                        self.tgt_left = cdb_length(data);
                    }
                    self.tgt_left = self.tgt_left.saturating_sub(1);
                } else {
                    bus.data_w(self.refid, 0);
                }
                bus.ctrl_w(self.refid, 0, S_REQ);
                self.enter_sub(SubState::TargetWaitAck0);
                return self.step(bus, false);
            }
            SubState::TargetWaitAck0 => {
                if ctrl & S_ACK != 0 {
                    return Ok(());
                }
                self.leave_sub();
                return self.step(bus, false);
            }
        }
        Ok(())
    }

    fn step_main(&mut self, bus: &mut ScsiBus, ctrl: CtrlLines) -> SeqResult {
        let c = self.current();

        match self.state.main {
            SeqState::Idle => (),

            SeqState::SelArbitrationInit => {
                // Wait until the message/command bytes are in the FIFO
                if self.fifo.is_empty() || (self.dma_command && !self.status.tc0()) {
                    return Ok(());
                }
                self.command_length = self.fifo.peek().map_or(0, cdb_length);
                self.enter(SeqState::SelArbitration);
                return self.step(bus, false);
            }
            SeqState::SelArbitration => {
                self.msg_left = if c == Some(NcrCommand::SelectAtn3) { 3 } else { 1 };
                self.enter(if c == Some(NcrCommand::Select) {
                    SeqState::SelWaitReq
                } else {
                    SeqState::SelAtnWaitReq
                });
                bus.ctrl_wait(self.refid, S_REQ, S_REQ);
                if ctrl & S_REQ != 0 {
                    return self.step(bus, false);
                }
            }
            SeqState::SelAtnWaitReq => {
                if ctrl & S_REQ == 0 {
                    return Ok(());
                }
                if ctrl & S_PHASE_MASK != ScsiPhase::MessageOut.lines() {
                    self.function_complete();
                    return Ok(());
                }
                if self.msg_left <= 1 && c != Some(NcrCommand::SelectAtnStop) {
                    bus.ctrl_w(self.refid, 0, S_ATN);
                }
                self.enter(SeqState::SelAtnSendByte);
                self.send_byte(bus)?;
            }
            SeqState::SelAtnSendByte => {
                self.msg_left = self.msg_left.saturating_sub(1);
                if c == Some(NcrCommand::SelectAtnStop) {
                    self.seq = 1;
                    self.function_complete();
                } else if self.msg_left > 0 {
                    self.enter(SeqState::SelAtnWaitReq);
                } else {
                    self.seq = 2;
                    self.command_length = self.fifo.peek().map_or(0, cdb_length);
                    self.enter(SeqState::SelWaitReq);
                }
            }
            SeqState::SelWaitReq => {
                if ctrl & S_REQ == 0 {
                    return Ok(());
                }
                if ctrl & S_PHASE_MASK != ScsiPhase::Command.lines() {
                    if self.command_length == 0 {
                        self.seq = 4;
                    }
                    bus.ctrl_wait(self.refid, 0, S_REQ);
                    self.function_bus_complete();
                    return Ok(());
                }
                if self.seq < 3 {
                    self.seq = 3;
                }
                self.enter(SeqState::SelSendByte);
                self.send_byte(bus)?;
            }
            SeqState::SelSendByte => {
                if self.command_length > 0 {
                    self.command_length -= 1;
                    if self.command_length == 0 {
                        self.seq = 4;
                    }
                }
                self.enter(SeqState::SelWaitReq);
            }

            SeqState::ReselArbitration => {
                // Identify message towards the reselected initiator
                self.dma_command = false;
                self.xfr_phase = ScsiPhase::MessageIn.lines();
                self.tgt_left = 1;
                self.tgt_cdb_pending = false;
                self.enter(SeqState::TargetXfr);
                return self.step(bus, false);
            }

            SeqState::CompleteRecvByteAck => {
                self.enter(SeqState::CompleteRecvWaitReq);
                bus.ctrl_w(self.refid, 0, S_ACK);
            }
            SeqState::CompleteRecvWaitReq => {
                if ctrl & S_REQ == 0 {
                    return Ok(());
                }
                if ctrl & S_PHASE_MASK != ScsiPhase::MessageIn.lines() {
                    self.discard_chained();
                    self.bus_complete();
                } else {
                    self.enter(SeqState::CompleteRecvByteNack);
                    self.recv_byte(bus)?;
                }
            }
            SeqState::CompleteRecvByteNack => self.function_complete(),

            SeqState::MsgAcceptWaitReq => {
                if ctrl & (S_REQ | S_BSY) == S_BSY {
                    return Ok(());
                }
                self.bus_complete();
            }

            SeqState::Xfr => self.step_xfr(bus)?,
            SeqState::XfrSendByte => {
                self.enter(SeqState::XfrWaitReq);
                return self.step(bus, false);
            }
            SeqState::XfrWaitReq => {
                if ctrl & S_REQ == 0 {
                    return Ok(());
                }
                let input = self.xfr_phase & S_INP != 0;
                let done = if self.dma_command {
                    self.status.tc0() && (self.dma_dir == DmaDir::In || self.fifo.is_empty())
                } else if input {
                    self.fifo.len() == 1
                } else {
                    self.fifo.is_empty()
                };

                if done {
                    self.enter(SeqState::XfrBusComplete);
                } else if ctrl & S_PHASE_MASK != self.xfr_phase {
                    self.discard_chained();
                    self.enter(SeqState::XfrPhaseChange);
                } else {
                    self.enter(SeqState::Xfr);
                }
                return self.step(bus, false);
            }
            SeqState::XfrRecvByteAck => {
                self.enter(SeqState::XfrWaitReq);
                bus.ctrl_w(self.refid, 0, S_ACK);
            }
            SeqState::XfrRecvByteNack => {
                self.enter(SeqState::XfrFunctionComplete);
                return self.step(bus, false);
            }
            SeqState::XfrFunctionComplete => {
                if self.dma_command && !self.status.tc0() {
                    return Ok(());
                }
                self.function_complete();
            }
            SeqState::XfrBusComplete => {
                if self.dma_command && !self.status.tc0() {
                    return Ok(());
                }
                self.bus_complete();
            }
            SeqState::XfrPhaseChange => {
                // Incoming bytes still in the FIFO are drained by DMA first
                if self.dma_dir == DmaDir::In && !self.fifo.is_empty() {
                    return Ok(());
                }
                self.bus_complete();
            }

            SeqState::XfrSendPadWaitReq => {
                if ctrl & S_REQ == 0 {
                    return Ok(());
                }
                if ctrl & S_PHASE_MASK != self.xfr_phase {
                    self.discard_chained();
                    self.bus_complete();
                } else {
                    self.enter(SeqState::XfrSendPad);
                    self.send_byte(bus)?;
                }
            }
            SeqState::XfrSendPad => {
                self.decrement_tcounter();
                if self.status.tc0() {
                    self.function_complete();
                } else {
                    self.enter(SeqState::XfrSendPadWaitReq);
                    return self.step(bus, false);
                }
            }
            SeqState::XfrRecvPadWaitReq => {
                if ctrl & S_REQ == 0 {
                    return Ok(());
                }
                if ctrl & S_PHASE_MASK != self.xfr_phase {
                    self.discard_chained();
                    self.bus_complete();
                } else {
                    self.enter(SeqState::XfrRecvPad);
                    self.recv_byte(bus)?;
                }
            }
            SeqState::XfrRecvPad => {
                self.decrement_tcounter();
                bus.ctrl_w(self.refid, 0, S_ACK);
                if self.status.tc0() {
                    self.function_complete();
                } else {
                    self.enter(SeqState::XfrRecvPadWaitReq);
                    return self.step(bus, false);
                }
            }

            SeqState::TargetXfr => self.step_target_xfr(bus)?,
        }
        Ok(())
    }

    /// Starts the next byte of an initiator information transfer
    fn step_xfr(&mut self, bus: &mut ScsiBus) -> SeqResult {
        match ScsiPhase::from_ctrl(self.xfr_phase) {
            Some(p @ (ScsiPhase::DataOut | ScsiPhase::Command | ScsiPhase::MessageOut)) => {
                self.enter(SeqState::XfrSendByte);
                if self.fifo.is_empty() {
                    // Wait for DMA to fill the FIFO
                    return Ok(());
                }
                let last = if self.dma_command {
                    self.tcounter == 1
                } else {
                    self.fifo.len() == 1
                };
                if p == ScsiPhase::MessageOut && last {
                    bus.ctrl_w(self.refid, 0, S_ATN);
                }
                self.send_byte(bus)
            }
            Some(p @ (ScsiPhase::DataIn | ScsiPhase::Status | ScsiPhase::MessageIn)) => {
                if self.fifo.is_full() {
                    // Wait for DMA to drain the FIFO
                    return Ok(());
                }
                if self.dma_command && self.dma_remaining() <= self.fifo.len() {
                    // Everything counted has been received
                    self.enter(SeqState::XfrBusComplete);
                    return self.step(bus, false);
                }
                let last = p == ScsiPhase::MessageIn && (!self.dma_command || self.tcounter == 1);
                self.enter(if last {
                    SeqState::XfrRecvByteNack
                } else {
                    SeqState::XfrRecvByteAck
                });
                self.recv_byte(bus)
            }
            None => {
                log::warn!("Transfer in reserved phase {:X}", self.xfr_phase);
                self.function_complete();
                Ok(())
            }
        }
    }

    fn target_xfr_done(&self, input: bool) -> bool {
        if self.dma_command {
            self.status.tc0() && self.fifo.is_empty()
        } else if input {
            self.tgt_left == 0
        } else {
            self.tgt_left == 0 && !self.tgt_cdb_pending
        }
    }

    /// Starts the next byte of a target information transfer
    fn step_target_xfr(&mut self, bus: &mut ScsiBus) -> SeqResult {
        let input = self.xfr_phase & S_INP != 0;
        if self.target_xfr_done(input) {
            self.function_complete();
            return Ok(());
        }

        bus.ctrl_w(self.refid, self.xfr_phase, S_PHASE_MASK);
        if input {
            let byte = match self.fifo_pop() {
                Some(b) => b,
                None if self.dma_command => return Ok(()),
                None => return Err(ControllerFault::FifoUnderrun(self.state.main.into())),
            };
            self.tgt_left = self.tgt_left.saturating_sub(1);
            bus.data_w(self.refid, byte);
        } else if self.fifo.is_full()
            || (self.dma_command && self.dma_remaining() <= self.fifo.len())
        {
            // Wait for DMA to drain the FIFO
            return Ok(());
        }
        bus.ctrl_wait(self.refid, S_ACK, S_ACK);
        bus.ctrl_w(self.refid, S_REQ, S_REQ);
        self.enter_sub(SubState::TargetWaitAck1);
        Ok(())
    }
}
