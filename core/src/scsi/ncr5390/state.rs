//! Sequencer state
//!
//! The sequencer position is a coarse state plus an optional micro-step.
//! Micro-steps (arbitration, byte handshakes) run on behalf of the coarse
//! state; leaving the micro-step resumes the coarse state where it left off.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::IntoStaticStr)]
pub enum SeqState {
    Idle,

    // Disconnected: selection sequences
    /// Waiting for the command bytes to arrive in the FIFO
    SelArbitrationInit,
    SelArbitration,
    SelAtnWaitReq,
    SelAtnSendByte,
    SelWaitReq,
    SelSendByte,

    // Disconnected: reselection sequence
    ReselArbitration,

    // Initiator: command complete sequence
    CompleteRecvByteAck,
    CompleteRecvWaitReq,
    CompleteRecvByteNack,

    // Initiator: message accepted
    MsgAcceptWaitReq,

    // Initiator: transfer information
    Xfr,
    XfrSendByte,
    XfrWaitReq,
    XfrRecvByteAck,
    XfrRecvByteNack,
    XfrFunctionComplete,
    XfrBusComplete,
    /// Target changed phase before the transfer completed
    XfrPhaseChange,

    // Initiator: transfer pad
    XfrSendPadWaitReq,
    XfrSendPad,
    XfrRecvPadWaitReq,
    XfrRecvPad,

    // Target: information transfer
    TargetXfr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::IntoStaticStr)]
pub enum SubState {
    // Arbitration and (re)selection
    ArbComplete,
    ArbAssertSel,
    ArbSetDest,
    ArbReleaseBusy,
    ArbTimeoutBusy,
    ArbTimeoutAbort,
    ArbDeskewWait,

    // Initiator byte send handshake
    SendWaitSettle,
    SendWaitReq0,

    // Initiator byte receive handshake
    RecvWaitReq1,
    RecvWaitSettle,
    RecvWaitReq0,

    // Target byte handshake
    TargetWaitAck1,
    TargetWaitAck0,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    pub main: SeqState,
    pub sub: Option<SubState>,
}

impl State {
    pub const IDLE: Self = Self {
        main: SeqState::Idle,
        sub: None,
    };

    pub fn is_idle(&self) -> bool {
        self.main == SeqState::Idle && self.sub.is_none()
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let main: &'static str = self.main.into();
        match self.sub {
            Some(sub) => {
                let sub: &'static str = sub.into();
                write!(f, "{}.{}", main, sub)
            }
            None => write!(f, "{}", main),
        }
    }
}
