//! Register definitions

use num_derive::FromPrimitive;
use proc_bitfield::bitfield;
use serde::{Deserialize, Serialize};

/// Register offsets within the chip's register window
#[allow(non_camel_case_types)]
#[derive(Debug, PartialEq, Eq, Clone, Copy, FromPrimitive, strum::IntoStaticStr)]
pub enum NcrReg {
    /// Transfer counter low (r) / transfer count low (w)
    TCOUNT_LO = 0x0,
    /// Transfer counter high (r) / transfer count high (w)
    TCOUNT_HI = 0x1,
    FIFO = 0x2,
    COMMAND = 0x3,
    /// Status (r) / destination bus ID (w)
    STATUS_DESTID = 0x4,
    /// Interrupt status (r) / select timeout (w)
    ISTATUS_TIMEOUT = 0x5,
    /// Sequence step (r) / synchronous period (w)
    SEQ_PERIOD = 0x6,
    /// FIFO flags (r) / synchronous offset (w)
    FLAGS_OFFSET = 0x7,
    CONFIG = 0x8,
    /// Clock conversion factor (w)
    CLOCK = 0x9,
    /// Test (w)
    TEST = 0xA,
    /// Configuration 2 (53C90A and later)
    CONFIG2 = 0xB,
    /// Configuration 3 (53C94)
    CONFIG3 = 0xC,
    /// FIFO bottom/alignment (w, 53C94)
    FIFO_ALIGN = 0xF,
}

bitfield! {
    /// Status register
    #[derive(Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct NcrStatus(pub u8): Debug, FromStorage, IntoStorage, DerefStorage {
        /// Bus phase (MSG, C/D, I/O), not latched
        pub phase: u8 @ 0..=2,
        pub tcc: bool @ 3,
        /// Transfer counter reached zero
        pub tc0: bool @ 4,
        pub parity: bool @ 5,
        pub gross_error: bool @ 6,
        /// Interrupt pending (53C90A and later)
        pub interrupt: bool @ 7,
    }
}

impl NcrStatus {
    /// Bits surviving a chip reset
    pub const RESET_KEEP: u8 = 0x90;
    /// Bits cleared by acknowledging an interrupt
    pub const ERRORS: u8 = 0x68;
}

bitfield! {
    /// Interrupt status register
    #[derive(Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct NcrIStatus(pub u8): Debug, FromStorage, IntoStorage, DerefStorage {
        pub selected: bool @ 0,
        pub selected_atn: bool @ 1,
        pub reselected: bool @ 2,
        /// Function complete
        pub function: bool @ 3,
        /// Bus service
        pub bus: bool @ 4,
        pub disconnect: bool @ 5,
        pub illegal: bool @ 6,
        pub scsi_reset: bool @ 7,
    }
}

bitfield! {
    /// Configuration register
    #[derive(Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct NcrConfig(pub u8): Debug, FromStorage, IntoStorage, DerefStorage {
        /// Own SCSI ID, used during arbitration
        pub own_id: u8 @ 0..=2,
        pub chip_test: bool @ 3,
        pub parity_enable: bool @ 4,
        pub parity_test: bool @ 5,
        /// Disable the interrupt on an externally caused SCSI reset
        pub reset_irq_disable: bool @ 6,
        pub slow_cable: bool @ 7,
    }
}

bitfield! {
    /// Command register byte
    #[derive(Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct NcrCommandByte(pub u8): Debug, FromStorage, IntoStorage, DerefStorage {
        pub code: u8 @ 0..=6,
        pub sub: u8 @ 0..=3,
        pub group: u8 @ 4..=6,
        /// Command uses the DMA interface and transfer counter
        pub dma: bool @ 7,
    }
}

/// Command codes (without the DMA bit)
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, strum::IntoStaticStr)]
pub enum NcrCommand {
    Nop = 0x00,
    FlushFifo = 0x01,
    Reset = 0x02,
    ResetBus = 0x03,
    TargetDmaAbort = 0x04,

    TransferInfo = 0x10,
    InitiatorComplete = 0x11,
    MessageAccepted = 0x12,
    TransferPad = 0x18,
    SetAtn = 0x1A,
    ResetAtn = 0x1B,

    SendMessage = 0x20,
    SendStatus = 0x21,
    SendData = 0x22,
    DisconnectSequence = 0x23,
    Terminate = 0x24,
    TargetComplete = 0x25,
    Disconnect = 0x27,
    ReceiveMessage = 0x28,
    ReceiveCommand = 0x29,
    ReceiveData = 0x2A,
    ReceiveCommandSequence = 0x2B,

    Reselect = 0x40,
    Select = 0x41,
    SelectAtn = 0x42,
    SelectAtnStop = 0x43,
    EnableSelection = 0x44,
    DisableSelection = 0x45,
    SelectAtn3 = 0x46,
}

impl NcrCommand {
    /// Reset commands execute as soon as they are written
    pub const fn is_immediate_reset(code: u8) -> bool {
        code == Self::Reset as u8 || code == Self::ResetBus as u8
    }
}
