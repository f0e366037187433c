//! SCSI bus, controller and target devices

pub mod bus;
pub mod disk;
pub mod fifo;
pub mod ncr5390;
pub mod subsystem;
pub mod target;
pub mod targetdev;

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};

/// Bitmask of SCSI bus control lines
pub type CtrlLines = u32;

/// I/O: set when information flows from target to initiator
pub const S_INP: CtrlLines = 0x0001;
/// C/D: set for command/status/message information
pub const S_CTL: CtrlLines = 0x0002;
/// MSG
pub const S_MSG: CtrlLines = 0x0004;
pub const S_BSY: CtrlLines = 0x0008;
pub const S_SEL: CtrlLines = 0x0010;
pub const S_REQ: CtrlLines = 0x0020;
pub const S_ACK: CtrlLines = 0x0040;
pub const S_ATN: CtrlLines = 0x0080;
pub const S_RST: CtrlLines = 0x0100;
pub const S_ALL: CtrlLines = 0x01FF;

pub const S_PHASE_MASK: CtrlLines = S_MSG | S_CTL | S_INP;

pub const STATUS_GOOD: u8 = 0;
pub const STATUS_CHECK_CONDITION: u8 = 2;

/// COMMAND COMPLETE message
pub const MSG_COMMAND_COMPLETE: u8 = 0x00;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, Serialize, Deserialize, strum::IntoStaticStr,
)]
/// Information transfer phases, as encoded on MSG/C/D/I/O
pub enum ScsiPhase {
    /// Initiator -> Target
    DataOut = 0,
    /// Target -> Initiator
    DataIn = 1,
    Command = 2,
    Status = 3,
    MessageOut = 6,
    MessageIn = 7,
}

impl ScsiPhase {
    /// Decodes the phase lines of a control line value. Returns `None` for
    /// the two reserved encodings.
    pub fn from_ctrl(ctrl: CtrlLines) -> Option<Self> {
        <Self as FromPrimitive>::from_u32(ctrl & S_PHASE_MASK)
    }

    /// Control line value of this phase
    pub const fn lines(self) -> CtrlLines {
        self as CtrlLines
    }

    /// True if information flows from target to initiator
    pub const fn is_input(self) -> bool {
        self.lines() & S_INP != 0
    }
}

/// Length of a command descriptor block by its group code (top three bits of
/// the operation code).
pub const fn cdb_length(opcode: u8) -> usize {
    const SIZES: [usize; 8] = [6, 10, 6, 6, 6, 12, 6, 10];
    SIZES[(opcode >> 5) as usize]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_decode() {
        assert_eq!(ScsiPhase::from_ctrl(S_BSY | S_REQ), Some(ScsiPhase::DataOut));
        assert_eq!(ScsiPhase::from_ctrl(S_INP), Some(ScsiPhase::DataIn));
        assert_eq!(
            ScsiPhase::from_ctrl(S_BSY | S_MSG | S_CTL | S_INP),
            Some(ScsiPhase::MessageIn)
        );
        assert_eq!(ScsiPhase::from_ctrl(S_MSG), None);
        assert_eq!(ScsiPhase::from_ctrl(S_MSG | S_INP), None);
        assert!(ScsiPhase::Status.is_input());
        assert!(!ScsiPhase::MessageOut.is_input());
    }

    #[test]
    fn cdb_lengths() {
        // TEST UNIT READY, INQUIRY
        assert_eq!(cdb_length(0x00), 6);
        assert_eq!(cdb_length(0x12), 6);
        // READ(10), READ CAPACITY
        assert_eq!(cdb_length(0x28), 10);
        assert_eq!(cdb_length(0x25), 10);
        // READ(12)
        assert_eq!(cdb_length(0xA8), 12);
    }
}
