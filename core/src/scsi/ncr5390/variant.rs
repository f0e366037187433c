//! Chip family members and their capabilities

use serde::{Deserialize, Serialize};

use super::Mode;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::IntoStaticStr,
)]
/// Emulated chip variant
pub enum ChipVariant {
    #[default]
    #[strum(serialize = "NCR5390")]
    Ncr5390,
    /// Adds configuration register 2, the interrupt bit in the status
    /// register, select with ATN3 and target DMA abort
    #[strum(serialize = "NCR53C90A")]
    Ncr53c90a,
    /// Adds configuration register 3 and FIFO alignment
    #[strum(serialize = "NCR53C94")]
    Ncr53c94,
}

/// Register set and command table of a chip variant
pub struct Capabilities {
    pub config2: bool,
    pub config3: bool,
    pub fifo_align: bool,
    /// Status register bit 7 reflects IRQ; reading status while an
    /// interrupt is pending clears the error bits.
    pub status_interrupt: bool,
    /// Command validity by (command code, mode)
    pub valid_command: fn(u8, Mode) -> bool,
}

fn valid_command_5390(cmd: u8, mode: Mode) -> bool {
    let sub = cmd & 0x0F;
    match (cmd >> 4) & 7 {
        0 => sub <= 3,
        1 => mode == Mode::Initiator && (sub <= 2 || sub == 8 || sub == 10),
        2 => mode == Mode::Target && sub <= 11 && sub != 6,
        4 => mode == Mode::Disconnected && sub <= 5,
        _ => false,
    }
}

fn valid_command_53c90a(cmd: u8, mode: Mode) -> bool {
    let sub = cmd & 0x0F;
    match (cmd >> 4) & 7 {
        0 => sub <= 3 || (mode == Mode::Target && sub == 4),
        1 => mode == Mode::Initiator && (sub <= 2 || sub == 8 || sub == 10 || sub == 11),
        2 => mode == Mode::Target && sub <= 11 && sub != 6,
        4 => mode == Mode::Disconnected && sub <= 6,
        _ => false,
    }
}

static CAPS_5390: Capabilities = Capabilities {
    config2: false,
    config3: false,
    fifo_align: false,
    status_interrupt: false,
    valid_command: valid_command_5390,
};

static CAPS_53C90A: Capabilities = Capabilities {
    config2: true,
    config3: false,
    fifo_align: false,
    status_interrupt: true,
    valid_command: valid_command_53c90a,
};

static CAPS_53C94: Capabilities = Capabilities {
    config2: true,
    config3: true,
    fifo_align: true,
    status_interrupt: true,
    valid_command: valid_command_53c90a,
};

impl ChipVariant {
    pub fn capabilities(self) -> &'static Capabilities {
        match self {
            Self::Ncr5390 => &CAPS_5390,
            Self::Ncr53c90a => &CAPS_53C90A,
            Self::Ncr53c94 => &CAPS_53C94,
        }
    }

    /// Checks whether a command code (DMA bit stripped) may start in the given mode
    pub fn is_valid_command(self, cmd: u8, mode: Mode) -> bool {
        (self.capabilities().valid_command)(cmd & 0x7F, mode)
    }
}
