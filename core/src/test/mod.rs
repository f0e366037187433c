//! Scenario tests driving a complete SCSI subsystem through its register
//! window, tick by tick

mod registers;
#[cfg(feature = "savestates")]
mod savestate;

use crate::bus::{Address, BusMember};
use crate::config::ControllerConfig;
use crate::scsi::disk::ScsiTargetDisk;
use crate::scsi::ncr5390::ChipVariant;
use crate::scsi::ncr5390::regs::NcrReg;
use crate::scsi::subsystem::ScsiSubsystem;
use crate::tickable::{Tickable, Ticks};

/// Upper bound on ticks for a single operation to finish
pub const TIMEOUT: Ticks = 200_000;

/// Own SCSI ID of the controller in all scenarios
pub const OWN_ID: u8 = 7;

pub fn testsys(variant: ChipVariant) -> ScsiSubsystem {
    testsys_config(&ControllerConfig {
        variant,
        ..Default::default()
    })
}

pub fn testsys_config(config: &ControllerConfig) -> ScsiSubsystem {
    let mut sys = ScsiSubsystem::new(config);
    write(&mut sys, NcrReg::CONFIG, OWN_ID);
    sys
}

/// Test system with a 64-block disk at SCSI ID 0. Block N is filled with N.
pub fn testsys_disk(variant: ChipVariant) -> ScsiSubsystem {
    let mut sys = testsys(variant);
    let image = (0..64u8)
        .flat_map(|b| std::iter::repeat_n(b, 512))
        .collect::<Vec<_>>();
    sys.attach_target(0, Box::new(ScsiTargetDisk::from_image(image).unwrap()))
        .unwrap();
    sys
}

pub fn write(sys: &mut ScsiSubsystem, reg: NcrReg, val: u8) {
    sys.write(reg as Address, val).unwrap();
}

pub fn read(sys: &mut ScsiSubsystem, reg: NcrReg) -> u8 {
    sys.read(reg as Address).unwrap()
}

pub fn fill_fifo(sys: &mut ScsiSubsystem, bytes: &[u8]) {
    for &b in bytes {
        write(sys, NcrReg::FIFO, b);
    }
}

pub fn drain_fifo(sys: &mut ScsiSubsystem) -> Vec<u8> {
    let len = read(sys, NcrReg::FLAGS_OFFSET);
    (0..len).map(|_| read(sys, NcrReg::FIFO)).collect()
}

pub fn set_tcount(sys: &mut ScsiSubsystem, count: u16) {
    write(sys, NcrReg::TCOUNT_LO, count as u8);
    write(sys, NcrReg::TCOUNT_HI, (count >> 8) as u8);
}

/// Ticks until IRQ is asserted, returning the ticks it took
pub fn run_until_irq(sys: &mut ScsiSubsystem) -> Ticks {
    let mut ticks = 0;
    while !sys.irq() {
        assert!(ticks < TIMEOUT, "no interrupt within {} ticks", TIMEOUT);
        sys.tick(1).unwrap();
        ticks += 1;
    }
    ticks
}

/// Ticks until IRQ is asserted, serving DMA reads whenever DRQ is asserted
pub fn run_dma_in(sys: &mut ScsiSubsystem) -> Vec<u8> {
    let mut result = vec![];
    let mut ticks = 0;
    loop {
        while sys.drq() {
            result.push(sys.dma_read().unwrap());
        }
        if sys.irq() {
            return result;
        }
        assert!(ticks < TIMEOUT, "no interrupt within {} ticks", TIMEOUT);
        sys.tick(1).unwrap();
        ticks += 1;
    }
}

/// Ticks until IRQ is asserted, serving DMA writes from `data` whenever DRQ
/// is asserted. Returns the amount of bytes written.
pub fn run_dma_out(sys: &mut ScsiSubsystem, data: &[u8]) -> usize {
    let mut pos = 0;
    let mut ticks = 0;
    loop {
        while sys.drq() && pos < data.len() {
            sys.dma_write(data[pos]).unwrap();
            pos += 1;
        }
        if sys.irq() {
            return pos;
        }
        assert!(ticks < TIMEOUT, "no interrupt within {} ticks", TIMEOUT);
        sys.tick(1).unwrap();
        ticks += 1;
    }
}

/// Sequence step, interrupt status (acknowledging the interrupt)
pub fn ack_irq(sys: &mut ScsiSubsystem) -> (u8, u8) {
    let seq = read(sys, NcrReg::SEQ_PERIOD);
    let istatus = read(sys, NcrReg::ISTATUS_TIMEOUT);
    (seq, istatus)
}

/// Selects the disk at ID 0 with ATN and sends the given CDB.
/// Returns after the selection interrupt was acknowledged.
pub fn select_atn(sys: &mut ScsiSubsystem, cdb: &[u8]) {
    write(sys, NcrReg::STATUS_DESTID, 0);
    fill_fifo(sys, &[0x80]);
    fill_fifo(sys, cdb);
    write(sys, NcrReg::COMMAND, 0x42);
    run_until_irq(sys);
    assert_eq!(ack_irq(sys), (4, 0x18));
}

/// Runs the command complete sequence, message accepted and the
/// disconnect. Returns the status byte.
pub fn complete(sys: &mut ScsiSubsystem) -> u8 {
    write(sys, NcrReg::COMMAND, 0x11);
    run_until_irq(sys);
    assert_eq!(read(sys, NcrReg::ISTATUS_TIMEOUT), 0x08);
    let fifo = drain_fifo(sys);
    assert_eq!(fifo.len(), 2);
    assert_eq!(fifo[1], crate::scsi::MSG_COMMAND_COMPLETE);

    write(sys, NcrReg::COMMAND, 0x12);
    run_until_irq(sys);
    assert_eq!(read(sys, NcrReg::ISTATUS_TIMEOUT), 0x20);
    fifo[0]
}
