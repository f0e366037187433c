use std::io::Cursor;

use super::*;
use crate::savestate::{load_state_from, save_state_to};
use crate::scsi::ncr5390::Mode;
use crate::scsi::STATUS_GOOD;

fn save_and_load(sys: &ScsiSubsystem) -> ScsiSubsystem {
    let mut data = Cursor::new(vec![]);
    save_state_to(&mut data, sys).unwrap();
    data.set_position(0);
    load_state_from(data).unwrap()
}

/// Reads `count` bytes through DMA, ticking as needed
fn dma_in_partial(sys: &mut ScsiSubsystem, count: usize) -> Vec<u8> {
    let mut result = vec![];
    let mut ticks = 0;
    while result.len() < count {
        if sys.drq() {
            result.push(sys.dma_read().unwrap());
            continue;
        }
        assert!(ticks < TIMEOUT, "no data within {} ticks", TIMEOUT);
        sys.tick(1).unwrap();
        ticks += 1;
    }
    result
}

#[test]
fn idle_roundtrip() {
    let mut sys = testsys_disk(ChipVariant::Ncr53c94);
    write(&mut sys, NcrReg::CONFIG3, 0x44);
    fill_fifo(&mut sys, &[1, 2, 3]);

    let mut sys = save_and_load(&sys);
    assert_eq!(sys.controller().variant(), ChipVariant::Ncr53c94);
    assert_eq!(read(&mut sys, NcrReg::CONFIG), OWN_ID);
    assert_eq!(read(&mut sys, NcrReg::CONFIG3), 0x44);
    assert_eq!(drain_fifo(&mut sys), [1, 2, 3]);
    assert!(sys.target(0).is_some());
    assert!(sys.target(1).is_none());
}

#[test]
fn mid_selection() {
    let mut sys = testsys_disk(ChipVariant::Ncr5390);
    write(&mut sys, NcrReg::STATUS_DESTID, 0);
    fill_fifo(&mut sys, &[0x80, 0, 0, 0, 0, 0, 0]);
    write(&mut sys, NcrReg::COMMAND, 0x42);
    sys.tick(5).unwrap();
    assert!(sys.controller().timer_remaining().is_some());

    let mut sys = save_and_load(&sys);
    run_until_irq(&mut sys);
    assert_eq!(ack_irq(&mut sys), (4, 0x18));
    assert_eq!(sys.controller().mode(), Mode::Initiator);
    assert_eq!(complete(&mut sys), STATUS_GOOD);
}

#[test]
fn mid_dma_transfer() {
    let mut sys = testsys_disk(ChipVariant::Ncr53c90a);

    // READ(6), 4 blocks from block 2
    select_atn(&mut sys, &[0x08, 0, 0, 2, 4, 0]);
    set_tcount(&mut sys, 2048);
    write(&mut sys, NcrReg::COMMAND, 0x90);
    let mut data = dma_in_partial(&mut sys, 700);

    let mut sys = save_and_load(&sys);
    data.extend(run_dma_in(&mut sys));
    assert_eq!(read(&mut sys, NcrReg::ISTATUS_TIMEOUT), 0x10);

    let expected = (2..6u8)
        .flat_map(|b| std::iter::repeat_n(b, 512))
        .collect::<Vec<_>>();
    assert_eq!(data, expected);
    assert_eq!(complete(&mut sys), STATUS_GOOD);
}

#[test]
fn disk_contents_survive() {
    let mut sys = testsys_disk(ChipVariant::Ncr5390);

    // WRITE(6), 1 block to block 10
    select_atn(&mut sys, &[0x0A, 0, 0, 10, 1, 0]);
    set_tcount(&mut sys, 512);
    write(&mut sys, NcrReg::COMMAND, 0x90);
    assert_eq!(run_dma_out(&mut sys, &[0xEE; 512]), 512);
    assert_eq!(read(&mut sys, NcrReg::ISTATUS_TIMEOUT), 0x10);
    assert_eq!(complete(&mut sys), STATUS_GOOD);

    let mut sys = save_and_load(&sys);
    select_atn(&mut sys, &[0x08, 0, 0, 10, 1, 0]);
    set_tcount(&mut sys, 512);
    write(&mut sys, NcrReg::COMMAND, 0x90);
    assert_eq!(run_dma_in(&mut sys), [0xEE; 512]);
    assert_eq!(read(&mut sys, NcrReg::ISTATUS_TIMEOUT), 0x10);
    assert_eq!(complete(&mut sys), STATUS_GOOD);
}
