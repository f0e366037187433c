use super::*;
use crate::debuggable::{Debuggable, DebuggablePropertyValue, find_property};
use crate::scsi::fifo::FIFO_DEPTH;

#[test]
fn fifo_overflow_underflow() {
    let mut sys = testsys(ChipVariant::Ncr5390);

    for i in 0..(FIFO_DEPTH as u8 + 1) {
        write(&mut sys, NcrReg::FIFO, i);
    }
    assert_eq!(read(&mut sys, NcrReg::FLAGS_OFFSET), FIFO_DEPTH as u8);

    // The write to the full FIFO was dropped
    let fifo = drain_fifo(&mut sys);
    assert_eq!(fifo, (0..FIFO_DEPTH as u8).collect::<Vec<_>>());

    assert_eq!(read(&mut sys, NcrReg::FIFO), 0);
    assert_eq!(read(&mut sys, NcrReg::FLAGS_OFFSET), 0);
}

#[test]
fn flush_fifo() {
    let mut sys = testsys(ChipVariant::Ncr5390);
    fill_fifo(&mut sys, &[1, 2, 3]);
    write(&mut sys, NcrReg::COMMAND, 0x01);
    assert_eq!(read(&mut sys, NcrReg::FLAGS_OFFSET), 0);
    assert_eq!(read(&mut sys, NcrReg::COMMAND), 0x01);
    assert!(!sys.irq());
    assert!(sys.controller().pending_commands().is_empty());
}

#[test]
fn transfer_counter() {
    let mut sys = testsys(ChipVariant::Ncr5390);

    set_tcount(&mut sys, 0x1234);
    // Reads show the counter, loaded only by DMA commands
    assert_eq!(read(&mut sys, NcrReg::TCOUNT_LO), 0);
    assert_eq!(read(&mut sys, NcrReg::TCOUNT_HI), 0);

    write(&mut sys, NcrReg::COMMAND, 0x80);
    assert_eq!(read(&mut sys, NcrReg::TCOUNT_LO), 0x34);
    assert_eq!(read(&mut sys, NcrReg::TCOUNT_HI), 0x12);
    assert_eq!(sys.controller().tcounter(), 0x1234);

    // Non-DMA commands leave the counter alone
    set_tcount(&mut sys, 0x10);
    write(&mut sys, NcrReg::COMMAND, 0x00);
    assert_eq!(sys.controller().tcounter(), 0x1234);
}

#[test]
fn variant_register_sets() {
    let mut sys = testsys(ChipVariant::Ncr5390);
    assert_eq!(sys.read(NcrReg::CONFIG2 as Address), None);
    assert_eq!(sys.write(NcrReg::CONFIG2 as Address, 1), None);
    assert_eq!(sys.read(NcrReg::CONFIG3 as Address), None);
    assert_eq!(sys.write(NcrReg::FIFO_ALIGN as Address, 1), None);
    assert_eq!(sys.read(0x0D), None);

    let mut sys = testsys(ChipVariant::Ncr53c90a);
    write(&mut sys, NcrReg::CONFIG2, 0x55);
    assert_eq!(read(&mut sys, NcrReg::CONFIG2), 0x55);
    assert_eq!(sys.read(NcrReg::CONFIG3 as Address), None);
    assert_eq!(sys.write(NcrReg::FIFO_ALIGN as Address, 1), None);

    let mut sys = testsys(ChipVariant::Ncr53c94);
    write(&mut sys, NcrReg::CONFIG3, 0xAA);
    assert_eq!(read(&mut sys, NcrReg::CONFIG3), 0xAA);
    assert_eq!(sys.write(NcrReg::FIFO_ALIGN as Address, 1), Some(()));
    // Write-only
    assert_eq!(sys.read(NcrReg::FIFO_ALIGN as Address), None);
    assert_eq!(sys.read(NcrReg::CLOCK as Address), None);
}

#[test]
fn address_decoding() {
    let mut sys = testsys(ChipVariant::Ncr5390);
    // Only the low four address bits decode a register
    sys.write(0x1000 | NcrReg::FIFO as Address, 0x5A).unwrap();
    assert_eq!(read(&mut sys, NcrReg::FLAGS_OFFSET), 1);
    assert_eq!(sys.read(0xF0 | NcrReg::FIFO as Address), Some(0x5A));
}

#[test]
fn status_interrupt_bit() {
    // 5390: no interrupt bit in the status register
    let mut sys = testsys(ChipVariant::Ncr5390);
    write(&mut sys, NcrReg::COMMAND, 0x10);
    assert!(sys.irq());
    assert_eq!(read(&mut sys, NcrReg::STATUS_DESTID) & 0x80, 0);

    let mut sys = testsys(ChipVariant::Ncr53c90a);
    write(&mut sys, NcrReg::COMMAND, 0x10);
    assert!(sys.irq());
    assert_ne!(read(&mut sys, NcrReg::STATUS_DESTID) & 0x80, 0);
    assert_eq!(read(&mut sys, NcrReg::ISTATUS_TIMEOUT), 0x40);
    assert_eq!(read(&mut sys, NcrReg::STATUS_DESTID) & 0x80, 0);
}

#[test]
fn status_read_clears_errors() {
    let mut sys = testsys(ChipVariant::Ncr53c90a);

    // Illegal command raises IRQ, queue another and overflow the stack
    write(&mut sys, NcrReg::COMMAND, 0x10);
    write(&mut sys, NcrReg::COMMAND, 0x00);
    write(&mut sys, NcrReg::COMMAND, 0x00);
    assert_eq!(read(&mut sys, NcrReg::STATUS_DESTID) & 0xC0, 0xC0);
    assert_eq!(read(&mut sys, NcrReg::STATUS_DESTID) & 0xC0, 0x80);

    // The 5390 keeps the error bits until the interrupt is acknowledged
    let mut sys = testsys(ChipVariant::Ncr5390);
    write(&mut sys, NcrReg::COMMAND, 0x10);
    write(&mut sys, NcrReg::COMMAND, 0x00);
    write(&mut sys, NcrReg::COMMAND, 0x00);
    assert_eq!(read(&mut sys, NcrReg::STATUS_DESTID) & 0x40, 0x40);
    assert_eq!(read(&mut sys, NcrReg::STATUS_DESTID) & 0x40, 0x40);
    assert_eq!(read(&mut sys, NcrReg::ISTATUS_TIMEOUT), 0x40);
    assert_eq!(read(&mut sys, NcrReg::STATUS_DESTID) & 0x40, 0);
}

#[test]
fn test_mode_latches() {
    let mut sys = testsys(ChipVariant::Ncr5390);

    write(&mut sys, NcrReg::CONFIG, 0x0F);
    assert!(sys.controller().test_mode());
    write(&mut sys, NcrReg::CONFIG, 0x07);
    assert!(sys.controller().test_mode());
    write(&mut sys, NcrReg::TEST, 0x01);

    write(&mut sys, NcrReg::COMMAND, 0x02);
    assert!(!sys.controller().test_mode());
}

#[test]
fn chip_reset() {
    let mut sys = testsys(ChipVariant::Ncr53c90a);

    write(&mut sys, NcrReg::CONFIG, 0x4F);
    write(&mut sys, NcrReg::CONFIG2, 0x55);
    write(&mut sys, NcrReg::SEQ_PERIOD, 0x1F);
    write(&mut sys, NcrReg::CLOCK, 5);
    fill_fifo(&mut sys, &[1, 2]);
    write(&mut sys, NcrReg::COMMAND, 0x02);

    assert_eq!(read(&mut sys, NcrReg::CONFIG), 0x07);
    assert_eq!(read(&mut sys, NcrReg::CONFIG2), 0);
    assert_eq!(read(&mut sys, NcrReg::FLAGS_OFFSET), 0);
    assert_eq!(read(&mut sys, NcrReg::COMMAND), 0);
    assert!(!sys.irq());

    let props = sys.get_debug_properties();
    assert_eq!(
        find_property(&props, &["Controller", "Registers", "Sync period"]),
        Some(&DebuggablePropertyValue::UnsignedDecimal(5))
    );
    assert_eq!(
        find_property(&props, &["Controller", "Registers", "Clock conversion"]),
        Some(&DebuggablePropertyValue::UnsignedDecimal(2))
    );
}

#[test]
fn reset_while_stack_full() {
    let mut sys = testsys(ChipVariant::Ncr5390);

    write(&mut sys, NcrReg::COMMAND, 0x10);
    write(&mut sys, NcrReg::COMMAND, 0x00);
    // Stack full: even a reset is refused
    write(&mut sys, NcrReg::COMMAND, 0x02);
    assert!(sys.irq());
    assert_eq!(sys.controller().pending_commands(), &[0x10, 0x00]);

    assert_eq!(read(&mut sys, NcrReg::ISTATUS_TIMEOUT), 0x40);
    assert!(sys.controller().pending_commands().is_empty());
}

#[test]
fn reset_jumps_queue() {
    let mut sys = testsys(ChipVariant::Ncr5390);

    // The illegal command stays on the stack until acknowledged
    write(&mut sys, NcrReg::COMMAND, 0x10);
    assert!(sys.irq());
    assert_eq!(sys.controller().pending_commands(), &[0x10]);

    write(&mut sys, NcrReg::COMMAND, 0x02);
    assert!(sys.controller().pending_commands().is_empty());
    assert!(!sys.irq());
    assert_eq!(read(&mut sys, NcrReg::ISTATUS_TIMEOUT), 0);
}

#[test]
fn debug_properties() {
    let mut sys = testsys_disk(ChipVariant::Ncr53c94);
    fill_fifo(&mut sys, &[0xDE, 0xAD]);

    let props = sys.get_debug_properties();
    assert_eq!(
        find_property(&props, &["Controller", "Variant"]),
        Some(&DebuggablePropertyValue::StaticStr("NCR53C94"))
    );
    assert_eq!(
        find_property(&props, &["Controller", "FIFO"]),
        Some(&DebuggablePropertyValue::String("DEAD".to_string()))
    );
    assert_eq!(
        find_property(&props, &["Controller", "Mode"]),
        Some(&DebuggablePropertyValue::StaticStr("Disconnected"))
    );
    assert!(find_property(&props, &["Target 0", "SCSI ID"]).is_some());
}
