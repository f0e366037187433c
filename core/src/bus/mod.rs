//! Host-side register bus

/// Address on the host bus as seen by a register-mapped peripheral
pub type Address = u32;

/// A peripheral mapped into the address space of a host CPU.
///
/// `None` signals that nothing responds at the given address (open bus).
pub trait BusMember<T> {
    fn read(&mut self, addr: T) -> Option<u8>;
    fn write(&mut self, addr: T, val: u8) -> Option<()>;
}
