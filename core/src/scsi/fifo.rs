//! 16-byte staging FIFO between the SCSI bus and the host/DMA side

use arrayvec::ArrayVec;
use serde::{Deserialize, Serialize};

pub const FIFO_DEPTH: usize = 16;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fifo {
    bytes: ArrayVec<u8, FIFO_DEPTH>,
}

impl Fifo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a byte at the tail. Returns `false` and drops the byte if the
    /// FIFO is full.
    pub fn push(&mut self, val: u8) -> bool {
        self.bytes.try_push(val).is_ok()
    }

    /// Takes the byte at the head
    pub fn pop(&mut self) -> Option<u8> {
        if self.bytes.is_empty() {
            return None;
        }
        Some(self.bytes.remove(0))
    }

    pub fn peek(&self) -> Option<u8> {
        self.bytes.first().copied()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.bytes.is_full()
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order() {
        let mut f = Fifo::new();
        for i in 0..10 {
            assert!(f.push(i));
        }
        for i in 0..5 {
            assert_eq!(f.pop(), Some(i));
        }
        f.push(0xAA);
        assert_eq!(f.as_slice(), &[5, 6, 7, 8, 9, 0xAA]);
        assert_eq!(f.peek(), Some(5));
    }

    #[test]
    fn overflow_drops() {
        let mut f = Fifo::new();
        for i in 0..FIFO_DEPTH as u8 {
            assert!(f.push(i));
        }
        assert!(f.is_full());
        assert!(!f.push(0xFF));
        assert_eq!(f.len(), FIFO_DEPTH);
        assert_eq!(f.pop(), Some(0));
        assert!(!f.as_slice().contains(&0xFF));
    }

    #[test]
    fn underflow() {
        let mut f = Fifo::new();
        assert_eq!(f.pop(), None);
        f.push(1);
        f.clear();
        assert!(f.is_empty());
        assert_eq!(f.pop(), None);
    }

    #[test]
    fn interleaved_law() {
        // Pseudo-random interleaving of pushes and pops, checked against a
        // reference queue.
        let mut f = Fifo::new();
        let mut reference = std::collections::VecDeque::new();
        let mut seed: u32 = 0x1234_5678;
        for n in 0..2000u32 {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12345);
            if (seed >> 16) % 3 != 0 {
                let v = n as u8;
                if f.push(v) {
                    reference.push_back(v);
                } else {
                    assert_eq!(reference.len(), FIFO_DEPTH);
                }
            } else {
                assert_eq!(f.pop(), reference.pop_front());
            }
            assert!(f.len() <= FIFO_DEPTH);
            assert_eq!(f.len(), reference.len());
        }
    }
}
