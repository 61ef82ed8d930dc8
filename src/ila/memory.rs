//! Word-addressable memory shared by all units.
//!
//! A `Memory` is a flat array of fixed-width words. Every unit talks to
//! every other unit through it: the max-pooling engine reads and writes the
//! 8-bit tensor memory, the vector/dense/LSTM engines share the 32-bit
//! vector memory.
//!
//! # Addressing
//!
//! Addresses are word addresses. Engines that compute byte addresses shift
//! them right by [`WORD_ADDR_SHIFT`] before access (see [`byte_to_word`]).
//! An address is first reduced modulo the address width, then checked
//! against the memory depth. An address past the depth is a modeling error
//! and is reported, never wrapped.
//!
//! # Example
//!
//! ```
//! use relay_emu::ila::Memory;
//!
//! let mut mem = Memory::new("tensor", 32, 8, 16);
//! mem.write(3, 0x1FF).unwrap();       // truncated to 8 bits
//! assert_eq!(mem.read(3).unwrap(), 0xFF);
//! assert!(mem.read(16).is_err());     // past the depth
//! ```

use std::fmt;

use thiserror::Error;

/// Shift applied to a byte address to get a 32-bit word address.
pub const WORD_ADDR_SHIFT: u32 = 2;

/// Bytes per 32-bit vector word.
pub const WORD_BYTES: u32 = 1 << WORD_ADDR_SHIFT;

/// Convert a byte address into a 32-bit word address.
#[inline]
pub fn byte_to_word(byte_addr: u32) -> u64 {
    (byte_addr >> WORD_ADDR_SHIFT) as u64
}

/// Mask covering the low `width` bits.
#[inline]
pub fn width_mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// Identifier of a memory within a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemId(pub(crate) u16);

impl MemId {
    /// Raw index of this memory.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Errors raised by memory access.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// Word address at or past the memory depth.
    #[error("address 0x{addr:X} out of range for memory '{memory}' (depth {depth} words)")]
    OutOfRange {
        /// Memory name.
        memory: String,
        /// Offending word address (after address-width reduction).
        addr: u64,
        /// Number of words in the memory.
        depth: usize,
    },
}

/// A flat word-addressable memory.
#[derive(Clone, PartialEq, Eq)]
pub struct Memory {
    name: String,
    addr_width: u32,
    data_width: u32,
    words: Vec<u64>,
}

impl Memory {
    /// Create a zeroed memory with `depth` words.
    pub fn new(name: impl Into<String>, addr_width: u32, data_width: u32, depth: usize) -> Self {
        Self {
            name: name.into(),
            addr_width,
            data_width,
            words: vec![0; depth],
        }
    }

    /// Memory name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Address width in bits.
    pub fn addr_width(&self) -> u32 {
        self.addr_width
    }

    /// Data width in bits.
    pub fn data_width(&self) -> u32 {
        self.data_width
    }

    /// Number of words.
    pub fn depth(&self) -> usize {
        self.words.len()
    }

    /// Reduce an address to the address width and check it against the depth.
    pub fn resolve(&self, addr: u64) -> Result<usize, MemoryError> {
        let addr = addr & width_mask(self.addr_width);
        if addr < self.words.len() as u64 {
            Ok(addr as usize)
        } else {
            Err(MemoryError::OutOfRange {
                memory: self.name.clone(),
                addr,
                depth: self.words.len(),
            })
        }
    }

    /// Load one word.
    #[inline]
    pub fn read(&self, addr: u64) -> Result<u64, MemoryError> {
        let idx = self.resolve(addr)?;
        Ok(self.words[idx])
    }

    /// Store one word (truncated to the data width).
    #[inline]
    pub fn write(&mut self, addr: u64, value: u64) -> Result<(), MemoryError> {
        let idx = self.resolve(addr)?;
        self.words[idx] = value & width_mask(self.data_width);
        Ok(())
    }

    /// Store one word at an index already returned by [`Memory::resolve`].
    #[inline]
    pub(crate) fn write_resolved(&mut self, idx: usize, value: u64) {
        self.words[idx] = value & width_mask(self.data_width);
    }

    /// Write consecutive words starting at `addr`.
    ///
    /// Every address is checked first; on error nothing is written.
    pub fn write_slice(&mut self, addr: u64, values: &[u64]) -> Result<(), MemoryError> {
        let indices = (0..values.len())
            .map(|i| self.resolve(addr.wrapping_add(i as u64)))
            .collect::<Result<Vec<_>, _>>()?;
        for (idx, &value) in indices.into_iter().zip(values) {
            self.write_resolved(idx, value);
        }
        Ok(())
    }

    /// Read `len` consecutive words starting at `addr`.
    pub fn read_slice(&self, addr: u64, len: usize) -> Result<Vec<u64>, MemoryError> {
        (0..len)
            .map(|i| self.read(addr.wrapping_add(i as u64)))
            .collect()
    }

    /// All words, for display and comparison.
    pub fn as_slice(&self) -> &[u64] {
        &self.words
    }
}

impl fmt::Debug for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Only show non-zero words
        let non_zero = self.words.iter().filter(|w| **w != 0).count();
        write!(
            f,
            "Memory {{ name: {:?}, addr_width: {}, data_width: {}, depth: {}, non_zero: {} }}",
            self.name,
            self.addr_width,
            self.data_width,
            self.words.len(),
            non_zero
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_write_truncates_to_data_width() {
        let mut mem = Memory::new("m", 32, 8, 4);
        mem.write(1, 0x1234).unwrap();
        assert_eq!(mem.read(1).unwrap(), 0x34);
        assert_eq!(mem.read(0).unwrap(), 0);
    }

    #[test]
    fn test_out_of_range_is_reported() {
        let mem = Memory::new("m", 32, 32, 4);
        let err = mem.read(4).unwrap_err();
        assert_eq!(
            err,
            MemoryError::OutOfRange {
                memory: "m".to_string(),
                addr: 4,
                depth: 4
            }
        );
    }

    #[test]
    fn test_address_reduced_to_addr_width() {
        // 4-bit addresses: 0x13 reduces to 0x3
        let mut mem = Memory::new("m", 4, 32, 16);
        mem.write(0x13, 7).unwrap();
        assert_eq!(mem.read(3).unwrap(), 7);
    }

    #[test]
    fn test_byte_to_word() {
        assert_eq!(byte_to_word(0), 0);
        assert_eq!(byte_to_word(4), 1);
        assert_eq!(byte_to_word(7), 1);
        assert_eq!(byte_to_word(0x100), 0x40);
    }

    #[test]
    fn test_slices() {
        let mut mem = Memory::new("m", 32, 32, 8);
        mem.write_slice(2, &[1, 2, 3]).unwrap();
        assert_eq!(mem.read_slice(2, 3).unwrap(), vec![1, 2, 3]);
        assert!(mem.write_slice(6, &[1, 2, 3]).is_err());
    }

    #[test]
    fn test_failed_slice_write_leaves_memory_unchanged() {
        let mut mem = Memory::new("m", 32, 8, 4);
        mem.write(3, 5).unwrap();
        assert!(mem.write_slice(3, &[9, 9]).is_err());
        assert_eq!(mem.as_slice(), &[0, 0, 0, 5]);
    }
}
