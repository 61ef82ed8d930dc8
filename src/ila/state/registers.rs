//! Register declarations and the flat register file.
//!
//! Every register belongs to exactly one unit and has a declared width of
//! 1 to 64 bits. Values are stored in a `u64` and always kept masked to the
//! declared width, so arithmetic on a register is modulo its width.
//!
//! Registers come in three classes:
//!
//! | Class | Written by | Examples |
//! |-------|------------|----------|
//! | `Input` | harness only | function select, run enable, tensor dimensions |
//! | `Architectural` | instructions | tensor addresses, sizes, enable flags |
//! | `Control` | instructions | loop counters, phase codes, accumulators |

use std::fmt;

use crate::ila::memory::width_mask;
use crate::ila::unit::UnitId;

/// Identifier of a register in the flat register file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegId(pub(crate) u32);

impl RegId {
    /// Raw index of this register.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Register class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterClass {
    /// Driven by the harness every step; instructions may not write it.
    Input,
    /// Addresses, sizes, enable flags, function select latches.
    Architectural,
    /// Loop counters, phase codes, temporaries.
    Control,
}

/// Static description of one register.
#[derive(Debug, Clone)]
pub struct RegisterDecl {
    /// Name, unique within its unit.
    pub name: String,
    /// Width in bits (1..=64).
    pub width: u32,
    /// Register class.
    pub class: RegisterClass,
    /// Owning unit.
    pub unit: UnitId,
}

impl RegisterDecl {
    /// Mask covering the declared width.
    #[inline]
    pub fn mask(&self) -> u64 {
        width_mask(self.width)
    }
}

/// Flat register file holding the value of every register in the tree.
#[derive(Clone, PartialEq, Eq)]
pub struct RegisterFile {
    values: Vec<u64>,
}

impl RegisterFile {
    /// Create a zeroed register file with `count` registers.
    pub fn new(count: usize) -> Self {
        Self {
            values: vec![0; count],
        }
    }

    /// Read a register.
    #[inline]
    pub fn read(&self, reg: RegId) -> u64 {
        self.values[reg.index()]
    }

    /// Write a register. The caller is responsible for masking.
    #[inline]
    pub fn write(&mut self, reg: RegId, value: u64) {
        self.values[reg.index()] = value;
    }

    /// Number of registers.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when the file holds no registers.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// All values, for display and comparison.
    pub fn as_slice(&self) -> &[u64] {
        &self.values
    }
}

impl fmt::Debug for RegisterFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Only show non-zero registers
        let non_zero: Vec<_> = self
            .values
            .iter()
            .enumerate()
            .filter(|(_, v)| **v != 0)
            .collect();

        if non_zero.is_empty() {
            write!(f, "RegisterFile {{ all zero }}")
        } else {
            write!(f, "RegisterFile {{ ")?;
            for (i, (reg, val)) in non_zero.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "#{}: 0x{:X}", reg, val)?;
            }
            write!(f, " }}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_file_read_write() {
        let mut rf = RegisterFile::new(4);
        assert_eq!(rf.len(), 4);
        rf.write(RegId(2), 42);
        assert_eq!(rf.read(RegId(2)), 42);
        assert_eq!(rf.read(RegId(0)), 0);
    }

    #[test]
    fn test_decl_mask() {
        let decl = RegisterDecl {
            name: "flag".to_string(),
            width: 1,
            class: RegisterClass::Control,
            unit: UnitId(0),
        };
        assert_eq!(decl.mask(), 1);
    }

    #[test]
    fn test_debug_shows_non_zero_only() {
        let mut rf = RegisterFile::new(3);
        assert_eq!(format!("{:?}", rf), "RegisterFile { all zero }");
        rf.write(RegId(1), 0xAB);
        assert_eq!(format!("{:?}", rf), "RegisterFile { #1: 0xAB }");
    }
}
