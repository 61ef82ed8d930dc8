//! Model state: every register of every unit plus every memory.
//!
//! A [`Snapshot`] is the complete observable state of the model at a step
//! boundary. Decode predicates, validity predicates and update functions all
//! read from one immutable snapshot; the engine applies the collected
//! updates afterwards. Two snapshots compare equal exactly when every
//! register and every memory word matches.
//!
//! # Example
//!
//! ```
//! use relay_emu::ila::{ModelBuilder, RegisterClass};
//!
//! let mut b = ModelBuilder::new("top");
//! let root = b.root();
//! let count = b.add_register(root, "count", 8, RegisterClass::Control).unwrap();
//! let engine = b.build().unwrap();
//! assert_eq!(engine.snapshot().reg(count), 0);
//! ```

mod registers;

pub use registers::{RegId, RegisterClass, RegisterDecl, RegisterFile};

use super::memory::{MemId, Memory, MemoryError};

/// Complete register and memory state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub(crate) regs: RegisterFile,
    pub(crate) memories: Vec<Memory>,
}

impl Snapshot {
    pub(crate) fn new(regs: RegisterFile, memories: Vec<Memory>) -> Self {
        Self { regs, memories }
    }

    /// Read a register value.
    #[inline]
    pub fn reg(&self, reg: RegId) -> u64 {
        self.regs.read(reg)
    }

    /// Read a register as a 32-bit word (low 32 bits).
    #[inline]
    pub fn reg32(&self, reg: RegId) -> u32 {
        self.regs.read(reg) as u32
    }

    /// Read a one-bit flag register.
    #[inline]
    pub fn flag(&self, reg: RegId) -> bool {
        self.regs.read(reg) != 0
    }

    /// Load one word from a memory.
    #[inline]
    pub fn load(&self, mem: MemId, addr: u64) -> Result<u64, MemoryError> {
        self.memories[mem.index()].read(addr)
    }

    /// Borrow a memory.
    pub fn memory(&self, mem: MemId) -> &Memory {
        &self.memories[mem.index()]
    }

    /// Mutably borrow a memory. Harness use only; instructions go through
    /// the engine's update set.
    pub(crate) fn memory_mut(&mut self, mem: MemId) -> &mut Memory {
        &mut self.memories[mem.index()]
    }

    /// The register file.
    pub fn registers(&self) -> &RegisterFile {
        &self.regs
    }

    /// All memories, in declaration order.
    pub fn memories(&self) -> &[Memory] {
        &self.memories
    }
}
