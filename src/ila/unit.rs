//! Units and instructions: the nodes of the control hierarchy.
//!
//! Units live in an arena owned by the engine and refer to each other by
//! index. A child records its parent's [`UnitId`]; parents list their
//! children. The root is unit 0, has no parent and is always valid.
//!
//! Children are always created after their parent, so iterating the arena
//! in index order visits every parent before its children. The engine
//! relies on this to compute validity in one pass.

use std::fmt;

use super::state::{RegId, Snapshot};
use super::traits::{DecodeFn, UpdateFn, ValidFn};

/// Identifier of a unit in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(pub(crate) u32);

impl UnitId {
    /// The root unit.
    pub const ROOT: UnitId = UnitId(0);

    /// Raw index of this unit.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Identifier of an instruction in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstrId(pub(crate) u32);

impl InstrId {
    /// Raw index of this instruction.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A guarded, atomic state-update rule.
pub struct Instruction {
    pub(crate) name: String,
    pub(crate) unit: UnitId,
    pub(crate) decode: DecodeFn,
    pub(crate) update: UpdateFn,
}

impl Instruction {
    /// Instruction name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Owning unit.
    pub fn unit(&self) -> UnitId {
        self.unit
    }

    /// Evaluate the decode predicate.
    #[inline]
    pub fn decodes(&self, snapshot: &Snapshot) -> bool {
        (self.decode)(snapshot)
    }
}

impl fmt::Debug for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instruction")
            .field("name", &self.name)
            .field("unit", &self.unit)
            .finish()
    }
}

/// A node of the control hierarchy.
pub struct Unit {
    pub(crate) name: String,
    pub(crate) parent: Option<UnitId>,
    pub(crate) children: Vec<UnitId>,
    pub(crate) registers: Vec<RegId>,
    pub(crate) instructions: Vec<InstrId>,
    /// `None` means always valid (subject to the parent).
    pub(crate) valid: Option<ValidFn>,
}

impl Unit {
    pub(crate) fn new(name: String, parent: Option<UnitId>) -> Self {
        Self {
            name,
            parent,
            children: Vec::new(),
            registers: Vec::new(),
            instructions: Vec::new(),
            valid: None,
        }
    }

    /// Unit name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parent unit, `None` for the root.
    pub fn parent(&self) -> Option<UnitId> {
        self.parent
    }

    /// Child units in creation order.
    pub fn children(&self) -> &[UnitId] {
        &self.children
    }

    /// Registers owned by this unit.
    pub fn registers(&self) -> &[RegId] {
        &self.registers
    }

    /// Instructions in registration order.
    pub fn instructions(&self) -> &[InstrId] {
        &self.instructions
    }

    /// Evaluate this unit's own validity predicate, ignoring the parent.
    #[inline]
    pub fn own_valid(&self, snapshot: &Snapshot) -> bool {
        self.valid.as_ref().map_or(true, |valid| valid(snapshot))
    }
}

impl fmt::Debug for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unit")
            .field("name", &self.name)
            .field("parent", &self.parent)
            .field("children", &self.children)
            .field("registers", &self.registers.len())
            .field("instructions", &self.instructions.len())
            .finish()
    }
}
