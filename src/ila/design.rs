//! The immutable unit tree.
//!
//! A [`Design`] is produced once by [`ModelBuilder`](super::ModelBuilder)
//! and never changes shape afterwards: only the values held in the
//! [`Snapshot`] move from step to step.

use std::collections::HashMap;

use super::memory::MemId;
use super::state::{RegId, RegisterDecl, Snapshot};
use super::unit::{InstrId, Instruction, Unit, UnitId};

/// Static structure of a model: units, instructions, register declarations.
#[derive(Debug)]
pub struct Design {
    pub(crate) units: Vec<Unit>,
    pub(crate) instructions: Vec<Instruction>,
    pub(crate) registers: Vec<RegisterDecl>,
    pub(crate) memory_names: Vec<String>,
    pub(crate) unit_lookup: HashMap<String, UnitId>,
}

impl Design {
    /// Name of the root unit.
    pub fn name(&self) -> &str {
        &self.units[0].name
    }

    /// Borrow a unit.
    pub fn unit(&self, id: UnitId) -> &Unit {
        &self.units[id.index()]
    }

    /// All units, parents before children.
    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    /// Borrow an instruction.
    pub fn instruction(&self, id: InstrId) -> &Instruction {
        &self.instructions[id.index()]
    }

    /// Number of instructions in the whole tree.
    pub fn instruction_count(&self) -> usize {
        self.instructions.len()
    }

    /// Borrow a register declaration.
    pub fn register(&self, id: RegId) -> &RegisterDecl {
        &self.registers[id.index()]
    }

    /// All register declarations, indexed by [`RegId`].
    pub fn registers(&self) -> &[RegisterDecl] {
        &self.registers
    }

    /// Look up a unit by name.
    pub fn find_unit(&self, name: &str) -> Option<UnitId> {
        self.unit_lookup.get(name).copied()
    }

    /// Look up a register by unit and register name.
    pub fn find_register(&self, unit: &str, name: &str) -> Option<RegId> {
        let unit = self.find_unit(unit)?;
        self.unit(unit)
            .registers
            .iter()
            .copied()
            .find(|r| self.registers[r.index()].name == name)
    }

    /// Look up a memory by name.
    pub fn find_memory(&self, name: &str) -> Option<MemId> {
        self.memory_names
            .iter()
            .position(|n| n == name)
            .map(|i| MemId(i as u16))
    }

    /// Fully qualified register name, `unit.register`.
    pub fn register_path(&self, id: RegId) -> String {
        let decl = self.register(id);
        format!("{}.{}", self.unit(decl.unit).name, decl.name)
    }

    /// True if `ancestor` is `unit` itself or one of its ancestors.
    pub fn is_self_or_ancestor(&self, ancestor: UnitId, unit: UnitId) -> bool {
        let mut cur = Some(unit);
        while let Some(id) = cur {
            if id == ancestor {
                return true;
            }
            cur = self.units[id.index()].parent;
        }
        false
    }

    /// Effective validity of every unit against `snapshot`.
    ///
    /// A unit is valid when its parent is valid and its own predicate holds.
    /// The root is always valid.
    pub fn validity(&self, snapshot: &Snapshot) -> Vec<bool> {
        let mut valid = vec![false; self.units.len()];
        for (i, unit) in self.units.iter().enumerate() {
            let parent_ok = match unit.parent {
                None => true,
                Some(p) => valid[p.index()],
            };
            // Children of an invalid unit are never evaluated
            valid[i] = parent_ok && unit.own_valid(snapshot);
        }
        valid
    }

    /// Instructions of `unit` whose decode predicates hold on `snapshot`,
    /// ignoring validity.
    pub fn decoded_in(&self, unit: UnitId, snapshot: &Snapshot) -> Vec<InstrId> {
        self.unit(unit)
            .instructions
            .iter()
            .copied()
            .filter(|i| self.instruction(*i).decodes(snapshot))
            .collect()
    }
}
