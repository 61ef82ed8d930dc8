//! Construction of the unit tree.
//!
//! The builder is the only place the tree changes shape. Every structural
//! fault (zero-width register, duplicate name, memory geometry that cannot
//! be addressed) is reported here as a [`ConfigError`] before any step runs.
//!
//! # Example
//!
//! ```
//! use relay_emu::ila::{ModelBuilder, RegisterClass};
//!
//! let mut b = ModelBuilder::new("top");
//! let root = b.root();
//! let go = b.add_input("go", 1).unwrap();
//! let count = b.add_register(root, "count", 4, RegisterClass::Control).unwrap();
//! b.add_instruction(
//!     root,
//!     "increment",
//!     move |s| s.flag(go),
//!     move |s, u| {
//!         u.set(count, s.reg(count) + 1);
//!         Ok(())
//!     },
//! )
//! .unwrap();
//!
//! let mut engine = b.build().unwrap();
//! engine.set_input(go, 1);
//! engine.step().unwrap();
//! assert_eq!(engine.snapshot().reg(count), 1);
//! ```

use std::collections::HashMap;

use super::design::Design;
use super::engine::{StepEngine, Updates};
use super::memory::{MemId, Memory};
use super::state::{RegId, RegisterClass, RegisterDecl, RegisterFile, Snapshot};
use super::traits::{ConfigError, DecodeMode, Fault};
use super::unit::{InstrId, Instruction, Unit, UnitId};

/// Largest memory the builder accepts, in words.
const MAX_MEMORY_DEPTH: usize = 1 << 28;

/// Builder for a unit tree and its initial state.
pub struct ModelBuilder {
    units: Vec<Unit>,
    instructions: Vec<Instruction>,
    registers: Vec<RegisterDecl>,
    memories: Vec<Memory>,
    unit_lookup: HashMap<String, UnitId>,
    decode_mode: DecodeMode,
}

impl ModelBuilder {
    /// Start a tree whose root unit is called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let mut unit_lookup = HashMap::new();
        unit_lookup.insert(name.clone(), UnitId::ROOT);
        Self {
            units: vec![Unit::new(name, None)],
            instructions: Vec::new(),
            registers: Vec::new(),
            memories: Vec::new(),
            unit_lookup,
            decode_mode: DecodeMode::Strict,
        }
    }

    /// The root unit.
    pub fn root(&self) -> UnitId {
        UnitId::ROOT
    }

    /// Select the decode-conflict policy of the built engine.
    pub fn decode_mode(&mut self, mode: DecodeMode) -> &mut Self {
        self.decode_mode = mode;
        self
    }

    /// Add a child unit under `parent`.
    pub fn add_child(&mut self, parent: UnitId, name: &str) -> Result<UnitId, ConfigError> {
        self.check_unit(parent)?;
        if self.unit_lookup.contains_key(name) {
            return Err(ConfigError::DuplicateUnit(name.to_string()));
        }

        let id = UnitId(self.units.len() as u32);
        self.units.push(Unit::new(name.to_string(), Some(parent)));
        self.units[parent.index()].children.push(id);
        self.unit_lookup.insert(name.to_string(), id);
        Ok(id)
    }

    /// Set the validity predicate of a unit. The root ignores its predicate.
    pub fn set_valid<F>(&mut self, unit: UnitId, valid: F) -> Result<(), ConfigError>
    where
        F: Fn(&Snapshot) -> bool + Send + Sync + 'static,
    {
        self.check_unit(unit)?;
        if unit != UnitId::ROOT {
            self.units[unit.index()].valid = Some(Box::new(valid));
        }
        Ok(())
    }

    /// Declare a register owned by `unit`.
    pub fn add_register(
        &mut self,
        unit: UnitId,
        name: &str,
        width: u32,
        class: RegisterClass,
    ) -> Result<RegId, ConfigError> {
        self.check_unit(unit)?;
        if width == 0 {
            return Err(ConfigError::ZeroWidth {
                register: name.to_string(),
            });
        }
        if width > 64 {
            return Err(ConfigError::TooWide {
                register: name.to_string(),
                width,
            });
        }
        let owner = &self.units[unit.index()];
        if owner
            .registers
            .iter()
            .any(|r| self.registers[r.index()].name == name)
        {
            return Err(ConfigError::DuplicateRegister {
                unit: owner.name.clone(),
                name: name.to_string(),
            });
        }

        let id = RegId(self.registers.len() as u32);
        self.registers.push(RegisterDecl {
            name: name.to_string(),
            width,
            class,
            unit,
        });
        self.units[unit.index()].registers.push(id);
        Ok(id)
    }

    /// Declare a harness-driven input on the root unit.
    pub fn add_input(&mut self, name: &str, width: u32) -> Result<RegId, ConfigError> {
        self.add_register(UnitId::ROOT, name, width, RegisterClass::Input)
    }

    /// Declare a memory of `depth` words.
    pub fn add_memory(
        &mut self,
        name: &str,
        addr_width: u32,
        data_width: u32,
        depth: usize,
    ) -> Result<MemId, ConfigError> {
        let bad = |reason: String| ConfigError::BadMemory {
            memory: name.to_string(),
            reason,
        };
        if self.memories.iter().any(|m| m.name() == name) {
            return Err(ConfigError::DuplicateMemory(name.to_string()));
        }
        if data_width == 0 || data_width > 64 {
            return Err(bad(format!("data width {} not in 1..=64", data_width)));
        }
        if addr_width == 0 || addr_width > 64 {
            return Err(bad(format!("address width {} not in 1..=64", addr_width)));
        }
        if depth == 0 {
            return Err(bad("depth is zero".to_string()));
        }
        if addr_width < 64 && depth as u128 > (1u128 << addr_width) {
            return Err(bad(format!(
                "depth {} exceeds the {}-bit address range",
                depth, addr_width
            )));
        }
        if depth > MAX_MEMORY_DEPTH {
            return Err(bad(format!("depth {} exceeds {} words", depth, MAX_MEMORY_DEPTH)));
        }

        let id = MemId(self.memories.len() as u16);
        self.memories
            .push(Memory::new(name, addr_width, data_width, depth));
        Ok(id)
    }

    /// Attach an instruction to `unit`.
    ///
    /// `decode` and `update` must be pure functions of the snapshot they are
    /// given. Instructions of one unit must have mutually exclusive decode
    /// predicates.
    pub fn add_instruction<D, U>(
        &mut self,
        unit: UnitId,
        name: &str,
        decode: D,
        update: U,
    ) -> Result<InstrId, ConfigError>
    where
        D: Fn(&Snapshot) -> bool + Send + Sync + 'static,
        U: Fn(&Snapshot, &mut Updates<'_>) -> Result<(), Fault> + Send + Sync + 'static,
    {
        self.check_unit(unit)?;
        let owner = &self.units[unit.index()];
        if owner
            .instructions
            .iter()
            .any(|i| self.instructions[i.index()].name == name)
        {
            return Err(ConfigError::DuplicateInstruction {
                unit: owner.name.clone(),
                name: name.to_string(),
            });
        }

        let id = InstrId(self.instructions.len() as u32);
        self.instructions.push(Instruction {
            name: name.to_string(),
            unit,
            decode: Box::new(decode),
            update: Box::new(update),
        });
        self.units[unit.index()].instructions.push(id);
        Ok(id)
    }

    /// Finish construction and produce an engine at the all-zero state.
    pub fn build(self) -> Result<StepEngine, ConfigError> {
        let regs = RegisterFile::new(self.registers.len());
        let memory_names = self.memories.iter().map(|m| m.name().to_string()).collect();
        let snapshot = Snapshot::new(regs, self.memories);

        let design = Design {
            units: self.units,
            instructions: self.instructions,
            registers: self.registers,
            memory_names,
            unit_lookup: self.unit_lookup,
        };

        log::debug!(
            "Built design '{}': {} units, {} instructions, {} registers",
            design.name(),
            design.units.len(),
            design.instructions.len(),
            design.registers.len()
        );

        Ok(StepEngine::new(design, snapshot, self.decode_mode))
    }

    fn check_unit(&self, unit: UnitId) -> Result<(), ConfigError> {
        if unit.index() < self.units.len() {
            Ok(())
        } else {
            Err(ConfigError::UnknownUnit(unit.index()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_width_register_rejected() {
        let mut b = ModelBuilder::new("top");
        let root = b.root();
        let err = b
            .add_register(root, "bad", 0, RegisterClass::Control)
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::ZeroWidth {
                register: "bad".to_string()
            }
        );
    }

    #[test]
    fn test_too_wide_register_rejected() {
        let mut b = ModelBuilder::new("top");
        let root = b.root();
        assert!(matches!(
            b.add_register(root, "wide", 65, RegisterClass::Control),
            Err(ConfigError::TooWide { width: 65, .. })
        ));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut b = ModelBuilder::new("top");
        let root = b.root();
        b.add_register(root, "r", 8, RegisterClass::Control).unwrap();
        assert!(matches!(
            b.add_register(root, "r", 8, RegisterClass::Control),
            Err(ConfigError::DuplicateRegister { .. })
        ));

        b.add_child(root, "child").unwrap();
        assert!(matches!(
            b.add_child(root, "child"),
            Err(ConfigError::DuplicateUnit(_))
        ));

        b.add_instruction(root, "i", |_| false, |_, _| Ok(())).unwrap();
        assert!(matches!(
            b.add_instruction(root, "i", |_| false, |_, _| Ok(())),
            Err(ConfigError::DuplicateInstruction { .. })
        ));
    }

    #[test]
    fn test_same_register_name_on_different_units() {
        let mut b = ModelBuilder::new("top");
        let root = b.root();
        let child = b.add_child(root, "child").unwrap();
        b.add_register(root, "cntr", 8, RegisterClass::Control).unwrap();
        b.add_register(child, "cntr", 8, RegisterClass::Control).unwrap();
        let engine = b.build().unwrap();
        let design = engine.design();
        assert_ne!(
            design.find_register("top", "cntr"),
            design.find_register("child", "cntr")
        );
    }

    #[test]
    fn test_memory_geometry_checked() {
        let mut b = ModelBuilder::new("top");
        assert!(b.add_memory("zero", 8, 8, 0).is_err());
        assert!(b.add_memory("too_deep", 4, 8, 17).is_err());
        assert!(b.add_memory("no_data", 4, 0, 16).is_err());
        assert!(b.add_memory("ok", 4, 8, 16).is_ok());
        assert!(matches!(
            b.add_memory("ok", 4, 8, 16),
            Err(ConfigError::DuplicateMemory(_))
        ));
    }

    #[test]
    fn test_unknown_unit_rejected() {
        let mut b = ModelBuilder::new("top");
        assert_eq!(
            b.add_child(UnitId(7), "orphan").unwrap_err(),
            ConfigError::UnknownUnit(7)
        );
    }

    #[test]
    fn test_lookup_after_build() {
        let mut b = ModelBuilder::new("top");
        let root = b.root();
        let child = b.add_child(root, "loop").unwrap();
        let r = b.add_register(child, "cntr", 8, RegisterClass::Control).unwrap();
        b.add_memory("mem", 8, 8, 16).unwrap();
        let engine = b.build().unwrap();
        let design = engine.design();

        assert_eq!(design.find_unit("loop"), Some(child));
        assert_eq!(design.find_register("loop", "cntr"), Some(r));
        assert_eq!(design.register_path(r), "loop.cntr");
        assert!(design.find_memory("mem").is_some());
        assert!(design.is_self_or_ancestor(root, child));
        assert!(!design.is_self_or_ancestor(child, root));
    }
}
