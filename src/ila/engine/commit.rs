//! Update collection and atomic commit.
//!
//! Each decoded instruction fills its own [`Updates`] from the pre-step
//! snapshot. The engine then merges all of them into one [`StepPlan`],
//! rejecting any register or memory word written twice, and finally applies
//! the plan. Nothing is written until the whole plan is known, so a failing
//! step leaves the snapshot exactly as it was.

use std::collections::HashMap;

use smallvec::SmallVec;

use crate::ila::design::Design;
use crate::ila::memory::{MemId, MemoryError};
use crate::ila::state::{RegId, RegisterClass, Snapshot};
use crate::ila::traits::StepError;
use crate::ila::unit::InstrId;

/// Writes recorded by one instruction's update function.
pub struct Updates<'a> {
    snapshot: &'a Snapshot,
    regs: SmallVec<[(RegId, u64); 8]>,
    stores: SmallVec<[(MemId, usize, u64); 2]>,
}

impl<'a> Updates<'a> {
    pub(crate) fn new(snapshot: &'a Snapshot) -> Self {
        Self {
            snapshot,
            regs: SmallVec::new(),
            stores: SmallVec::new(),
        }
    }

    /// Set a register's post-step value. Truncated to the register width.
    #[inline]
    pub fn set(&mut self, reg: RegId, value: u64) {
        self.regs.push((reg, value));
    }

    /// Set a one-bit flag register.
    #[inline]
    pub fn set_flag(&mut self, reg: RegId, on: bool) {
        self.regs.push((reg, on as u64));
    }

    /// Store one word. The address is checked against the memory now.
    #[inline]
    pub fn store(&mut self, mem: MemId, addr: u64, value: u64) -> Result<(), MemoryError> {
        let idx = self.snapshot.memory(mem).resolve(addr)?;
        self.stores.push((mem, idx, value));
        Ok(())
    }

    /// Number of register writes recorded so far.
    pub fn register_writes(&self) -> usize {
        self.regs.len()
    }

    /// Number of stores recorded so far.
    pub fn store_count(&self) -> usize {
        self.stores.len()
    }
}

/// Merged, conflict-free writes of one step.
#[derive(Debug, Clone, Default)]
pub struct StepPlan {
    /// Instructions that decoded, in unit order.
    pub decoded: Vec<InstrId>,
    reg_writes: Vec<(RegId, u64)>,
    stores: Vec<(MemId, usize, u64)>,
}

impl StepPlan {
    /// True when no instruction decoded.
    pub fn is_idle(&self) -> bool {
        self.decoded.is_empty()
    }

    /// Number of register writes in the plan.
    pub fn register_writes(&self) -> usize {
        self.reg_writes.len()
    }

    /// Number of memory stores in the plan.
    pub fn stores(&self) -> usize {
        self.stores.len()
    }

    /// Apply every write to `snapshot`.
    pub fn apply(&self, snapshot: &mut Snapshot) {
        for &(reg, value) in &self.reg_writes {
            snapshot.regs.write(reg, value);
        }
        for &(mem, idx, value) in &self.stores {
            snapshot.memory_mut(mem).write_resolved(idx, value);
        }
    }
}

/// Accumulates per-instruction updates and enforces the single-writer rule.
pub(crate) struct PlanBuilder<'d> {
    design: &'d Design,
    plan: StepPlan,
    reg_owner: HashMap<RegId, InstrId>,
    store_owner: HashMap<(MemId, usize), InstrId>,
}

impl<'d> PlanBuilder<'d> {
    pub(crate) fn new(design: &'d Design) -> Self {
        Self {
            design,
            plan: StepPlan::default(),
            reg_owner: HashMap::new(),
            store_owner: HashMap::new(),
        }
    }

    /// Merge the writes of `instr` into the plan.
    pub(crate) fn merge(&mut self, instr: InstrId, updates: Updates<'_>) -> Result<(), StepError> {
        let design = self.design;
        let writer = design.instruction(instr);
        self.plan.decoded.push(instr);

        for (reg, value) in updates.regs {
            let decl = design.register(reg);
            if decl.class == RegisterClass::Input {
                return Err(StepError::InputWrite {
                    instruction: writer.name.clone(),
                    register: design.register_path(reg),
                });
            }
            if !design.is_self_or_ancestor(decl.unit, writer.unit) {
                return Err(StepError::AccessViolation {
                    instruction: writer.name.clone(),
                    register: design.register_path(reg),
                });
            }
            if let Some(prev) = self.reg_owner.insert(reg, instr) {
                return Err(StepError::RegisterConflict {
                    register: design.register_path(reg),
                    first: design.instruction(prev).name.clone(),
                    second: writer.name.clone(),
                });
            }
            self.plan.reg_writes.push((reg, value & decl.mask()));
        }

        for (mem, idx, value) in updates.stores {
            if let Some(prev) = self.store_owner.insert((mem, idx), instr) {
                return Err(StepError::StoreConflict {
                    memory: design.memory_names[mem.index()].clone(),
                    addr: idx as u64,
                    first: design.instruction(prev).name.clone(),
                    second: writer.name.clone(),
                });
            }
            self.plan.stores.push((mem, idx, value));
        }

        Ok(())
    }

    pub(crate) fn finish(self) -> StepPlan {
        self.plan
    }
}
