//! Step engine implementation.
//!
//! The engine owns the design and the current snapshot and advances the
//! whole unit tree one step at a time.

use crate::ila::design::Design;
use crate::ila::memory::{MemId, Memory, MemoryError};
use crate::ila::state::{RegId, RegisterFile, Snapshot};
use crate::ila::traits::{DecodeMode, StepError};
use crate::ila::unit::{InstrId, UnitId};

use super::commit::{PlanBuilder, StepPlan, Updates};

/// Engine execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    /// No step taken since construction or reset.
    Ready,
    /// The last step committed at least one instruction.
    Running,
    /// The last step decoded nothing.
    Idle,
    /// The last step failed; the snapshot is the pre-step state.
    Error,
}

impl Default for EngineStatus {
    fn default() -> Self {
        EngineStatus::Ready
    }
}

/// Outcome of one committed step.
#[derive(Debug, Clone)]
pub struct StepReport {
    /// Step number (1-based) of this step.
    pub step: u64,
    /// Instructions that fired.
    pub decoded: Vec<InstrId>,
}

impl StepReport {
    /// True when nothing fired.
    pub fn is_idle(&self) -> bool {
        self.decoded.is_empty()
    }
}

/// Result of running until idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Non-idle steps committed.
    pub steps: u64,
    /// True if the run ended on an idle step, false if it hit the limit.
    pub reached_idle: bool,
}

/// Single-step engine over a unit tree.
///
/// Every step is computed from one immutable snapshot:
///
/// 1. Compute the validity of every unit (parent valid and own predicate).
/// 2. Evaluate the decode predicates of every valid unit's instructions.
/// 3. Reject two decodes on one unit (or keep the last, in `LastWins`).
/// 4. Run every decoded update function against the same snapshot.
/// 5. Merge the writes, rejecting any register or word written twice.
/// 6. Apply the merged writes.
pub struct StepEngine {
    design: Design,
    snapshot: Snapshot,
    decode_mode: DecodeMode,
    status: EngineStatus,
    total_steps: u64,
}

impl StepEngine {
    pub(crate) fn new(design: Design, snapshot: Snapshot, decode_mode: DecodeMode) -> Self {
        Self {
            design,
            snapshot,
            decode_mode,
            status: EngineStatus::Ready,
            total_steps: 0,
        }
    }

    /// The unit tree.
    pub fn design(&self) -> &Design {
        &self.design
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Replace the current snapshot (e.g. to restore a checkpoint).
    ///
    /// The snapshot must come from this engine.
    pub fn restore(&mut self, snapshot: Snapshot) {
        self.snapshot = snapshot;
    }

    /// Engine status.
    pub fn status(&self) -> EngineStatus {
        self.status
    }

    /// Decode-conflict policy.
    pub fn decode_mode(&self) -> DecodeMode {
        self.decode_mode
    }

    /// Change the decode-conflict policy.
    pub fn set_decode_mode(&mut self, mode: DecodeMode) {
        self.decode_mode = mode;
    }

    /// Number of steps committed so far (idle steps included).
    pub fn total_steps(&self) -> u64 {
        self.total_steps
    }

    /// Drive a harness input (or poke any register). Truncated to its width.
    pub fn set_input(&mut self, reg: RegId, value: u64) {
        let mask = self.design.register(reg).mask();
        self.snapshot.regs.write(reg, value & mask);
    }

    /// Alias of [`set_input`](Self::set_input) for non-input registers.
    pub fn set_register(&mut self, reg: RegId, value: u64) {
        self.set_input(reg, value);
    }

    /// Write words into a memory from the harness side.
    pub fn load_memory(&mut self, mem: MemId, addr: u64, words: &[u64]) -> Result<(), MemoryError> {
        self.snapshot.memory_mut(mem).write_slice(addr, words)
    }

    /// Borrow a memory.
    pub fn memory(&self, mem: MemId) -> &Memory {
        self.snapshot.memory(mem)
    }

    /// Compute the writes of the next step without applying them.
    pub fn plan(&self, snapshot: &Snapshot) -> Result<StepPlan, StepError> {
        let design = &self.design;
        let valid = design.validity(snapshot);
        let mut builder = PlanBuilder::new(design);

        for (idx, unit) in design.units().iter().enumerate() {
            if !valid[idx] {
                continue;
            }

            let decoded = design.decoded_in(UnitId(idx as u32), snapshot);
            let chosen = match decoded.as_slice() {
                [] => continue,
                [only] => *only,
                [first, .., last] => match self.decode_mode {
                    DecodeMode::Strict => {
                        return Err(StepError::DecodeConflict {
                            unit: unit.name.clone(),
                            first: design.instruction(*first).name.clone(),
                            second: design.instruction(decoded[1]).name.clone(),
                        });
                    }
                    DecodeMode::LastWins => {
                        log::warn!(
                            "Decode conflict on unit '{}' ({} instructions), keeping '{}'",
                            unit.name,
                            decoded.len(),
                            design.instruction(*last).name
                        );
                        *last
                    }
                },
            };

            let instr = design.instruction(chosen);
            log::trace!("decode {}::{}", unit.name, instr.name);

            let mut updates = Updates::new(snapshot);
            (instr.update)(snapshot, &mut updates).map_err(|fault| StepError::Fault {
                instruction: instr.name.clone(),
                fault,
            })?;
            builder.merge(chosen, updates)?;
        }

        Ok(builder.finish())
    }

    /// Pure step: the successor of `snapshot`, leaving the engine untouched.
    pub fn next_state(&self, snapshot: &Snapshot) -> Result<(Snapshot, StepPlan), StepError> {
        let plan = self.plan(snapshot)?;
        let mut next = snapshot.clone();
        plan.apply(&mut next);
        Ok((next, plan))
    }

    /// Advance the current snapshot by one step.
    pub fn step(&mut self) -> Result<StepReport, StepError> {
        let plan = match self.plan(&self.snapshot) {
            Ok(plan) => plan,
            Err(e) => {
                log::error!("Step {} failed: {}", self.total_steps + 1, e);
                self.status = EngineStatus::Error;
                return Err(e);
            }
        };

        plan.apply(&mut self.snapshot);
        self.total_steps += 1;
        self.status = if plan.is_idle() {
            EngineStatus::Idle
        } else {
            EngineStatus::Running
        };

        log::debug!(
            "Step {}: {} instructions, {} register writes, {} stores",
            self.total_steps,
            plan.decoded.len(),
            plan.register_writes(),
            plan.stores()
        );

        Ok(StepReport {
            step: self.total_steps,
            decoded: plan.decoded,
        })
    }

    /// Step until a step decodes nothing, or `max_steps` non-idle steps ran.
    pub fn run_until_idle(&mut self, max_steps: u64) -> Result<RunSummary, StepError> {
        let mut steps = 0;
        while steps < max_steps {
            let report = self.step()?;
            if report.is_idle() {
                return Ok(RunSummary {
                    steps,
                    reached_idle: true,
                });
            }
            steps += 1;
        }
        Ok(RunSummary {
            steps,
            reached_idle: false,
        })
    }

    /// Check that no valid unit has more than one decoding instruction on
    /// `snapshot`, regardless of the decode mode.
    pub fn check_single_decode(&self, snapshot: &Snapshot) -> Result<(), StepError> {
        let design = &self.design;
        let valid = design.validity(snapshot);
        for (idx, unit) in design.units().iter().enumerate() {
            if !valid[idx] {
                continue;
            }
            if let [first, second, ..] = design.decoded_in(UnitId(idx as u32), snapshot)[..] {
                return Err(StepError::DecodeConflict {
                    unit: unit.name.clone(),
                    first: design.instruction(first).name.clone(),
                    second: design.instruction(second).name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Names of the instructions in a report, for display.
    pub fn instruction_names(&self, decoded: &[InstrId]) -> Vec<&str> {
        decoded
            .iter()
            .map(|i| self.design.instruction(*i).name())
            .collect()
    }

    /// Zero every register and memory word.
    pub fn reset(&mut self) {
        let regs = RegisterFile::new(self.snapshot.regs.len());
        let memories = self
            .snapshot
            .memories
            .iter()
            .map(|m| Memory::new(m.name(), m.addr_width(), m.data_width(), m.depth()))
            .collect();
        self.snapshot = Snapshot::new(regs, memories);
        self.status = EngineStatus::Ready;
        self.total_steps = 0;
    }

    /// Get status as string for display.
    pub fn status_string(&self) -> &'static str {
        match self.status {
            EngineStatus::Ready => "Ready",
            EngineStatus::Running => "Running",
            EngineStatus::Idle => "Idle",
            EngineStatus::Error => "Error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ila::builder::ModelBuilder;
    use crate::ila::state::RegisterClass;
    use crate::ila::traits::Fault;

    /// Two-register swap: both updates read the pre-step values.
    fn make_swap() -> (StepEngine, RegId, RegId, RegId) {
        let mut b = ModelBuilder::new("top");
        let root = b.root();
        let go = b.add_input("go", 1).unwrap();
        let a = b.add_register(root, "a", 8, RegisterClass::Control).unwrap();
        let c = b.add_child(root, "child").unwrap();
        let bb = b.add_register(c, "b", 8, RegisterClass::Control).unwrap();

        b.add_instruction(root, "a_from_b", move |s| s.flag(go), move |s, u| {
            u.set(a, s.reg(bb));
            Ok(())
        })
        .unwrap();
        b.add_instruction(c, "b_from_a", move |s| s.flag(go), move |s, u| {
            u.set(bb, s.reg(a));
            Ok(())
        })
        .unwrap();

        (b.build().unwrap(), go, a, bb)
    }

    #[test]
    fn test_updates_read_pre_step_snapshot() {
        let (mut engine, go, a, b) = make_swap();
        engine.set_register(a, 1);
        engine.set_register(b, 2);
        engine.set_input(go, 1);

        let report = engine.step().unwrap();
        assert_eq!(report.decoded.len(), 2);
        assert_eq!(engine.snapshot().reg(a), 2);
        assert_eq!(engine.snapshot().reg(b), 1);
        assert_eq!(engine.status(), EngineStatus::Running);
    }

    #[test]
    fn test_idle_step_leaves_snapshot_unchanged() {
        let (mut engine, _go, a, _b) = make_swap();
        engine.set_register(a, 5);
        let before = engine.snapshot().clone();

        let report = engine.step().unwrap();
        assert!(report.is_idle());
        assert_eq!(engine.snapshot(), &before);
        assert_eq!(engine.status(), EngineStatus::Idle);
        assert_eq!(engine.total_steps(), 1);
    }

    #[test]
    fn test_register_width_wraps() {
        let mut b = ModelBuilder::new("top");
        let root = b.root();
        let r = b.add_register(root, "r", 4, RegisterClass::Control).unwrap();
        b.add_instruction(root, "inc", |_| true, move |s, u| {
            u.set(r, s.reg(r) + 1);
            Ok(())
        })
        .unwrap();
        let mut engine = b.build().unwrap();
        engine.set_register(r, 15);
        engine.step().unwrap();
        assert_eq!(engine.snapshot().reg(r), 0);
    }

    #[test]
    fn test_invalid_child_never_decodes() {
        let mut b = ModelBuilder::new("top");
        let root = b.root();
        let enable = b.add_input("enable", 1).unwrap();
        let outer = b.add_child(root, "outer").unwrap();
        let inner = b.add_child(outer, "inner").unwrap();
        let hits = b.add_register(inner, "hits", 8, RegisterClass::Control).unwrap();

        b.set_valid(outer, move |s| s.flag(enable)).unwrap();
        // Inner claims to be valid, but its parent gates it
        b.set_valid(inner, |_| true).unwrap();
        b.add_instruction(inner, "count", |_| true, move |s, u| {
            u.set(hits, s.reg(hits) + 1);
            Ok(())
        })
        .unwrap();

        let mut engine = b.build().unwrap();
        assert!(engine.step().unwrap().is_idle());
        assert_eq!(engine.snapshot().reg(hits), 0);

        engine.set_input(enable, 1);
        engine.step().unwrap();
        assert_eq!(engine.snapshot().reg(hits), 1);
    }

    #[test]
    fn test_strict_decode_conflict_fails_step() {
        let mut b = ModelBuilder::new("top");
        let root = b.root();
        let r = b.add_register(root, "r", 8, RegisterClass::Control).unwrap();
        b.add_instruction(root, "first", |_| true, move |_, u| {
            u.set(r, 1);
            Ok(())
        })
        .unwrap();
        b.add_instruction(root, "second", |_| true, move |_, u| {
            u.set(r, 2);
            Ok(())
        })
        .unwrap();
        let mut engine = b.build().unwrap();

        let err = engine.step().unwrap_err();
        assert_eq!(
            err,
            StepError::DecodeConflict {
                unit: "top".to_string(),
                first: "first".to_string(),
                second: "second".to_string(),
            }
        );
        assert_eq!(engine.status(), EngineStatus::Error);
        assert_eq!(engine.snapshot().reg(r), 0);
        assert!(engine.check_single_decode(engine.snapshot()).is_err());

        engine.set_decode_mode(DecodeMode::LastWins);
        engine.step().unwrap();
        assert_eq!(engine.snapshot().reg(r), 2);
    }

    #[test]
    fn test_cross_unit_register_conflict() {
        let mut b = ModelBuilder::new("top");
        let root = b.root();
        let r = b.add_register(root, "r", 8, RegisterClass::Control).unwrap();
        let child = b.add_child(root, "child").unwrap();
        b.add_instruction(root, "parent_write", |_| true, move |_, u| {
            u.set(r, 1);
            Ok(())
        })
        .unwrap();
        b.add_instruction(child, "child_write", |_| true, move |_, u| {
            u.set(r, 1);
            Ok(())
        })
        .unwrap();
        let mut engine = b.build().unwrap();
        assert!(matches!(
            engine.step(),
            Err(StepError::RegisterConflict { .. })
        ));
    }

    #[test]
    fn test_store_conflict_and_access_violation() {
        let mut b = ModelBuilder::new("top");
        let root = b.root();
        let mem = b.add_memory("mem", 8, 32, 16).unwrap();
        let child = b.add_child(root, "child").unwrap();
        b.add_instruction(root, "store_a", |_| true, move |_, u| {
            u.store(mem, 3, 1)?;
            Ok(())
        })
        .unwrap();
        b.add_instruction(child, "store_b", |_| true, move |_, u| {
            u.store(mem, 3, 2)?;
            Ok(())
        })
        .unwrap();
        let mut engine = b.build().unwrap();
        assert!(matches!(
            engine.step(),
            Err(StepError::StoreConflict { addr: 3, .. })
        ));

        // Parent may not write a child's register
        let mut b = ModelBuilder::new("top");
        let root = b.root();
        let child = b.add_child(root, "child").unwrap();
        let private = b.add_register(child, "private", 8, RegisterClass::Control).unwrap();
        b.add_instruction(root, "reach_down", |_| true, move |_, u| {
            u.set(private, 1);
            Ok(())
        })
        .unwrap();
        let mut engine = b.build().unwrap();
        assert!(matches!(
            engine.step(),
            Err(StepError::AccessViolation { .. })
        ));
    }

    #[test]
    fn test_input_write_rejected() {
        let mut b = ModelBuilder::new("top");
        let root = b.root();
        let go = b.add_input("go", 1).unwrap();
        b.add_instruction(root, "clear_go", |_| true, move |_, u| {
            u.set_flag(go, false);
            Ok(())
        })
        .unwrap();
        let mut engine = b.build().unwrap();
        assert!(matches!(engine.step(), Err(StepError::InputWrite { .. })));
    }

    #[test]
    fn test_fault_reported_with_instruction() {
        let mut b = ModelBuilder::new("top");
        let root = b.root();
        let mem = b.add_memory("mem", 8, 32, 4).unwrap();
        let r = b.add_register(root, "r", 32, RegisterClass::Control).unwrap();
        b.add_instruction(root, "load_far", |_| true, move |s, u| {
            u.set(r, s.load(mem, 9)?);
            Ok(())
        })
        .unwrap();
        let mut engine = b.build().unwrap();
        match engine.step() {
            Err(StepError::Fault { instruction, fault: Fault::Memory(_) }) => {
                assert_eq!(instruction, "load_far");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_next_state_is_pure() {
        let (mut engine, go, a, b) = make_swap();
        engine.set_register(a, 7);
        engine.set_register(b, 9);
        engine.set_input(go, 1);
        let snap = engine.snapshot().clone();

        let (first, _) = engine.next_state(&snap).unwrap();
        let (second, _) = engine.next_state(&snap).unwrap();
        assert_eq!(first, second);
        assert_eq!(engine.snapshot(), &snap);
    }

    #[test]
    fn test_run_until_idle_and_reset() {
        let mut b = ModelBuilder::new("top");
        let root = b.root();
        let r = b.add_register(root, "r", 8, RegisterClass::Control).unwrap();
        b.add_instruction(root, "count_to_5", move |s| s.reg(r) < 5, move |s, u| {
            u.set(r, s.reg(r) + 1);
            Ok(())
        })
        .unwrap();
        let mut engine = b.build().unwrap();

        let summary = engine.run_until_idle(100).unwrap();
        assert_eq!(summary, RunSummary { steps: 5, reached_idle: true });
        assert_eq!(engine.snapshot().reg(r), 5);

        engine.reset();
        assert_eq!(engine.snapshot().reg(r), 0);
        assert_eq!(engine.status_string(), "Ready");

        let summary = engine.run_until_idle(3).unwrap();
        assert_eq!(summary, RunSummary { steps: 3, reached_idle: false });
    }
}
