//! Step engine.
//!
//! The `StepEngine` advances the entire unit tree by exactly one state
//! transition per call to [`StepEngine::step`]. It decodes once against the
//! current snapshot and commits once, so the order in which units and
//! instructions are visited never changes the result.
//!
//! # Execution Model
//!
//! Units run "conceptually in parallel": independent units may fire in the
//! same step, and all their updates read the same pre-step snapshot. Memory
//! is the only resource shared between otherwise unrelated units; each word
//! may be stored at most once per step.
//!
//! A step in which nothing decodes is legal and leaves the snapshot as it
//! was. The harness uses it to detect that a run has finished.
//!
//! # Example
//!
//! ```ignore
//! let mut engine = builder.build()?;
//! engine.set_input(func_run, 1);
//! engine.step()?;                 // latch the call
//! engine.set_input(func_run, 0);
//! engine.run_until_idle(10_000)?; // drive it to completion
//! ```

mod commit;
mod coordinator;

pub use commit::{StepPlan, Updates};
pub use coordinator::{EngineStatus, RunSummary, StepEngine, StepReport};
