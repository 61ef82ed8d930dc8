//! Hierarchical instruction-level model engine.
//!
//! A model is a tree of [`Unit`]s. Each unit owns registers, a validity
//! predicate and a set of [`Instruction`]s (decode predicate plus update
//! function). The [`StepEngine`] walks the tree once per step, fires every
//! decoded instruction of every valid unit against the same snapshot, and
//! commits all their writes together.
//!
//! # Architecture
//!
//! - [`memory`]: flat word-addressable memories
//! - [`state`]: register declarations, the register file, [`Snapshot`]
//! - [`unit`]: units and instructions (arena nodes)
//! - [`design`]: the immutable tree
//! - [`builder`]: construction and configuration checks
//! - [`engine`]: decode, conflict detection, atomic commit
//! - [`traits`]: function signatures and error types

pub mod traits;
pub mod memory;
pub mod state;
pub mod unit;
pub mod design;
pub mod builder;
pub mod engine;

pub use traits::{ConfigError, DecodeFn, DecodeMode, Fault, StepError, UpdateFn, ValidFn};
pub use memory::{byte_to_word, width_mask, MemId, Memory, MemoryError, WORD_ADDR_SHIFT, WORD_BYTES};
pub use state::{RegId, RegisterClass, RegisterDecl, RegisterFile, Snapshot};
pub use unit::{InstrId, Instruction, Unit, UnitId};
pub use design::Design;
pub use builder::ModelBuilder;
pub use engine::{EngineStatus, RunSummary, StepEngine, StepPlan, StepReport, Updates};
