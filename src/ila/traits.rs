//! Error types and function signatures shared by the unit tree and the
//! step engine.
//!
//! The three function kinds a unit carries are all pure functions of the
//! pre-step [`Snapshot`]:
//!
//! - validity predicate: may this unit's instructions fire at all?
//! - decode predicate: does this instruction fire this step?
//! - update function: which registers and memory words change?
//!
//! Errors fall into two groups. [`ConfigError`] is raised while the tree is
//! built and means the model is malformed. [`StepError`] is raised by the
//! engine and means the current step cannot be committed; the snapshot is
//! left untouched so a differential test sees the fault instead of a masked
//! result.

use thiserror::Error;

use super::engine::Updates;
use super::memory::MemoryError;
use super::state::Snapshot;

/// Validity predicate of a unit.
pub type ValidFn = Box<dyn Fn(&Snapshot) -> bool + Send + Sync>;

/// Decode predicate of an instruction.
pub type DecodeFn = Box<dyn Fn(&Snapshot) -> bool + Send + Sync>;

/// Update function of an instruction.
///
/// Reads only the pre-step snapshot and records writes into `Updates`.
pub type UpdateFn = Box<dyn Fn(&Snapshot, &mut Updates<'_>) -> Result<(), Fault> + Send + Sync>;

/// What happens when two instructions of one unit decode in the same step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeMode {
    /// Fail the step with [`StepError::DecodeConflict`].
    #[default]
    Strict,
    /// Keep the last-registered instruction and log a warning.
    ///
    /// The conflict is still a design error; this mode only keeps a run going.
    LastWins,
}

/// Fault raised by an instruction's update function.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Memory access out of range.
    #[error(transparent)]
    Memory(#[from] MemoryError),

    /// Runtime precondition violated by the caller-supplied parameters.
    #[error("precondition violated: {0}")]
    Precondition(String),
}

impl Fault {
    /// Shorthand for a precondition fault.
    pub fn precondition(message: impl Into<String>) -> Self {
        Fault::Precondition(message.into())
    }
}

/// Construction-time errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Register declared with zero width.
    #[error("register '{register}' has zero width")]
    ZeroWidth {
        /// Register name.
        register: String,
    },

    /// Register wider than the 64-bit storage.
    #[error("register '{register}' is {width} bits wide (max 64)")]
    TooWide {
        /// Register name.
        register: String,
        /// Declared width.
        width: u32,
    },

    /// Two registers with the same name on one unit.
    #[error("duplicate register '{name}' on unit '{unit}'")]
    DuplicateRegister {
        /// Unit name.
        unit: String,
        /// Register name.
        name: String,
    },

    /// Two instructions with the same name on one unit.
    #[error("duplicate instruction '{name}' on unit '{unit}'")]
    DuplicateInstruction {
        /// Unit name.
        unit: String,
        /// Instruction name.
        name: String,
    },

    /// Two units with the same name.
    #[error("duplicate unit '{0}'")]
    DuplicateUnit(String),

    /// Two memories with the same name.
    #[error("duplicate memory '{0}'")]
    DuplicateMemory(String),

    /// Unit id does not belong to this builder.
    #[error("unknown unit #{0}")]
    UnknownUnit(usize),

    /// Memory declared with unusable geometry.
    #[error("memory '{memory}': {reason}")]
    BadMemory {
        /// Memory name.
        memory: String,
        /// What is wrong with it.
        reason: String,
    },
}

/// Errors that prevent a step from being committed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StepError {
    /// More than one instruction of a unit decoded on the same snapshot.
    #[error("decode conflict on unit '{unit}': '{first}' and '{second}' both decode")]
    DecodeConflict {
        /// Unit name.
        unit: String,
        /// First decoded instruction.
        first: String,
        /// Second decoded instruction.
        second: String,
    },

    /// One register written twice in the same step.
    #[error("register '{register}' written by both '{first}' and '{second}'")]
    RegisterConflict {
        /// Register name.
        register: String,
        /// First writer.
        first: String,
        /// Second writer.
        second: String,
    },

    /// One memory word stored twice in the same step.
    #[error("memory '{memory}' word 0x{addr:X} stored by both '{first}' and '{second}'")]
    StoreConflict {
        /// Memory name.
        memory: String,
        /// Word address.
        addr: u64,
        /// First writer.
        first: String,
        /// Second writer.
        second: String,
    },

    /// Register owned by a unit that is not the writer's unit or an ancestor.
    #[error("instruction '{instruction}' may not write register '{register}'")]
    AccessViolation {
        /// Writing instruction.
        instruction: String,
        /// Register name.
        register: String,
    },

    /// Harness input written by an instruction.
    #[error("instruction '{instruction}' wrote harness input '{register}'")]
    InputWrite {
        /// Writing instruction.
        instruction: String,
        /// Input name.
        register: String,
    },

    /// Update function raised a fault.
    #[error("instruction '{instruction}' faulted: {fault}")]
    Fault {
        /// Faulting instruction.
        instruction: String,
        /// Underlying fault.
        #[source]
        fault: Fault,
    },
}
