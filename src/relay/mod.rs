//! Relay tensor accelerator model.
//!
//! Builds the full unit tree on top of [`crate::ila`] and offers a small
//! harness facade, [`RelayAccelerator`], for loading memories, issuing
//! function calls and running them to completion.
//!
//! # Unit tree
//!
//! ```text
//! relay (root)                         function select, call instructions
//! ├── maxpooling_loop_op               max-pooling outer loop
//! │   └── maxpooling_find_max_loop     window reduction
//! ├── relay_vector_op_child_module     vector trigger
//! │   └── relay_vector_{op}_child_module × 4   streaming
//! ├── relay_nn_child_module            dense trigger
//! │   └── relay_nn_dense_loop_child_module
//! │       └── relay_nn_dense_fma_child_module
//! └── relay_lstm_matrix_vector_module  LSTM phases
//! ```
//!
//! # Example
//!
//! ```
//! use relay_emu::relay::{FunctionCall, RelayAccelerator, MaxPoolArgs};
//!
//! let mut acc = RelayAccelerator::with_defaults().unwrap();
//! let input: Vec<u8> = (0..16).collect();
//! acc.load_tensor(0, &input).unwrap();
//!
//! let args = MaxPoolArgs { height: 4, width: 4, pool_y: 2, pool_x: 2, stride_y: 2, stride_x: 2 };
//! acc.call(&FunctionCall::MaxPool2d(args)).unwrap();
//! assert_eq!(acc.read_tensor(0, 4).unwrap(), vec![5, 7, 13, 15]);
//! ```

pub mod arch;
pub mod dense;
pub mod func_call;
pub mod lstm;
pub mod maxpool;
pub mod vector_op;

pub use arch::{ArchState, FunctionId};
pub use dense::{DenseArgs, DensePhase, NnDense};
pub use func_call::FunctionCall;
pub use lstm::{LstmArgs, LstmCell, LstmPhase};
pub use maxpool::{MaxPool2d, MaxPoolArgs, MaxPoolPhase};
pub use vector_op::{VectorArgs, VectorOpKind, VectorOps};

use byteorder::{ByteOrder, LittleEndian};

use crate::config::Config;
use crate::ila::{
    byte_to_word, ConfigError, MemoryError, ModelBuilder, RegId, RegisterClass, RunSummary, StepEngine, StepError,
    StepReport, WORD_BYTES,
};
use crate::primitives::{Ieee754Ops, SharedOps};

/// Name of the root unit.
pub const MODEL_NAME: &str = "relay";

/// The complete accelerator model plus harness helpers.
pub struct RelayAccelerator {
    engine: StepEngine,
    arch: ArchState,
    maxpool: MaxPool2d,
    vector: VectorOps,
    dense: NnDense,
    lstm: LstmCell,
    max_steps: u64,
}

impl RelayAccelerator {
    /// Build the model with the given configuration and primitive backend.
    pub fn new(config: &Config, ops: SharedOps) -> Result<Self, ConfigError> {
        let mut b = ModelBuilder::new(MODEL_NAME);
        b.decode_mode(config.decode_mode());

        let arch = ArchState::define(&mut b, config.tensor_mem_depth(), config.relay_mem_depth())?;
        let maxpool = MaxPool2d::define(&mut b, &arch, ops.clone())?;
        let vector = VectorOps::define(&mut b, &arch, ops.clone())?;
        let dense = NnDense::define(&mut b, &arch, ops)?;
        let lstm = LstmCell::define(&mut b, &arch, &vector, &dense)?;

        let engine = b.build()?;
        log::info!(
            "Relay model ready: {} units, {} instructions, decode mode {:?}",
            engine.design().units().len(),
            engine.design().instruction_count(),
            engine.decode_mode()
        );

        Ok(Self {
            engine,
            arch,
            maxpool,
            vector,
            dense,
            lstm,
            max_steps: config.max_steps(),
        })
    }

    /// Build with the global configuration and the IEEE-754 backend.
    pub fn with_defaults() -> Result<Self, ConfigError> {
        Self::new(Config::get(), Ieee754Ops::shared())
    }

    /// Small, fixed configuration for unit tests.
    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        let config = Config {
            tensor_mem_depth: Some(4096),
            relay_mem_depth: Some(8192),
            max_steps: Some(100_000),
            ..Config::default()
        };
        Self::new(&config, Ieee754Ops::shared()).unwrap()
    }

    pub fn engine(&self) -> &StepEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut StepEngine {
        &mut self.engine
    }

    pub fn arch(&self) -> &ArchState {
        &self.arch
    }

    pub fn maxpool(&self) -> &MaxPool2d {
        &self.maxpool
    }

    pub fn vector(&self) -> &VectorOps {
        &self.vector
    }

    pub fn dense(&self) -> &NnDense {
        &self.dense
    }

    pub fn lstm(&self) -> &LstmCell {
        &self.lstm
    }

    /// Step limit used by [`RelayAccelerator::run_until_idle`].
    pub fn max_steps(&self) -> u64 {
        self.max_steps
    }

    pub fn set_max_steps(&mut self, max_steps: u64) {
        self.max_steps = max_steps;
    }

    // ---- Memory helpers ----

    /// Write 8-bit words into the tensor memory at word address `addr`.
    pub fn load_tensor(&mut self, addr: u64, data: &[u8]) -> Result<(), MemoryError> {
        let words: Vec<u64> = data.iter().map(|&b| b as u64).collect();
        self.engine.load_memory(self.arch.tensor_mem, addr, &words)
    }

    /// Read `len` 8-bit words from the tensor memory.
    pub fn read_tensor(&self, addr: u64, len: usize) -> Result<Vec<u8>, MemoryError> {
        let words = self.engine.memory(self.arch.tensor_mem).read_slice(addr, len)?;
        Ok(words.into_iter().map(|w| w as u8).collect())
    }

    /// Write 32-bit words into the vector memory at byte address `byte_addr`.
    pub fn load_words(&mut self, byte_addr: u32, words: &[u32]) -> Result<(), MemoryError> {
        let words: Vec<u64> = words.iter().map(|&w| w as u64).collect();
        self.engine
            .load_memory(self.arch.relay_mem, byte_to_word(byte_addr), &words)
    }

    /// Read `len` 32-bit words from the vector memory at byte address `byte_addr`.
    pub fn read_words(&self, byte_addr: u32, len: usize) -> Result<Vec<u32>, MemoryError> {
        let words = self
            .engine
            .memory(self.arch.relay_mem)
            .read_slice(byte_to_word(byte_addr), len)?;
        Ok(words.into_iter().map(|w| w as u32).collect())
    }

    /// Write a little-endian byte image into the vector memory.
    ///
    /// A trailing partial word is zero-padded.
    pub fn load_image(&mut self, byte_addr: u32, bytes: &[u8]) -> Result<(), MemoryError> {
        let words: Vec<u32> = bytes
            .chunks(WORD_BYTES as usize)
            .map(|chunk| {
                let mut word = [0u8; 4];
                word[..chunk.len()].copy_from_slice(chunk);
                LittleEndian::read_u32(&word)
            })
            .collect();
        self.load_words(byte_addr, &words)
    }

    /// Read `len` words from the vector memory as a little-endian byte image.
    pub fn read_image(&self, byte_addr: u32, len: usize) -> Result<Vec<u8>, MemoryError> {
        let words = self.read_words(byte_addr, len)?;
        let mut bytes = vec![0u8; words.len() * WORD_BYTES as usize];
        LittleEndian::write_u32_into(&words, &mut bytes);
        Ok(bytes)
    }

    /// Every non-input register as a `unit.register = value` line.
    pub fn state_dump(&self) -> String {
        let design = self.engine.design();
        let values = self.engine.snapshot().registers().as_slice();
        design
            .registers()
            .iter()
            .zip(values)
            .enumerate()
            .filter(|(_, (decl, _))| decl.class != RegisterClass::Input)
            .map(|(i, (_, value))| format!("{} = {:#x}\n", design.register_path(RegId(i as u32)), value))
            .collect()
    }

    // ---- Execution ----

    /// Drive the inputs of `call` and pulse `func_run` for one step.
    pub fn invoke(&mut self, call: &FunctionCall) -> Result<StepReport, StepError> {
        match call {
            FunctionCall::MaxPool2d(args) => self.maxpool.drive(&mut self.engine, args),
            FunctionCall::Vector(_, args) => self.vector.drive(&mut self.engine, args),
            FunctionCall::Dense(args) => self.dense.drive(&mut self.engine, args),
            FunctionCall::Lstm(args) => self.lstm.drive(&mut self.engine, args),
        }
        log::info!("Invoking {}", call);

        self.engine.set_input(self.arch.func_id, call.function_id().bits());
        self.engine.set_input(self.arch.func_run, 1);
        let report = self.engine.step();
        self.engine.set_input(self.arch.func_run, 0);
        report
    }

    /// Step until nothing decodes or the step limit is hit.
    pub fn run_until_idle(&mut self) -> Result<RunSummary, StepError> {
        let summary = self.engine.run_until_idle(self.max_steps)?;
        if summary.reached_idle {
            log::info!("Idle after {} steps", summary.steps);
        } else {
            log::warn!("Step limit {} reached before idle", self.max_steps);
        }
        Ok(summary)
    }

    /// [`invoke`](Self::invoke) followed by [`run_until_idle`](Self::run_until_idle).
    pub fn call(&mut self, call: &FunctionCall) -> Result<RunSummary, StepError> {
        self.invoke(call)?;
        self.run_until_idle()
    }
}
