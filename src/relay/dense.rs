//! Dense (fully-connected) layer engine: `y = W x + b`.
//!
//! ```text
//! root                                    enable, sizes, addresses
//! └── relay_nn_child_module               valid while enabled
//!     └── relay_nn_dense_loop_child_module    valid outside IDLE
//!         └── relay_nn_dense_fma_child_module valid in LOOP_FMA
//! ```
//!
//! The outer loop walks output index `j`; the inner loop accumulates
//! `acc = add(acc, multiply(W[j][i], x[i]))` one element per step, starting
//! from `b[j]`. Weights are row-major `[out][in]` 32-bit words. Completion
//! hands control back through the return-state register, like the vector
//! engine.

use serde::{Deserialize, Serialize};

use super::arch::{input_latch, ArchState, FunctionId, FLAG_BW, STATE_BW, WORD_BW};
use crate::ila::{
    byte_to_word, ConfigError, ModelBuilder, RegId, RegisterClass, Snapshot, StepEngine, UnitId, Updates,
    WORD_BYTES,
};
use crate::primitives::SharedOps;

/// Dense engine phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DensePhase {
    Idle = 0,
    LoopInit = 1,
    LoopWrite = 2,
    LoopFma = 3,
}

impl DensePhase {
    pub fn from_bits(bits: u64) -> Option<Self> {
        Some(match bits {
            0 => DensePhase::Idle,
            1 => DensePhase::LoopInit,
            2 => DensePhase::LoopWrite,
            3 => DensePhase::LoopFma,
            _ => return None,
        })
    }

    pub fn bits(self) -> u64 {
        self as u64
    }
}

/// Parameters of one dense call. Addresses are byte addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DenseArgs {
    pub input_size: u32,
    pub output_size: u32,
    pub weight_addr: u32,
    pub bias_addr: u32,
    pub input_addr: u32,
    pub output_addr: u32,
}

/// Registers and units of the dense engine.
#[derive(Debug, Clone, Copy)]
pub struct NnDense {
    pub input_size_in: RegId,
    pub output_size_in: RegId,
    pub weight_addr_in: RegId,
    pub bias_addr_in: RegId,
    pub input_addr_in: RegId,
    pub output_addr_in: RegId,

    pub enable: RegId,
    pub input_size: RegId,
    pub output_size: RegId,
    pub weight_addr: RegId,
    pub bias_addr: RegId,
    pub input_addr: RegId,
    pub output_addr: RegId,

    /// Phase (dense unit).
    pub state: RegId,
    /// Output index (dense unit).
    pub loop_cntr: RegId,
    /// Input index (loop unit).
    pub fma_cntr: RegId,
    /// Running sum (loop unit).
    pub acc: RegId,

    pub unit: UnitId,
    pub loop_unit: UnitId,
    pub fma_unit: UnitId,
}

impl NnDense {
    /// Register the engine into `b`.
    pub fn define(b: &mut ModelBuilder, arch: &ArchState, ops: SharedOps) -> Result<Self, ConfigError> {
        let root = b.root();
        let (input_size_in, input_size) = input_latch(b, "relay_nn_input_size", WORD_BW, WORD_BW)?;
        let (output_size_in, output_size) = input_latch(b, "relay_nn_output_size", WORD_BW, WORD_BW)?;
        let (weight_addr_in, weight_addr) = input_latch(b, "relay_nn_weight_addr", WORD_BW, WORD_BW)?;
        let (bias_addr_in, bias_addr) = input_latch(b, "relay_nn_bias_addr", WORD_BW, WORD_BW)?;
        let (input_addr_in, input_addr) = input_latch(b, "relay_nn_input_addr", WORD_BW, WORD_BW)?;
        let (output_addr_in, output_addr) = input_latch(b, "relay_nn_output_addr", WORD_BW, WORD_BW)?;
        let enable = b.add_register(root, "relay_nn_dense_enable", FLAG_BW, RegisterClass::Architectural)?;

        let unit = b.add_child(root, "relay_nn_child_module")?;
        let state = b.add_register(unit, "relay_nn_dense_state", STATE_BW, RegisterClass::Control)?;
        let loop_cntr = b.add_register(unit, "relay_nn_dense_loop_cntr", WORD_BW, RegisterClass::Control)?;

        let loop_unit = b.add_child(unit, "relay_nn_dense_loop_child_module")?;
        let fma_cntr = b.add_register(loop_unit, "relay_nn_dense_loop_fma_cntr", WORD_BW, RegisterClass::Control)?;
        let acc = b.add_register(loop_unit, "relay_nn_dense_acc", WORD_BW, RegisterClass::Control)?;

        let fma_unit = b.add_child(loop_unit, "relay_nn_dense_fma_child_module")?;

        let d = Self {
            input_size_in,
            output_size_in,
            weight_addr_in,
            bias_addr_in,
            input_addr_in,
            output_addr_in,
            enable,
            input_size,
            output_size,
            weight_addr,
            bias_addr,
            input_addr,
            output_addr,
            state,
            loop_cntr,
            fma_cntr,
            acc,
            unit,
            loop_unit,
            fma_unit,
        };

        b.set_valid(unit, move |s| s.flag(d.enable))?;
        b.set_valid(loop_unit, move |s| !d.in_phase(s, DensePhase::Idle))?;
        b.set_valid(fma_unit, move |s| d.in_phase(s, DensePhase::LoopFma))?;

        d.define_call(b, arch)?;
        d.define_trigger(b, arch)?;
        d.define_loop(b, arch, ops)?;
        Ok(d)
    }

    /// Current phase, `None` for an unassigned code.
    pub fn phase(&self, s: &Snapshot) -> Option<DensePhase> {
        DensePhase::from_bits(s.reg(self.state))
    }

    #[inline]
    fn in_phase(&self, s: &Snapshot, phase: DensePhase) -> bool {
        s.reg(self.state) == phase.bits()
    }

    /// Drive the harness inputs for `args`.
    pub fn drive(&self, engine: &mut StepEngine, args: &DenseArgs) {
        engine.set_input(self.input_size_in, args.input_size as u64);
        engine.set_input(self.output_size_in, args.output_size as u64);
        engine.set_input(self.weight_addr_in, args.weight_addr as u64);
        engine.set_input(self.bias_addr_in, args.bias_addr as u64);
        engine.set_input(self.input_addr_in, args.input_addr as u64);
        engine.set_input(self.output_addr_in, args.output_addr as u64);
    }

    /// Latch `args` and enable the engine.
    pub fn configure(&self, u: &mut Updates<'_>, args: &DenseArgs) {
        u.set(self.input_size, args.input_size as u64);
        u.set(self.output_size, args.output_size as u64);
        u.set(self.weight_addr, args.weight_addr as u64);
        u.set(self.bias_addr, args.bias_addr as u64);
        u.set(self.input_addr, args.input_addr as u64);
        u.set(self.output_addr, args.output_addr as u64);
        u.set_flag(self.enable, true);
    }

    fn define_call(&self, b: &mut ModelBuilder, arch: &ArchState) -> Result<(), ConfigError> {
        let (d, arch) = (*self, *arch);
        b.add_instruction(
            b.root(),
            "relay_nn_dense_call",
            move |s| arch.called(s, FunctionId::NnDense),
            move |s, u| {
                let args = DenseArgs {
                    input_size: s.reg32(d.input_size_in),
                    output_size: s.reg32(d.output_size_in),
                    weight_addr: s.reg32(d.weight_addr_in),
                    bias_addr: s.reg32(d.bias_addr_in),
                    input_addr: s.reg32(d.input_addr_in),
                    output_addr: s.reg32(d.output_addr_in),
                };
                log::debug!("dense: {} -> {} outputs", args.input_size, args.output_size);
                d.configure(u, &args);
                u.set(arch.return_state, s.reg(arch.lstm_state));
                Ok(())
            },
        )?;
        Ok(())
    }

    fn define_trigger(&self, b: &mut ModelBuilder, arch: &ArchState) -> Result<(), ConfigError> {
        let (d, arch) = (*self, *arch);

        b.add_instruction(
            self.unit,
            "relay_nn_dense_instr",
            move |s| d.in_phase(s, DensePhase::Idle) && s.reg(d.output_size) != 0,
            move |_, u| {
                u.set(d.state, DensePhase::LoopInit.bits());
                u.set(d.loop_cntr, 0);
                Ok(())
            },
        )?;

        b.add_instruction(
            self.unit,
            "relay_nn_dense_empty_instr",
            move |s| d.in_phase(s, DensePhase::Idle) && s.reg(d.output_size) == 0,
            move |s, u| {
                log::debug!("dense: zero outputs, nothing to do");
                u.set_flag(d.enable, false);
                u.set(arch.lstm_state, s.reg(arch.return_state));
                Ok(())
            },
        )?;
        Ok(())
    }

    fn define_loop(&self, b: &mut ModelBuilder, arch: &ArchState, ops: SharedOps) -> Result<(), ConfigError> {
        let (d, arch) = (*self, *arch);

        b.add_instruction(
            self.loop_unit,
            "relay_nn_dense_loop_init_instr",
            move |s| d.in_phase(s, DensePhase::LoopInit),
            move |s, u| {
                let j = s.reg32(d.loop_cntr);
                let bias_addr = s.reg32(d.bias_addr).wrapping_add(j.wrapping_mul(WORD_BYTES));
                u.set(d.acc, s.load(arch.relay_mem, byte_to_word(bias_addr))?);
                u.set(d.fma_cntr, 0);
                let next = if s.reg(d.input_size) == 0 {
                    DensePhase::LoopWrite
                } else {
                    DensePhase::LoopFma
                };
                u.set(d.state, next.bits());
                Ok(())
            },
        )?;

        b.add_instruction(
            self.fma_unit,
            "relay_nn_dense_loop_fma_instr",
            move |s| d.in_phase(s, DensePhase::LoopFma),
            move |s, u| {
                let j = s.reg32(d.loop_cntr);
                let i = s.reg32(d.fma_cntr);
                let n_in = s.reg32(d.input_size);

                let w_index = j.wrapping_mul(n_in).wrapping_add(i);
                let w_addr = s.reg32(d.weight_addr).wrapping_add(w_index.wrapping_mul(WORD_BYTES));
                let x_addr = s.reg32(d.input_addr).wrapping_add(i.wrapping_mul(WORD_BYTES));
                let w = s.load(arch.relay_mem, byte_to_word(w_addr))? as u32;
                let x = s.load(arch.relay_mem, byte_to_word(x_addr))? as u32;

                let sum = ops.add(s.reg32(d.acc), ops.multiply(w, x));
                u.set(d.acc, sum as u64);
                u.set(d.fma_cntr, i.wrapping_add(1) as u64);
                if i == n_in.wrapping_sub(1) {
                    u.set(d.state, DensePhase::LoopWrite.bits());
                }
                Ok(())
            },
        )?;

        b.add_instruction(
            self.loop_unit,
            "relay_nn_dense_loop_write_instr",
            move |s| d.in_phase(s, DensePhase::LoopWrite),
            move |s, u| {
                let j = s.reg32(d.loop_cntr);
                let out_addr = s.reg32(d.output_addr).wrapping_add(j.wrapping_mul(WORD_BYTES));
                u.store(arch.relay_mem, byte_to_word(out_addr), s.reg(d.acc))?;

                let next = j.wrapping_add(1);
                u.set(d.loop_cntr, next as u64);
                if next == s.reg32(d.output_size) {
                    log::debug!("dense: done after {} outputs", next);
                    u.set(d.state, DensePhase::Idle.bits());
                    u.set_flag(d.enable, false);
                    u.set(arch.lstm_state, s.reg(arch.return_state));
                } else {
                    u.set(d.state, DensePhase::LoopInit.bits());
                }
                Ok(())
            },
        )?;
        Ok(())
    }
}
