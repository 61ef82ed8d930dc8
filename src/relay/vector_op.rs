//! Elementwise vector engine: add, multiply, sigmoid and tanh.
//!
//! The four operators share the operand/output addresses, the length and
//! the element counter; each has its own enable flag (root) and started
//! flag (vector unit). Only one operator runs at a time.
//!
//! ```text
//! root                              enables, addresses, length
//! └── relay_vector_op_child_module  valid while any enable is on
//!     ├── relay_vector_add_child_module       valid while add is started
//!     ├── relay_vector_multiply_child_module
//!     ├── relay_vector_sigmoid_child_module
//!     └── relay_vector_tanh_child_module
//! ```
//!
//! A run of length `N` takes one trigger step and `N` streaming steps. The
//! last streaming step clears the started and enable flags and restores the
//! composing layer's state from the return-state register. Length zero skips
//! streaming: one step clears the enable flag and restores the return state.

use serde::{Deserialize, Serialize};

use super::arch::{input_latch, ArchState, FunctionId, FLAG_BW, WORD_BW};
use crate::ila::{
    byte_to_word, ConfigError, ModelBuilder, RegId, RegisterClass, Snapshot, StepEngine, UnitId, Updates,
    WORD_BYTES,
};
use crate::primitives::{PrimitiveOps, SharedOps};

/// Elementwise operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorOpKind {
    Add,
    Multiply,
    Sigmoid,
    Tanh,
}

impl VectorOpKind {
    /// All operators, in register order.
    pub const ALL: [VectorOpKind; 4] = [
        VectorOpKind::Add,
        VectorOpKind::Multiply,
        VectorOpKind::Sigmoid,
        VectorOpKind::Tanh,
    ];

    /// Index into per-operator register arrays.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Lower-case operator name.
    pub fn name(self) -> &'static str {
        match self {
            VectorOpKind::Add => "add",
            VectorOpKind::Multiply => "multiply",
            VectorOpKind::Sigmoid => "sigmoid",
            VectorOpKind::Tanh => "tanh",
        }
    }

    /// True for operators reading two operands.
    pub fn is_binary(self) -> bool {
        matches!(self, VectorOpKind::Add | VectorOpKind::Multiply)
    }

    /// Function-select code of a standalone call.
    pub fn function_id(self) -> FunctionId {
        match self {
            VectorOpKind::Add => FunctionId::VectorAdd,
            VectorOpKind::Multiply => FunctionId::VectorMultiply,
            VectorOpKind::Sigmoid => FunctionId::VectorSigmoid,
            VectorOpKind::Tanh => FunctionId::VectorTanh,
        }
    }

    /// Operator for a function-select code.
    pub fn from_function(func: FunctionId) -> Option<Self> {
        match func {
            FunctionId::VectorAdd => Some(VectorOpKind::Add),
            FunctionId::VectorMultiply => Some(VectorOpKind::Multiply),
            FunctionId::VectorSigmoid => Some(VectorOpKind::Sigmoid),
            FunctionId::VectorTanh => Some(VectorOpKind::Tanh),
            FunctionId::MaxPool2d | FunctionId::NnDense | FunctionId::Lstm => None,
        }
    }

    /// Apply the operator to one element. Unary operators ignore `b`.
    #[inline]
    pub fn apply(self, ops: &dyn PrimitiveOps, a: u32, b: u32) -> u32 {
        match self {
            VectorOpKind::Add => ops.add(a, b),
            VectorOpKind::Multiply => ops.multiply(a, b),
            VectorOpKind::Sigmoid => ops.sigmoid(a),
            VectorOpKind::Tanh => ops.tanh(a),
        }
    }
}

/// Parameters of one vector call. Addresses are byte addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorArgs {
    pub op0_addr: u32,
    pub op1_addr: u32,
    pub output_addr: u32,
    /// Elements to process.
    pub size: u32,
}

/// Registers and units of the vector engine.
#[derive(Debug, Clone, Copy)]
pub struct VectorOps {
    pub op0_addr_in: RegId,
    pub op1_addr_in: RegId,
    pub output_addr_in: RegId,
    pub size_in: RegId,

    pub op0_addr: RegId,
    pub op1_addr: RegId,
    pub output_addr: RegId,
    pub size: RegId,
    /// Per-operator enable flags, indexed by [`VectorOpKind::index`].
    pub enable: [RegId; 4],

    /// Element counter (vector unit).
    pub cntr: RegId,
    /// Per-operator started flags (vector unit).
    pub start: [RegId; 4],

    pub unit: UnitId,
    pub stream_units: [UnitId; 4],
}

impl VectorOps {
    /// Register the engine into `b`.
    pub fn define(b: &mut ModelBuilder, arch: &ArchState, ops: SharedOps) -> Result<Self, ConfigError> {
        let root = b.root();
        let (op0_addr_in, op0_addr) = input_latch(b, "relay_vector_op0_addr", WORD_BW, WORD_BW)?;
        let (op1_addr_in, op1_addr) = input_latch(b, "relay_vector_op1_addr", WORD_BW, WORD_BW)?;
        let (output_addr_in, output_addr) = input_latch(b, "relay_vector_output_addr", WORD_BW, WORD_BW)?;
        let (size_in, size) = input_latch(b, "relay_vector_op_size", WORD_BW, WORD_BW)?;

        let mut enable = [RegId(0); 4];
        for kind in VectorOpKind::ALL {
            enable[kind.index()] = b.add_register(
                root,
                &format!("relay_vector_{}_enable", kind.name()),
                FLAG_BW,
                RegisterClass::Architectural,
            )?;
        }

        let unit = b.add_child(root, "relay_vector_op_child_module")?;
        let cntr = b.add_register(unit, "relay_vector_op_cntr", WORD_BW, RegisterClass::Control)?;
        let mut start = [RegId(0); 4];
        for kind in VectorOpKind::ALL {
            start[kind.index()] = b.add_register(
                unit,
                &format!("relay_vector_{}_start", kind.name()),
                FLAG_BW,
                RegisterClass::Control,
            )?;
        }

        let mut stream_units = [UnitId::ROOT; 4];
        for kind in VectorOpKind::ALL {
            stream_units[kind.index()] = b.add_child(unit, &format!("relay_vector_{}_child_module", kind.name()))?;
        }

        let v = Self {
            op0_addr_in,
            op1_addr_in,
            output_addr_in,
            size_in,
            op0_addr,
            op1_addr,
            output_addr,
            size,
            enable,
            cntr,
            start,
            unit,
            stream_units,
        };

        b.set_valid(unit, move |s| v.any_enabled(s))?;
        for kind in VectorOpKind::ALL {
            b.set_valid(v.stream_units[kind.index()], move |s| s.flag(v.start[kind.index()]))?;
        }

        v.define_calls(b, arch)?;
        v.define_empty(b, arch)?;
        for kind in VectorOpKind::ALL {
            v.define_operator(b, arch, kind, ops.clone())?;
        }
        Ok(v)
    }

    /// True while any operator is enabled.
    pub fn any_enabled(&self, s: &Snapshot) -> bool {
        self.enable.iter().any(|&r| s.flag(r))
    }

    /// Enable flag of `kind`.
    pub fn enabled(&self, s: &Snapshot, kind: VectorOpKind) -> bool {
        s.flag(self.enable[kind.index()])
    }

    /// Drive the harness inputs for `args`.
    pub fn drive(&self, engine: &mut StepEngine, args: &VectorArgs) {
        engine.set_input(self.op0_addr_in, args.op0_addr as u64);
        engine.set_input(self.op1_addr_in, args.op1_addr as u64);
        engine.set_input(self.output_addr_in, args.output_addr as u64);
        engine.set_input(self.size_in, args.size as u64);
    }

    /// Latch `args` and enable `kind`. Used by standalone calls and by
    /// composing layers.
    pub fn configure(&self, u: &mut Updates<'_>, kind: VectorOpKind, args: &VectorArgs) {
        u.set(self.op0_addr, args.op0_addr as u64);
        u.set(self.op1_addr, args.op1_addr as u64);
        u.set(self.output_addr, args.output_addr as u64);
        u.set(self.size, args.size as u64);
        u.set_flag(self.enable[kind.index()], true);
    }

    /// Root instructions for the four standalone calls.
    fn define_calls(&self, b: &mut ModelBuilder, arch: &ArchState) -> Result<(), ConfigError> {
        let (v, arch) = (*self, *arch);
        for kind in VectorOpKind::ALL {
            let func = kind.function_id();
            b.add_instruction(
                b.root(),
                &format!("relay_vector_{}_call", kind.name()),
                move |s| arch.called(s, func),
                move |s, u| {
                    let args = VectorArgs {
                        op0_addr: s.reg32(v.op0_addr_in),
                        op1_addr: s.reg32(v.op1_addr_in),
                        output_addr: s.reg32(v.output_addr_in),
                        size: s.reg32(v.size_in),
                    };
                    log::debug!(
                        "vector {}: {} elements, op0 0x{:X} op1 0x{:X} -> 0x{:X}",
                        kind.name(),
                        args.size,
                        args.op0_addr,
                        args.op1_addr,
                        args.output_addr
                    );
                    v.configure(u, kind, &args);
                    u.set(arch.return_state, s.reg(arch.lstm_state));
                    Ok(())
                },
            )?;
        }
        Ok(())
    }

    /// Zero-length run: clear the enable flag without streaming.
    fn define_empty(&self, b: &mut ModelBuilder, arch: &ArchState) -> Result<(), ConfigError> {
        let (v, arch) = (*self, *arch);
        b.add_instruction(
            self.unit,
            "relay_vector_op_empty_instr",
            move |s| {
                s.reg(v.size) == 0
                    && VectorOpKind::ALL
                        .iter()
                        .any(|k| s.flag(v.enable[k.index()]) && !s.flag(v.start[k.index()]))
            },
            move |s, u| {
                for kind in VectorOpKind::ALL {
                    let i = kind.index();
                    if s.flag(v.enable[i]) && !s.flag(v.start[i]) {
                        log::debug!("vector {}: zero length, nothing to do", kind.name());
                        u.set_flag(v.enable[i], false);
                    }
                }
                u.set(arch.lstm_state, s.reg(arch.return_state));
                Ok(())
            },
        )?;
        Ok(())
    }

    /// Trigger instruction and streaming unit of one operator.
    fn define_operator(
        &self,
        b: &mut ModelBuilder,
        arch: &ArchState,
        kind: VectorOpKind,
        ops: SharedOps,
    ) -> Result<(), ConfigError> {
        let (v, arch) = (*self, *arch);
        let i = kind.index();

        b.add_instruction(
            self.unit,
            &format!("relay_vector_{}_instr", kind.name()),
            move |s| s.flag(v.enable[i]) && s.reg(v.size) != 0 && !s.flag(v.start[i]),
            move |_, u| {
                u.set_flag(v.start[i], true);
                u.set(v.cntr, 0);
                Ok(())
            },
        )?;

        b.add_instruction(
            self.stream_units[i],
            &format!("relay_vector_{}_child_instr", kind.name()),
            move |s| s.flag(v.start[i]),
            move |s, u| {
                let cntr = s.reg32(v.cntr);
                let offset = cntr.wrapping_mul(WORD_BYTES);
                let op0 = s.load(arch.relay_mem, byte_to_word(s.reg32(v.op0_addr).wrapping_add(offset)))? as u32;
                let op1 = if kind.is_binary() {
                    s.load(arch.relay_mem, byte_to_word(s.reg32(v.op1_addr).wrapping_add(offset)))? as u32
                } else {
                    0
                };
                let result = kind.apply(ops.as_ref(), op0, op1);
                u.store(
                    arch.relay_mem,
                    byte_to_word(s.reg32(v.output_addr).wrapping_add(offset)),
                    result as u64,
                )?;

                let next = cntr.wrapping_add(1);
                u.set(v.cntr, next as u64);
                if next == s.reg32(v.size) {
                    log::debug!("vector {}: done after {} elements", kind.name(), next);
                    u.set_flag(v.start[i], false);
                    u.set_flag(v.enable[i], false);
                    u.set(arch.lstm_state, s.reg(arch.return_state));
                }
                Ok(())
            },
        )?;
        Ok(())
    }
}
