//! LSTM cell composed from the dense and vector engines.
//!
//! The LSTM unit does no arithmetic itself. Each work phase configures one
//! delegated engine and records the following phase in the return-state
//! register; the engine writes that phase back into `lstm_state` on its last
//! step, which lets the next phase instruction decode.
//!
//! | Phase | Work |
//! |-------|------|
//! | 1 `DENSE_I2H` | `temp0 = W_ih x + b_ih` (4H outputs) |
//! | 2 `DENSE_H2H` | `temp1 = W_hh h + b_hh` (4H outputs) |
//! | 3 `ADD_DENSE` | `temp0 = temp0 + temp1` |
//! | 4 `SIGMOID` | input and forget gates: `temp1[0..2H] = σ(temp0[0..2H])` |
//! | 5 `CELL_TANH` | candidate: `temp1[2H..3H] = tanh(temp0[2H..3H])` |
//! | 6 `OUTPUT_GATE` | `temp1[3H..4H] = σ(temp0[3H..4H])` |
//! | 7 `FORGET_GATE` | `temp2[0..H] = f * c` |
//! | 8 `INPUT_GATE` | `temp2[H..2H] = i * g` |
//! | 9 `NEXT_CELL` | `c' = temp2[0..H] + temp2[H..2H]` |
//! | 10 `NEXT_CELL_TANH` | `temp2[0..H] = tanh(c')` |
//! | 11 `OUTPUT` | `h' = o * temp2[0..H]` |
//! | 12 `END` | done |
//!
//! Gate layout of the projections is `[input, forget, cell, output]`.

use serde::{Deserialize, Serialize};

use super::arch::{input_latch, ArchState, FunctionId, WORD_BW};
use super::dense::{DenseArgs, NnDense};
use super::vector_op::{VectorArgs, VectorOpKind, VectorOps};
use crate::ila::{ConfigError, ModelBuilder, RegId, Snapshot, StepEngine, UnitId, WORD_BYTES};

/// LSTM control phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LstmPhase {
    Wait = 0,
    DenseI2h = 1,
    DenseH2h = 2,
    AddDense = 3,
    Sigmoid = 4,
    CellTanh = 5,
    OutputGate = 6,
    ForgetGate = 7,
    InputGate = 8,
    NextCell = 9,
    NextCellTanh = 10,
    Output = 11,
    End = 12,
}

impl LstmPhase {
    /// Phases that delegate work, in execution order.
    pub const WORK: [LstmPhase; 11] = [
        LstmPhase::DenseI2h,
        LstmPhase::DenseH2h,
        LstmPhase::AddDense,
        LstmPhase::Sigmoid,
        LstmPhase::CellTanh,
        LstmPhase::OutputGate,
        LstmPhase::ForgetGate,
        LstmPhase::InputGate,
        LstmPhase::NextCell,
        LstmPhase::NextCellTanh,
        LstmPhase::Output,
    ];

    pub fn from_bits(bits: u64) -> Option<Self> {
        Some(match bits {
            0 => LstmPhase::Wait,
            1 => LstmPhase::DenseI2h,
            2 => LstmPhase::DenseH2h,
            3 => LstmPhase::AddDense,
            4 => LstmPhase::Sigmoid,
            5 => LstmPhase::CellTanh,
            6 => LstmPhase::OutputGate,
            7 => LstmPhase::ForgetGate,
            8 => LstmPhase::InputGate,
            9 => LstmPhase::NextCell,
            10 => LstmPhase::NextCellTanh,
            11 => LstmPhase::Output,
            12 => LstmPhase::End,
            _ => return None,
        })
    }

    pub fn bits(self) -> u64 {
        self as u64
    }

    /// Phase that follows this one.
    pub fn next(self) -> LstmPhase {
        match self {
            LstmPhase::Wait => LstmPhase::Wait,
            LstmPhase::DenseI2h => LstmPhase::DenseH2h,
            LstmPhase::DenseH2h => LstmPhase::AddDense,
            LstmPhase::AddDense => LstmPhase::Sigmoid,
            LstmPhase::Sigmoid => LstmPhase::CellTanh,
            LstmPhase::CellTanh => LstmPhase::OutputGate,
            LstmPhase::OutputGate => LstmPhase::ForgetGate,
            LstmPhase::ForgetGate => LstmPhase::InputGate,
            LstmPhase::InputGate => LstmPhase::NextCell,
            LstmPhase::NextCell => LstmPhase::NextCellTanh,
            LstmPhase::NextCellTanh => LstmPhase::Output,
            LstmPhase::Output | LstmPhase::End => LstmPhase::End,
        }
    }

    /// Instruction that starts this phase's work.
    pub fn instr_name(self) -> Option<&'static str> {
        Some(match self {
            LstmPhase::Wait | LstmPhase::End => return None,
            LstmPhase::DenseI2h => "relay_lstm_dense_i2h_instr",
            LstmPhase::DenseH2h => "relay_lstm_dense_h2h_instr",
            LstmPhase::AddDense => "relay_lstm_add_dense_instr",
            LstmPhase::Sigmoid => "relay_lstm_sigmoid_instr",
            LstmPhase::CellTanh => "relay_lstm_cell_tanh_instr",
            LstmPhase::OutputGate => "relay_lstm_output_gate_instr",
            LstmPhase::ForgetGate => "relay_lstm_forget_gate_instr",
            LstmPhase::InputGate => "relay_lstm_input_gate_instr",
            LstmPhase::NextCell => "relay_lstm_next_cell_instr",
            LstmPhase::NextCellTanh => "relay_lstm_next_cell_tanh_instr",
            LstmPhase::Output => "relay_lstm_output_instr",
        })
    }
}

/// Parameters of one LSTM cell step. Addresses are byte addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LstmArgs {
    pub input_size: u32,
    pub hidden_size: u32,
    pub input_addr: u32,
    pub cell_addr: u32,
    pub next_cell_addr: u32,
    pub hidden_addr: u32,
    pub next_hidden_addr: u32,
    pub i2h_weight_addr: u32,
    pub h2h_weight_addr: u32,
    pub i2h_bias_addr: u32,
    pub h2h_bias_addr: u32,
    /// Scratch, 4H words.
    pub temp0_addr: u32,
    /// Scratch, 4H words.
    pub temp1_addr: u32,
    /// Scratch, 2H words.
    pub temp2_addr: u32,
}

const PARAM_COUNT: usize = 14;

const PARAM_NAMES: [&str; PARAM_COUNT] = [
    "relay_lstm_in_size",
    "relay_lstm_out_size",
    "relay_lstm_input_addr",
    "relay_lstm_cell_addr",
    "relay_lstm_next_cell_addr",
    "relay_lstm_hidden_addr",
    "relay_lstm_next_hidden_addr",
    "relay_lstm_i2h_weight_addr",
    "relay_lstm_h2h_weight_addr",
    "relay_lstm_i2h_bias_addr",
    "relay_lstm_h2h_bias_addr",
    "relay_lstm_temp_vector0_addr",
    "relay_lstm_temp_vector1_addr",
    "relay_lstm_temp_vector2_addr",
];

impl LstmArgs {
    fn to_words(self) -> [u32; PARAM_COUNT] {
        [
            self.input_size,
            self.hidden_size,
            self.input_addr,
            self.cell_addr,
            self.next_cell_addr,
            self.hidden_addr,
            self.next_hidden_addr,
            self.i2h_weight_addr,
            self.h2h_weight_addr,
            self.i2h_bias_addr,
            self.h2h_bias_addr,
            self.temp0_addr,
            self.temp1_addr,
            self.temp2_addr,
        ]
    }

    fn from_words(w: [u32; PARAM_COUNT]) -> Self {
        Self {
            input_size: w[0],
            hidden_size: w[1],
            input_addr: w[2],
            cell_addr: w[3],
            next_cell_addr: w[4],
            hidden_addr: w[5],
            next_hidden_addr: w[6],
            i2h_weight_addr: w[7],
            h2h_weight_addr: w[8],
            i2h_bias_addr: w[9],
            h2h_bias_addr: w[10],
            temp0_addr: w[11],
            temp1_addr: w[12],
            temp2_addr: w[13],
        }
    }
}

/// Work handed to a delegated engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delegation {
    Dense(DenseArgs),
    Vector(VectorOpKind, VectorArgs),
}

/// Work of `phase` for the cell described by `p`. `None` for phases that do
/// no work.
pub fn delegation(phase: LstmPhase, p: &LstmArgs) -> Option<Delegation> {
    let h = p.hidden_size;
    let gates = h.wrapping_mul(4);
    // Byte offset of the k-th H-sized block
    let block = |base: u32, k: u32| base.wrapping_add(h.wrapping_mul(k).wrapping_mul(WORD_BYTES));
    let vector = |kind, op0_addr, op1_addr, output_addr, size| {
        Some(Delegation::Vector(
            kind,
            VectorArgs {
                op0_addr,
                op1_addr,
                output_addr,
                size,
            },
        ))
    };

    match phase {
        LstmPhase::Wait | LstmPhase::End => None,
        LstmPhase::DenseI2h => Some(Delegation::Dense(DenseArgs {
            input_size: p.input_size,
            output_size: gates,
            weight_addr: p.i2h_weight_addr,
            bias_addr: p.i2h_bias_addr,
            input_addr: p.input_addr,
            output_addr: p.temp0_addr,
        })),
        LstmPhase::DenseH2h => Some(Delegation::Dense(DenseArgs {
            input_size: h,
            output_size: gates,
            weight_addr: p.h2h_weight_addr,
            bias_addr: p.h2h_bias_addr,
            input_addr: p.hidden_addr,
            output_addr: p.temp1_addr,
        })),
        LstmPhase::AddDense => vector(VectorOpKind::Add, p.temp0_addr, p.temp1_addr, p.temp0_addr, gates),
        LstmPhase::Sigmoid => vector(VectorOpKind::Sigmoid, p.temp0_addr, 0, p.temp1_addr, h.wrapping_mul(2)),
        LstmPhase::CellTanh => vector(VectorOpKind::Tanh, block(p.temp0_addr, 2), 0, block(p.temp1_addr, 2), h),
        LstmPhase::OutputGate => {
            vector(VectorOpKind::Sigmoid, block(p.temp0_addr, 3), 0, block(p.temp1_addr, 3), h)
        }
        LstmPhase::ForgetGate => {
            vector(VectorOpKind::Multiply, block(p.temp1_addr, 1), p.cell_addr, p.temp2_addr, h)
        }
        LstmPhase::InputGate => vector(
            VectorOpKind::Multiply,
            p.temp1_addr,
            block(p.temp1_addr, 2),
            block(p.temp2_addr, 1),
            h,
        ),
        LstmPhase::NextCell => {
            vector(VectorOpKind::Add, p.temp2_addr, block(p.temp2_addr, 1), p.next_cell_addr, h)
        }
        LstmPhase::NextCellTanh => vector(VectorOpKind::Tanh, p.next_cell_addr, 0, p.temp2_addr, h),
        LstmPhase::Output => {
            vector(VectorOpKind::Multiply, block(p.temp1_addr, 3), p.temp2_addr, p.next_hidden_addr, h)
        }
    }
}

/// Registers and unit of the LSTM layer.
#[derive(Debug, Clone, Copy)]
pub struct LstmCell {
    pub inputs: [RegId; PARAM_COUNT],
    pub params: [RegId; PARAM_COUNT],
    pub unit: UnitId,
}

impl LstmCell {
    /// Register the layer into `b`. Needs the engines it delegates to.
    pub fn define(
        b: &mut ModelBuilder,
        arch: &ArchState,
        vector: &VectorOps,
        dense: &NnDense,
    ) -> Result<Self, ConfigError> {
        let mut inputs = [RegId(0); PARAM_COUNT];
        let mut params = [RegId(0); PARAM_COUNT];
        for (i, name) in PARAM_NAMES.iter().enumerate() {
            let (input, reg) = input_latch(b, name, WORD_BW, WORD_BW)?;
            inputs[i] = input;
            params[i] = reg;
        }
        let unit = b.add_child(b.root(), "relay_lstm_matrix_vector_module")?;

        let (l, arch, vector, dense) = (
            Self { inputs, params, unit },
            *arch,
            *vector,
            *dense,
        );
        b.set_valid(unit, move |s| {
            LstmPhase::from_bits(s.reg(arch.lstm_state)).map_or(false, |p| LstmPhase::WORK.contains(&p))
        })?;

        b.add_instruction(
            b.root(),
            "relay_lstm_call",
            move |s| arch.called(s, FunctionId::Lstm),
            move |s, u| {
                for (input, param) in l.inputs.iter().zip(l.params.iter()) {
                    u.set(*param, s.reg(*input));
                }
                log::debug!(
                    "lstm: input {} hidden {}",
                    s.reg(l.inputs[0]),
                    s.reg(l.inputs[1])
                );
                u.set(arch.lstm_state, LstmPhase::DenseI2h.bits());
                Ok(())
            },
        )?;

        for phase in LstmPhase::WORK {
            let Some(name) = phase.instr_name() else {
                continue;
            };
            b.add_instruction(
                unit,
                name,
                move |s| {
                    s.reg(arch.lstm_state) == phase.bits() && !vector.any_enabled(s) && !s.flag(dense.enable)
                },
                move |s, u| {
                    let next = phase.next();
                    log::debug!("lstm: phase {:?}, resumes at {:?}", phase, next);
                    match delegation(phase, &l.args(s)) {
                        Some(Delegation::Dense(args)) => dense.configure(u, &args),
                        Some(Delegation::Vector(kind, args)) => vector.configure(u, kind, &args),
                        None => {}
                    }
                    u.set(arch.return_state, next.bits());
                    Ok(())
                },
            )?;
        }

        Ok(l)
    }

    /// Latched parameters of the current cell step.
    pub fn args(&self, s: &Snapshot) -> LstmArgs {
        let mut words = [0u32; PARAM_COUNT];
        for (w, reg) in words.iter_mut().zip(self.params.iter()) {
            *w = s.reg32(*reg);
        }
        LstmArgs::from_words(words)
    }

    /// Drive the harness inputs for `args`.
    pub fn drive(&self, engine: &mut StepEngine, args: &LstmArgs) {
        for (input, value) in self.inputs.iter().zip(args.to_words()) {
            engine.set_input(*input, value as u64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::Ieee754Ops;
    use crate::relay::{FunctionCall, RelayAccelerator};
    use crate::testing::reference;

    /// Deterministic small values in [-1, 1).
    fn ramp(n: usize, seed: u32) -> Vec<u32> {
        (0..n)
            .map(|i| {
                let k = (i as u32).wrapping_mul(7).wrapping_add(seed) % 17;
                (k as f32 / 8.5 - 1.0).to_bits()
            })
            .collect()
    }

    fn layout(input_size: u32, hidden_size: u32) -> LstmArgs {
        LstmArgs {
            input_size,
            hidden_size,
            input_addr: 0x000,
            hidden_addr: 0x100,
            cell_addr: 0x200,
            next_cell_addr: 0x300,
            next_hidden_addr: 0x400,
            i2h_weight_addr: 0x1000,
            h2h_weight_addr: 0x2000,
            i2h_bias_addr: 0x3000,
            h2h_bias_addr: 0x3100,
            temp0_addr: 0x4000,
            temp1_addr: 0x4100,
            temp2_addr: 0x4200,
        }
    }

    #[test]
    fn test_lstm_cell_matches_reference() {
        let (n_in, h) = (3usize, 2usize);
        let args = layout(n_in as u32, h as u32);
        let x = ramp(n_in, 1);
        let hidden = ramp(h, 2);
        let cell = ramp(h, 3);
        let w_ih = ramp(4 * h * n_in, 4);
        let w_hh = ramp(4 * h * h, 5);
        let b_ih = ramp(4 * h, 6);
        let b_hh = ramp(4 * h, 7);

        let mut acc = RelayAccelerator::for_tests();
        acc.load_words(args.input_addr, &x).unwrap();
        acc.load_words(args.hidden_addr, &hidden).unwrap();
        acc.load_words(args.cell_addr, &cell).unwrap();
        acc.load_words(args.i2h_weight_addr, &w_ih).unwrap();
        acc.load_words(args.h2h_weight_addr, &w_hh).unwrap();
        acc.load_words(args.i2h_bias_addr, &b_ih).unwrap();
        acc.load_words(args.h2h_bias_addr, &b_hh).unwrap();

        let summary = acc.call(&FunctionCall::Lstm(args)).unwrap();
        assert!(summary.reached_idle);
        let s = acc.engine().snapshot();
        assert_eq!(s.reg(acc.arch().lstm_state), LstmPhase::End.bits());

        let (next_h, next_c) = reference::lstm_cell(
            &Ieee754Ops,
            &reference::LstmWeights {
                w_ih: &w_ih,
                b_ih: &b_ih,
                w_hh: &w_hh,
                b_hh: &b_hh,
            },
            &x,
            &hidden,
            &cell,
        );
        assert_eq!(acc.read_words(args.next_cell_addr, h).unwrap(), next_c);
        assert_eq!(acc.read_words(args.next_hidden_addr, h).unwrap(), next_h);
    }

    #[test]
    fn test_lstm_walks_every_phase_in_order() {
        let mut acc = RelayAccelerator::for_tests();
        let arch = *acc.arch();
        acc.invoke(&FunctionCall::Lstm(layout(1, 1))).unwrap();

        let mut seen = vec![acc.engine().snapshot().reg(arch.lstm_state)];
        loop {
            let report = acc.engine_mut().step().unwrap();
            if report.is_idle() {
                break;
            }
            let phase = acc.engine().snapshot().reg(arch.lstm_state);
            if seen.last() != Some(&phase) {
                seen.push(phase);
            }
        }
        assert_eq!(seen, (1..=12).collect::<Vec<u64>>());
    }

    #[test]
    fn test_lstm_phase_waits_for_delegated_engine() {
        let mut acc = RelayAccelerator::for_tests();
        let arch = *acc.arch();
        acc.invoke(&FunctionCall::Lstm(layout(1, 1))).unwrap();

        let report = acc.engine_mut().step().unwrap();
        assert_eq!(
            acc.engine().instruction_names(&report.decoded),
            vec!["relay_lstm_dense_i2h_instr"]
        );
        let s = acc.engine().snapshot();
        assert!(s.flag(acc.dense().enable));
        assert_eq!(s.reg(arch.lstm_state), LstmPhase::DenseI2h.bits());
        assert_eq!(s.reg(arch.return_state), LstmPhase::DenseH2h.bits());

        // Dense runs; the LSTM phase instruction must not decode again
        let report = acc.engine_mut().step().unwrap();
        assert_eq!(acc.engine().instruction_names(&report.decoded), vec!["relay_nn_dense_instr"]);
    }

    #[test]
    fn test_zero_hidden_size_finishes() {
        let mut acc = RelayAccelerator::for_tests();
        let summary = acc.call(&FunctionCall::Lstm(layout(2, 0))).unwrap();
        assert!(summary.reached_idle);
        assert_eq!(
            acc.engine().snapshot().reg(acc.arch().lstm_state),
            LstmPhase::End.bits()
        );
    }

    #[test]
    fn test_delegation_table() {
        let p = layout(3, 2);
        assert_eq!(delegation(LstmPhase::Wait, &p), None);
        assert_eq!(delegation(LstmPhase::End, &p), None);
        match delegation(LstmPhase::CellTanh, &p) {
            Some(Delegation::Vector(VectorOpKind::Tanh, v)) => {
                assert_eq!(v.op0_addr, 0x4000 + 16);
                assert_eq!(v.output_addr, 0x4100 + 16);
                assert_eq!(v.size, 2);
            }
            other => panic!("unexpected delegation {:?}", other),
        }
        match delegation(LstmPhase::DenseH2h, &p) {
            Some(Delegation::Dense(d)) => {
                assert_eq!(d.input_size, 2);
                assert_eq!(d.output_size, 8);
            }
            other => panic!("unexpected delegation {:?}", other),
        }
        let next: Vec<u64> = LstmPhase::WORK.iter().map(|p| p.next().bits()).collect();
        assert_eq!(next, (2..=12).collect::<Vec<u64>>());
    }
}
