//! 2-D max-pooling engine (`nn.max_pool2d`, single channel, no padding).
//!
//! # Units
//!
//! ```text
//! root                      entry instruction, loop registers
//! └── maxpooling_loop_op    valid while the start flag is on
//!     └── maxpooling_find_max_loop   valid in FIND_MAX_CHILD
//! ```
//!
//! # Phases
//!
//! ```text
//! WAIT ─entry─▶ FIND_MAX_PREP ─▶ FIND_MAX_CHILD* ─▶ WRITE ─▶ INC_X
//!                    ▲                                          │
//!                    ├──────────────── next column ─────────────┤
//!                    │                                          ▼
//!                    └──────────────── next row ◀──────────── INC_Y ─▶ DONE
//! ```
//!
//! Every phase has at most one handler (see [`MaxPoolPhase::handler`]), so
//! the loop unit never decodes two instructions in one step.
//!
//! The input tensor is read from the tensor memory at `row * width_in + col`.
//! Each window maximum is written back at `x_out + y_out * width_out`; since
//! every later window starts at or after its own output index, overwriting
//! the input in place never clobbers an element still to be read.

use serde::{Deserialize, Serialize};

use super::arch::{ArchState, FunctionId, FLAG_BW, STATE_BW, TENSOR_DATA_BW, WORD_BW};
use crate::ila::{ConfigError, Fault, ModelBuilder, RegId, RegisterClass, Snapshot, StepEngine, UnitId};
use crate::primitives::SharedOps;

/// Width of the pool-size and stride inputs.
pub const POOL_PARAM_BW: u32 = 8;

const INSTR_ENTRY: &str = "maxpooling_2d";
const INSTR_INC_X: &str = "child_loop_X_update";
const INSTR_INC_Y: &str = "child_loop_Y_update";
const INSTR_FIND_MAX_PREP: &str = "child_call_find_max";
const INSTR_WRITE: &str = "child_write_max_value";
const INSTR_FIND_MAX: &str = "maxpooling_find_max_op";

/// Control phase of the max-pooling engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MaxPoolPhase {
    Wait = 0,
    FindMaxPrep = 1,
    FindMaxChild = 2,
    Write = 3,
    IncX = 4,
    IncY = 5,
    Done = 6,
}

impl MaxPoolPhase {
    /// Decode a phase register value.
    pub fn from_bits(bits: u64) -> Option<Self> {
        Some(match bits {
            0 => MaxPoolPhase::Wait,
            1 => MaxPoolPhase::FindMaxPrep,
            2 => MaxPoolPhase::FindMaxChild,
            3 => MaxPoolPhase::Write,
            4 => MaxPoolPhase::IncX,
            5 => MaxPoolPhase::IncY,
            6 => MaxPoolPhase::Done,
            _ => return None,
        })
    }

    /// Phase register value.
    pub fn bits(self) -> u64 {
        self as u64
    }

    /// Name of the instruction that advances this phase, if any.
    pub fn handler(self) -> Option<&'static str> {
        match self {
            MaxPoolPhase::Wait | MaxPoolPhase::Done => None,
            MaxPoolPhase::FindMaxPrep => Some(INSTR_FIND_MAX_PREP),
            MaxPoolPhase::FindMaxChild => Some(INSTR_FIND_MAX),
            MaxPoolPhase::Write => Some(INSTR_WRITE),
            MaxPoolPhase::IncX => Some(INSTR_INC_X),
            MaxPoolPhase::IncY => Some(INSTR_INC_Y),
        }
    }
}

/// Parameters of one `max_pool2d` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaxPoolArgs {
    /// Input rows.
    pub height: u32,
    /// Input columns.
    pub width: u32,
    /// Window rows.
    pub pool_y: u8,
    /// Window columns.
    pub pool_x: u8,
    /// Row stride.
    pub stride_y: u8,
    /// Column stride.
    pub stride_x: u8,
}

impl MaxPoolArgs {
    /// Output dimensions `(height, width)`.
    pub fn output_dims(&self) -> (u32, u32) {
        let oh = if self.stride_y == 0 { 0 } else { self.height / self.stride_y as u32 };
        let ow = if self.stride_x == 0 { 0 } else { self.width / self.stride_x as u32 };
        (oh, ow)
    }
}

/// Registers and units of the max-pooling engine.
#[derive(Debug, Clone, Copy)]
pub struct MaxPool2d {
    // Harness inputs
    pub height_in_port: RegId,
    pub width_in_port: RegId,
    pub pool_y_in: RegId,
    pub pool_x_in: RegId,
    pub stride_y_in: RegId,
    pub stride_x_in: RegId,

    // Root registers
    pub height_in: RegId,
    pub width_in: RegId,
    pub pool_y: RegId,
    pub pool_x: RegId,
    pub stride_y: RegId,
    pub stride_x: RegId,
    pub start: RegId,
    pub state: RegId,
    pub cntr_x: RegId,
    pub cntr_y: RegId,
    pub height_out: RegId,
    pub width_out: RegId,

    // Loop unit registers
    pub win_x: RegId,
    pub win_y: RegId,
    pub result: RegId,

    pub loop_unit: UnitId,
    pub find_max_unit: UnitId,
}

impl MaxPool2d {
    /// Register the engine into `b`.
    pub fn define(b: &mut ModelBuilder, arch: &ArchState, ops: SharedOps) -> Result<Self, ConfigError> {
        let root = b.root();
        let arch_reg = |b: &mut ModelBuilder, name: &str, width: u32| {
            b.add_register(root, name, width, RegisterClass::Architectural)
        };

        let height_in_port = b.add_input("data_in_y", WORD_BW)?;
        let width_in_port = b.add_input("data_in_x", WORD_BW)?;
        let pool_y_in = b.add_input("pool_size_y_in", POOL_PARAM_BW)?;
        let pool_x_in = b.add_input("pool_size_x_in", POOL_PARAM_BW)?;
        let stride_y_in = b.add_input("strides_y_in", POOL_PARAM_BW)?;
        let stride_x_in = b.add_input("strides_x_in", POOL_PARAM_BW)?;

        let height_in = arch_reg(b, "maxpooling_data_in_height", WORD_BW)?;
        let width_in = arch_reg(b, "maxpooling_data_in_width", WORD_BW)?;
        let pool_y = arch_reg(b, "maxpooling_pool_y", WORD_BW)?;
        let pool_x = arch_reg(b, "maxpooling_pool_x", WORD_BW)?;
        let stride_y = arch_reg(b, "maxpooling_stride_y", WORD_BW)?;
        let stride_x = arch_reg(b, "maxpooling_stride_x", WORD_BW)?;
        let height_out = arch_reg(b, "maxpooling_data_out_height", WORD_BW)?;
        let width_out = arch_reg(b, "maxpooling_data_out_width", WORD_BW)?;
        let start = b.add_register(root, "maxpooling_start_flag", FLAG_BW, RegisterClass::Control)?;
        let state = b.add_register(root, "maxpooling_state", STATE_BW, RegisterClass::Control)?;
        let cntr_x = b.add_register(root, "maxpooling_x_loop_cntr", WORD_BW, RegisterClass::Control)?;
        let cntr_y = b.add_register(root, "maxpooling_y_loop_cntr", WORD_BW, RegisterClass::Control)?;

        let loop_unit = b.add_child(root, "maxpooling_loop_op")?;
        let win_x = b.add_register(loop_unit, "maxpooling_find_max_cntr_x", WORD_BW, RegisterClass::Control)?;
        let win_y = b.add_register(loop_unit, "maxpooling_find_max_cntr_y", WORD_BW, RegisterClass::Control)?;
        let result = b.add_register(
            loop_unit,
            "maxpooling_find_max_result",
            TENSOR_DATA_BW,
            RegisterClass::Control,
        )?;
        let find_max_unit = b.add_child(loop_unit, "maxpooling_find_max_loop")?;

        let mp = Self {
            height_in_port,
            width_in_port,
            pool_y_in,
            pool_x_in,
            stride_y_in,
            stride_x_in,
            height_in,
            width_in,
            pool_y,
            pool_x,
            stride_y,
            stride_x,
            start,
            state,
            cntr_x,
            cntr_y,
            height_out,
            width_out,
            win_x,
            win_y,
            result,
            loop_unit,
            find_max_unit,
        };

        b.set_valid(loop_unit, move |s| s.flag(mp.start))?;
        b.set_valid(find_max_unit, move |s| mp.in_phase(s, MaxPoolPhase::FindMaxChild))?;

        mp.define_entry(b, arch)?;
        mp.define_loop(b, arch)?;
        mp.define_find_max(b, arch, ops)?;
        Ok(mp)
    }

    /// Current phase, `None` for an unassigned code.
    pub fn phase(&self, s: &Snapshot) -> Option<MaxPoolPhase> {
        MaxPoolPhase::from_bits(s.reg(self.state))
    }

    #[inline]
    fn in_phase(&self, s: &Snapshot, phase: MaxPoolPhase) -> bool {
        s.reg(self.state) == phase.bits()
    }

    /// Drive the harness inputs for `args`.
    pub fn drive(&self, engine: &mut StepEngine, args: &MaxPoolArgs) {
        engine.set_input(self.height_in_port, args.height as u64);
        engine.set_input(self.width_in_port, args.width as u64);
        engine.set_input(self.pool_y_in, args.pool_y as u64);
        engine.set_input(self.pool_x_in, args.pool_x as u64);
        engine.set_input(self.stride_y_in, args.stride_y as u64);
        engine.set_input(self.stride_x_in, args.stride_x as u64);
    }

    fn define_entry(&self, b: &mut ModelBuilder, arch: &ArchState) -> Result<(), ConfigError> {
        let (mp, arch) = (*self, *arch);
        b.add_instruction(
            b.root(),
            INSTR_ENTRY,
            move |s| arch.called(s, FunctionId::MaxPool2d),
            move |s, u| {
                let height_in = s.reg(mp.height_in_port);
                let width_in = s.reg(mp.width_in_port);
                let pool_y = s.reg(mp.pool_y_in);
                let pool_x = s.reg(mp.pool_x_in);
                let stride_y = s.reg(mp.stride_y_in);
                let stride_x = s.reg(mp.stride_x_in);

                if stride_y == 0 || stride_x == 0 {
                    return Err(Fault::precondition(format!(
                        "max_pool2d stride ({}, {}) must be non-zero",
                        stride_y, stride_x
                    )));
                }
                if pool_y == 0 || pool_x == 0 {
                    return Err(Fault::precondition(format!(
                        "max_pool2d pool size ({}, {}) must be non-zero",
                        pool_y, pool_x
                    )));
                }

                let height_out = height_in / stride_y;
                let width_out = width_in / stride_x;
                if height_out == 0 || width_out == 0 {
                    return Err(Fault::precondition(format!(
                        "max_pool2d input {}x{} is smaller than stride ({}, {})",
                        height_in, width_in, stride_y, stride_x
                    )));
                }
                // Last window must end inside the input
                let last_row = (height_out - 1) * stride_y + pool_y;
                let last_col = (width_out - 1) * stride_x + pool_x;
                if last_row > height_in || last_col > width_in {
                    return Err(Fault::precondition(format!(
                        "max_pool2d window {}x{} stride ({}, {}) exceeds input {}x{}",
                        pool_y, pool_x, stride_y, stride_x, height_in, width_in
                    )));
                }

                log::debug!(
                    "max_pool2d: {}x{} -> {}x{}, pool ({}, {}), stride ({}, {})",
                    height_in,
                    width_in,
                    height_out,
                    width_out,
                    pool_y,
                    pool_x,
                    stride_y,
                    stride_x
                );

                u.set_flag(mp.start, true);
                u.set(mp.state, MaxPoolPhase::FindMaxPrep.bits());
                u.set(mp.cntr_x, 0);
                u.set(mp.cntr_y, 0);
                u.set(mp.height_out, height_out);
                u.set(mp.width_out, width_out);
                u.set(mp.height_in, height_in);
                u.set(mp.width_in, width_in);
                u.set(mp.pool_y, pool_y);
                u.set(mp.pool_x, pool_x);
                u.set(mp.stride_y, stride_y);
                u.set(mp.stride_x, stride_x);
                Ok(())
            },
        )?;
        Ok(())
    }

    fn define_loop(&self, b: &mut ModelBuilder, arch: &ArchState) -> Result<(), ConfigError> {
        let (mp, arch) = (*self, *arch);
        let unit = self.loop_unit;

        b.add_instruction(
            unit,
            INSTR_INC_X,
            move |s| mp.in_phase(s, MaxPoolPhase::IncX),
            move |s, u| {
                let x = s.reg32(mp.cntr_x);
                let end_of_row = x == s.reg32(mp.width_out).wrapping_sub(1);
                if end_of_row {
                    u.set(mp.cntr_x, 0);
                    u.set(mp.state, MaxPoolPhase::IncY.bits());
                } else {
                    u.set(mp.cntr_x, x.wrapping_add(1) as u64);
                    u.set(mp.state, MaxPoolPhase::FindMaxPrep.bits());
                }
                Ok(())
            },
        )?;

        b.add_instruction(
            unit,
            INSTR_INC_Y,
            move |s| mp.in_phase(s, MaxPoolPhase::IncY),
            move |s, u| {
                let y = s.reg32(mp.cntr_y);
                let last_row = y == s.reg32(mp.height_out).wrapping_sub(1);
                u.set(mp.cntr_y, y.wrapping_add(1) as u64);
                if last_row {
                    log::debug!("max_pool2d: done after {} rows", y.wrapping_add(1));
                    u.set(mp.state, MaxPoolPhase::Done.bits());
                } else {
                    u.set(mp.state, MaxPoolPhase::FindMaxPrep.bits());
                }
                Ok(())
            },
        )?;

        b.add_instruction(
            unit,
            INSTR_FIND_MAX_PREP,
            move |s| mp.in_phase(s, MaxPoolPhase::FindMaxPrep),
            move |_, u| {
                u.set(mp.win_x, 0);
                u.set(mp.win_y, 0);
                u.set(mp.state, MaxPoolPhase::FindMaxChild.bits());
                Ok(())
            },
        )?;

        b.add_instruction(
            unit,
            INSTR_WRITE,
            move |s| mp.in_phase(s, MaxPoolPhase::Write),
            move |s, u| {
                let addr = s
                    .reg32(mp.cntr_x)
                    .wrapping_add(s.reg32(mp.cntr_y).wrapping_mul(s.reg32(mp.width_out)));
                u.store(arch.tensor_mem, addr as u64, s.reg(mp.result))?;
                u.set(mp.state, MaxPoolPhase::IncX.bits());
                Ok(())
            },
        )?;
        Ok(())
    }

    fn define_find_max(
        &self,
        b: &mut ModelBuilder,
        arch: &ArchState,
        ops: SharedOps,
    ) -> Result<(), ConfigError> {
        let (mp, arch) = (*self, *arch);
        b.add_instruction(
            self.find_max_unit,
            INSTR_FIND_MAX,
            move |s| {
                let in_window = s.reg(mp.win_y) < s.reg(mp.pool_y) || s.reg(mp.win_x) < s.reg(mp.pool_x);
                in_window && mp.in_phase(s, MaxPoolPhase::FindMaxChild)
            },
            move |s, u| {
                let (wx, wy) = (s.reg32(mp.win_x), s.reg32(mp.win_y));
                let tensor_x = s.reg32(mp.cntr_x).wrapping_mul(s.reg32(mp.stride_x)).wrapping_add(wx);
                let tensor_y = s.reg32(mp.cntr_y).wrapping_mul(s.reg32(mp.stride_y)).wrapping_add(wy);
                let width_in = s.reg32(mp.width_in);
                if tensor_x >= width_in || tensor_y >= s.reg32(mp.height_in) {
                    return Err(Fault::precondition(format!(
                        "max_pool2d window element ({}, {}) outside the input",
                        tensor_y, tensor_x
                    )));
                }

                let addr = tensor_y.wrapping_mul(width_in).wrapping_add(tensor_x);
                let data = s.load(arch.tensor_mem, addr as u64)? as u8;
                let max = if wx == 0 && wy == 0 {
                    data
                } else {
                    ops.max(s.reg(mp.result) as u8, data)
                };

                let x_done = wx == s.reg32(mp.pool_x).wrapping_sub(1);
                let y_done = wy == s.reg32(mp.pool_y).wrapping_sub(1);
                if x_done {
                    u.set(mp.win_x, 0);
                    u.set(mp.win_y, wy.wrapping_add(1) as u64);
                } else {
                    u.set(mp.win_x, wx.wrapping_add(1) as u64);
                    u.set(mp.win_y, wy as u64);
                }
                u.set(mp.result, max as u64);
                let next = if x_done && y_done {
                    MaxPoolPhase::Write
                } else {
                    MaxPoolPhase::FindMaxChild
                };
                u.set(mp.state, next.bits());
                Ok(())
            },
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ila::StepError;
    use crate::primitives::Ieee754Ops;
    use crate::relay::{FunctionCall, RelayAccelerator};
    use crate::testing::reference;

    fn args(height: u32, width: u32, pool: u8, stride: u8) -> MaxPoolArgs {
        MaxPoolArgs {
            height,
            width,
            pool_y: pool,
            pool_x: pool,
            stride_y: stride,
            stride_x: stride,
        }
    }

    fn run(input: &[u8], args: MaxPoolArgs) -> Vec<u8> {
        let mut acc = RelayAccelerator::for_tests();
        acc.load_tensor(0, input).unwrap();
        acc.call(&FunctionCall::MaxPool2d(args)).unwrap();
        let (oh, ow) = args.output_dims();
        acc.read_tensor(0, (oh * ow) as usize).unwrap()
    }

    #[test]
    fn test_maxpool_4x4_pool2_stride2() {
        let input: Vec<u8> = (0..16).collect();
        assert_eq!(run(&input, args(4, 4, 2, 2)), vec![5, 7, 13, 15]);
    }

    #[test]
    fn test_maxpool_window_equals_input_gives_global_max() {
        let input = [3u8, 9, 1, 4, 2, 8, 7, 6, 5];
        assert_eq!(run(&input, args(3, 3, 3, 3)), vec![9]);
    }

    #[test]
    fn test_maxpool_rectangular_window() {
        // Pool 2x1, stride 2x1: column-wise max of row pairs
        let input: Vec<u8> = vec![
            1, 2, 3, 4, //
            8, 7, 6, 5, //
            9, 10, 11, 12, //
            16, 15, 14, 13,
        ];
        let a = MaxPoolArgs {
            height: 4,
            width: 4,
            pool_y: 2,
            pool_x: 1,
            stride_y: 2,
            stride_x: 1,
        };
        assert_eq!(run(&input, a), vec![8, 7, 6, 5, 16, 15, 14, 13]);
    }

    #[test]
    fn test_maxpool_overlapping_windows_match_reference() {
        // Stride below pool size: neighbouring windows share rows and columns
        for (size, pool, stride) in [(5u32, 3u8, 2u8), (7, 3, 2), (6, 2, 1)] {
            let input: Vec<u8> = (0..size * size).map(|i| ((i * 73 + 29) % 251) as u8).collect();
            let a = args(size, size, pool, stride);
            if stride == 1 {
                // Width/stride output columns need a last window past the input
                let mut acc = RelayAccelerator::for_tests();
                let err = acc.invoke(&FunctionCall::MaxPool2d(a)).unwrap_err();
                assert!(matches!(err, StepError::Fault { fault: Fault::Precondition(_), .. }));
                continue;
            }
            let expected = reference::max_pool2d(&Ieee754Ops, &input, &a);
            assert_eq!(run(&input, a), expected, "{}x{} pool {} stride {}", size, size, pool, stride);
        }
    }

    #[test]
    fn test_maxpool_negative_values() {
        // Sign-magnitude: 0x81 is -1, 0x85 is -5
        let input = [0x85u8, 0x81, 0x82, 0x83];
        assert_eq!(run(&input, args(2, 2, 2, 2)), vec![0x81]);
    }

    #[test]
    fn test_maxpool_phases_have_single_handler() {
        let mut acc = RelayAccelerator::for_tests();
        let input: Vec<u8> = (0..16).collect();
        acc.load_tensor(0, &input).unwrap();
        acc.invoke(&FunctionCall::MaxPool2d(args(4, 4, 2, 2))).unwrap();

        let mp = *acc.maxpool();
        loop {
            let phase = mp.phase(acc.engine().snapshot()).unwrap();
            let report = acc.engine_mut().step().unwrap();
            let names = acc.engine().instruction_names(&report.decoded);
            match phase.handler() {
                Some(handler) => assert_eq!(names, vec![handler]),
                None => {
                    assert!(names.is_empty());
                    break;
                }
            }
        }
        assert_eq!(mp.phase(acc.engine().snapshot()), Some(MaxPoolPhase::Done));
    }

    #[test]
    fn test_maxpool_zero_stride_faults() {
        let mut acc = RelayAccelerator::for_tests();
        let before = acc.engine().snapshot().clone();
        let err = acc.invoke(&FunctionCall::MaxPool2d(args(4, 4, 2, 0))).unwrap_err();
        assert!(matches!(err, StepError::Fault { fault: Fault::Precondition(_), .. }));
        // Inputs are driven before the step; everything else is untouched
        let after = acc.engine().snapshot();
        assert_eq!(after.memories(), before.memories());
        assert_eq!(acc.maxpool().phase(after), Some(MaxPoolPhase::Wait));
    }

    #[test]
    fn test_maxpool_window_past_input_faults() {
        let mut acc = RelayAccelerator::for_tests();
        let err = acc.invoke(&FunctionCall::MaxPool2d(args(4, 4, 3, 2))).unwrap_err();
        assert!(matches!(err, StepError::Fault { fault: Fault::Precondition(_), .. }));

        let err = acc.invoke(&FunctionCall::MaxPool2d(args(4, 4, 0, 2))).unwrap_err();
        assert!(matches!(err, StepError::Fault { fault: Fault::Precondition(_), .. }));
    }

    #[test]
    fn test_phase_codes() {
        for bits in 0..7 {
            assert_eq!(MaxPoolPhase::from_bits(bits).map(|p| p.bits()), Some(bits));
        }
        assert_eq!(MaxPoolPhase::from_bits(7), None);
    }
}
