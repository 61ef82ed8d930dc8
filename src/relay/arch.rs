//! Architectural state shared by every functional unit.
//!
//! The root unit owns the function-select interface driven by the harness,
//! both memories, and the two registers through which delegated engines
//! hand control back to a composing layer:
//!
//! - `lstm_state`: the composing layer's phase
//! - `return_state`: the phase to restore when a delegated engine finishes
//!
//! Vector and dense engines write `return_state` into `lstm_state` on their
//! last step. A standalone call records the current `lstm_state` as its
//! return state, so finishing it changes nothing.

use crate::ila::{ConfigError, MemId, ModelBuilder, RegId, RegisterClass, Snapshot};

/// Address width of the 8-bit tensor memory.
pub const TENSOR_ADDR_BW: u32 = 32;
/// Data width of the tensor memory (AdaptivFloat words).
pub const TENSOR_DATA_BW: u32 = 8;
/// Address width of the vector memory.
pub const RELAY_ADDR_BW: u32 = 32;
/// Data width of the vector memory (IEEE-754 single words).
pub const RELAY_DATA_BW: u32 = 32;

/// Function select width.
pub const FUNC_ID_BW: u32 = 8;
/// One-bit flags.
pub const FLAG_BW: u32 = 1;
/// Width of sizes, counters and byte addresses.
pub const WORD_BW: u32 = 32;
/// Width of phase registers.
pub const STATE_BW: u32 = 8;

/// Name of the tensor memory.
pub const TENSOR_MEM: &str = "relay_tensor_mem";
/// Name of the vector memory.
pub const RELAY_MEMORY: &str = "relay_memory";

/// Function-select codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FunctionId {
    /// `nn.max_pool2d`
    MaxPool2d = 1,
    /// Elementwise add
    VectorAdd = 2,
    /// Elementwise multiply
    VectorMultiply = 3,
    /// Elementwise sigmoid
    VectorSigmoid = 4,
    /// Elementwise tanh
    VectorTanh = 5,
    /// `nn.dense` with bias
    NnDense = 6,
    /// One LSTM cell step
    Lstm = 7,
}

impl FunctionId {
    /// Decode a function-select value.
    pub fn from_bits(bits: u64) -> Option<Self> {
        match bits {
            1 => Some(FunctionId::MaxPool2d),
            2 => Some(FunctionId::VectorAdd),
            3 => Some(FunctionId::VectorMultiply),
            4 => Some(FunctionId::VectorSigmoid),
            5 => Some(FunctionId::VectorTanh),
            6 => Some(FunctionId::NnDense),
            7 => Some(FunctionId::Lstm),
            _ => None,
        }
    }

    /// Function-select value.
    pub fn bits(self) -> u64 {
        self as u64
    }

    /// Parse a manifest function name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "max_pool2d" | "maxpool2d" => Some(FunctionId::MaxPool2d),
            "vector_add" | "add" => Some(FunctionId::VectorAdd),
            "vector_multiply" | "multiply" => Some(FunctionId::VectorMultiply),
            "vector_sigmoid" | "sigmoid" => Some(FunctionId::VectorSigmoid),
            "vector_tanh" | "tanh" => Some(FunctionId::VectorTanh),
            "dense" | "nn_dense" => Some(FunctionId::NnDense),
            "lstm" => Some(FunctionId::Lstm),
            _ => None,
        }
    }
}

/// Root-level registers and memories shared across functional units.
#[derive(Debug, Clone, Copy)]
pub struct ArchState {
    /// Function select (input).
    pub func_id: RegId,
    /// Run enable (input).
    pub func_run: RegId,
    /// 8-bit tensor memory used by max-pooling.
    pub tensor_mem: MemId,
    /// 32-bit memory used by vector, dense and LSTM engines.
    pub relay_mem: MemId,
    /// Composing-layer phase.
    pub lstm_state: RegId,
    /// Phase restored by a delegated engine on completion.
    pub return_state: RegId,
}

impl ArchState {
    /// Declare the shared state on the root of `b`.
    pub fn define(
        b: &mut ModelBuilder,
        tensor_depth: usize,
        relay_depth: usize,
    ) -> Result<Self, ConfigError> {
        let root = b.root();
        Ok(Self {
            func_id: b.add_input("relay_func_id_in", FUNC_ID_BW)?,
            func_run: b.add_input("relay_func_run_in", FLAG_BW)?,
            tensor_mem: b.add_memory(TENSOR_MEM, TENSOR_ADDR_BW, TENSOR_DATA_BW, tensor_depth)?,
            relay_mem: b.add_memory(RELAY_MEMORY, RELAY_ADDR_BW, RELAY_DATA_BW, relay_depth)?,
            lstm_state: b.add_register(root, "relay_lstm_state", STATE_BW, RegisterClass::Control)?,
            return_state: b.add_register(
                root,
                "relay_lstm_return_state",
                STATE_BW,
                RegisterClass::Control,
            )?,
        })
    }

    /// True when the harness calls `func` this step.
    #[inline]
    pub fn called(&self, s: &Snapshot, func: FunctionId) -> bool {
        s.flag(self.func_run) && s.reg(self.func_id) == func.bits()
    }
}

/// Declare a harness input and the architectural register it is latched into.
pub(crate) fn input_latch(
    b: &mut ModelBuilder,
    name: &str,
    input_width: u32,
    reg_width: u32,
) -> Result<(RegId, RegId), ConfigError> {
    let root = b.root();
    let input = b.add_input(&format!("{}_in", name), input_width)?;
    let reg = b.add_register(root, name, reg_width, RegisterClass::Architectural)?;
    Ok((input, reg))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_id_round_trip_names() {
        for id in [
            FunctionId::MaxPool2d,
            FunctionId::VectorAdd,
            FunctionId::VectorMultiply,
            FunctionId::VectorSigmoid,
            FunctionId::VectorTanh,
            FunctionId::NnDense,
            FunctionId::Lstm,
        ] {
            assert_eq!(FunctionId::from_bits(id.bits()), Some(id));
        }
        assert_eq!(FunctionId::from_bits(0), None);
        assert_eq!(FunctionId::from_name("lstm"), Some(FunctionId::Lstm));
        assert_eq!(FunctionId::from_name("conv2d"), None);
    }
}
