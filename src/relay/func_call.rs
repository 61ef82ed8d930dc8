//! Function calls driven by the harness.
//!
//! A call sets the per-function inputs, then pulses `func_run` for one step
//! with `func_id` selecting the function. The matching root instruction
//! latches the inputs, so they may change freely afterwards.

use std::fmt;

use super::arch::FunctionId;
use super::dense::DenseArgs;
use super::lstm::LstmArgs;
use super::maxpool::MaxPoolArgs;
use super::vector_op::{VectorArgs, VectorOpKind};

/// One accelerator function call with its arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionCall {
    MaxPool2d(MaxPoolArgs),
    Vector(VectorOpKind, VectorArgs),
    Dense(DenseArgs),
    Lstm(LstmArgs),
}

impl FunctionCall {
    /// Function-select code of this call.
    pub fn function_id(&self) -> FunctionId {
        match self {
            FunctionCall::MaxPool2d(_) => FunctionId::MaxPool2d,
            FunctionCall::Vector(kind, _) => kind.function_id(),
            FunctionCall::Dense(_) => FunctionId::NnDense,
            FunctionCall::Lstm(_) => FunctionId::Lstm,
        }
    }
}

impl fmt::Display for FunctionCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionCall::MaxPool2d(a) => write!(
                f,
                "max_pool2d({}x{}, pool {}x{}, stride {}x{})",
                a.height, a.width, a.pool_y, a.pool_x, a.stride_y, a.stride_x
            ),
            FunctionCall::Vector(kind, a) => write!(f, "vector_{}(len {})", kind.name(), a.size),
            FunctionCall::Dense(a) => write!(f, "dense({} -> {})", a.input_size, a.output_size),
            FunctionCall::Lstm(a) => write!(f, "lstm(input {}, hidden {})", a.input_size, a.hidden_size),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_ids() {
        let call = FunctionCall::Vector(VectorOpKind::Tanh, VectorArgs::default());
        assert_eq!(call.function_id(), FunctionId::VectorTanh);
        assert_eq!(call.to_string(), "vector_tanh(len 0)");
        assert_eq!(
            FunctionCall::Lstm(LstmArgs::default()).function_id().bits(),
            7
        );
    }
}
