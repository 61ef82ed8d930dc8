//! Reference operators evaluated directly, without the unit tree.
//!
//! These follow the framework definitions of each operator and use the same
//! [`PrimitiveOps`] backend as the model, in the same operation order, so a
//! correct model matches them bit for bit.

use crate::primitives::PrimitiveOps;
use crate::relay::{MaxPoolArgs, VectorOpKind};

/// `nn.max_pool2d` on a row-major single-channel tensor.
pub fn max_pool2d(ops: &dyn PrimitiveOps, input: &[u8], args: &MaxPoolArgs) -> Vec<u8> {
    let (oh, ow) = args.output_dims();
    let width = args.width as usize;
    let mut out = Vec::with_capacity((oh * ow) as usize);

    for oy in 0..oh as usize {
        for ox in 0..ow as usize {
            let mut acc: Option<u8> = None;
            for wy in 0..args.pool_y as usize {
                for wx in 0..args.pool_x as usize {
                    let row = oy * args.stride_y as usize + wy;
                    let col = ox * args.stride_x as usize + wx;
                    let x = input[row * width + col];
                    acc = Some(match acc {
                        None => x,
                        Some(a) => ops.max(a, x),
                    });
                }
            }
            out.push(acc.unwrap_or(0));
        }
    }
    out
}

/// Elementwise operator over `a` (and `b` for binary operators).
pub fn vector(ops: &dyn PrimitiveOps, kind: VectorOpKind, a: &[u32], b: &[u32]) -> Vec<u32> {
    a.iter()
        .enumerate()
        .map(|(i, &x)| kind.apply(ops, x, b.get(i).copied().unwrap_or(0)))
        .collect()
}

/// `y = W x + b` with row-major `W[out][in]`.
pub fn dense(
    ops: &dyn PrimitiveOps,
    weights: &[u32],
    bias: &[u32],
    x: &[u32],
    input_size: usize,
    output_size: usize,
) -> Vec<u32> {
    (0..output_size)
        .map(|j| {
            (0..input_size).fold(bias[j], |acc, i| {
                ops.add(acc, ops.multiply(weights[j * input_size + i], x[i]))
            })
        })
        .collect()
}

/// Weights and biases of one LSTM cell.
#[derive(Debug, Clone, Copy)]
pub struct LstmWeights<'a> {
    /// `[4H][input]`
    pub w_ih: &'a [u32],
    /// `[4H]`
    pub b_ih: &'a [u32],
    /// `[4H][H]`
    pub w_hh: &'a [u32],
    /// `[4H]`
    pub b_hh: &'a [u32],
}

/// One LSTM cell step. Returns `(next_hidden, next_cell)`.
///
/// Gate order is `[input, forget, cell, output]`; `H` is `hidden.len()`.
pub fn lstm_cell(
    ops: &dyn PrimitiveOps,
    weights: &LstmWeights<'_>,
    x: &[u32],
    hidden: &[u32],
    cell: &[u32],
) -> (Vec<u32>, Vec<u32>) {
    let h = hidden.len();
    let i2h = dense(ops, weights.w_ih, weights.b_ih, x, x.len(), 4 * h);
    let h2h = dense(ops, weights.w_hh, weights.b_hh, hidden, h, 4 * h);
    let gates = vector(ops, VectorOpKind::Add, &i2h, &h2h);

    let in_forget = vector(ops, VectorOpKind::Sigmoid, &gates[..2 * h], &[]);
    let candidate = vector(ops, VectorOpKind::Tanh, &gates[2 * h..3 * h], &[]);
    let out_gate = vector(ops, VectorOpKind::Sigmoid, &gates[3 * h..], &[]);
    let (in_gate, forget_gate) = in_forget.split_at(h);

    let kept = vector(ops, VectorOpKind::Multiply, forget_gate, cell);
    let added = vector(ops, VectorOpKind::Multiply, in_gate, &candidate);
    let next_cell = vector(ops, VectorOpKind::Add, &kept, &added);
    let squashed = vector(ops, VectorOpKind::Tanh, &next_cell, &[]);
    let next_hidden = vector(ops, VectorOpKind::Multiply, &out_gate, &squashed);
    (next_hidden, next_cell)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::Ieee754Ops;

    fn f(values: &[f32]) -> Vec<u32> {
        values.iter().map(|v| v.to_bits()).collect()
    }

    #[test]
    fn test_reference_max_pool() {
        let input: Vec<u8> = (0..16).collect();
        let args = MaxPoolArgs {
            height: 4,
            width: 4,
            pool_y: 2,
            pool_x: 2,
            stride_y: 2,
            stride_x: 2,
        };
        assert_eq!(max_pool2d(&Ieee754Ops, &input, &args), vec![5, 7, 13, 15]);
    }

    #[test]
    fn test_reference_dense() {
        let w = f(&[1.0, 2.0, 3.0, 4.0]);
        let b = f(&[0.5, 0.0]);
        let x = f(&[1.0, 1.0]);
        assert_eq!(dense(&Ieee754Ops, &w, &b, &x, 2, 2), f(&[3.5, 7.0]));
    }

    #[test]
    fn test_reference_lstm_zero_weights() {
        // All-zero weights: every gate pre-activation is 0, so
        // i = f = o = 0.5, g = 0, c' = 0.5 * c, h' = 0.5 * tanh(c')
        let zeros = vec![0u32; 4];
        let weights = LstmWeights {
            w_ih: &zeros,
            b_ih: &zeros,
            w_hh: &zeros,
            b_hh: &zeros,
        };
        let (h, c) = lstm_cell(&Ieee754Ops, &weights, &f(&[1.0]), &f(&[0.0]), &f(&[2.0]));
        assert_eq!(c, f(&[1.0]));
        let expected_h = 0.5 * (1.0f64.tanh() as f32);
        assert_eq!(h, f(&[expected_h]));
    }
}
