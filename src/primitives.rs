//! Arithmetic primitives used by the functional units.
//!
//! The state machines never interpret data words themselves. Every numeric
//! operation goes through [`PrimitiveOps`], a set of pure functions over
//! fixed-width bit patterns, so the numeric backend can be swapped without
//! touching any unit definition.
//!
//! | Primitive | Width | Used by |
//! |-----------|-------|---------|
//! | `add` | 32 → 32 | vector add, dense accumulate, LSTM |
//! | `multiply` | 32 × 32 → 32 | vector multiply, dense accumulate |
//! | `sigmoid` | 32 → 32 | vector sigmoid (LSTM gates) |
//! | `tanh` | 32 → 32 | vector tanh (LSTM cell) |
//! | `max` | 8 × 8 → 8 | max-pooling reduction |
//!
//! [`Ieee754Ops`] is the default backend: 32-bit words are IEEE-754 single
//! precision floats, 8-bit words are AdaptivFloat values in sign-magnitude
//! form.

use std::sync::Arc;

/// Pure, deterministic primitive operations.
pub trait PrimitiveOps: Send + Sync {
    /// `a + b` on 32-bit words.
    fn add(&self, a: u32, b: u32) -> u32;

    /// `a * b` on 32-bit words.
    fn multiply(&self, a: u32, b: u32) -> u32;

    /// Logistic sigmoid of a 32-bit word.
    fn sigmoid(&self, a: u32) -> u32;

    /// Hyperbolic tangent of a 32-bit word.
    fn tanh(&self, a: u32) -> u32;

    /// Larger of two 8-bit AdaptivFloat words; `acc` on ties.
    fn max(&self, acc: u8, x: u8) -> u8;
}

/// Shared handle to a primitive backend.
pub type SharedOps = Arc<dyn PrimitiveOps>;

/// IEEE-754 single-precision backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ieee754Ops;

impl Ieee754Ops {
    /// Create a shared handle to this backend.
    pub fn shared() -> SharedOps {
        Arc::new(Ieee754Ops)
    }
}

#[inline]
fn f(bits: u32) -> f32 {
    f32::from_bits(bits)
}

/// Signed ordering key of an AdaptivFloat word.
///
/// Bit 7 is the sign; bits 6..0 hold exponent then mantissa, so the
/// magnitude orders like an unsigned integer.
#[inline]
fn adaptivfloat_key(word: u8) -> i16 {
    let magnitude = (word & 0x7F) as i16;
    if word & 0x80 != 0 {
        -magnitude
    } else {
        magnitude
    }
}

impl PrimitiveOps for Ieee754Ops {
    fn add(&self, a: u32, b: u32) -> u32 {
        (f(a) + f(b)).to_bits()
    }

    fn multiply(&self, a: u32, b: u32) -> u32 {
        (f(a) * f(b)).to_bits()
    }

    fn sigmoid(&self, a: u32) -> u32 {
        let x = f(a) as f64;
        ((1.0 / ((-x).exp() + 1.0)) as f32).to_bits()
    }

    fn tanh(&self, a: u32) -> u32 {
        ((f(a) as f64).tanh() as f32).to_bits()
    }

    fn max(&self, acc: u8, x: u8) -> u8 {
        if adaptivfloat_key(x) > adaptivfloat_key(acc) {
            x
        } else {
            acc
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bits(v: f32) -> u32 {
        v.to_bits()
    }

    #[test]
    fn test_add_multiply() {
        let ops = Ieee754Ops;
        assert_eq!(ops.add(bits(1.0), bits(10.0)), bits(11.0));
        assert_eq!(ops.multiply(bits(3.0), bits(-2.5)), bits(-7.5));
    }

    #[test]
    fn test_sigmoid_tanh() {
        let ops = Ieee754Ops;
        assert_eq!(ops.sigmoid(bits(0.0)), bits(0.5));
        assert_eq!(ops.tanh(bits(0.0)), bits(0.0));
        let s = f32::from_bits(ops.sigmoid(bits(4.0)));
        assert!((s - 0.98201376).abs() < 1e-6);
        let t = f32::from_bits(ops.tanh(bits(-1.0)));
        assert!((t + 0.7615942).abs() < 1e-6);
    }

    #[test]
    fn test_max_sign_magnitude() {
        let ops = Ieee754Ops;
        assert_eq!(ops.max(5, 7), 7);
        assert_eq!(ops.max(7, 5), 7);
        // Negative values order below positive ones
        assert_eq!(ops.max(0x85, 0x01), 0x01);
        // Less negative wins
        assert_eq!(ops.max(0x85, 0x82), 0x82);
        // +0 and -0 tie: keep the accumulator
        assert_eq!(ops.max(0x80, 0x00), 0x80);
    }
}
