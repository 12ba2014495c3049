//! Q4.12 signed fixed-point arithmetic.
//!
//! Every sample, weight, bias, accumulator and output in the engine is a
//! [`Fixed16`]: a 16-bit two's-complement integer with 4 integer bits
//! (sign included) and 12 fractional bits. The representable range is
//! `[-8.0, 8.0 - 2^-12]` with a resolution of `2^-12`.
//!
//! # Rounding and Overflow Policy
//!
//! The policy is fixed for the whole crate and every stage uses it:
//!
//! | Operation   | Quantization                          | Overflow  |
//! |-------------|---------------------------------------|-----------|
//! | add / sub   | exact                                 | saturate  |
//! | mul         | truncate toward -inf (`>> 12`)        | saturate  |
//! | `from_f64`  | round to nearest                      | saturate  |
//! | `from_int`  | exact                                 | saturate  |
//!
//! Saturation is not sticky: an accumulator clamped at [`Fixed16::MAX`]
//! moves back down when a negative term is added. Results therefore depend
//! on accumulation order, which is why the engine walks input channels and
//! kernel positions in one fixed order.
//!
//! ```
//! use conv3_emu::Fixed16;
//!
//! let a = Fixed16::from_f64(1.5);
//! let b = Fixed16::from_f64(-2.25);
//! assert_eq!((a * b).to_f64(), -3.375);
//! assert_eq!(Fixed16::from_int(7) + Fixed16::from_int(7), Fixed16::MAX);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Mul, Neg, Sub};

/// Total storage width in bits.
pub const TOTAL_BITS: u32 = 16;

/// Integer bits, sign bit included.
pub const INT_BITS: u32 = 4;

/// Fractional bits.
pub const FRAC_BITS: u32 = TOTAL_BITS - INT_BITS;

const SCALE: f64 = (1u32 << FRAC_BITS) as f64;

/// Signed Q4.12 fixed-point value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fixed16(i16);

impl Fixed16 {
    /// 0.0
    pub const ZERO: Self = Self(0);
    /// 1.0
    pub const ONE: Self = Self(1 << FRAC_BITS);
    /// Most negative value (-8.0).
    pub const MIN: Self = Self(i16::MIN);
    /// Most positive value (8.0 - 2^-12).
    pub const MAX: Self = Self(i16::MAX);
    /// Smallest positive step (2^-12).
    pub const EPSILON: Self = Self(1);

    /// Wrap a raw Q4.12 bit pattern.
    #[inline]
    pub const fn from_raw(raw: i16) -> Self {
        Self(raw)
    }

    /// Raw Q4.12 bit pattern.
    #[inline]
    pub const fn raw(self) -> i16 {
        self.0
    }

    /// Clamp a wide raw value (already at Q·12 scale) into range.
    #[inline]
    pub fn saturate_raw(wide: i64) -> Self {
        Self(wide.clamp(i64::from(i16::MIN), i64::from(i16::MAX)) as i16)
    }

    /// Convert an integer, saturating outside `[-8, 7]`.
    pub fn from_int(value: i32) -> Self {
        Self::saturate_raw(i64::from(value) << FRAC_BITS)
    }

    /// Convert a real number, rounding to nearest and saturating.
    ///
    /// NaN maps to zero.
    pub fn from_f64(value: f64) -> Self {
        if value.is_nan() {
            return Self::ZERO;
        }
        let scaled = (value * SCALE).round();
        if scaled >= f64::from(i16::MAX) {
            Self::MAX
        } else if scaled <= f64::from(i16::MIN) {
            Self::MIN
        } else {
            Self(scaled as i16)
        }
    }

    /// Real value represented by this fixed-point number.
    #[inline]
    pub fn to_f64(self) -> f64 {
        f64::from(self.0) / SCALE
    }

    /// Saturating addition.
    #[inline]
    pub fn saturating_add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }

    /// Saturating subtraction.
    #[inline]
    pub fn saturating_sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }

    /// Multiply through the exact Q8.24 product, truncating toward -inf.
    #[inline]
    pub fn saturating_mul(self, rhs: Self) -> Self {
        let product = i32::from(self.0) * i32::from(rhs.0);
        Self::saturate_raw(i64::from(product >> FRAC_BITS))
    }

    /// `self + a * b`, with the product re-quantized before the add.
    #[inline]
    pub fn mul_add(self, a: Self, b: Self) -> Self {
        self.saturating_add(a.saturating_mul(b))
    }

    /// `max(self, 0)`.
    #[inline]
    pub fn relu(self) -> Self {
        if self.0 > 0 {
            self
        } else {
            Self::ZERO
        }
    }

    /// True if the value sits on either rail.
    #[inline]
    pub fn is_saturated(self) -> bool {
        self == Self::MIN || self == Self::MAX
    }
}

impl Add for Fixed16 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        self.saturating_add(rhs)
    }
}

impl AddAssign for Fixed16 {
    fn add_assign(&mut self, rhs: Self) {
        *self = self.saturating_add(rhs);
    }
}

impl Sub for Fixed16 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        self.saturating_sub(rhs)
    }
}

impl Mul for Fixed16 {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        self.saturating_mul(rhs)
    }
}

impl Neg for Fixed16 {
    type Output = Self;

    fn neg(self) -> Self {
        Self(self.0.saturating_neg())
    }
}

impl fmt::Display for Fixed16 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}", self.to_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants() {
        assert_eq!(Fixed16::ONE.raw(), 4096);
        assert_eq!(Fixed16::MIN.to_f64(), -8.0);
        assert_eq!(Fixed16::MAX.to_f64(), 8.0 - 1.0 / 4096.0);
        assert_eq!(Fixed16::EPSILON.to_f64(), 1.0 / 4096.0);
    }

    #[test]
    fn test_from_f64_rounds_to_nearest() {
        // 0.3 * 4096 = 1228.8 -> 1229
        assert_eq!(Fixed16::from_f64(0.3).raw(), 1229);
        assert_eq!(Fixed16::from_f64(-0.3).raw(), -1229);
        assert_eq!(Fixed16::from_f64(f64::NAN), Fixed16::ZERO);
    }

    #[test]
    fn test_conversions_saturate() {
        assert_eq!(Fixed16::from_f64(100.0), Fixed16::MAX);
        assert_eq!(Fixed16::from_f64(-100.0), Fixed16::MIN);
        assert_eq!(Fixed16::from_int(8), Fixed16::MAX);
        assert_eq!(Fixed16::from_int(-8), Fixed16::MIN);
        assert_eq!(Fixed16::from_int(-9), Fixed16::MIN);
    }

    #[test]
    fn test_add_saturates() {
        let big = Fixed16::from_f64(6.0);
        assert_eq!(big + big, Fixed16::MAX);
        assert_eq!((-big) + (-big), Fixed16::MIN);
        assert_eq!(Fixed16::MIN - Fixed16::ONE, Fixed16::MIN);
    }

    #[test]
    fn test_mul_exact_when_representable() {
        let a = Fixed16::from_f64(1.5);
        let b = Fixed16::from_f64(2.0);
        assert_eq!((a * b).to_f64(), 3.0);
        assert_eq!((a * -b).to_f64(), -3.0);
    }

    #[test]
    fn test_mul_truncates_toward_negative_infinity() {
        let half = Fixed16::from_f64(0.5);
        // +1 LSB * 0.5 = +0.5 LSB -> 0
        assert_eq!((Fixed16::EPSILON * half).raw(), 0);
        // -1 LSB * 0.5 = -0.5 LSB -> -1 (floor, not toward zero)
        assert_eq!((-Fixed16::EPSILON * half).raw(), -1);
    }

    #[test]
    fn test_mul_saturates() {
        let a = Fixed16::from_f64(4.0);
        assert_eq!(a * a, Fixed16::MAX);
        assert_eq!(a * -a, Fixed16::MIN);
    }

    #[test]
    fn test_saturation_is_not_sticky() {
        let mut acc = Fixed16::ZERO;
        for _ in 0..10 {
            acc += Fixed16::from_int(2);
        }
        assert_eq!(acc, Fixed16::MAX);
        acc += Fixed16::from_int(-1);
        assert_eq!(acc.raw(), i16::MAX - 4096);
    }

    #[test]
    fn test_neg_min_saturates() {
        assert_eq!(-Fixed16::MIN, Fixed16::MAX);
    }

    #[test]
    fn test_relu() {
        assert_eq!(Fixed16::from_f64(-0.25).relu(), Fixed16::ZERO);
        assert_eq!(Fixed16::ZERO.relu(), Fixed16::ZERO);
        assert_eq!(Fixed16::from_f64(0.25).relu(), Fixed16::from_f64(0.25));
    }

    #[test]
    fn test_display() {
        assert_eq!(Fixed16::from_f64(1.25).to_string(), "1.2500");
    }
}
