//! Exact-arithmetic reference convolution.
//!
//! Computes the same bias-added, ReLU-activated 3x3 convolution as the
//! engine, but keeps every product and partial sum exact (`i64` at 24
//! fractional bits) and quantizes once at the end: floor to 12 fractional
//! bits, then saturate.
//!
//! # Tolerance
//!
//! The engine truncates each product toward negative infinity before adding
//! it, so as long as no partial sum saturates, every engine output satisfies
//!
//! ```text
//! reference - 9 * in_channels < engine <= reference        (in LSBs)
//! ```
//!
//! [`tolerance_lsb`] gives that bound. When a partial sum does saturate the
//! engine follows its saturation policy and the two are not comparable.

use crate::device::params::{KERNEL_SIZE, KERNEL_TAPS};
use crate::fixed::{Fixed16, FRAC_BITS};

/// Image and filter-bank dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvShape {
    /// Image rows.
    pub height: usize,
    /// Image columns.
    pub width: usize,
    /// Channels per input pixel.
    pub in_channels: usize,
    /// Filters, i.e. channels per output pixel.
    pub out_channels: usize,
}

impl ConvShape {
    /// Output rows.
    pub fn out_height(&self) -> usize {
        self.height - (KERNEL_SIZE - 1)
    }

    /// Output columns.
    pub fn out_width(&self) -> usize {
        self.width - (KERNEL_SIZE - 1)
    }

    /// Samples in the input image.
    pub fn input_len(&self) -> usize {
        self.height * self.width * self.in_channels
    }

    /// Weights in the coefficient buffer.
    pub fn coefficient_len(&self) -> usize {
        self.out_channels * self.in_channels * KERNEL_TAPS
    }

    /// Samples in the output feature map.
    pub fn output_len(&self) -> usize {
        self.out_height() * self.out_width() * self.out_channels
    }
}

/// Largest engine-vs-reference deviation, in LSBs, for unsaturated inputs.
pub fn tolerance_lsb(in_channels: usize) -> u32 {
    (KERNEL_TAPS * in_channels) as u32
}

/// Reference convolution.
///
/// `input` is `[row][col][channel]`, `coefficients` is
/// `[filter][channel][kernel row][kernel col]`, `bias` is `[filter]`.
/// Returns `[out_row][out_col][filter]`.
///
/// # Panics
///
/// Panics if a slice length does not match `shape`.
pub fn conv3x3_bias_relu(
    shape: &ConvShape,
    input: &[Fixed16],
    coefficients: &[Fixed16],
    bias: &[Fixed16],
) -> Vec<Fixed16> {
    assert_eq!(input.len(), shape.input_len(), "input length");
    assert_eq!(coefficients.len(), shape.coefficient_len(), "coefficient length");
    assert_eq!(bias.len(), shape.out_channels, "bias length");

    let c = shape.in_channels;
    let mut out = Vec::with_capacity(shape.output_len());

    for oy in 0..shape.out_height() {
        for ox in 0..shape.out_width() {
            for (filter, &b) in bias.iter().enumerate() {
                let mut sum = i64::from(b.raw()) << FRAC_BITS;
                for ch in 0..c {
                    for kr in 0..KERNEL_SIZE {
                        for kc in 0..KERNEL_SIZE {
                            let x = input[((oy + kr) * shape.width + ox + kc) * c + ch];
                            let w = coefficients[((filter * c + ch) * KERNEL_SIZE + kr) * KERNEL_SIZE + kc];
                            sum += i64::from(x.raw()) * i64::from(w.raw());
                        }
                    }
                }
                out.push(Fixed16::saturate_raw(sum >> FRAC_BITS).relu());
            }
        }
    }

    out
}

/// Largest absolute difference between two equally sized outputs, in LSBs.
pub fn max_abs_diff(a: &[Fixed16], b: &[Fixed16]) -> u32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (i32::from(x.raw()) - i32::from(y.raw())).unsigned_abs())
        .max()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f(x: f64) -> Fixed16 {
        Fixed16::from_f64(x)
    }

    #[test]
    fn test_identity_kernel() {
        // centre tap = 1 copies the interior pixel
        let shape = ConvShape { height: 4, width: 4, in_channels: 1, out_channels: 1 };
        let input: Vec<Fixed16> = (0..16).map(|i| f(i as f64 / 8.0)).collect();
        let mut coeffs = vec![Fixed16::ZERO; 9];
        coeffs[4] = Fixed16::ONE;

        let out = conv3x3_bias_relu(&shape, &input, &coeffs, &[Fixed16::ZERO]);
        assert_eq!(out, vec![input[5], input[6], input[9], input[10]]);
    }

    #[test]
    fn test_bias_and_relu() {
        let shape = ConvShape { height: 3, width: 3, in_channels: 1, out_channels: 2 };
        let input = vec![f(0.5); 9];
        let coeffs = vec![Fixed16::ONE; 18];

        let out = conv3x3_bias_relu(&shape, &input, &coeffs, &[f(-5.0), f(0.25)]);
        assert_eq!(out, vec![Fixed16::ZERO, f(4.75)]);
    }

    #[test]
    fn test_quantizes_once() {
        // nine products of 1 LSB * 0.5 are each below 1 LSB, but sum to 4.5 LSB
        let shape = ConvShape { height: 3, width: 3, in_channels: 1, out_channels: 1 };
        let input = vec![Fixed16::EPSILON; 9];
        let coeffs = vec![f(0.5); 9];

        let out = conv3x3_bias_relu(&shape, &input, &coeffs, &[Fixed16::ZERO]);
        assert_eq!(out, vec![Fixed16::from_raw(4)]);
    }

    #[test]
    fn test_saturates_at_end() {
        let shape = ConvShape { height: 3, width: 3, in_channels: 1, out_channels: 1 };
        let out = conv3x3_bias_relu(&shape, &[f(4.0); 9], &[Fixed16::ONE; 9], &[Fixed16::ZERO]);
        assert_eq!(out, vec![Fixed16::MAX]);
    }

    #[test]
    fn test_shape_sizes() {
        let shape = ConvShape { height: 6, width: 5, in_channels: 3, out_channels: 8 };
        assert_eq!(shape.out_height(), 4);
        assert_eq!(shape.out_width(), 3);
        assert_eq!(shape.input_len(), 90);
        assert_eq!(shape.coefficient_len(), 216);
        assert_eq!(shape.output_len(), 96);
        assert_eq!(tolerance_lsb(3), 27);
    }

    #[test]
    fn test_max_abs_diff() {
        let a = [Fixed16::from_raw(10), Fixed16::from_raw(-3)];
        let b = [Fixed16::from_raw(7), Fixed16::from_raw(2)];
        assert_eq!(max_abs_diff(&a, &b), 5);
        assert_eq!(max_abs_diff(&[], &[]), 0);
    }
}
