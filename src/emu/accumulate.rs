//! Sliding-window accumulate stage.
//!
//! For one output pixel, walks every input channel and, inside it, the nine
//! kernel taps in row-major order. Each tap multiplies one buffered sample
//! by the weights of every filter lane at once and adds the products into
//! the lane accumulators:
//!
//! ```text
//! for channel in 0..C            (outer)
//!   for (row, col) in 3x3        (inner, one MAC step each)
//!     sample = window[row][col]
//!     acc[lane] += sample * w[lane][channel][row][col]   for every lane
//! ```
//!
//! The order is fixed. Saturation makes accumulation order-sensitive, so
//! reordering would change results on overflowing inputs.

use smallvec::SmallVec;

use crate::device::coeff_cache::CoefficientCache;
use crate::device::line_buffer::{LineBufferBank, Window};
use crate::device::params::{FILTER_GROUP_SIZE, KERNEL_SIZE, KERNEL_TAPS};
use crate::error::Result;
use crate::fixed::Fixed16;

/// Accumulator storage; inline for the default group size.
pub type Lanes = SmallVec<[Fixed16; FILTER_GROUP_SIZE]>;

/// Per-lane partial sums for the pixel in flight.
#[derive(Debug, Clone)]
pub struct AccumulatorSet {
    lanes: Lanes,
}

impl AccumulatorSet {
    /// Create `group_size` zeroed accumulators.
    pub fn new(group_size: usize) -> Self {
        Self {
            lanes: SmallVec::from_elem(Fixed16::ZERO, group_size),
        }
    }

    /// Zero every lane at the start of a pixel.
    pub fn clear(&mut self) {
        self.lanes.iter_mut().for_each(|acc| *acc = Fixed16::ZERO);
    }

    /// Accumulate one channel's 3x3 window. Returns MAC steps issued.
    pub fn accumulate_window(
        &mut self,
        window: &Window<'_>,
        cache: &CoefficientCache,
        channel: usize,
    ) -> u64 {
        for row in 0..KERNEL_SIZE {
            for col in 0..KERNEL_SIZE {
                let sample = window.sample(row, col);
                let weights = cache.weights_at(channel, row, col);
                for (acc, &w) in self.lanes.iter_mut().zip(weights) {
                    *acc = acc.mul_add(sample, w);
                }
            }
        }
        KERNEL_TAPS as u64
    }

    /// Accumulate every input channel for the output pixel at `col`.
    ///
    /// Returns MAC steps issued (`9 * channels`).
    pub fn accumulate_pixel(
        &mut self,
        lines: &LineBufferBank,
        cache: &CoefficientCache,
        col: usize,
    ) -> Result<u64> {
        let mut steps = 0;
        for channel in 0..cache.input_channels() {
            let window = lines.window_at(col, channel)?;
            steps += self.accumulate_window(&window, cache, channel);
        }
        Ok(steps)
    }

    /// Current lane values.
    pub fn lanes(&self) -> &[Fixed16] {
        &self.lanes
    }

    /// Number of lanes.
    pub fn len(&self) -> usize {
        self.lanes.len()
    }

    /// True if the set has no lanes.
    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConvError, StateError};

    fn f(x: f64) -> Fixed16 {
        Fixed16::from_f64(x)
    }

    fn primed(width: usize, channels: usize, rows: &[Vec<Fixed16>]) -> LineBufferBank {
        let mut lines = LineBufferBank::new(16, 4);
        lines.begin_image(width, channels).unwrap();
        for row in rows {
            lines.enqueue_row(row).unwrap();
        }
        lines
    }

    #[test]
    fn test_box_filter_sums_window() {
        // 3x4 single channel image, values 0.0 .. 1.1 in steps of 0.1
        let rows: Vec<Vec<Fixed16>> = (0..3)
            .map(|r| (0..4).map(|c| f((r * 4 + c) as f64 / 10.0)).collect())
            .collect();
        let lines = primed(4, 1, &rows);

        let mut cache = CoefficientCache::new(4, 4);
        cache.load(&[Fixed16::ONE; 9], &[Fixed16::ZERO], 1).unwrap();

        let mut acc = AccumulatorSet::new(4);
        let steps = acc.accumulate_pixel(&lines, &cache, 1).unwrap();
        assert_eq!(steps, 9);

        // columns 1..=3 of each row
        let expected: f64 = [1, 2, 3, 5, 6, 7, 9, 10, 11].iter().map(|&v| v as f64 / 10.0).sum();
        assert!((acc.lanes()[0].to_f64() - expected).abs() < 0.01);
        // unused lanes see zero weights
        assert_eq!(&acc.lanes()[1..], &[Fixed16::ZERO; 3]);
    }

    #[test]
    fn test_lanes_are_independent() {
        let rows = vec![vec![Fixed16::ONE; 3]; 3];
        let lines = primed(3, 1, &rows);

        // filter f has every weight = (f + 1) / 8
        let coeffs: Vec<Fixed16> = (0..4)
            .flat_map(|f| std::iter::repeat(Fixed16::from_f64((f + 1) as f64 / 8.0)).take(9))
            .collect();
        let mut cache = CoefficientCache::new(4, 4);
        cache.load(&coeffs, &[Fixed16::ZERO; 4], 1).unwrap();

        let mut acc = AccumulatorSet::new(4);
        acc.accumulate_pixel(&lines, &cache, 0).unwrap();
        let got: Vec<f64> = acc.lanes().iter().map(|v| v.to_f64()).collect();
        assert_eq!(got, vec![9.0 / 8.0, 18.0 / 8.0, 27.0 / 8.0, 36.0 / 8.0]);
    }

    #[test]
    fn test_accumulates_across_channels() {
        // two channels, interleaved: channel 0 = 0.5, channel 1 = 0.25
        let row: Vec<Fixed16> = (0..3).flat_map(|_| [f(0.5), f(0.25)]).collect();
        let lines = primed(3, 2, &[row.clone(), row.clone(), row]);

        let mut cache = CoefficientCache::new(4, 4);
        cache.load(&[Fixed16::ONE; 18], &[Fixed16::ZERO], 2).unwrap();

        let mut acc = AccumulatorSet::new(4);
        let steps = acc.accumulate_pixel(&lines, &cache, 0).unwrap();
        assert_eq!(steps, 18);
        assert_eq!(acc.lanes()[0], f(6.75));

        acc.clear();
        assert_eq!(acc.lanes()[0], Fixed16::ZERO);
    }

    #[test]
    fn test_accumulation_saturates_in_order() {
        let rows = vec![vec![Fixed16::MAX; 3]; 3];
        let lines = primed(3, 1, &rows);

        // +1 on the first kernel row, -1 on the second, 0 on the third
        let mut coeffs = vec![Fixed16::ONE; 3];
        coeffs.extend([f(-1.0); 3]);
        coeffs.extend([Fixed16::ZERO; 3]);
        let mut cache = CoefficientCache::new(4, 4);
        cache.load(&coeffs, &[Fixed16::ZERO], 1).unwrap();

        let mut acc = AccumulatorSet::new(4);
        acc.accumulate_pixel(&lines, &cache, 0).unwrap();

        // Three +MAX products pin the sum at MAX, then three -MAX products
        // walk it down to MIN. The exact sum is zero.
        assert_eq!(acc.lanes()[0], Fixed16::MIN);
    }

    #[test]
    fn test_unprimed_bank_is_state_error() {
        let lines = primed(3, 1, &[vec![Fixed16::ONE; 3]]);
        let mut cache = CoefficientCache::new(4, 4);
        cache.load(&[Fixed16::ONE; 9], &[Fixed16::ZERO], 1).unwrap();

        let mut acc = AccumulatorSet::new(4);
        let err = acc.accumulate_pixel(&lines, &cache, 0).unwrap_err();
        assert_eq!(err, ConvError::State(StateError::NotPrimed { rows_buffered: 1 }));
    }
}
