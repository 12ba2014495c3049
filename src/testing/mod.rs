//! Harness for staging convolution jobs in host memory and running them.
//!
//! A [`ConvJob`] holds the image, coefficients and bias of one run. It
//! knows how to lay them out in [`HostMemory`], program an engine, run it
//! and read the feature map back, and it computes the matching
//! [`reference`](crate::reference) output.
//!
//! # Usage
//!
//! ```
//! use conv3_emu::emu::ConvEngine;
//! use conv3_emu::reference::ConvShape;
//! use conv3_emu::testing::ConvJob;
//! use conv3_emu::EngineConfig;
//!
//! let shape = ConvShape { height: 5, width: 5, in_channels: 1, out_channels: 4 };
//! let job = ConvJob::synthetic(shape);
//! let mut engine = ConvEngine::new(EngineConfig::default()).unwrap();
//! let result = job.run(&mut engine).unwrap();
//! assert_eq!(result.output.len(), 3 * 3 * 4);
//! ```

use crate::device::host_memory::{DataDirection, HostMemory};
use crate::device::params::ELEMENT_BYTES;
use crate::device::registers::RunParams;
use crate::emu::{ConvEngine, RunStats};
use crate::error::Result;
use crate::fixed::Fixed16;
use crate::reference::{self, ConvShape};

/// Base address of the first staged buffer.
pub const STAGING_BASE: u64 = 0x1000_0000;

/// Buffer alignment used when staging.
pub const STAGING_ALIGN: u64 = HostMemory::PAGE_SIZE as u64;

/// Fill pattern for a buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Pattern {
    /// All zero.
    Zeros,
    /// Every element equals the value.
    Constant(f64),
    /// `start + i * step`.
    Ramp {
        /// First value.
        start: f64,
        /// Increment per element.
        step: f64,
    },
    /// Deterministic pseudo-random values in `[-amplitude, amplitude]`.
    Noise {
        /// Stream seed.
        seed: u64,
        /// Largest magnitude.
        amplitude: f64,
    },
}

impl Pattern {
    /// Generate `len` samples.
    pub fn generate(&self, len: usize) -> Vec<Fixed16> {
        match *self {
            Pattern::Zeros => vec![Fixed16::ZERO; len],
            Pattern::Constant(value) => vec![Fixed16::from_f64(value); len],
            Pattern::Ramp { start, step } => (0..len)
                .map(|i| Fixed16::from_f64(start + i as f64 * step))
                .collect(),
            Pattern::Noise { seed, amplitude } => {
                let mut state = seed ^ 0x9E37_79B9_7F4A_7C15;
                (0..len)
                    .map(|_| {
                        // xorshift64
                        state ^= state << 13;
                        state ^= state >> 7;
                        state ^= state << 17;
                        let unit = (state >> 11) as f64 / (1u64 << 53) as f64;
                        Fixed16::from_f64((2.0 * unit - 1.0) * amplitude)
                    })
                    .collect()
            }
        }
    }
}

/// Addresses of the four staged buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferLayout {
    /// Input image.
    pub input: u64,
    /// Output feature map.
    pub output: u64,
    /// Coefficients.
    pub coefficients: u64,
    /// Bias.
    pub bias: u64,
}

impl BufferLayout {
    /// Pack the buffers back to back from [`STAGING_BASE`], page aligned.
    pub fn for_shape(shape: &ConvShape) -> Self {
        let bytes = |len: usize| (len * ELEMENT_BYTES) as u64;
        let input = STAGING_BASE;
        let output = align_up(input + bytes(shape.input_len()));
        let coefficients = align_up(output + bytes(shape.output_len()));
        let bias = align_up(coefficients + bytes(shape.coefficient_len()));
        Self { input, output, coefficients, bias }
    }

    /// Register values for a run over this layout.
    pub fn run_params(&self, shape: &ConvShape) -> RunParams {
        RunParams {
            input_addr: self.input,
            output_addr: self.output,
            coeff_addr: self.coefficients,
            bias_addr: self.bias,
            in_channels: shape.in_channels,
            out_channels: shape.out_channels,
            height: shape.height,
            width: shape.width,
        }
    }
}

fn align_up(addr: u64) -> u64 {
    addr.div_ceil(STAGING_ALIGN) * STAGING_ALIGN
}

/// Output of a job run.
#[derive(Debug, Clone)]
pub struct JobOutput {
    /// Feature map, `[out_row][out_col][filter]`.
    pub output: Vec<Fixed16>,
    /// Engine counters.
    pub stats: RunStats,
}

/// One convolution job.
#[derive(Debug, Clone)]
pub struct ConvJob {
    /// Dimensions.
    pub shape: ConvShape,
    /// Image, `[row][col][channel]`.
    pub input: Vec<Fixed16>,
    /// Weights, `[filter][channel][kernel row][kernel col]`.
    pub coefficients: Vec<Fixed16>,
    /// Bias, `[filter]`.
    pub bias: Vec<Fixed16>,
}

impl ConvJob {
    /// All-zero job.
    pub fn new(shape: ConvShape) -> Self {
        Self {
            shape,
            input: vec![Fixed16::ZERO; shape.input_len()],
            coefficients: vec![Fixed16::ZERO; shape.coefficient_len()],
            bias: vec![Fixed16::ZERO; shape.out_channels],
        }
    }

    /// Deterministic job whose partial sums stay inside the Q4.12 range.
    ///
    /// Inputs lie in `[-1, 1]`, weights in `[-0.5 / C, 0.5 / C]` and bias in
    /// `[-0.5, 0.5]`, so no accumulator exceeds 5.0 in magnitude.
    pub fn synthetic(shape: ConvShape) -> Self {
        let weight_amplitude = 0.5 / shape.in_channels as f64;
        Self::new(shape)
            .fill_input(Pattern::Noise { seed: 1, amplitude: 1.0 })
            .fill_coefficients(Pattern::Noise { seed: 2, amplitude: weight_amplitude })
            .fill_bias(Pattern::Noise { seed: 3, amplitude: 0.5 })
    }

    /// Replace the image.
    ///
    /// # Panics
    ///
    /// Panics if the length does not match the shape.
    pub fn with_input(mut self, input: Vec<Fixed16>) -> Self {
        assert_eq!(input.len(), self.shape.input_len(), "input length");
        self.input = input;
        self
    }

    /// Replace the coefficients.
    ///
    /// # Panics
    ///
    /// Panics if the length does not match the shape.
    pub fn with_coefficients(mut self, coefficients: Vec<Fixed16>) -> Self {
        assert_eq!(coefficients.len(), self.shape.coefficient_len(), "coefficient length");
        self.coefficients = coefficients;
        self
    }

    /// Replace the bias.
    ///
    /// # Panics
    ///
    /// Panics if the length does not match the shape.
    pub fn with_bias(mut self, bias: Vec<Fixed16>) -> Self {
        assert_eq!(bias.len(), self.shape.out_channels, "bias length");
        self.bias = bias;
        self
    }

    /// Fill the image from a pattern.
    pub fn fill_input(mut self, pattern: Pattern) -> Self {
        self.input = pattern.generate(self.shape.input_len());
        self
    }

    /// Fill the coefficients from a pattern.
    pub fn fill_coefficients(mut self, pattern: Pattern) -> Self {
        self.coefficients = pattern.generate(self.shape.coefficient_len());
        self
    }

    /// Fill the bias from a pattern.
    pub fn fill_bias(mut self, pattern: Pattern) -> Self {
        self.bias = pattern.generate(self.shape.out_channels);
        self
    }

    /// The same job restricted to filter `k`.
    pub fn single_filter(&self, k: usize) -> Self {
        let per_filter = self.shape.coefficient_len() / self.shape.out_channels;
        Self {
            shape: ConvShape { out_channels: 1, ..self.shape },
            input: self.input.clone(),
            coefficients: self.coefficients[k * per_filter..(k + 1) * per_filter].to_vec(),
            bias: vec![self.bias[k]],
        }
    }

    /// Exact-arithmetic expected output.
    pub fn reference(&self) -> Vec<Fixed16> {
        reference::conv3x3_bias_relu(&self.shape, &self.input, &self.coefficients, &self.bias)
    }

    /// Allocate and fill the buffers in `mem`. Returns the register values.
    ///
    /// The output buffer is zeroed.
    pub fn stage(&self, mem: &mut HostMemory) -> Result<RunParams> {
        let layout = BufferLayout::for_shape(&self.shape);
        let bytes = |len: usize| len * ELEMENT_BYTES;

        mem.allocate_region_with_direction("input", layout.input, bytes(self.input.len()), DataDirection::Input)?;
        mem.allocate_region_with_direction(
            "output",
            layout.output,
            bytes(self.shape.output_len()),
            DataDirection::Output,
        )?;
        mem.allocate_region_with_direction(
            "coefficients",
            layout.coefficients,
            bytes(self.coefficients.len()),
            DataDirection::Input,
        )?;
        mem.allocate_region_with_direction("bias", layout.bias, bytes(self.bias.len()), DataDirection::Input)?;

        mem.write_fixed(layout.input, &self.input);
        mem.write_fixed(layout.output, &vec![Fixed16::ZERO; self.shape.output_len()]);
        mem.write_fixed(layout.coefficients, &self.coefficients);
        mem.write_fixed(layout.bias, &self.bias);

        Ok(layout.run_params(&self.shape))
    }

    /// Stage into fresh memory, run to completion and read the output back.
    pub fn run(&self, engine: &mut ConvEngine) -> Result<JobOutput> {
        let mut mem = HostMemory::new();
        self.run_in(engine, &mut mem)
    }

    /// Like [`ConvJob::run`], staging into `mem`.
    pub fn run_in(&self, engine: &mut ConvEngine, mem: &mut HostMemory) -> Result<JobOutput> {
        let params = self.stage(mem)?;
        engine.program(&params)?;
        engine.start()?;
        let stats = engine.run(mem)?;
        let output = mem.read_fixed(params.output_addr, self.shape.output_len());
        Ok(JobOutput { output, stats })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape() -> ConvShape {
        ConvShape { height: 4, width: 6, in_channels: 2, out_channels: 3 }
    }

    #[test]
    fn test_patterns() {
        assert_eq!(Pattern::Zeros.generate(3), vec![Fixed16::ZERO; 3]);
        assert_eq!(Pattern::Constant(1.0).generate(2), vec![Fixed16::ONE; 2]);
        assert_eq!(
            Pattern::Ramp { start: 0.5, step: 0.25 }.generate(3),
            vec![Fixed16::from_f64(0.5), Fixed16::from_f64(0.75), Fixed16::ONE]
        );
    }

    #[test]
    fn test_noise_is_deterministic_and_bounded() {
        let a = Pattern::Noise { seed: 7, amplitude: 0.5 }.generate(200);
        let b = Pattern::Noise { seed: 7, amplitude: 0.5 }.generate(200);
        let c = Pattern::Noise { seed: 8, amplitude: 0.5 }.generate(200);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.iter().all(|v| v.to_f64().abs() <= 0.5));
    }

    #[test]
    fn test_layout_is_page_aligned_and_disjoint() {
        let layout = BufferLayout::for_shape(&shape());
        for addr in [layout.input, layout.output, layout.coefficients, layout.bias] {
            assert_eq!(addr % STAGING_ALIGN, 0);
        }
        assert!(layout.input < layout.output);
        assert!(layout.output < layout.coefficients);
        assert!(layout.coefficients < layout.bias);
    }

    #[test]
    fn test_stage_writes_buffers() {
        let job = ConvJob::synthetic(shape());
        let mut mem = HostMemory::new();
        let params = job.stage(&mut mem).unwrap();

        assert_eq!(mem.read_fixed(params.input_addr, job.input.len()), job.input);
        assert_eq!(mem.read_fixed(params.coeff_addr, job.coefficients.len()), job.coefficients);
        assert_eq!(mem.read_fixed(params.bias_addr, 3), job.bias);
        assert_eq!(mem.regions().len(), 4);
        assert_eq!(params.out_channels, 3);

        // staging twice into the same memory collides
        assert!(job.stage(&mut mem).is_err());
    }

    #[test]
    fn test_single_filter_slices_bank() {
        let job = ConvJob::synthetic(shape());
        let single = job.single_filter(2);
        assert_eq!(single.shape.out_channels, 1);
        assert_eq!(single.coefficients, job.coefficients[36..54].to_vec());
        assert_eq!(single.bias, vec![job.bias[2]]);
    }
}
