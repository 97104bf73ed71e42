//! Real FFT spectrum estimation for the spectrum panel (§8).
//!
//! Applies a Hann window before transforming, consistent with the original
//! analyzer's windowed-FFT approach, and reports normalized magnitudes
//! rather than raw complex bins so the display layer never touches
//! `num_complex` directly.

use std::f64::consts::PI;
use std::sync::Arc;

use realfft::num_complex::Complex;
use realfft::{RealFftPlanner, RealToComplex};

pub struct RealFftEngine {
    fft: Arc<dyn RealToComplex<f64>>,
    window: Vec<f64>,
    input: Vec<f64>,
    output: Vec<Complex<f64>>,
    scratch: Vec<Complex<f64>>,
    magnitudes: Vec<f64>,
}

impl RealFftEngine {
    /// `size` is the number of time-domain samples per transform; it must
    /// match the slot size the caller feeds into [`RealFftEngine::magnitudes`].
    pub fn new(size: usize) -> Self {
        let mut planner = RealFftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(size);
        let input = fft.make_input_vec();
        let output = fft.make_output_vec();
        let scratch = fft.make_scratch_vec();
        let window = hann_window(size);
        let magnitudes = vec![0.0; output.len()];

        RealFftEngine {
            fft,
            window,
            input,
            output,
            scratch,
            magnitudes,
        }
    }

    /// Number of input samples this engine was built for.
    pub fn size(&self) -> usize {
        self.input.len()
    }

    /// Number of magnitude bins the transform produces (`size / 2 + 1`).
    pub fn bin_count(&self) -> usize {
        self.output.len()
    }

    /// Window and transform `samples`, returning normalized per-bin
    /// magnitudes. Shorter-than-`size` input is zero-padded; longer input is
    /// truncated to `size`.
    pub fn magnitudes(&mut self, samples: &[i16]) -> &[f64] {
        let n = self.input.len();
        for i in 0..n {
            let raw = samples.get(i).copied().unwrap_or(0) as f64 / i16::MAX as f64;
            self.input[i] = raw * self.window[i];
        }

        self.fft
            .process_with_scratch(&mut self.input, &mut self.output, &mut self.scratch)
            .expect("fixed-size planner and buffers must never mismatch");

        let scale = n as f64;
        for (slot, complex) in self.magnitudes.iter_mut().zip(self.output.iter()) {
            *slot = complex.norm() / scale;
        }
        &self.magnitudes
    }
}

fn hann_window(size: usize) -> Vec<f64> {
    if size <= 1 {
        return vec![1.0; size];
    }
    (0..size)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f64 / (size as f64 - 1.0)).cos())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bin_count_matches_real_fft_layout() {
        let engine = RealFftEngine::new(8);
        assert_eq!(engine.size(), 8);
        assert_eq!(engine.bin_count(), 5);
    }

    #[test]
    fn silence_produces_near_zero_magnitudes() {
        let mut engine = RealFftEngine::new(16);
        let samples = vec![0i16; 16];
        let mags = engine.magnitudes(&samples);
        assert!(mags.iter().all(|&m| m.abs() < 1e-9));
    }

    #[test]
    fn short_input_is_zero_padded_not_rejected() {
        let mut engine = RealFftEngine::new(16);
        let samples = vec![1000i16; 4];
        let mags = engine.magnitudes(&samples);
        assert_eq!(mags.len(), 9);
        assert!(mags.iter().any(|&m| m > 0.0));
    }
}
