use std::sync::Arc;
use rustfft::{num_complex::Complex64, Fft, FftPlanner};
use serde::{Deserialize, Serialize};
/// How a zero-mean filtered signal is turned into a non-negative magnitude.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeMode {
    /// Absolute value of every sample.
    #[default]
    Rectify,
    /// Magnitude of the analytic signal.
    Hilbert,
}
/// Forward/inverse transforms for one window length, with their scratch space.
struct HilbertPlans {
    len: usize,
    forward: Arc<dyn Fft<f64>>,
    inverse: Arc<dyn Fft<f64>>,
    scratch: Vec<Complex64>,
}
impl HilbertPlans {
    fn new(planner: &mut FftPlanner<f64>, len: usize) -> Self {
        let forward = planner.plan_fft_forward(len);
        let inverse = planner.plan_fft_inverse(len);
        let scratch_len = forward
            .get_inplace_scratch_len()
            .max(inverse.get_inplace_scratch_len());
        log::debug!("planned {len}-point Hilbert transform");
        Self {
            len,
            forward,
            inverse,
            scratch: vec![Complex64::default(); scratch_len],
        }
    }
}
/// Envelope stage of the trigger engine. The planner lives as long as the
/// engine; plans are rebuilt only when the window length changes.
pub struct EnvelopeDetector {
    mode: EnvelopeMode,
    planner: FftPlanner<f64>,
    plans: Option<HilbertPlans>,
}
impl EnvelopeDetector {
    pub fn new(mode: EnvelopeMode) -> Self {
        Self {
            mode,
            planner: FftPlanner::new(),
            plans: None,
        }
    }
    pub fn apply(&mut self, signal: &[f64]) -> Vec<f64> {
        match self.mode {
            EnvelopeMode::Rectify => signal.iter().map(|v| v.abs()).collect(),
            EnvelopeMode::Hilbert => self.hilbert_magnitude(signal),
        }
    }
    fn plans_for(&mut self, len: usize) -> &mut HilbertPlans {
        if self.plans.as_ref().map_or(false, |p| p.len != len) {
            self.plans = None;
        }
        let planner = &mut self.planner;
        self.plans.get_or_insert_with(|| HilbertPlans::new(planner, len))
    }
    /// `|x + j H{x}|` computed in the frequency domain: keep DC (and Nyquist
    /// for even lengths), double positive frequencies, zero negative ones.
    fn hilbert_magnitude(&mut self, signal: &[f64]) -> Vec<f64> {
        let n = signal.len();
        if n == 0 {
            return Vec::new();
        }
        let plans = self.plans_for(n);
        let mut spectrum: Vec<Complex64> = signal.iter().map(|&v| Complex64::new(v, 0.0)).collect();
        plans.forward.process_with_scratch(&mut spectrum, &mut plans.scratch);
        for (k, bin) in spectrum.iter_mut().enumerate() {
            let weight = if k == 0 || (n % 2 == 0 && k == n / 2) {
                1.0
            } else if k < (n + 1) / 2 {
                2.0
            } else {
                0.0
            };
            *bin *= weight;
        }
        plans.inverse.process_with_scratch(&mut spectrum, &mut plans.scratch);
        // rustfft leaves the inverse unnormalised
        spectrum.iter().map(|c| c.norm() / n as f64).collect()
    }
}
