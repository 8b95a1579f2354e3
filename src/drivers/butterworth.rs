//! Butterworth IIR design in transfer-function (`b`, `a`) form.
//!
//! The design goes through the analog prototype: normalised Butterworth poles,
//! pre-warped critical frequencies, a lowpass-to-target transformation in
//! zero/pole/gain form, the bilinear transform, and finally expansion of the
//! digital zeros and poles into polynomial coefficients.
use std::f64::consts::PI;
use rustfft::num_complex::Complex64;
use serde::{Deserialize, Serialize};
use crate::drivers::PipelineError;
/// Sample rate used internally by the bilinear transform. Frequencies are
/// normalised to Nyquist before pre-warping, so the analog design only needs
/// to agree with this value.
const BILINEAR_FS: f64 = 2.0;
/// Filter family plus its critical frequencies, as read from configuration.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum FilterSpec {
    Lowpass { order: usize, cutoff_hz: f64 },
    Highpass { order: usize, cutoff_hz: f64 },
    Bandpass { order: usize, low_hz: f64, high_hz: f64 },
    Bandstop { order: usize, low_hz: f64, high_hz: f64 },
}
impl FilterSpec {
    pub fn order(&self) -> usize {
        match *self {
            FilterSpec::Lowpass { order, .. }
            | FilterSpec::Highpass { order, .. }
            | FilterSpec::Bandpass { order, .. }
            | FilterSpec::Bandstop { order, .. } => order,
        }
    }
    fn validate(&self, sample_rate_hz: f64) -> Result<(), PipelineError> {
        if !(sample_rate_hz.is_finite() && sample_rate_hz > 0.0) {
            return Err(PipelineError::InvalidSampleRate);
        }
        if self.order() == 0 {
            return Err(PipelineError::FilterDesign(format!(
                "{self:?}: order must be at least 1"
            )));
        }
        let nyquist = sample_rate_hz / 2.0;
        let in_range = |f: f64| f.is_finite() && f > 0.0 && f < nyquist;
        let ok = match *self {
            FilterSpec::Lowpass { cutoff_hz, .. } | FilterSpec::Highpass { cutoff_hz, .. } => {
                in_range(cutoff_hz)
            }
            FilterSpec::Bandpass { low_hz, high_hz, .. }
            | FilterSpec::Bandstop { low_hz, high_hz, .. } => {
                in_range(low_hz) && in_range(high_hz) && low_hz < high_hz
            }
        };
        if ok {
            Ok(())
        } else {
            Err(PipelineError::FilterDesign(format!(
                "{self:?}: critical frequencies must satisfy 0 < f < {nyquist} Hz (and low < high)"
            )))
        }
    }
}
/// Feed-forward (`b`) and feedback (`a`) coefficients of one IIR filter.
#[derive(Clone, Debug, PartialEq)]
pub struct FilterCoefficients {
    pub b: Vec<f64>,
    pub a: Vec<f64>,
}
impl FilterCoefficients {
    /// Wraps raw coefficients, rejecting vectors no recursion can run on.
    pub fn new(b: Vec<f64>, a: Vec<f64>) -> Result<Self, PipelineError> {
        if b.is_empty() || a.is_empty() {
            return Err(PipelineError::FilterDesign(
                "coefficient vectors must not be empty".into(),
            ));
        }
        if b.iter().chain(a.iter()).any(|c| !c.is_finite()) {
            return Err(PipelineError::FilterDesign(
                "coefficients must be finite".into(),
            ));
        }
        if a[0] == 0.0 {
            return Err(PipelineError::FilterDesign(
                "leading feedback coefficient must be non-zero".into(),
            ));
        }
        Ok(Self { b, a })
    }
    /// Digital Butterworth design at `sample_rate_hz`.
    pub fn butterworth(spec: FilterSpec, sample_rate_hz: f64) -> Result<Self, PipelineError> {
        spec.validate(sample_rate_hz)?;
        let warp = |freq_hz: f64| {
            let normalized = 2.0 * freq_hz / sample_rate_hz;
            2.0 * BILINEAR_FS * (PI * normalized / BILINEAR_FS).tan()
        };
        let analog = Zpk::prototype(spec.order());
        let analog = match spec {
            FilterSpec::Lowpass { cutoff_hz, .. } => analog.to_lowpass(warp(cutoff_hz)),
            FilterSpec::Highpass { cutoff_hz, .. } => analog.to_highpass(warp(cutoff_hz)),
            FilterSpec::Bandpass { low_hz, high_hz, .. } => {
                let (low, high) = (warp(low_hz), warp(high_hz));
                analog.to_bandpass((low * high).sqrt(), high - low)
            }
            FilterSpec::Bandstop { low_hz, high_hz, .. } => {
                let (low, high) = (warp(low_hz), warp(high_hz));
                analog.to_bandstop((low * high).sqrt(), high - low)
            }
        };
        let digital = analog.bilinear(BILINEAR_FS);
        let b = poly(&digital.zeros)
            .into_iter()
            .map(|c| c.re * digital.gain)
            .collect();
        let a = poly(&digital.poles).into_iter().map(|c| c.re).collect();
        Self::new(b, a)
    }
    /// Number of taps of the recursion, `max(len(a), len(b))`.
    pub fn len(&self) -> usize {
        self.a.len().max(self.b.len())
    }
    /// Gain at 0 Hz, `sum(b) / sum(a)`.
    #[cfg(test)]
    pub fn dc_gain(&self) -> f64 {
        self.b.iter().sum::<f64>() / self.a.iter().sum::<f64>()
    }
    /// Magnitude response at `freq_hz`.
    #[cfg(test)]
    pub fn magnitude_at(&self, freq_hz: f64, sample_rate_hz: f64) -> f64 {
        let w = Complex64::from_polar(1.0, -2.0 * PI * freq_hz / sample_rate_hz);
        let eval = |coeffs: &[f64]| {
            coeffs
                .iter()
                .rev()
                .fold(Complex64::new(0.0, 0.0), |acc, &c| acc * w + c)
        };
        (eval(&self.b) / eval(&self.a)).norm()
    }
}
/// Zero/pole/gain representation used during design.
#[derive(Clone, Debug)]
struct Zpk {
    zeros: Vec<Complex64>,
    poles: Vec<Complex64>,
    gain: f64,
}
impl Zpk {
    /// Analog lowpass prototype with unit cutoff.
    fn prototype(order: usize) -> Self {
        let n = order as f64;
        let poles = (0..order)
            .map(|k| {
                let m = 2.0 * k as f64 - n + 1.0;
                -Complex64::from_polar(1.0, PI * m / (2.0 * n))
            })
            .collect();
        Self {
            zeros: Vec::new(),
            poles,
            gain: 1.0,
        }
    }
    fn relative_degree(&self) -> usize {
        self.poles.len() - self.zeros.len()
    }
    /// `prod(-z) / prod(-p)`, the gain correction of the inverting transforms.
    fn inverse_gain(&self) -> f64 {
        let num: Complex64 = self.zeros.iter().map(|&z| -z).product();
        let den: Complex64 = self.poles.iter().map(|&p| -p).product();
        (num / den).re
    }
    fn to_lowpass(self, wo: f64) -> Self {
        let degree = self.relative_degree() as i32;
        Self {
            zeros: self.zeros.iter().map(|&z| z * wo).collect(),
            poles: self.poles.iter().map(|&p| p * wo).collect(),
            gain: self.gain * wo.powi(degree),
        }
    }
    fn to_highpass(self, wo: f64) -> Self {
        let degree = self.relative_degree();
        let gain = self.gain * self.inverse_gain();
        let mut zeros: Vec<Complex64> = self.zeros.iter().map(|&z| wo / z).collect();
        zeros.extend(std::iter::repeat(Complex64::new(0.0, 0.0)).take(degree));
        Self {
            zeros,
            poles: self.poles.iter().map(|&p| wo / p).collect(),
            gain,
        }
    }
    fn to_bandpass(self, wo: f64, bw: f64) -> Self {
        let degree = self.relative_degree();
        let mut zeros = split_roots(self.zeros.iter().map(|&z| z * (bw / 2.0)), wo);
        zeros.extend(std::iter::repeat(Complex64::new(0.0, 0.0)).take(degree));
        Self {
            zeros,
            poles: split_roots(self.poles.iter().map(|&p| p * (bw / 2.0)), wo),
            gain: self.gain * bw.powi(degree as i32),
        }
    }
    fn to_bandstop(self, wo: f64, bw: f64) -> Self {
        let degree = self.relative_degree();
        let gain = self.gain * self.inverse_gain();
        let mut zeros = split_roots(self.zeros.iter().map(|&z| (bw / 2.0) / z), wo);
        zeros.extend(std::iter::repeat(Complex64::new(0.0, wo)).take(degree));
        zeros.extend(std::iter::repeat(Complex64::new(0.0, -wo)).take(degree));
        Self {
            zeros,
            poles: split_roots(self.poles.iter().map(|&p| (bw / 2.0) / p), wo),
            gain,
        }
    }
    /// Bilinear transform; excess poles get matching zeros at Nyquist (-1).
    fn bilinear(self, fs: f64) -> Self {
        let fs2 = Complex64::new(2.0 * fs, 0.0);
        let degree = self.relative_degree();
        let num: Complex64 = self.zeros.iter().map(|&z| fs2 - z).product();
        let den: Complex64 = self.poles.iter().map(|&p| fs2 - p).product();
        let mut zeros: Vec<Complex64> =
            self.zeros.iter().map(|&z| (fs2 + z) / (fs2 - z)).collect();
        zeros.extend(std::iter::repeat(Complex64::new(-1.0, 0.0)).take(degree));
        Self {
            zeros,
            poles: self.poles.iter().map(|&p| (fs2 + p) / (fs2 - p)).collect(),
            gain: self.gain * (num / den).re,
        }
    }
}
/// Each root `r` becomes the pair `r ± sqrt(r² - wo²)`; all `+` roots first.
fn split_roots(roots: impl Iterator<Item = Complex64>, wo: f64) -> Vec<Complex64> {
    let roots: Vec<Complex64> = roots.collect();
    let offsets: Vec<Complex64> = roots.iter().map(|&r| (r * r - wo * wo).sqrt()).collect();
    let plus = roots.iter().zip(&offsets).map(|(&r, &d)| r + d);
    let minus = roots.iter().zip(&offsets).map(|(&r, &d)| r - d);
    plus.chain(minus).collect()
}
/// Monic polynomial with the given roots, highest power first.
fn poly(roots: &[Complex64]) -> Vec<Complex64> {
    let mut coeffs = vec![Complex64::new(1.0, 0.0)];
    for &root in roots {
        let mut next = vec![Complex64::new(0.0, 0.0); coeffs.len() + 1];
        for (i, &c) in coeffs.iter().enumerate() {
            next[i] += c;
            next[i + 1] -= root * c;
        }
        coeffs = next;
    }
    coeffs
}
#[cfg(test)]
mod tests {
    use super::*;
    const FS: f64 = 200.0;
    fn close(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() < tol
    }
    #[test]
    fn highpass_matches_reference_design() {
        let coeffs = FilterCoefficients::butterworth(
            FilterSpec::Highpass {
                order: 3,
                cutoff_hz: 0.4,
            },
            FS,
        )
        .unwrap();
        let b = [0.98751217486959, -2.96253652460877, 2.96253652460877, -0.98751217486959];
        let a = [1.0, -2.97486742411365, 2.95004967932747, -0.97518029551561];
        assert_eq!(coeffs.b.len(), 4);
        assert_eq!(coeffs.a.len(), 4);
        for (got, want) in coeffs.b.iter().zip(b) {
            assert!(close(*got, want, 1e-9), "b: {got} vs {want}");
        }
        for (got, want) in coeffs.a.iter().zip(a) {
            assert!(close(*got, want, 1e-9), "a: {got} vs {want}");
        }
    }
    #[test]
    fn highpass_response_shape() {
        let coeffs = FilterCoefficients::butterworth(
            FilterSpec::Highpass {
                order: 3,
                cutoff_hz: 0.4,
            },
            FS,
        )
        .unwrap();
        assert!(coeffs.dc_gain().abs() < 1e-6);
        assert!(close(coeffs.magnitude_at(0.4, FS), std::f64::consts::FRAC_1_SQRT_2, 1e-6));
        assert!(close(coeffs.magnitude_at(99.0, FS), 1.0, 1e-6));
    }
    #[test]
    fn bandstop_rejects_line_noise() {
        let coeffs = FilterCoefficients::butterworth(
            FilterSpec::Bandstop {
                order: 3,
                low_hz: 46.0,
                high_hz: 54.0,
            },
            FS,
        )
        .unwrap();
        assert_eq!(coeffs.len(), 7);
        assert!(close(coeffs.dc_gain(), 1.0, 1e-9));
        assert!(coeffs.magnitude_at(50.0, FS) < 1e-9);
        assert!(close(coeffs.magnitude_at(46.0, FS), std::f64::consts::FRAC_1_SQRT_2, 1e-6));
        assert!(close(coeffs.magnitude_at(54.0, FS), std::f64::consts::FRAC_1_SQRT_2, 1e-6));
        assert!(close(coeffs.magnitude_at(10.0, FS), 1.0, 1e-3));
    }
    #[test]
    fn lowpass_and_bandpass_hit_their_corners() {
        let lp = FilterCoefficients::butterworth(
            FilterSpec::Lowpass {
                order: 4,
                cutoff_hz: 30.0,
            },
            FS,
        )
        .unwrap();
        assert!(close(lp.dc_gain(), 1.0, 1e-9));
        assert!(close(lp.magnitude_at(30.0, FS), std::f64::consts::FRAC_1_SQRT_2, 1e-6));
        let bp = FilterCoefficients::butterworth(
            FilterSpec::Bandpass {
                order: 2,
                low_hz: 8.0,
                high_hz: 12.0,
            },
            FS,
        )
        .unwrap();
        assert_eq!(bp.len(), 5);
        assert!(bp.dc_gain().abs() < 1e-9);
        assert!(close(bp.magnitude_at(8.0, FS), std::f64::consts::FRAC_1_SQRT_2, 1e-6));
        assert!(close(bp.magnitude_at(12.0, FS), std::f64::consts::FRAC_1_SQRT_2, 1e-6));
    }
    #[test]
    fn invalid_designs_are_rejected() {
        let above_nyquist = FilterSpec::Highpass {
            order: 3,
            cutoff_hz: 120.0,
        };
        assert!(matches!(
            FilterCoefficients::butterworth(above_nyquist, FS),
            Err(PipelineError::FilterDesign(_))
        ));
        let inverted = FilterSpec::Bandstop {
            order: 3,
            low_hz: 54.0,
            high_hz: 46.0,
        };
        assert!(FilterCoefficients::butterworth(inverted, FS).is_err());
        let zero_order = FilterSpec::Lowpass {
            order: 0,
            cutoff_hz: 10.0,
        };
        assert!(FilterCoefficients::butterworth(zero_order, FS).is_err());
        assert!(matches!(
            FilterCoefficients::butterworth(zero_order, 0.0),
            Err(PipelineError::InvalidSampleRate)
        ));
        assert!(FilterCoefficients::new(vec![1.0], vec![0.0, 1.0]).is_err());
    }
}
