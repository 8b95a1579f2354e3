use ndarray::{Array1, Array2};
use crate::drivers::butterworth::{FilterCoefficients, FilterSpec};
use crate::drivers::PipelineError;
/// One precomputed filter: coefficients normalised to `a[0] == 1`, the
/// steady-state initial condition for a unit step and the pad length used for
/// edge correction on a window of fixed length.
#[derive(Clone, Debug)]
pub struct FilterStage {
    b: Vec<f64>,
    a: Vec<f64>,
    zi: Vec<f64>,
    pad_len: usize,
}
impl FilterStage {
    pub fn new(coefficients: FilterCoefficients, window_len: usize) -> Result<Self, PipelineError> {
        let (b, a) = normalized(&coefficients);
        let zi = step_initial_state(&b, &a)?;
        let pad_len = pad_length(&coefficients, window_len);
        log::debug!("filter stage ready: {} taps, {pad_len} samples of edge padding", b.len());
        Ok(Self {
            b,
            a,
            zi,
            pad_len,
        })
    }
    pub fn design(
        spec: FilterSpec,
        sample_rate_hz: f64,
        window_len: usize,
    ) -> Result<Self, PipelineError> {
        Self::new(FilterCoefficients::butterworth(spec, sample_rate_hz)?, window_len)
    }
    #[cfg(test)]
    pub fn pad_len(&self) -> usize {
        self.pad_len
    }
    /// Steady-state filter state for a unit step input (`lfilter_zi`).
    #[cfg(test)]
    pub fn initial_state(&self) -> &[f64] {
        &self.zi
    }
    /// Filters one channel with edge correction.
    ///
    /// The signal is left-padded symmetrically, the recursion starts from the
    /// step steady state scaled by the first padded sample, and the padded
    /// prefix is dropped again. The output has the input's length.
    pub fn filter(&self, signal: &[f64]) -> Vec<f64> {
        if signal.is_empty() {
            return Vec::new();
        }
        let padded = symmetric_pad(signal, self.pad_len);
        let first = padded[0];
        let state: Vec<f64> = self.zi.iter().map(|z| z * first).collect();
        let mut out = self.run(&padded, Some(&state));
        out.drain(..self.pad_len);
        out
    }
    /// Plain causal recursion (transposed direct form II).
    pub fn run(&self, signal: &[f64], initial_state: Option<&[f64]>) -> Vec<f64> {
        let order = self.b.len();
        let mut z = match initial_state {
            Some(state) => state.to_vec(),
            None => vec![0.0; order - 1],
        };
        z.resize(order - 1, 0.0);
        let mut out = Vec::with_capacity(signal.len());
        for &x in signal {
            let y = self.b[0] * x + z.first().copied().unwrap_or(0.0);
            for i in 0..order.saturating_sub(2) {
                z[i] = self.b[i + 1] * x + z[i + 1] - self.a[i + 1] * y;
            }
            if order > 1 {
                z[order - 2] = self.b[order - 1] * x - self.a[order - 1] * y;
            }
            out.push(y);
        }
        out
    }
}
/// `max(3 * taps, window_len / 10 - 1)`.
pub fn pad_length(coefficients: &FilterCoefficients, window_len: usize) -> usize {
    (3 * coefficients.len()).max((window_len / 10).saturating_sub(1))
}
/// Left-pads `signal` by mirroring it about its first sample, edge included.
/// Pads longer than the signal keep mirroring periodically.
pub fn symmetric_pad(signal: &[f64], pad_len: usize) -> Vec<f64> {
    let len = signal.len();
    if len == 0 {
        return Vec::new();
    }
    let mut padded = Vec::with_capacity(pad_len + len);
    for k in (1..=pad_len).rev() {
        let j = (k - 1) % (2 * len);
        padded.push(if j < len { signal[j] } else { signal[2 * len - 1 - j] });
    }
    padded.extend_from_slice(signal);
    padded
}
/// Both vectors zero-extended to a common length and divided by `a[0]`.
fn normalized(coefficients: &FilterCoefficients) -> (Vec<f64>, Vec<f64>) {
    let n = coefficients.len();
    let a0 = coefficients.a[0];
    let mut b: Vec<f64> = coefficients.b.iter().map(|c| c / a0).collect();
    let mut a: Vec<f64> = coefficients.a.iter().map(|c| c / a0).collect();
    b.resize(n, 0.0);
    a.resize(n, 0.0);
    (b, a)
}
/// Solves `(I - A) zi = B` where `A` is the transposed companion matrix of
/// `a` and `B = b[1..] - a[1..] * b[0]`.
fn step_initial_state(b: &[f64], a: &[f64]) -> Result<Vec<f64>, PipelineError> {
    let n = b.len();
    if n < 2 {
        return Ok(Vec::new());
    }
    let m = n - 1;
    let mut system = vec![vec![0.0; m + 1]; m];
    for (i, row) in system.iter_mut().enumerate() {
        row[i] = 1.0;
        row[0] += a[i + 1];
        if i + 1 < m {
            row[i + 1] -= 1.0;
        }
        row[m] = b[i + 1] - a[i + 1] * b[0];
    }
    solve_in_place(system).ok_or_else(|| {
        PipelineError::FilterDesign("filter has no steady state (pole at z = 1)".into())
    })
}
/// Gaussian elimination with partial pivoting on an augmented matrix.
fn solve_in_place(mut system: Vec<Vec<f64>>) -> Option<Vec<f64>> {
    let m = system.len();
    for col in 0..m {
        let pivot = (col..m).max_by(|&x, &y| {
            system[x][col]
                .abs()
                .total_cmp(&system[y][col].abs())
        })?;
        if system[pivot][col].abs() < f64::EPSILON {
            return None;
        }
        system.swap(col, pivot);
        for row in col + 1..m {
            let factor = system[row][col] / system[col][col];
            for k in col..=m {
                system[row][k] -= factor * system[col][k];
            }
        }
    }
    let mut x = vec![0.0; m];
    for row in (0..m).rev() {
        let tail: f64 = (row + 1..m).map(|k| system[row][k] * x[k]).sum();
        x[row] = (system[row][m] - tail) / system[row][row];
    }
    Some(x)
}
/// Line-noise rejection followed by baseline removal, applied per channel.
/// A missing stage passes its input through unchanged.
#[derive(Clone, Debug, Default)]
pub struct FilterBank {
    line_noise: Option<FilterStage>,
    baseline: Option<FilterStage>,
}
impl FilterBank {
    pub fn new(line_noise: Option<FilterStage>, baseline: Option<FilterStage>) -> Self {
        Self {
            line_noise,
            baseline,
        }
    }
    pub fn from_specs(
        line_noise: Option<FilterSpec>,
        baseline: Option<FilterSpec>,
        sample_rate_hz: f64,
        window_len: usize,
    ) -> Result<Self, PipelineError> {
        let design = |spec: Option<FilterSpec>| {
            spec.map(|s| FilterStage::design(s, sample_rate_hz, window_len))
                .transpose()
        };
        Ok(Self::new(design(line_noise)?, design(baseline)?))
    }
    #[cfg(test)]
    pub fn line_noise(&self) -> Option<&FilterStage> {
        self.line_noise.as_ref()
    }
    #[cfg(test)]
    pub fn baseline(&self) -> Option<&FilterStage> {
        self.baseline.as_ref()
    }
    /// Filters every row of a `[channels x samples]` buffer.
    pub fn process(&self, buffer: &Array2<f64>) -> Array2<f64> {
        let mut filtered = Array2::zeros(buffer.raw_dim());
        for (row, mut out) in buffer.rows().into_iter().zip(filtered.rows_mut()) {
            let mut signal = row.to_vec();
            if let Some(stage) = &self.line_noise {
                signal = stage.filter(&signal);
            }
            if let Some(stage) = &self.baseline {
                signal = stage.filter(&signal);
            }
            out.assign(&Array1::from(signal));
        }
        filtered
    }
}
