//! Low-pass filter stage.
//!
//! Two filters run in cascade over the resampled level column:
//!
//! 1. A centered moving average (uniform kernel, same-length output). The
//!    series is implicitly zero-padded, so the first and last `window / 2`
//!    samples are pulled toward zero. That edge artifact is accepted.
//! 2. A linear-phase FIR low-pass designed with the windowed-sinc method
//!    (Hamming window, unit gain at DC). By default it is applied causally:
//!    output `i` only sees inputs `<= i` and lags by `(numtaps - 1) / 2`
//!    samples. The lag is not corrected. [`FilterDirection::ZeroPhase`] runs
//!    the filter forward and backward instead.

use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::PipelineError;

// ---

/// How the FIR taps are applied to the series.
///
/// Parsed the same way from the environment and from query strings; see the
/// [`FromStr`] impl for the accepted spellings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterDirection {
    /// One pass, forward in time. Introduces group delay.
    #[default]
    Causal,
    /// Forward then backward pass with odd-extension padding. No phase lag,
    /// needs more than `3 * numtaps` samples.
    ZeroPhase,
}

impl FromStr for FilterDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "causal" | "forward" => Ok(Self::Causal),
            "zero_phase" | "zero-phase" | "filtfilt" => Ok(Self::ZeroPhase),
            other => Err(format!(
                "unknown filter direction `{other}` (expected `causal` or `zero_phase`)"
            )),
        }
    }
}

impl<'de> Deserialize<'de> for FilterDirection {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for FilterDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Causal => f.write_str("causal"),
            Self::ZeroPhase => f.write_str("zero_phase"),
        }
    }
}

/// Centered moving average with a uniform kernel of `window` samples.
///
/// Output has the input's length. Sample `i` averages the window
/// `[i + off - window + 1, i + off]` with `off = (window - 1) / 2`, treating
/// out-of-range samples as zero.
pub fn moving_average(data: &[f64], window: usize) -> Result<Vec<f64>, PipelineError> {
    // ---
    if window == 0 {
        return Err(PipelineError::InvalidConfig {
            reason: "moving average window must be positive".into(),
        });
    }
    if data.len() < window {
        return Err(PipelineError::InsufficientData {
            stage: "moving average",
            required: window,
            actual: data.len(),
        });
    }

    let n = data.len();
    let off = (window - 1) / 2;

    // prefix[k] = sum of data[..k]
    let mut prefix = Vec::with_capacity(n + 1);
    prefix.push(0.0);
    let mut acc = 0.0;
    for &x in data {
        acc += x;
        prefix.push(acc);
    }

    let scale = 1.0 / window as f64;
    let out = (0..n)
        .map(|i| {
            let hi = (i + off + 1).min(n);
            let lo = (i + off + 1).saturating_sub(window);
            (prefix[hi] - prefix[lo]) * scale
        })
        .collect();

    Ok(out)
}

/// Finite-impulse-response filter with `a = [1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct FirFilter {
    taps: Vec<f64>,
}

impl FirFilter {
    // ---
    /// Design a low-pass filter with `numtaps` coefficients.
    ///
    /// `cutoff` and `fs` share units; the cutoff is normalized against the
    /// Nyquist rate `fs / 2` and must fall strictly inside `(0, 1)` after
    /// normalization.
    pub fn lowpass(numtaps: usize, cutoff: f64, fs: f64) -> Result<Self, PipelineError> {
        // ---
        if numtaps == 0 {
            return Err(PipelineError::InvalidConfig {
                reason: "FIR filter needs at least one tap".into(),
            });
        }
        if !(fs.is_finite() && fs > 0.0) {
            return Err(PipelineError::InvalidConfig {
                reason: format!("FIR sampling rate must be positive, got {fs}"),
            });
        }
        let nyquist = 0.5 * fs;
        let normal_cutoff = cutoff / nyquist;
        if !(normal_cutoff > 0.0 && normal_cutoff < 1.0) {
            return Err(PipelineError::InvalidConfig {
                reason: format!(
                    "FIR cutoff {cutoff} must lie strictly between 0 and the Nyquist rate {nyquist}"
                ),
            });
        }

        let alpha = 0.5 * (numtaps - 1) as f64;
        let mut taps: Vec<f64> = (0..numtaps)
            .map(|n| {
                let m = n as f64 - alpha;
                normal_cutoff * sinc(normal_cutoff * m) * hamming(n, numtaps)
            })
            .collect();

        // Unit gain at DC.
        let gain: f64 = taps.iter().sum();
        for t in &mut taps {
            *t /= gain;
        }

        Ok(Self { taps })
    }

    pub fn taps(&self) -> &[f64] {
        &self.taps
    }

    pub fn numtaps(&self) -> usize {
        self.taps.len()
    }

    /// Smallest series length this filter accepts in the given direction.
    pub fn min_len(&self, direction: FilterDirection) -> usize {
        match direction {
            FilterDirection::Causal => self.numtaps(),
            FilterDirection::ZeroPhase => 3 * self.numtaps() + 1,
        }
    }

    pub fn apply(
        &self,
        data: &[f64],
        direction: FilterDirection,
    ) -> Result<Vec<f64>, PipelineError> {
        // ---
        let required = self.min_len(direction);
        if data.len() < required {
            return Err(PipelineError::InsufficientData {
                stage: "FIR filter",
                required,
                actual: data.len(),
            });
        }

        Ok(match direction {
            FilterDirection::Causal => self.run(data, None),
            FilterDirection::ZeroPhase => self.run_forward_backward(data),
        })
    }

    /// Transposed direct-form II pass. `state` holds `numtaps - 1` delay
    /// values; `None` starts from rest.
    fn run(&self, data: &[f64], state: Option<Vec<f64>>) -> Vec<f64> {
        // ---
        let b = &self.taps;
        let order = b.len() - 1;
        let mut z = state.unwrap_or_else(|| vec![0.0; order]);

        data.iter()
            .map(|&x| {
                let y = b[0] * x + z.first().copied().unwrap_or(0.0);
                for i in 0..order {
                    let next = if i + 1 < order { z[i + 1] } else { 0.0 };
                    z[i] = b[i + 1] * x + next;
                }
                y
            })
            .collect()
    }

    /// Steady-state delay values for a unit step input.
    fn step_state(&self) -> Vec<f64> {
        // ---
        let b = &self.taps;
        let mut zi = vec![0.0; b.len() - 1];
        let mut acc = 0.0;
        for i in (0..zi.len()).rev() {
            acc += b[i + 1];
            zi[i] = acc;
        }
        zi
    }

    fn run_forward_backward(&self, data: &[f64]) -> Vec<f64> {
        // ---
        let pad = 3 * self.numtaps();
        let n = data.len();
        let zi = self.step_state();

        // Odd extension about both end points.
        let mut ext = Vec::with_capacity(n + 2 * pad);
        ext.extend((1..=pad).rev().map(|k| 2.0 * data[0] - data[k]));
        ext.extend_from_slice(data);
        ext.extend((1..=pad).map(|k| 2.0 * data[n - 1] - data[n - 1 - k]));

        let scaled = |s: f64| zi.iter().map(|z| z * s).collect::<Vec<_>>();

        let forward = self.run(&ext, Some(scaled(ext[0])));
        let mut reversed: Vec<f64> = forward.into_iter().rev().collect();
        let start = reversed[0];
        reversed = self.run(&reversed, Some(scaled(start)));
        reversed.reverse();

        reversed[pad..pad + n].to_vec()
    }
}

fn sinc(x: f64) -> f64 {
    if x == 0.0 {
        1.0
    } else {
        (PI * x).sin() / (PI * x)
    }
}

fn hamming(n: usize, len: usize) -> f64 {
    if len == 1 {
        return 1.0;
    }
    0.54 - 0.46 * (2.0 * PI * n as f64 / (len - 1) as f64).cos()
}
