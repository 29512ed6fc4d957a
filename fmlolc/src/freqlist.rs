//! Frequency-list derivation for the synthesizer's list-mode sweep.
//!
//! The synthesizer output is multiplied by `lo_multiply` outside the
//! instrument to reach the LO frequency, so each pattern step maps to
//! `(lo_freq + offset) / lo_multiply` at the synthesizer.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{FmError, FmResult};
use crate::pattern::ModulationPattern;

/// Output range of the synthesizer in GHz, inclusive on both ends.
///
/// Defaults cover a 250 kHz to 20 GHz signal generator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SynthesizerRange {
    pub min_ghz: f64,
    pub max_ghz: f64,
}

impl Default for SynthesizerRange {
    fn default() -> Self {
        Self {
            min_ghz: 250e-6,
            max_ghz: 20.0,
        }
    }
}

impl SynthesizerRange {
    pub fn contains(&self, freq_ghz: f64) -> bool {
        (self.min_ghz..=self.max_ghz).contains(&freq_ghz)
    }
}

/// Absolute synthesizer frequencies in GHz, in sweep order.
#[derive(Debug, Clone, PartialEq)]
pub struct FrequencyList {
    ghz: Vec<f64>,
}

impl FrequencyList {
    pub fn as_slice(&self) -> &[f64] {
        &self.ghz
    }

    pub fn len(&self) -> usize {
        self.ghz.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ghz.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.ghz.iter().copied()
    }
}

/// Compute the synthesizer frequency list, checked against the default
/// [`SynthesizerRange`].
///
/// # Example
///
/// ```
/// use fmlolc::{compute_frequency_list, ModulationPattern};
///
/// let pattern = ModulationPattern::from_offsets(&[0.0, 1.0, -1.0]);
/// let list = compute_frequency_list(&pattern, 100.0, 8)?;
/// assert_eq!(list.as_slice(), &[12.5, 12.625, 12.375]);
/// # Ok::<(), fmlolc::FmError>(())
/// ```
pub fn compute_frequency_list(
    pattern: &ModulationPattern,
    lo_freq: f64,
    lo_multiply: u32,
) -> FmResult<FrequencyList> {
    compute_frequency_list_in_range(pattern, lo_freq, lo_multiply, &SynthesizerRange::default())
}

/// Compute the synthesizer frequency list, checked against `range`.
///
/// # Errors
///
/// [`FmError::InvalidArgument`] if `lo_multiply` is zero.
/// [`FmError::InvalidPattern`] if the pattern is empty or any derived
/// frequency is non-finite or outside `range`.
pub fn compute_frequency_list_in_range(
    pattern: &ModulationPattern,
    lo_freq: f64,
    lo_multiply: u32,
    range: &SynthesizerRange,
) -> FmResult<FrequencyList> {
    if pattern.is_empty() {
        return Err(FmError::InvalidPattern("pattern has no entries".to_string()));
    }
    if lo_multiply == 0 {
        return Err(FmError::InvalidArgument(
            "LO multiplication factor must be positive".to_string(),
        ));
    }

    let divisor = f64::from(lo_multiply);
    let mut ghz = Vec::with_capacity(pattern.len());

    for (i, offset) in pattern.offsets().enumerate() {
        let freq = (lo_freq + offset) / divisor;
        if !freq.is_finite() {
            return Err(FmError::InvalidPattern(format!(
                "entry {i}: frequency is not finite"
            )));
        }
        if !range.contains(freq) {
            return Err(FmError::InvalidPattern(format!(
                "entry {i}: {freq} GHz outside synthesizer range [{}, {}] GHz",
                range.min_ghz, range.max_ghz
            )));
        }
        ghz.push(freq);
    }

    debug!(
        "Frequency list: {} points, {:.6}-{:.6} GHz",
        ghz.len(),
        ghz.iter().copied().fold(f64::INFINITY, f64::min),
        ghz.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    );

    Ok(FrequencyList { ghz })
}
