//! FM pattern files.
//!
//! A pattern file (`.fmp`) lists the LO offsets the synthesizer steps through,
//! one per line, each with a duration:
//!
//! ```text
//! # offset[GHz]  duration[s]
//! 0.0    0.2
//! 1.0    0.2
//! -1.0   0.2
//! ```
//!
//! Blank lines and `#` comments are skipped. Columns may be separated by
//! whitespace or a comma. A line with a single column gets a zero duration.

use std::fs;
use std::path::Path;

use crate::error::{FmError, FmResult};

/// One step of a modulation pattern.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatternEntry {
    /// Offset from the reference LO frequency, in the LO frequency's unit.
    pub offset: f64,
    /// Dwell duration as written in the file. Carried but not used for timing.
    pub duration: f64,
}

/// Ordered sequence of pattern entries. Order is the sweep order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModulationPattern {
    entries: Vec<PatternEntry>,
}

impl ModulationPattern {
    /// Build a pattern from offsets with zero durations.
    pub fn from_offsets(offsets: &[f64]) -> Self {
        offsets
            .iter()
            .map(|&offset| PatternEntry {
                offset,
                duration: 0.0,
            })
            .collect()
    }

    /// Parse pattern text. Errors name the 1-based line that failed.
    pub fn parse(text: &str) -> Result<Self, String> {
        let mut entries = Vec::new();

        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let fields: Vec<&str> = line
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|s| !s.is_empty())
                .collect();

            let parse = |s: &str| -> Result<f64, String> {
                let value: f64 = s
                    .parse()
                    .map_err(|_| format!("line {}: invalid number {s:?}", idx + 1))?;
                if value.is_finite() {
                    Ok(value)
                } else {
                    Err(format!("line {}: non-finite value {s:?}", idx + 1))
                }
            };

            let entry = match fields.as_slice() {
                [offset] => PatternEntry {
                    offset: parse(*offset)?,
                    duration: 0.0,
                },
                [offset, duration] => PatternEntry {
                    offset: parse(*offset)?,
                    duration: parse(*duration)?,
                },
                _ => {
                    return Err(format!(
                        "line {}: expected 1 or 2 columns, got {}",
                        idx + 1,
                        fields.len()
                    ))
                }
            };
            entries.push(entry);
        }

        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[PatternEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over the offsets in sweep order.
    pub fn offsets(&self) -> impl Iterator<Item = f64> + '_ {
        self.entries.iter().map(|e| e.offset)
    }
}

impl FromIterator<PatternEntry> for ModulationPattern {
    fn from_iter<I: IntoIterator<Item = PatternEntry>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Load a modulation pattern from a file.
///
/// # Errors
///
/// Returns [`FmError::PatternFile`] if the file cannot be read or a line does
/// not parse. An empty file loads as an empty pattern; emptiness is rejected
/// later by [`compute_frequency_list`](crate::compute_frequency_list).
pub fn load_pattern(path: impl AsRef<Path>) -> FmResult<ModulationPattern> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|e| FmError::PatternFile {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let pattern = ModulationPattern::parse(&text).map_err(|reason| FmError::PatternFile {
        path: path.to_path_buf(),
        reason,
    })?;

    tracing::debug!(
        "Loaded {} pattern entries from {}",
        pattern.len(),
        path.display()
    );
    Ok(pattern)
}
