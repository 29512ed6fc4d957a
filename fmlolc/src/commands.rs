//! Command batches for the spectrometer and the synthesizer.
//!
//! Every batch here is the literal text sent to an instrument, minus any
//! endpoint prefix (the spectrometer endpoint adds `XFFTS:` by default). The
//! spectrometer sync time and the synthesizer dwell time are both derived
//! from one sampling period so that acquisition and sweep stay locked.

use crate::error::{FmError, FmResult};
use crate::freqlist::FrequencyList;

/// Blank time (µs) the spectrometer uses while FM switching.
pub const FM_BLANK_TIME_US: u32 = 5000;

/// Spectrometer sync time (µs) restored by finalize.
pub const BASELINE_SYNC_TIME_US: u32 = 200_000;

/// Spectrometer blank time (µs) restored by finalize.
pub const BASELINE_BLANK_TIME_US: u32 = 1000;

/// CW frequency argument restored on the synthesizer list table by finalize (Hz).
pub const BASELINE_LIST_FREQ: &str = "1.75E+10";

/// Sampling period in seconds for an FM rate in Hz.
///
/// # Errors
///
/// [`FmError::InvalidArgument`] unless `fm_rate_hz` is finite and positive and
/// the period, also in microseconds, is finite.
pub fn sampling_period(fm_rate_hz: f64) -> FmResult<f64> {
    if !fm_rate_hz.is_finite() || fm_rate_hz <= 0.0 {
        return Err(FmError::InvalidArgument(format!(
            "FM rate must be a positive number of Hz, got {fm_rate_hz}"
        )));
    }
    let dt = 1.0 / fm_rate_hz;
    if !dt.is_finite() || !(1e6 * dt).is_finite() {
        return Err(FmError::InvalidArgument(format!(
            "FM rate {fm_rate_hz} Hz is too small for a finite sampling period"
        )));
    }
    Ok(dt)
}

/// Format a value as `d.dddE±XX`, the exponential form both instruments accept.
///
/// ```
/// use fmlolc::commands::format_scientific;
///
/// assert_eq!(format_scientific(200000.0), "2.000E+05");
/// assert_eq!(format_scientific(0.2), "2.000E-01");
/// ```
pub fn format_scientific(value: f64) -> String {
    // Rust renders `{:.3E}` as e.g. "2.000E-1"; pad the exponent to two digits with a sign.
    let raw = format!("{value:.3E}");
    match raw.split_once('E') {
        Some((mantissa, exp)) => match exp.parse::<i32>() {
            Ok(exp) => {
                let sign = if exp < 0 { '-' } else { '+' };
                format!("{mantissa}E{sign}{:02}", exp.unsigned_abs())
            }
            Err(_) => raw,
        },
        None => raw,
    }
}

/// Join a frequency list into the `LIST:FREQ` argument, e.g. `12.5,12.625,12.375`.
pub fn format_frequency_list(list: &FrequencyList) -> String {
    list.iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Spectrometer configuration for FM sampling at period `dt` seconds.
pub fn spectrometer_fm(dt: f64) -> Vec<String> {
    vec![
        "CMDUSEDSECTIONS 1 1 1 1".to_string(),
        format!("CMDSYNCTIME {}", format_scientific(1e6 * dt)),
        format!("CMDBLANKTIME {FM_BLANK_TIME_US}"),
        "CONFIG".to_string(),
    ]
}

/// Synthesizer list-mode configuration, externally triggered on the positive edge.
pub fn synthesizer_fm(dt: f64, list: &FrequencyList) -> Vec<String> {
    vec![
        "FREQ:MODE LIST".to_string(),
        "LIST:TYPE LIST".to_string(),
        "LIST:TRIG:SOUR EXT".to_string(),
        format!("LIST:DWEL {}", format_scientific(dt)),
        format!("LIST:FREQ {}", format_frequency_list(list)),
        "TRIG:SLOP POS".to_string(),
    ]
}

/// Arms the synthesizer's continuous trigger.
pub fn synthesizer_start() -> Vec<String> {
    vec!["INIT:CONT ON".to_string()]
}

/// Spectrometer default (non-FM) timing.
pub fn spectrometer_baseline() -> Vec<String> {
    vec![
        "CMDUSEDSECTIONS 1 1 1 1".to_string(),
        format!("CMDSYNCTIME {BASELINE_SYNC_TIME_US}"),
        format!("CMDBLANKTIME {BASELINE_BLANK_TIME_US}"),
        "CONFIG".to_string(),
    ]
}

/// Synthesizer CW mode with the trigger released.
pub fn synthesizer_baseline() -> Vec<String> {
    vec![
        "FREQ:MODE CW".to_string(),
        "INIT:CONT OFF".to_string(),
        format!("LIST:FREQ {BASELINE_LIST_FREQ}"),
        "LIST:TRIG:SOUR IMM".to_string(),
    ]
}
