//! FM switching control for the 1st LO synthesizer and the XFFTS spectrometer.
//!
//! In FM mode the LO synthesizer steps through a list of frequencies, one step
//! per spectrometer sync pulse, so that signal and reference spectra can be
//! separated later. This crate derives that frequency list from an FM pattern
//! file and sequences the configuration commands to both instruments.
//!
//! # Modules
//!
//! - [`pattern`] - FM pattern files
//! - [`freqlist`] - pattern to synthesizer frequency list
//! - [`commands`] - literal command batches and number formatting
//! - [`channel`] - scoped command channels (TCP/UDP, recording)
//! - [`config`] - instrument endpoints from JSON
//! - [`sequencer`] - initialize / start / stop / finalize
//!
//! # Example
//!
//! ```no_run
//! use fmlolc::{FmConfig, FmSequencer, ScpiConnector, DEFAULT_FM_RATE_HZ, DEFAULT_LO_MULTIPLY};
//!
//! let config = FmConfig::load("fm.json")?;
//! let mut seq = FmSequencer::new(config, ScpiConnector);
//!
//! seq.initialize("pattern.fmp", 100.0, DEFAULT_LO_MULTIPLY, DEFAULT_FM_RATE_HZ)?;
//! seq.start_fm()?;
//! seq.stop_fm()?;
//! # Ok::<(), fmlolc::FmError>(())
//! ```

pub mod channel;
pub mod commands;
pub mod config;
pub mod error;
pub mod freqlist;
pub mod pattern;
pub mod sequencer;

pub use channel::{Instrument, InstrumentEndpoint, RecordingConnector, ScpiConnector};
pub use config::FmConfig;
pub use error::{FmError, FmResult};
pub use freqlist::{
    compute_frequency_list, compute_frequency_list_in_range, FrequencyList, SynthesizerRange,
};
pub use pattern::{load_pattern, ModulationPattern, PatternEntry};
pub use sequencer::{FmSequencer, FmState, DEFAULT_FM_RATE_HZ, DEFAULT_LO_MULTIPLY};
