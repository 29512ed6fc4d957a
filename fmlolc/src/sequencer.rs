//! FM-mode lifecycle for the synthesizer/spectrometer pair.
//!
//! ```text
//!            initialize            start_fm
//! Unknown ─────────────▶ Configured ────────▶ Running
//!    │  ▲                   ▲  │                 │
//!    │  └── any failure     │  └──── stop_fm ────┤
//!    │                      │        finalize    ▼
//!    └──── finalize ──▶ Baseline ◀───────────────┘
//! ```
//!
//! `finalize` is the reset primitive: it sends the same batches from any state
//! and never depends on an earlier configuration. `initialize` always runs it
//! first. Each operation opens one connection per instrument, sends that
//! instrument's whole batch, and drops the connection before touching the
//! other instrument. The spectrometer goes first so it is ready for sync
//! pulses before the synthesizer starts sweeping.

use std::path::Path;

use tracing::{info, warn};

use crate::channel::{Connector, Instrument};
use crate::commands;
use crate::config::FmConfig;
use crate::error::{FmError, FmResult};
use crate::freqlist::compute_frequency_list_in_range;
use crate::pattern::{load_pattern, ModulationPattern};

/// Default SG-to-LO multiplication factor.
pub const DEFAULT_LO_MULTIPLY: u32 = 8;

/// Default FM and spectrometer sampling rate in Hz.
pub const DEFAULT_FM_RATE_HZ: f64 = 5.0;

/// Lifecycle phase of the instrument pair, as last commanded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum FmState {
    /// Not yet commanded, or an operation failed partway.
    #[strum(to_string = "in unknown state")]
    Unknown,
    /// CW LO, trigger off, default spectrometer timing.
    #[strum(to_string = "at baseline")]
    Baseline,
    /// List mode loaded, waiting for the continuous trigger.
    #[strum(to_string = "configured")]
    Configured,
    /// Synthesizer sweeping on external trigger.
    #[strum(to_string = "running")]
    Running,
}

/// Command batches for one `initialize`, built before any I/O.
struct FmBatches {
    spectrometer: Vec<String>,
    synthesizer: Vec<String>,
}

/// Drives the FM-mode lifecycle through a [`Connector`].
///
/// # Example
///
/// ```no_run
/// use fmlolc::{FmConfig, FmSequencer, ScpiConnector};
///
/// let mut seq = FmSequencer::new(FmConfig::default(), ScpiConnector);
/// seq.initialize("pattern.fmp", 100.0, 8, 5.0)?;
/// seq.start_fm()?;
/// // ... observe ...
/// seq.stop_fm()?;
/// # Ok::<(), fmlolc::FmError>(())
/// ```
pub struct FmSequencer<C: Connector> {
    config: FmConfig,
    connector: C,
    state: FmState,
}

impl<C: Connector> FmSequencer<C> {
    pub fn new(config: FmConfig, connector: C) -> Self {
        Self {
            config,
            connector,
            state: FmState::Unknown,
        }
    }

    pub fn state(&self) -> FmState {
        self.state
    }

    pub fn config(&self) -> &FmConfig {
        &self.config
    }

    /// Override the tracked state without sending anything.
    ///
    /// For callers that know the instruments' state from elsewhere, e.g. a CLI
    /// invoked once per operation.
    pub fn assume_state(&mut self, state: FmState) {
        self.state = state;
    }

    /// Load `pattern_path` and configure both instruments for FM switching.
    ///
    /// # Arguments
    ///
    /// * `pattern_path` - FM pattern file (see [`crate::pattern`])
    /// * `lo_freq` - LO frequency at zero offset, GHz
    /// * `lo_multiply` - SG-to-LO multiplication factor
    /// * `fm_rate` - FM and spectrometer sampling rate, Hz
    pub fn initialize(
        &mut self,
        pattern_path: impl AsRef<Path>,
        lo_freq: f64,
        lo_multiply: u32,
        fm_rate: f64,
    ) -> FmResult<()> {
        let pattern = load_pattern(pattern_path)?;
        self.initialize_with_pattern(&pattern, lo_freq, lo_multiply, fm_rate)
    }

    /// Same as [`initialize`](Self::initialize) with an in-memory pattern.
    ///
    /// All argument checks and the frequency-list derivation happen before
    /// any instrument is contacted.
    pub fn initialize_with_pattern(
        &mut self,
        pattern: &ModulationPattern,
        lo_freq: f64,
        lo_multiply: u32,
        fm_rate: f64,
    ) -> FmResult<()> {
        let batches = self.prepare(pattern, lo_freq, lo_multiply, fm_rate)?;
        self.finalize()?;
        self.configure(&batches)
    }

    /// Validate arguments and build the FM batches without any I/O.
    fn prepare(
        &self,
        pattern: &ModulationPattern,
        lo_freq: f64,
        lo_multiply: u32,
        fm_rate: f64,
    ) -> FmResult<FmBatches> {
        if !lo_freq.is_finite() {
            return Err(FmError::InvalidArgument(format!(
                "LO frequency must be finite, got {lo_freq}"
            )));
        }
        let dt = commands::sampling_period(fm_rate)?;
        let list = compute_frequency_list_in_range(
            pattern,
            lo_freq,
            lo_multiply,
            &self.config.synthesizer_range,
        )?;

        info!(
            "Initializing FM mode: {} points, LO {lo_freq} GHz / {lo_multiply}, {fm_rate} Hz",
            list.len()
        );

        Ok(FmBatches {
            spectrometer: commands::spectrometer_fm(dt),
            synthesizer: commands::synthesizer_fm(dt, &list),
        })
    }

    fn configure(&mut self, batches: &FmBatches) -> FmResult<()> {
        self.tracked(FmState::Configured, |seq| {
            seq.run_batch(Instrument::Spectrometer, &batches.spectrometer)?;
            seq.run_batch(Instrument::Synthesizer, &batches.synthesizer)
        })
    }

    /// Arm the synthesizer's continuous trigger.
    ///
    /// # Errors
    ///
    /// [`FmError::IllegalTransition`] unless the pair is [`FmState::Configured`].
    pub fn start_fm(&mut self) -> FmResult<()> {
        if self.state != FmState::Configured {
            return Err(FmError::IllegalTransition {
                operation: "start FM",
                state: self.state,
            });
        }

        info!("Starting FM");
        self.tracked(FmState::Running, |seq| {
            // No spectrometer commands; the connection still proves it is reachable.
            seq.run_batch(Instrument::Spectrometer, &[])?;
            seq.run_batch(Instrument::Synthesizer, &commands::synthesizer_start())
        })
    }

    /// Stop FM switching and return both instruments to baseline.
    pub fn stop_fm(&mut self) -> FmResult<()> {
        info!("Stopping FM");
        self.tracked(FmState::Unknown, |seq| {
            seq.run_batch(Instrument::Spectrometer, &[])?;
            seq.run_batch(Instrument::Synthesizer, &[])
        })?;
        self.finalize()
    }

    /// Revert both instruments to non-FM mode. Safe to call from any state.
    pub fn finalize(&mut self) -> FmResult<()> {
        info!("Reverting instruments to non-FM mode");
        self.tracked(FmState::Baseline, |seq| {
            seq.run_batch(Instrument::Spectrometer, &commands::spectrometer_baseline())?;
            seq.run_batch(Instrument::Synthesizer, &commands::synthesizer_baseline())
        })
    }

    /// Initialize, start, run `observe`, then stop.
    ///
    /// Argument errors return before any I/O. If a later step fails,
    /// `finalize` is attempted once and the original error is returned. A failing
    /// `finalize` is logged, not retried.
    pub fn run_observation<T>(
        &mut self,
        pattern: &ModulationPattern,
        lo_freq: f64,
        lo_multiply: u32,
        fm_rate: f64,
        observe: impl FnOnce() -> FmResult<T>,
    ) -> FmResult<T> {
        let batches = self.prepare(pattern, lo_freq, lo_multiply, fm_rate)?;

        let result = self
            .finalize()
            .and_then(|_| self.configure(&batches))
            .and_then(|_| self.start_fm())
            .and_then(|_| observe())
            .and_then(|value| self.stop_fm().map(|_| value));

        if let Err(e) = &result {
            if self.state != FmState::Baseline {
                warn!("FM observation failed ({e}); forcing baseline");
                if let Err(reset) = self.finalize() {
                    warn!("finalize after failure also failed: {reset}");
                }
            }
        }
        result
    }

    /// Run `batch`; on success move to `next`, on failure to `Unknown`.
    fn tracked(
        &mut self,
        next: FmState,
        batch: impl FnOnce(&mut Self) -> FmResult<()>,
    ) -> FmResult<()> {
        match batch(self) {
            Ok(()) => {
                self.state = next;
                Ok(())
            }
            Err(e) => {
                self.state = FmState::Unknown;
                Err(e)
            }
        }
    }

    /// Send every command to one instrument over a single scoped connection.
    fn run_batch(&self, instrument: Instrument, batch: &[String]) -> FmResult<()> {
        let endpoint = self.config.endpoint(instrument);
        let mut channel = self.connector.connect(instrument, endpoint)?;
        for command in batch {
            channel.send(command)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelEvent, Fault, RecordingConnector};

    fn sequencer() -> (FmSequencer<RecordingConnector>, RecordingConnector) {
        let recorder = RecordingConnector::new();
        (
            FmSequencer::new(FmConfig::default(), recorder.clone()),
            recorder,
        )
    }

    fn pattern() -> ModulationPattern {
        ModulationPattern::from_offsets(&[0.0, 1.0, -1.0])
    }

    #[test]
    fn test_new_sequencer_is_unknown() {
        let (seq, recorder) = sequencer();
        assert_eq!(seq.state(), FmState::Unknown);
        assert!(recorder.events().is_empty());
    }

    #[test]
    fn test_state_transitions() {
        let (mut seq, _recorder) = sequencer();

        seq.initialize_with_pattern(&pattern(), 100.0, 8, 5.0)
            .unwrap();
        assert_eq!(seq.state(), FmState::Configured);

        seq.start_fm().unwrap();
        assert_eq!(seq.state(), FmState::Running);

        seq.stop_fm().unwrap();
        assert_eq!(seq.state(), FmState::Baseline);
    }

    #[test]
    fn test_start_requires_configured() {
        let (mut seq, recorder) = sequencer();

        for state in [FmState::Unknown, FmState::Baseline, FmState::Running] {
            seq.assume_state(state);
            match seq.start_fm() {
                Err(FmError::IllegalTransition { state: s, .. }) => assert_eq!(s, state),
                other => panic!("expected IllegalTransition, got {other:?}"),
            }
        }
        assert!(recorder.events().is_empty());
    }

    #[test]
    fn test_argument_errors_touch_nothing() {
        let (mut seq, recorder) = sequencer();

        assert!(matches!(
            seq.initialize_with_pattern(&pattern(), 100.0, 8, 0.0),
            Err(FmError::InvalidArgument(_))
        ));
        assert!(matches!(
            seq.initialize_with_pattern(&pattern(), 100.0, 8, 5e-324),
            Err(FmError::InvalidArgument(_))
        ));
        assert!(matches!(
            seq.initialize_with_pattern(&pattern(), 100.0, 0, 5.0),
            Err(FmError::InvalidArgument(_))
        ));
        assert!(matches!(
            seq.initialize_with_pattern(&pattern(), f64::NAN, 8, 5.0),
            Err(FmError::InvalidArgument(_))
        ));
        assert!(matches!(
            seq.initialize_with_pattern(&ModulationPattern::default(), 100.0, 8, 5.0),
            Err(FmError::InvalidPattern(_))
        ));
        assert!(recorder.events().is_empty());
        assert_eq!(seq.state(), FmState::Unknown);
    }

    #[test]
    fn test_rejected_command_aborts_batch_and_closes() {
        let (mut seq, recorder) = sequencer();
        recorder.inject(Fault::RejectCommand {
            instrument: Instrument::Spectrometer,
            command: "CMDBLANKTIME 1000".to_string(),
        });

        assert!(matches!(seq.finalize(), Err(FmError::Command { .. })));
        assert_eq!(seq.state(), FmState::Unknown);

        // Batch stopped at the rejected command, synthesizer never contacted
        assert_eq!(
            recorder.events(),
            vec![
                ChannelEvent::Connect(Instrument::Spectrometer),
                ChannelEvent::Send(
                    Instrument::Spectrometer,
                    "CMDUSEDSECTIONS 1 1 1 1".to_string()
                ),
                ChannelEvent::Send(Instrument::Spectrometer, "CMDSYNCTIME 200000".to_string()),
                ChannelEvent::Send(Instrument::Spectrometer, "CMDBLANKTIME 1000".to_string()),
                ChannelEvent::Close(Instrument::Spectrometer),
            ]
        );
    }

    #[test]
    fn test_failed_start_leaves_unknown() {
        let (mut seq, recorder) = sequencer();
        seq.initialize_with_pattern(&pattern(), 100.0, 8, 5.0)
            .unwrap();

        recorder.inject(Fault::RefuseConnection(Instrument::Synthesizer));
        assert!(matches!(seq.start_fm(), Err(FmError::Connection { .. })));
        assert_eq!(seq.state(), FmState::Unknown);

        recorder.clear_faults();
        seq.finalize().unwrap();
        assert_eq!(seq.state(), FmState::Baseline);
    }

    #[test]
    fn test_run_observation_success() {
        let (mut seq, recorder) = sequencer();

        let value = seq
            .run_observation(&pattern(), 100.0, 8, 5.0, || Ok(42))
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(seq.state(), FmState::Baseline);
        let synth = recorder.commands_for(Instrument::Synthesizer);
        assert!(synth.contains(&"INIT:CONT ON".to_string()));
        assert_eq!(synth.last().map(String::as_str), Some("LIST:TRIG:SOUR IMM"));
    }

    #[test]
    fn test_run_observation_failure_forces_baseline() {
        let (mut seq, recorder) = sequencer();

        let result: FmResult<()> = seq.run_observation(&pattern(), 100.0, 8, 5.0, || {
            Err(FmError::InvalidArgument("observation aborted".to_string()))
        });

        assert!(matches!(result, Err(FmError::InvalidArgument(_))));
        assert_eq!(seq.state(), FmState::Baseline);
        assert_eq!(
            recorder.commands_for(Instrument::Synthesizer).last().map(String::as_str),
            Some("LIST:TRIG:SOUR IMM")
        );
    }
}
