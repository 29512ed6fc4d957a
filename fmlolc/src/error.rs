//! Error type shared by every FM-mode operation.

use std::path::PathBuf;

use thiserror::Error;

use crate::channel::Instrument;
use crate::sequencer::FmState;

/// Errors raised while loading patterns, deriving frequency lists or talking
/// to the instruments.
///
/// Nothing in this crate retries or suppresses these. An operation that fails
/// partway leaves the instruments in an unknown state; call
/// [`FmSequencer::finalize`](crate::FmSequencer::finalize) to force baseline.
#[derive(Error, Debug)]
pub enum FmError {
    /// The FM pattern file is missing or malformed.
    #[error("Pattern file {}: {reason}", .path.display())]
    PatternFile {
        /// Path that was being read
        path: PathBuf,
        /// What went wrong (I/O failure or the offending line)
        reason: String,
    },

    /// The pattern is empty or yields a frequency the synthesizer cannot produce.
    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    /// A numeric parameter (FM rate, LO frequency) is out of its domain.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The instrument could not be reached, or the link failed mid-batch.
    #[error("Connection to {instrument} failed: {reason}")]
    Connection {
        /// Which instrument
        instrument: Instrument,
        /// Transport-level description
        reason: String,
    },

    /// The instrument rejected or did not acknowledge a command.
    #[error("{instrument} rejected {command:?}: {reason}")]
    Command {
        /// Which instrument
        instrument: Instrument,
        /// The command text as sent (without prefix)
        command: String,
        /// Instrument reply or timeout description
        reason: String,
    },

    /// The operation is not allowed from the current lifecycle state.
    #[error("Cannot {operation} while {state}")]
    IllegalTransition {
        /// Operation that was attempted
        operation: &'static str,
        /// State the sequencer was in
        state: FmState,
    },

    /// Configuration file could not be read or parsed.
    #[error("Config error: {0}")]
    Config(String),
}

/// Result type for FM-mode operations.
pub type FmResult<T> = Result<T, FmError>;
