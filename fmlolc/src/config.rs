//! Instrument endpoints and limits, loadable from JSON.
//!
//! ```json
//! {
//!   "spectrometer": { "host": "192.168.1.11", "port": 16210, "protocol": "udp", "prefix": "XFFTS:" },
//!   "synthesizer":  { "host": "192.168.1.12", "port": 5025,  "protocol": "tcp" },
//!   "synthesizer_range": { "min_ghz": 0.00025, "max_ghz": 20.0 }
//! }
//! ```
//!
//! Every section is optional; missing sections take [`FmConfig::default`].

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::channel::{Instrument, InstrumentEndpoint, Protocol};
use crate::error::{FmError, FmResult};
use crate::freqlist::SynthesizerRange;

/// XFFTS command port.
pub const DEFAULT_SPECTROMETER_PORT: u16 = 16210;

/// Raw-socket SCPI port.
pub const DEFAULT_SYNTHESIZER_PORT: u16 = 5025;

/// Configuration for one spectrometer/synthesizer pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FmConfig {
    pub spectrometer: InstrumentEndpoint,
    pub synthesizer: InstrumentEndpoint,
    pub synthesizer_range: SynthesizerRange,
}

impl Default for FmConfig {
    fn default() -> Self {
        Self {
            spectrometer: InstrumentEndpoint::new(
                "192.168.1.11",
                DEFAULT_SPECTROMETER_PORT,
                Protocol::Udp,
            )
            .with_prefix("XFFTS:"),
            synthesizer: InstrumentEndpoint::new(
                "192.168.1.12",
                DEFAULT_SYNTHESIZER_PORT,
                Protocol::Tcp,
            ),
            synthesizer_range: SynthesizerRange::default(),
        }
    }
}

impl FmConfig {
    /// Load a configuration file.
    ///
    /// # Errors
    ///
    /// [`FmError::Config`] if the file cannot be read, is not valid JSON, or
    /// describes an empty synthesizer range.
    pub fn load(path: impl AsRef<Path>) -> FmResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| FmError::Config(format!("{}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| FmError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as pretty-printed JSON.
    pub fn to_json(&self) -> FmResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| FmError::Config(e.to_string()))
    }

    pub fn validate(&self) -> FmResult<()> {
        let range = &self.synthesizer_range;
        if !(range.min_ghz.is_finite() && range.max_ghz.is_finite())
            || range.min_ghz > range.max_ghz
        {
            return Err(FmError::Config(format!(
                "invalid synthesizer range [{}, {}] GHz",
                range.min_ghz, range.max_ghz
            )));
        }
        Ok(())
    }

    pub fn endpoint(&self, instrument: Instrument) -> &InstrumentEndpoint {
        match instrument {
            Instrument::Spectrometer => &self.spectrometer,
            Instrument::Synthesizer => &self.synthesizer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::AckMode;
    use std::io::Write;

    #[test]
    fn test_default_endpoints() {
        let config = FmConfig::default();
        assert_eq!(config.spectrometer.protocol, Protocol::Udp);
        assert_eq!(config.spectrometer.prefix, "XFFTS:");
        assert_eq!(config.synthesizer.port, DEFAULT_SYNTHESIZER_PORT);
        assert_eq!(
            config.endpoint(Instrument::Synthesizer),
            &config.synthesizer
        );
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"synthesizer": {{"host": "sg.local", "port": 5025, "protocol": "tcp", "ack": "error_query"}}}}"#
        )
        .unwrap();

        let config = FmConfig::load(file.path()).unwrap();
        assert_eq!(config.synthesizer.host, "sg.local");
        assert_eq!(config.synthesizer.ack, AckMode::ErrorQuery);
        assert_eq!(config.spectrometer, FmConfig::default().spectrometer);
    }

    #[test]
    fn test_json_round_trip_of_defaults() {
        let config = FmConfig::default();
        let parsed: FmConfig = serde_json::from_str(&config.to_json().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_load_rejects_bad_input() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            FmConfig::load(file.path()),
            Err(FmError::Config(_))
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"synthesizer_range": {{"min_ghz": 20.0, "max_ghz": 1.0}}}}"#
        )
        .unwrap();
        assert!(matches!(
            FmConfig::load(file.path()),
            Err(FmError::Config(_))
        ));

        assert!(FmConfig::load("/nonexistent/fm.json").is_err());
    }
}
