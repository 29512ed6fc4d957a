//! Command channels to the two instruments.
//!
//! The sequencer talks to instruments only through [`Connector`] and
//! [`CommandChannel`]. A channel is opened per instrument per operation and
//! closed when it is dropped, so an error in the middle of a batch still
//! releases the connection.
//!
//! - [`ScpiConnector`] opens real TCP or UDP sockets.
//! - [`RecordingConnector`] logs every connect/send/close without any I/O, for
//!   dry runs and tests.

mod recording;
mod scpi;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::FmResult;

pub use recording::{ChannelEvent, Fault, RecordingConnector};
pub use scpi::{ScpiConnector, ScpiSession};

/// The two instruments the sequencer drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum Instrument {
    /// XFFTS digital spectrometer
    #[strum(to_string = "spectrometer")]
    Spectrometer,
    /// 1st LO signal generator
    #[strum(to_string = "synthesizer")]
    Synthesizer,
}

/// Socket type used to reach an instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

/// How a sent command is confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckMode {
    /// Write and move on; the instrument does not reply to set commands.
    #[default]
    None,
    /// Follow every command with `SYST:ERR?` and require error code 0.
    ErrorQuery,
}

/// Where and how to reach one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentEndpoint {
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
    /// Prepended to every command (e.g. `XFFTS:`).
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub ack: AckMode,
    /// Read/write timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

/// Matches the 7 s default used for the other lab controllers.
pub const DEFAULT_TIMEOUT_MS: u64 = 7000;

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

impl InstrumentEndpoint {
    pub fn new(host: impl Into<String>, port: u16, protocol: Protocol) -> Self {
        Self {
            host: host.into(),
            port,
            protocol,
            prefix: String::new(),
            ack: AckMode::None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_ack(mut self, ack: AckMode) -> Self {
        self.ack = ack;
        self
    }

    /// `host:port` for socket APIs.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// An open, scoped connection to one instrument.
///
/// Dropping the channel closes it.
pub trait CommandChannel {
    /// Send one command. Returns once the command is written (and, depending on
    /// the endpoint's [`AckMode`], acknowledged).
    fn send(&mut self, command: &str) -> FmResult<()>;
}

/// Opens [`CommandChannel`]s.
pub trait Connector {
    fn connect(
        &self,
        instrument: Instrument,
        endpoint: &InstrumentEndpoint,
    ) -> FmResult<Box<dyn CommandChannel>>;
}

impl<C: Connector + ?Sized> Connector for &C {
    fn connect(
        &self,
        instrument: Instrument,
        endpoint: &InstrumentEndpoint,
    ) -> FmResult<Box<dyn CommandChannel>> {
        (**self).connect(instrument, endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_json_defaults() {
        let endpoint: InstrumentEndpoint =
            serde_json::from_str(r#"{"host": "10.0.0.5", "port": 5025, "protocol": "tcp"}"#)
                .unwrap();

        assert_eq!(endpoint.address(), "10.0.0.5:5025");
        assert_eq!(endpoint.protocol, Protocol::Tcp);
        assert_eq!(endpoint.prefix, "");
        assert_eq!(endpoint.ack, AckMode::None);
        assert_eq!(endpoint.timeout(), Duration::from_secs(7));
    }

    #[test]
    fn test_endpoint_ack_mode_names() {
        let endpoint: InstrumentEndpoint = serde_json::from_str(
            r#"{"host": "sg", "port": 5025, "protocol": "udp", "ack": "error_query"}"#,
        )
        .unwrap();
        assert_eq!(endpoint.protocol, Protocol::Udp);
        assert_eq!(endpoint.ack, AckMode::ErrorQuery);
    }

    #[test]
    fn test_instrument_display() {
        assert_eq!(Instrument::Spectrometer.to_string(), "spectrometer");
        assert_eq!(Instrument::Synthesizer.to_string(), "synthesizer");
        assert_eq!(Protocol::Udp.to_string(), "udp");
    }
}
